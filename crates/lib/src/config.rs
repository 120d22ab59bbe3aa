//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.switchboard/config.json`); environment
//! variables override individual fields. A missing file means all defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant running on a Raspberry Pi.";
pub const DEFAULT_MAX_TURNS: u32 = 25;
pub const DEFAULT_AGENT_COMMAND: &str = "claude";

/// Startup-fatal configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no channels enabled; set channels.enabled or ENABLED_CHANNELS")]
    NoChannels,
    #[error("{channel} channel requires {what}")]
    MissingCredential {
        channel: &'static str,
        what: &'static str,
    },
}

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Backend settings (command, model, prompt, turn budget, tools).
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Optional HTTP health listener.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Which channels run, plus per-channel credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    /// Channel names to start (e.g. ["cli", "slack"]). Overridden by ENABLED_CHANNELS.
    #[serde(default = "default_enabled_channels")]
    pub enabled: Vec<String>,

    #[serde(default)]
    pub slack: SlackChannelConfig,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_channels(),
            slack: SlackChannelConfig::default(),
        }
    }
}

fn default_enabled_channels() -> Vec<String> {
    vec!["cli".to_string()]
}

/// Slack Socket Mode credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackChannelConfig {
    /// Bot token (xoxb-...). Overridden by SLACK_BOT_TOKEN.
    pub bot_token: Option<String>,
    /// App-level token with connections:write (xapp-...). Overridden by SLACK_APP_TOKEN.
    pub app_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Agent CLI executable (default "claude"). Overridden by AGENT_COMMAND.
    pub command: Option<String>,
    /// Overridden by AGENT_MODEL.
    pub model: Option<String>,
    /// Overridden by AGENT_SYSTEM_PROMPT.
    pub system_prompt: Option<String>,
    /// Turn budget per call. Overridden by AGENT_MAX_TURNS.
    pub max_turns: Option<u32>,
    /// API key handed to the backend process. When absent the process environment is inherited.
    pub api_key: Option<String>,
    /// Extra tool patterns the backend may call (in addition to the built-in capabilities).
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Extra MCP servers passed to the backend, keyed by server name.
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    /// Seconds between liveness log lines (default 300).
    #[serde(default = "default_heartbeat_secs")]
    pub interval_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    300
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_bind")]
    pub bind: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_health_port() -> u16 {
    15152
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_health_bind(),
            port: default_health_port(),
        }
    }
}

/// Backend settings after applying environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAgent {
    pub command: String,
    pub model: String,
    pub system_prompt: String,
    pub max_turns: u32,
    pub api_key: Option<String>,
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn config_nonempty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Split a comma-separated channel list, dropping blanks.
pub fn parse_channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Enabled channel names: ENABLED_CHANNELS overrides config.
pub fn resolve_enabled_channels(config: &Config) -> Vec<String> {
    enabled_channels_from(env_nonempty("ENABLED_CHANNELS").as_deref(), config)
}

/// Enabled channel names given the ENABLED_CHANNELS value (if set).
pub fn enabled_channels_from(env_value: Option<&str>, config: &Config) -> Vec<String> {
    match env_value {
        Some(raw) => parse_channel_list(raw),
        None => config
            .channels
            .enabled
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

/// Slack (bot, app) tokens: SLACK_BOT_TOKEN / SLACK_APP_TOKEN override config. Both are required.
pub fn resolve_slack_tokens(config: &Config) -> Result<(String, String), ConfigError> {
    slack_tokens_from(
        env_nonempty("SLACK_BOT_TOKEN"),
        env_nonempty("SLACK_APP_TOKEN"),
        config,
    )
}

/// Slack tokens given the environment values (if set), falling back to config.
pub fn slack_tokens_from(
    env_bot: Option<String>,
    env_app: Option<String>,
    config: &Config,
) -> Result<(String, String), ConfigError> {
    let bot = env_bot
        .or_else(|| config_nonempty(config.channels.slack.bot_token.as_ref()))
        .ok_or(ConfigError::MissingCredential {
            channel: "slack",
            what: "SLACK_BOT_TOKEN (or channels.slack.botToken)",
        })?;
    let app = env_app
        .or_else(|| config_nonempty(config.channels.slack.app_token.as_ref()))
        .ok_or(ConfigError::MissingCredential {
            channel: "slack",
            what: "SLACK_APP_TOKEN (or channels.slack.appToken)",
        })?;
    Ok((bot, app))
}

/// Backend settings: AGENT_* environment variables override config, then defaults apply.
pub fn resolve_agent(config: &Config) -> ResolvedAgent {
    let agent = &config.agent;
    let max_turns = match env_nonempty("AGENT_MAX_TURNS") {
        Some(raw) => match raw.parse::<u32>() {
            Ok(n) if n > 0 => Some(n),
            _ => {
                log::warn!("ignoring invalid AGENT_MAX_TURNS {:?}", raw);
                None
            }
        },
        None => None,
    };
    ResolvedAgent {
        command: env_nonempty("AGENT_COMMAND")
            .or_else(|| config_nonempty(agent.command.as_ref()))
            .unwrap_or_else(|| DEFAULT_AGENT_COMMAND.to_string()),
        model: env_nonempty("AGENT_MODEL")
            .or_else(|| config_nonempty(agent.model.as_ref()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        system_prompt: env_nonempty("AGENT_SYSTEM_PROMPT")
            .or_else(|| config_nonempty(agent.system_prompt.as_ref()))
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        max_turns: max_turns
            .or(agent.max_turns.filter(|n| *n > 0))
            .unwrap_or(DEFAULT_MAX_TURNS),
        api_key: config_nonempty(agent.api_key.as_ref()),
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SWITCHBOARD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".switchboard").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default path). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        parse_config_file(&path)?
    };
    Ok((config, path))
}

fn parse_config_file(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}
