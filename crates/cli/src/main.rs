use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use switchboard::agent::{AgentGateway, AgentSettings};
use switchboard::backend::ProcessBackend;
use switchboard::config;
use switchboard::supervisor::{self, Supervisor};
use switchboard::tools;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Switchboard: one agent, many chat channels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: SWITCHBOARD_CONFIG_PATH or ~/.switchboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run every enabled channel against the agent backend until SIGINT/SIGTERM (default).
    Run {
        /// Config file path (default: SWITCHBOARD_CONFIG_PATH or ~/.switchboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Serve the built-in tools over MCP stdio. Started by the agent backend, not by hand.
    #[command(hide = true)]
    ToolsServer,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("switchboard {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::ToolsServer) => {
            if let Err(e) = tools::serve_stdio().await {
                log::error!("tools server failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config }) => run_or_exit(config).await,
        None => run_or_exit(None).await,
    }
}

async fn run_or_exit(config_path: Option<PathBuf>) {
    if let Err(e) = run(config_path).await {
        log::error!("switchboard failed: {:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = switchboard::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, path) = config::load_config(config_path)?;
    log::info!("using config {}", path.display());

    let agent = config::resolve_agent(&config);
    let mut allowed_tools = Vec::new();
    let mcp_config = match std::env::current_exe() {
        Ok(exe) => {
            allowed_tools.extend(tools::allowed_tool_names());
            Some(tools::mcp_config(&exe, &config.agent.mcp_servers))
        }
        Err(e) => {
            log::warn!("cannot locate own executable, built-in tools disabled: {}", e);
            None
        }
    };
    allowed_tools.extend(config.agent.allowed_tools.iter().cloned());
    log::info!(
        "agent backend: {} (model {}, max turns {})",
        agent.command,
        agent.model,
        agent.max_turns
    );

    let backend = ProcessBackend::new(agent.command)
        .with_api_key(agent.api_key)
        .with_mcp_config(mcp_config);
    let gateway = Arc::new(AgentGateway::new(
        Arc::new(backend),
        AgentSettings {
            model: agent.model,
            system_prompt: agent.system_prompt,
            max_turns: agent.max_turns,
            allowed_tools,
        },
    ));

    let registry = supervisor::build_registry(&config, gateway)?;
    let mut runner = Supervisor::new(
        registry,
        Duration::from_secs(config.heartbeat.interval_secs),
    )?;
    if config.health.enabled {
        let addr = format!("{}:{}", config.health.bind.trim(), config.health.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding health listener to {}", addr))?;
        runner = runner.with_health(listener);
    }

    runner.run(supervisor::shutdown_signal()).await;
    Ok(())
}
