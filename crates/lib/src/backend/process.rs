//! Agent CLI subprocess backend.
//! Runs the agent CLI in print mode with `--output-format stream-json` and maps its NDJSON
//! output to staged events.

use super::{AgentBackend, AgentEvent, AgentRequest, BackendError, EventStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

const DEFAULT_COMMAND: &str = "claude";

/// Backend that spawns one agent CLI process per call.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    command: String,
    api_key: Option<String>,
    /// Value passed as `--mcp-config` (JSON with an `mcpServers` object).
    mcp_config: Option<serde_json::Value>,
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

impl ProcessBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            api_key: None,
            mcp_config: None,
        }
    }

    /// API key exported to the child as ANTHROPIC_API_KEY. When unset the child inherits the environment.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_mcp_config(mut self, mcp_config: Option<serde_json::Value>) -> Self {
        self.mcp_config = mcp_config;
        self
    }
}

/// Command-line arguments for one call.
pub(crate) fn build_args(
    request: &AgentRequest,
    mcp_config: Option<&serde_json::Value>,
) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        request.prompt.clone(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
        "--model".to_string(),
        request.model.clone(),
        "--max-turns".to_string(),
        request.max_turns.to_string(),
        "--permission-mode".to_string(),
        "bypassPermissions".to_string(),
    ];
    if !request.system_prompt.trim().is_empty() {
        args.push("--system-prompt".to_string());
        args.push(request.system_prompt.clone());
    }
    if !request.allowed_tools.is_empty() {
        args.push("--allowedTools".to_string());
        args.push(request.allowed_tools.join(","));
    }
    if let Some(cfg) = mcp_config {
        args.push("--mcp-config".to_string());
        args.push(cfg.to_string());
    }
    if let Some(ref sid) = request.resume {
        args.push("--resume".to_string());
        args.push(sid.clone());
    }
    args
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Map one NDJSON line to zero or more events. Unknown event types map to nothing.
pub(crate) fn parse_line(line: &str) -> Result<Vec<AgentEvent>, BackendError> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| BackendError::Malformed(format!("{}: {}", e, truncate(line, 120))))?;
    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BackendError::Malformed(format!("missing type: {}", truncate(line, 120))))?;
    let session_id = value
        .get("session_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);

    match kind {
        "system" => {
            if value.get("subtype").and_then(|v| v.as_str()) == Some("init") {
                Ok(vec![AgentEvent::Init { session_id }])
            } else {
                Ok(Vec::new())
            }
        }
        "assistant" => {
            let blocks = value
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
                .map(Vec::as_slice)
                .unwrap_or_default();
            Ok(blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .map(|text| AgentEvent::Content {
                    text: text.to_string(),
                })
                .collect())
        }
        "result" => {
            if value.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false) {
                let detail = value
                    .get("result")
                    .and_then(|v| v.as_str())
                    .or_else(|| value.get("subtype").and_then(|v| v.as_str()))
                    .unwrap_or("unknown error");
                return Err(BackendError::Backend(detail.to_string()));
            }
            Ok(vec![AgentEvent::Result { session_id }])
        }
        _ => Ok(Vec::new()),
    }
}

struct StreamState {
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    pending: VecDeque<AgentEvent>,
    finished: bool,
}

#[async_trait]
impl AgentBackend for ProcessBackend {
    async fn query(&self, request: AgentRequest) -> Result<EventStream, BackendError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(build_args(&request, self.mcp_config.as_ref()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref key) = self.api_key {
            cmd.env("ANTHROPIC_API_KEY", key);
        }
        log::debug!(
            "backend: spawning {} (resume: {})",
            self.command,
            request.resume.as_deref().unwrap_or("none")
        );
        let mut child = cmd.spawn().map_err(BackendError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Malformed("backend stdout not captured".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("backend stderr: {}", line);
                }
            });
        }

        let state = StreamState {
            lines: BufReader::new(stdout).lines(),
            child,
            pending: VecDeque::new(),
            finished: false,
        };
        let stream = futures_util::stream::try_unfold(state, |mut st| async move {
            loop {
                if let Some(event) = st.pending.pop_front() {
                    return Ok::<_, BackendError>(Some((event, st)));
                }
                if st.finished {
                    return Ok(None);
                }
                match st.lines.next_line().await? {
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        st.pending.extend(parse_line(line)?);
                    }
                    None => {
                        let status = st.child.wait().await?;
                        if !status.success() {
                            return Err(BackendError::Exit(status.to_string()));
                        }
                        st.finished = true;
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
