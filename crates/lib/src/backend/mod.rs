//! Agent backend boundary.
//!
//! A backend takes a prompt envelope plus an optional resume handle and answers with a staged
//! stream of [`AgentEvent`]s rather than a single value.

mod process;

pub use process::ProcessBackend;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// One staged event of a backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Session initialization; may carry a freshly issued session id.
    Init { session_id: Option<String> },
    /// Assistant-authored text fragment.
    Content { text: String },
    /// Terminal event; may carry the final session id.
    Result { session_id: Option<String> },
}

/// Everything the backend needs for one call.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    /// Session handle to resume, when the conversation already has one.
    pub resume: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub max_turns: u32,
    /// Tool names (or patterns) the backend may call without asking.
    pub allowed_tools: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to start backend process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("backend i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed backend event: {0}")]
    Malformed(String),
    #[error("backend reported an error: {0}")]
    Backend(String),
    #[error("backend exited with {0}")]
    Exit(String),
}

/// Staged response stream. An `Err` item ends the call.
pub type EventStream = BoxStream<'static, Result<AgentEvent, BackendError>>;

/// Conversational agent backend.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Start a call; events are pulled from the returned stream.
    async fn query(&self, request: AgentRequest) -> Result<EventStream, BackendError>;
}
