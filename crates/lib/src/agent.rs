//! Agent gateway: resolve the conversation's session handle, call the backend, collect the reply.
//!
//! This is the containment boundary for backend failures: whatever goes wrong during a call,
//! the caller gets a fixed apology string and the other conversations are unaffected.

use crate::backend::{AgentBackend, AgentEvent, AgentRequest, BackendError};
use crate::channels::MessageHandler;
use crate::message::Message;
use crate::session::SessionRegistry;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;

/// Reply when the backend call fails at any point.
pub const APOLOGY_REPLY: &str = "Sorry, something went wrong. Please try again.";
/// Reply when the backend succeeds without producing any text.
pub const EMPTY_REPLY: &str = "I have nothing to say.";

/// Per-call backend options that do not depend on the message.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub system_prompt: String,
    pub max_turns: u32,
    pub allowed_tools: Vec<String>,
}

/// Owns the session registry and answers messages through one backend.
pub struct AgentGateway {
    backend: Arc<dyn AgentBackend>,
    settings: AgentSettings,
    sessions: SessionRegistry,
}

impl AgentGateway {
    pub fn new(backend: Arc<dyn AgentBackend>, settings: AgentSettings) -> Self {
        Self {
            backend,
            settings,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Reply text for a message. Never empty and never an error.
    pub async fn get_reply(&self, message: &Message) -> String {
        let key = message.conversation_key();
        match self.run_query(&key, message).await {
            Ok(parts) if parts.is_empty() => EMPTY_REPLY.to_string(),
            Ok(parts) => parts.join("\n"),
            Err(e) => {
                log::error!("agent: query failed for {}: {}", key, e);
                APOLOGY_REPLY.to_string()
            }
        }
    }

    /// Drive one backend call to completion and return the text fragments in arrival order.
    ///
    /// An init-stage session id is stored as soon as it arrives, so it survives a later failure.
    /// The terminal session id is stored only when the whole stream succeeded.
    async fn run_query(&self, key: &str, message: &Message) -> Result<Vec<String>, BackendError> {
        let resume = self.sessions.get(key).await;
        log::debug!(
            "agent: {} -> backend (resume: {})",
            key,
            resume.as_deref().unwrap_or("new session")
        );
        let request = AgentRequest {
            prompt: message.format_for_agent(),
            resume,
            model: self.settings.model.clone(),
            system_prompt: self.settings.system_prompt.clone(),
            max_turns: self.settings.max_turns,
            allowed_tools: self.settings.allowed_tools.clone(),
        };

        let mut stream = self.backend.query(request).await?;
        let mut parts = Vec::new();
        let mut final_session = None;
        while let Some(event) = stream.next().await {
            match event? {
                AgentEvent::Init { session_id } => {
                    if let Some(id) = session_id {
                        self.sessions.upsert(key, id).await;
                    }
                }
                AgentEvent::Content { text } => parts.push(text),
                AgentEvent::Result { session_id } => {
                    if session_id.is_some() {
                        final_session = session_id;
                    }
                }
            }
        }
        if let Some(id) = final_session {
            self.sessions.upsert(key, id).await;
        }
        Ok(parts)
    }
}

#[async_trait]
impl MessageHandler for AgentGateway {
    async fn handle(&self, message: Message) -> String {
        self.get_reply(&message).await
    }
}
