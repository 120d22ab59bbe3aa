//! Conversation session registry: conversation key -> resumable backend session handle.
//!
//! Entries are created the first time the backend reports a handle for a key and overwritten
//! whenever it reports another one. Nothing is persisted; a restart starts every conversation fresh.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Opaque handle issued by the backend to resume a conversation.
pub type SessionHandle = String;

/// In-memory map of conversation keys to session handles.
///
/// Each read or write takes the lock for a single entry operation, so concurrent conversations
/// never observe a partially written entry. There is no per-key serialization: two calls racing
/// on the same key both write, and the later write wins.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Current handle for the conversation, if the backend has issued one.
    pub async fn get(&self, key: &str) -> Option<SessionHandle> {
        self.inner.read().await.get(key).cloned()
    }

    /// Insert or replace the handle for a conversation. Returns the previous handle.
    pub async fn upsert(
        &self,
        key: impl Into<String>,
        handle: impl Into<SessionHandle>,
    ) -> Option<SessionHandle> {
        self.inner.write().await.insert(key.into(), handle.into())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
