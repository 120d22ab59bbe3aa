//! Channel contract and the registry of enabled channels.

use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The transport rejected an outbound message.
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// The native connection failed or could not be established.
    #[error("transport failed: {0}")]
    Transport(String),
    /// The remote service refused our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),
}

/// Turns a normalized message into reply text. Never fails: implementations return a
/// fallback string instead of an error.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> String;
}

/// A message source/sink. Each adapter receives its single [`MessageHandler`] at construction.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name (e.g. "cli", "slack"); also the `channel` field of produced messages.
    fn name(&self) -> &str;

    /// Accept native events until [`Channel::stop`] is called or the transport fails for good.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Ask a running `start` to return. Safe before `start` and safe to repeat.
    async fn stop(&self);

    /// Deliver `text` to `recipient_id` on this channel's transport.
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), ChannelError>;
}

/// Names of channels whose `start` is currently running. Shared with the liveness task.
#[derive(Clone, Default)]
pub struct ActiveChannels {
    inner: Arc<RwLock<Vec<String>>>,
}

impl ActiveChannels {
    pub async fn insert(&self, name: &str) {
        let mut g = self.inner.write().await;
        if !g.iter().any(|n| n == name) {
            g.push(name.to_string());
        }
    }

    pub async fn remove(&self, name: &str) {
        self.inner.write().await.retain(|n| n != name);
    }

    /// Active names, oldest first.
    pub async fn names(&self) -> Vec<String> {
        self.inner.read().await.clone()
    }
}

/// Enabled channels in registration order, plus the set currently running.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Vec<Arc<dyn Channel>>,
    active: ActiveChannels,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel. A second channel with an already registered name is ignored.
    pub fn register(&mut self, channel: Arc<dyn Channel>) -> bool {
        if self.channels.iter().any(|c| c.name() == channel.name()) {
            log::warn!("channel {:?} listed more than once, ignoring duplicate", channel.name());
            return false;
        }
        self.channels.push(channel);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.iter().find(|c| c.name() == name).cloned()
    }

    pub fn channels(&self) -> &[Arc<dyn Channel>] {
        &self.channels
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn active(&self) -> ActiveChannels {
        self.active.clone()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Channel for Named {
        fn name(&self) -> &str {
            self.0
        }
        async fn start(&self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn stop(&self) {}
        async fn send(&self, _recipient_id: &str, _text: &str) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[test]
    fn register_keeps_order_and_rejects_duplicates() {
        let mut reg = ChannelRegistry::new();
        assert!(reg.register(Arc::new(Named("slack"))));
        assert!(reg.register(Arc::new(Named("cli"))));
        assert!(!reg.register(Arc::new(Named("slack"))));
        assert_eq!(reg.names(), vec!["slack", "cli"]);
        assert!(reg.get("cli").is_some());
        assert!(reg.get("telegram").is_none());
    }

    #[tokio::test]
    async fn active_set_tracks_insert_and_remove() {
        let active = ActiveChannels::default();
        active.insert("cli").await;
        active.insert("slack").await;
        active.insert("cli").await;
        assert_eq!(active.names().await, vec!["cli", "slack"]);
        active.remove("cli").await;
        assert_eq!(active.names().await, vec!["slack"]);
    }
}
