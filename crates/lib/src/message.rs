//! Normalized inbound message shared by every channel.
//!
//! Adapters translate their native events into a [`Message`]; the agent gateway only ever
//! sees the prompt envelope built from it, never the native payload.

use chrono::{DateTime, Local, Utc};
use std::sync::Arc;

/// Whether a message arrived in a one-to-one conversation or a shared space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatType {
    Direct,
    Group,
}

impl ChatType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatType::Direct => "direct",
            ChatType::Group => "group",
        }
    }
}

/// One inbound user utterance, independent of the channel that produced it.
#[derive(Debug, Clone)]
pub struct Message {
    pub body: String,
    /// Name of the adapter that produced the message (e.g. "cli", "slack").
    pub channel: String,
    pub sender_id: String,
    /// Display name; falls back to `sender_id` when absent.
    pub sender_name: Option<String>,
    pub chat_type: ChatType,
    /// Set for group messages only.
    pub group_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Native event as received by the adapter. Shared read-only.
    pub raw: Option<Arc<serde_json::Value>>,
}

impl Message {
    /// Direct message captured now.
    pub fn direct(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            sender_name: None,
            chat_type: ChatType::Direct,
            group_id: None,
            timestamp: Utc::now(),
            raw: None,
        }
    }

    /// Group message captured now.
    pub fn group(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        group_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            chat_type: ChatType::Group,
            group_id: Some(group_id.into()),
            ..Self::direct(channel, sender_id, body)
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_raw(mut self, raw: Arc<serde_json::Value>) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Name shown to the agent: the sender name when set and non-empty, otherwise the sender id.
    pub fn display_name(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.sender_id)
    }

    /// Key grouping every message of one logical conversation.
    ///
    /// Group messages with a group id share one conversation per group; everything else is
    /// keyed by sender.
    pub fn conversation_key(&self) -> String {
        match (self.chat_type, self.group_id.as_deref()) {
            (ChatType::Group, Some(group)) if !group.is_empty() => {
                format!("{}:{}", self.channel, group)
            }
            _ => format!("{}:{}", self.channel, self.sender_id),
        }
    }

    /// Single-line prompt envelope: `[channel name HH:MM] body`, time in local time.
    pub fn format_for_agent(&self) -> String {
        let time = self.timestamp.with_timezone(&Local).format("%H:%M");
        format!(
            "[{} {} {}] {}",
            self.channel,
            self.display_name(),
            time,
            self.body
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn group_key_uses_group_id() {
        let m = Message::group("slack", "U1", "C1", "hi");
        assert_eq!(m.conversation_key(), "slack:C1");
    }

    #[test]
    fn direct_key_uses_sender() {
        let m = Message::direct("cli", "cli-user", "hello");
        assert_eq!(m.conversation_key(), "cli:cli-user");
    }

    #[test]
    fn group_without_group_id_falls_back_to_sender() {
        let mut m = Message::group("slack", "U1", "", "hi");
        assert_eq!(m.conversation_key(), "slack:U1");
        m.group_id = None;
        assert_eq!(m.conversation_key(), "slack:U1");
    }

    #[test]
    fn key_ignores_body_time_and_name() {
        let a = Message::group("slack", "U1", "C9", "first")
            .with_sender_name("alice")
            .with_timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let b = Message::group("slack", "U1", "C9", "second")
            .with_timestamp(Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap());
        assert_eq!(a.conversation_key(), b.conversation_key());
    }

    #[test]
    fn envelope_has_channel_name_time_and_body() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 0).unwrap();
        let m = Message::direct("cli", "cli-user", "hello")
            .with_sender_name("You")
            .with_timestamp(ts);
        let expected_time = ts.with_timezone(&Local).format("%H:%M").to_string();
        assert_eq!(
            m.format_for_agent(),
            format!("[cli You {}] hello", expected_time)
        );
    }

    #[test]
    fn envelope_falls_back_to_sender_id() {
        let m = Message::direct("slack", "U42", "ping").with_sender_name("");
        assert!(m.format_for_agent().starts_with("[slack U42 "));
        assert!(m.format_for_agent().ends_with("] ping"));
    }
}
