//! Slack channel over Socket Mode: events arrive on a WebSocket opened via
//! `apps.connections.open`, replies go out through `chat.postMessage`.
//!
//! Direct messages (`im`/`mpim`) and app mentions are dispatched. Mentions in channels are
//! answered in a thread anchored at the thread root (or the message itself); DMs get a
//! top-level reply.

use crate::channels::registry::{Channel, ChannelError, MessageHandler};
use crate::channels::stop::StopSignal;
use crate::message::Message;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub const SLACK_CHANNEL: &str = "slack";
const SLACK_API_BASE: &str = "https://slack.com/api";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl ApiResponse {
    fn error_text(&self) -> String {
        self.error.clone().unwrap_or_else(|| "unknown_error".to_string())
    }
}

/// Socket Mode envelope (`hello`, `events_api`, `disconnect`, ...).
#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// The subset of a Slack `message` / `app_mention` event that routing needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: String,
    /// `im`, `mpim`, `channel`, `group`. Absent on `app_mention` events.
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// Set for edits, deletions, joins and other non-user messages.
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl SlackEvent {
    pub fn is_direct(&self) -> bool {
        matches!(self.channel_type.as_deref(), Some("im") | Some("mpim"))
    }
}

/// Where a reply to an event goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel: String,
    /// Thread anchor; `None` posts a top-level message.
    pub thread_ts: Option<String>,
}

/// Normalize a Slack event, or `None` if it must not reach the handler.
pub fn normalize_event(
    bot_user_id: Option<&str>,
    event: &SlackEvent,
    raw: Arc<serde_json::Value>,
) -> Option<(Message, ReplyTarget)> {
    match event.kind.as_str() {
        // Channel messages arrive again as app_mention; only DMs are taken from `message`.
        "message" if event.is_direct() => {}
        "app_mention" => {}
        _ => return None,
    }
    if event.subtype.is_some() || event.bot_id.is_some() {
        return None;
    }
    let user = event.user.as_deref().unwrap_or("unknown");
    if bot_user_id == Some(user) {
        return None;
    }

    let mut text = event.text.clone().unwrap_or_default();
    if let Some(bot) = bot_user_id {
        text = text.replace(&format!("<@{}>", bot), "");
    }
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let (message, thread_ts) = if event.is_direct() {
        (Message::direct(SLACK_CHANNEL, user, text), None)
    } else {
        let anchor = event
            .thread_ts
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| event.ts.clone());
        (
            Message::group(SLACK_CHANNEL, user, event.channel.clone(), text),
            Some(anchor),
        )
    };
    Some((
        message.with_sender_name(user).with_raw(raw),
        ReplyTarget {
            channel: event.channel.clone(),
            thread_ts,
        },
    ))
}

/// Slack Web API calls used by the channel.
#[derive(Clone)]
struct SlackApi {
    base_url: String,
    bot_token: String,
    app_token: String,
    client: reqwest::Client,
}

impl SlackApi {
    async fn call(
        &self,
        method: &str,
        token: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, String> {
        let url = format!("{}/{}", self.base_url, method);
        let mut req = self.client.post(&url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req.send().await.map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("{} failed: {} {}", method, status, body));
        }
        res.json().await.map_err(|e| e.to_string())
    }

    /// `auth.test` with the bot token; returns the bot's own user id.
    async fn auth_test(&self) -> Result<String, ChannelError> {
        let res = self
            .call("auth.test", &self.bot_token, None)
            .await
            .map_err(ChannelError::Transport)?;
        if !res.ok {
            return Err(ChannelError::Auth(res.error_text()));
        }
        res.user_id
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ChannelError::Auth("auth.test returned no user_id".to_string()))
    }

    /// `apps.connections.open` with the app token; returns the WebSocket URL.
    async fn open_connection(&self) -> Result<String, ChannelError> {
        let res = self
            .call("apps.connections.open", &self.app_token, None)
            .await
            .map_err(ChannelError::Transport)?;
        if !res.ok {
            return Err(ChannelError::Transport(format!(
                "apps.connections.open: {}",
                res.error_text()
            )));
        }
        res.url
            .ok_or_else(|| ChannelError::Transport("apps.connections.open returned no url".to_string()))
    }

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = serde_json::Value::String(ts.to_string());
        }
        let res = self
            .call("chat.postMessage", &self.bot_token, Some(body))
            .await
            .map_err(ChannelError::Delivery)?;
        if !res.ok {
            return Err(ChannelError::Delivery(format!(
                "chat.postMessage: {}",
                res.error_text()
            )));
        }
        Ok(())
    }
}

/// Slack Socket Mode connector.
pub struct SlackChannel {
    api: SlackApi,
    handler: Arc<dyn MessageHandler>,
    bot_user_id: OnceLock<String>,
    stop: StopSignal,
}

impl SlackChannel {
    pub fn new(
        bot_token: impl Into<String>,
        app_token: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            api: SlackApi {
                base_url: SLACK_API_BASE.to_string(),
                bot_token: bot_token.into(),
                app_token: app_token.into(),
                client: reqwest::Client::new(),
            },
            handler,
            bot_user_id: OnceLock::new(),
            stop: StopSignal::new(),
        }
    }

    /// Point Web API calls at another base URL (tests, proxies).
    pub fn with_api_base(mut self, base_url: impl Into<String>) -> Self {
        self.api.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Own user id learned during `start`, if any.
    pub fn bot_user_id(&self) -> Option<&str> {
        self.bot_user_id.get().map(String::as_str)
    }

    /// Sleep before reconnecting. Returns false when stop was requested meanwhile.
    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = self.stop.triggered() => false,
            _ = tokio::time::sleep(RECONNECT_DELAY) => true,
        }
    }

    /// Serve one socket connection until it closes, Slack asks us to reconnect, or stop is requested.
    async fn run_socket(&self, url: &str, tasks: &mut JoinSet<()>) -> Result<(), ChannelError> {
        let connect = tokio::select! {
            _ = self.stop.triggered() => return Ok(()),
            r = tokio_tungstenite::connect_async(url) => r,
        };
        let (ws, _) = connect.map_err(|e| ChannelError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();
        log::debug!("slack: socket connected");

        loop {
            let frame = tokio::select! {
                _ = self.stop.triggered() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = done {
                        if !e.is_cancelled() {
                            log::warn!("slack: event task failed: {}", e);
                        }
                    }
                    continue;
                }
                frame = stream.next() => frame,
            };
            let text = match frame {
                None => return Ok(()),
                Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Close(_))) => return Ok(()),
                Some(Ok(_)) => continue,
            };
            let envelope: SocketEnvelope = match serde_json::from_str(&text) {
                Ok(e) => e,
                Err(e) => {
                    log::debug!("slack: ignoring unparsable frame: {}", e);
                    continue;
                }
            };
            if let Some(ref id) = envelope.envelope_id {
                let ack = serde_json::json!({ "envelope_id": id }).to_string();
                sink.send(WsMessage::Text(ack))
                    .await
                    .map_err(|e| ChannelError::Transport(e.to_string()))?;
            }
            match envelope.kind.as_str() {
                "hello" => log::debug!("slack: socket hello"),
                "disconnect" => {
                    log::info!(
                        "slack: disconnect requested ({}), reconnecting",
                        envelope.reason.as_deref().unwrap_or("no reason")
                    );
                    return Ok(());
                }
                "events_api" => {
                    if let Some(payload) = envelope.payload {
                        self.dispatch(payload, tasks);
                    }
                }
                other => log::debug!("slack: ignoring envelope type {}", other),
            }
        }
    }

    /// Normalize an `events_api` payload and hand it to the handler on its own task.
    fn dispatch(&self, payload: serde_json::Value, tasks: &mut JoinSet<()>) {
        let Some(raw) = payload.get("event").cloned() else {
            return;
        };
        let event: SlackEvent = match serde_json::from_value(raw.clone()) {
            Ok(e) => e,
            Err(e) => {
                log::debug!("slack: ignoring malformed event: {}", e);
                return;
            }
        };
        let Some((message, target)) = normalize_event(self.bot_user_id(), &event, Arc::new(raw))
        else {
            return;
        };
        let handler = self.handler.clone();
        let api = self.api.clone();
        tasks.spawn(async move {
            let reply = handler.handle(message).await;
            if let Err(e) = api
                .post_message(&target.channel, &reply, target.thread_ts.as_deref())
                .await
            {
                log::warn!("slack: reply to {} failed: {}", target.channel, e);
            }
        });
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        SLACK_CHANNEL
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let user_id = loop {
            let auth = tokio::select! {
                biased;
                _ = self.stop.triggered() => return Ok(()),
                r = self.api.auth_test() => r,
            };
            match auth {
                Ok(user_id) => break user_id,
                Err(e @ ChannelError::Auth(_)) => return Err(e),
                Err(e) => {
                    log::warn!("slack: auth.test: {}; retrying in {:?}", e, RECONNECT_DELAY);
                    if !self.backoff().await {
                        return Ok(());
                    }
                }
            }
        };
        log::info!("slack: connected as <@{}>", user_id);
        let _ = self.bot_user_id.set(user_id);

        // Dropping the set on return aborts replies still in flight.
        let mut tasks = JoinSet::new();
        while !self.stop.is_triggered() {
            let url = tokio::select! {
                biased;
                _ = self.stop.triggered() => break,
                r = self.api.open_connection() => r,
            };
            let result = match url {
                Ok(url) => self.run_socket(&url, &mut tasks).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) if self.stop.is_triggered() => break,
                Ok(()) => log::debug!("slack: socket closed, reconnecting"),
                Err(e) => {
                    log::warn!("slack: {}; retrying in {:?}", e, RECONNECT_DELAY);
                    if !self.backoff().await {
                        break;
                    }
                }
            }
        }
        log::info!("slack: socket loop stopped");
        Ok(())
    }

    async fn stop(&self) {
        self.stop.trigger();
    }

    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), ChannelError> {
        self.api.post_message(recipient_id, text, None).await
    }
}
