//! Supervisor: build the enabled channels, run them concurrently with a heartbeat, shut down once.

use crate::channels::{
    ActiveChannels, Channel, ChannelRegistry, ConsoleChannel, MessageHandler, SlackChannel,
    StopSignal, CONSOLE_CHANNEL, SLACK_CHANNEL,
};
use crate::config::{self, Config, ConfigError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long channel tasks get to return on their own after `stop()` before they are aborted.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Requests shutdown of a running supervisor. Cloneable; only the first trigger has an effect.
#[derive(Clone)]
pub struct ShutdownTrigger {
    signal: Arc<StopSignal>,
}

impl ShutdownTrigger {
    /// Returns true if this call initiated shutdown.
    pub fn trigger(&self) -> bool {
        self.signal.trigger()
    }

    pub fn is_triggered(&self) -> bool {
        self.signal.is_triggered()
    }

    async fn triggered(&self) {
        self.signal.triggered().await
    }
}

/// Construct every enabled channel with `handler` as its message handler, in the configured order.
///
/// Unknown names are skipped with a warning. A known channel missing its credentials is an error.
pub fn build_registry(
    config: &Config,
    handler: Arc<dyn MessageHandler>,
) -> Result<ChannelRegistry, ConfigError> {
    registry_for(
        &config::resolve_enabled_channels(config),
        || config::resolve_slack_tokens(config),
        handler,
    )
}

fn registry_for(
    names: &[String],
    slack_tokens: impl Fn() -> Result<(String, String), ConfigError>,
    handler: Arc<dyn MessageHandler>,
) -> Result<ChannelRegistry, ConfigError> {
    let mut registry = ChannelRegistry::new();
    for name in names {
        let channel: Arc<dyn Channel> = match name.as_str() {
            CONSOLE_CHANNEL => Arc::new(ConsoleChannel::new(handler.clone())),
            SLACK_CHANNEL => {
                let (bot, app) = slack_tokens()?;
                Arc::new(SlackChannel::new(bot, app, handler.clone()))
            }
            other => {
                log::warn!("unknown channel {:?} in enabled channels, skipping", other);
                continue;
            }
        };
        registry.register(channel);
    }
    Ok(registry)
}

pub struct Supervisor {
    registry: ChannelRegistry,
    heartbeat: Duration,
    health: Option<TcpListener>,
    shutdown: ShutdownTrigger,
    state: watch::Sender<SupervisorState>,
}

impl Supervisor {
    /// Zero channels is a configuration error; nothing is started.
    pub fn new(registry: ChannelRegistry, heartbeat: Duration) -> Result<Self, ConfigError> {
        if registry.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        let (state, _) = watch::channel(SupervisorState::Idle);
        Ok(Self {
            registry,
            heartbeat,
            health: None,
            shutdown: ShutdownTrigger {
                signal: Arc::new(StopSignal::new()),
            },
            state,
        })
    }

    /// Also serve the health endpoint on `listener` while running.
    pub fn with_health(mut self, listener: TcpListener) -> Self {
        self.health = Some(listener);
        self
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Observe state transitions (e.g. from a test or a status task).
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Run until `signal` resolves or the shutdown trigger fires, then stop every channel and
    /// drain all tasks.
    pub async fn run(mut self, signal: impl Future<Output = ()>) {
        let active = self.registry.active();
        log::info!(
            "supervisor running channels: {}",
            self.registry.names().join(", ")
        );

        // Marked active before the tasks run so the first heartbeat already lists them.
        let mut channel_tasks = Vec::with_capacity(self.registry.len());
        for channel in self.registry.channels() {
            active.insert(channel.name()).await;
            channel_tasks.push(spawn_channel(
                channel.clone(),
                active.clone(),
                self.shutdown.clone(),
            ));
        }
        let mut aux_tasks: Vec<JoinHandle<()>> = Vec::new();
        if self.heartbeat.is_zero() {
            log::warn!("heartbeat interval is zero, heartbeat disabled");
        } else {
            aux_tasks.push(tokio::spawn(heartbeat(
                self.heartbeat,
                active.clone(),
                log_heartbeat,
            )));
        }
        self.state.send_replace(SupervisorState::Running);
        if let Some(listener) = self.health.take() {
            let active = active.clone();
            aux_tasks.push(tokio::spawn(async move {
                if let Err(e) = crate::health::serve(listener, active).await {
                    log::error!("health listener failed: {}", e);
                }
            }));
        }

        tokio::pin!(signal);
        tokio::select! {
            _ = &mut signal => {}
            _ = self.shutdown.triggered() => {}
        }
        self.shutdown.trigger();
        self.state.send_replace(SupervisorState::Stopping);
        log::info!("shutdown requested, stopping channels");

        for channel in self.registry.channels() {
            channel.stop().await;
        }
        for handle in &aux_tasks {
            handle.abort();
        }
        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        for mut handle in channel_tasks {
            tokio::select! {
                biased;
                res = &mut handle => log_join(res),
                _ = tokio::time::sleep_until(deadline) => {
                    handle.abort();
                    log_join(handle.await);
                }
            }
        }
        for handle in aux_tasks {
            log_join(handle.await);
        }

        self.state.send_replace(SupervisorState::Stopped);
        log::info!("supervisor stopped");
    }
}

fn spawn_channel(
    channel: Arc<dyn Channel>,
    active: ActiveChannels,
    shutdown: ShutdownTrigger,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = channel.name().to_string();
        log::info!("channel {} started", name);
        let result = channel.start().await;
        active.remove(&name).await;
        match result {
            Ok(()) if shutdown.is_triggered() => log::info!("channel {} stopped", name),
            Ok(()) => log::warn!("channel {} went dark", name),
            Err(e) => log::error!("channel {} went dark: {}", name, e),
        }
    })
}

/// Emit the active channel names once right away, then once per `period`.
async fn heartbeat(period: Duration, active: ActiveChannels, emit: impl Fn(&[String])) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        emit(&active.names().await);
    }
}

fn log_heartbeat(names: &[String]) {
    log::info!("heartbeat: active channels [{}]", names.join(", "));
}

/// Cancellation is the normal way aux tasks end.
fn log_join(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if !e.is_cancelled() {
            log::error!("supervised task failed: {}", e);
        }
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl MessageHandler for Silent {
        async fn handle(&self, _message: Message) -> String {
            String::new()
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn tokens() -> Result<(String, String), ConfigError> {
        Ok(("xoxb-test".to_string(), "xapp-test".to_string()))
    }

    #[test]
    fn unknown_channels_are_skipped() {
        let reg = registry_for(&names(&["slack", "telegram", "cli"]), tokens, Arc::new(Silent))
            .unwrap();
        assert_eq!(reg.names(), vec!["slack", "cli"]);
    }

    #[test]
    fn only_unknown_channels_leave_registry_empty() {
        let reg = registry_for(&names(&["irc"]), tokens, Arc::new(Silent)).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn slack_without_tokens_is_an_error() {
        let mut c = Config::default();
        c.channels.slack.bot_token = Some("xoxb-test".to_string());
        let err = registry_for(
            &names(&["cli", "slack"]),
            || config::slack_tokens_from(None, None, &c),
            Arc::new(Silent),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::MissingCredential { channel: "slack", .. }));
    }

    #[tokio::test]
    async fn heartbeat_reports_immediately() {
        let active = ActiveChannels::default();
        active.insert("cli").await;
        let beats = Arc::new(std::sync::Mutex::new(Vec::<Vec<String>>::new()));
        let task = {
            let beats = beats.clone();
            tokio::spawn(heartbeat(Duration::from_secs(3600), active, move |n| {
                beats.lock().unwrap().push(n.to_vec())
            }))
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        assert_eq!(*beats.lock().unwrap(), vec![vec!["cli".to_string()]]);
    }

    #[tokio::test]
    async fn channels_are_active_once_running() {
        struct Idle(StopSignal);

        #[async_trait]
        impl Channel for Idle {
            fn name(&self) -> &str {
                "idle"
            }
            async fn start(&self) -> Result<(), crate::channels::ChannelError> {
                self.0.triggered().await;
                Ok(())
            }
            async fn stop(&self) {
                self.0.trigger();
            }
            async fn send(
                &self,
                _recipient_id: &str,
                _text: &str,
            ) -> Result<(), crate::channels::ChannelError> {
                Ok(())
            }
        }

        let mut registry = ChannelRegistry::new();
        registry.register(Arc::new(Idle(StopSignal::new())));
        let active = registry.active();
        let sup = Supervisor::new(registry, Duration::from_secs(3600)).unwrap();
        let trigger = sup.shutdown_trigger();
        let mut state = sup.subscribe_state();
        let run = tokio::spawn(sup.run(std::future::pending()));
        state
            .wait_for(|s| *s == SupervisorState::Running)
            .await
            .unwrap();
        assert_eq!(active.names().await, vec!["idle"]);
        trigger.trigger();
        run.await.unwrap();
    }

    #[test]
    fn empty_registry_is_rejected() {
        let err = Supervisor::new(ChannelRegistry::new(), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::NoChannels));
    }
}
