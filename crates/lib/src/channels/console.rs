//! Console channel: one message per stdin line, replies printed to stdout.

use crate::channels::registry::{Channel, ChannelError, MessageHandler};
use crate::channels::stop::StopSignal;
use crate::message::Message;
use async_trait::async_trait;
use std::io::BufRead;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

pub const CONSOLE_CHANNEL: &str = "cli";
/// Fixed identity of the local operator.
pub const CONSOLE_SENDER_ID: &str = "cli-user";
const CONSOLE_SENDER_NAME: &str = "You";

type Output = Box<dyn AsyncWrite + Send + Unpin>;
type Lines = mpsc::Receiver<std::io::Result<String>>;

/// Where input lines come from. Consumed by the first `start`.
enum Input {
    /// Process stdin, read on a plain thread: a pending read must not hold up runtime shutdown.
    Stdin,
    Reader(Box<dyn AsyncBufRead + Send + Unpin>),
}

impl Input {
    /// Start forwarding lines into a channel. The returned task (if any) must be aborted when
    /// the reader is no longer wanted.
    fn spawn_reader(self) -> Result<(Lines, Option<tokio::task::JoinHandle<()>>), ChannelError> {
        let (tx, rx) = mpsc::channel(16);
        match self {
            Input::Stdin => {
                std::thread::Builder::new()
                    .name("console-stdin".to_string())
                    .spawn(move || {
                        for line in std::io::stdin().lock().lines() {
                            let failed = line.is_err();
                            if tx.blocking_send(line).is_err() || failed {
                                break;
                            }
                        }
                    })
                    .map_err(|e| ChannelError::Transport(format!("console reader: {}", e)))?;
                Ok((rx, None))
            }
            Input::Reader(reader) => {
                let task = tokio::spawn(async move {
                    let mut lines = reader.lines();
                    loop {
                        let line = match lines.next_line().await {
                            Ok(Some(line)) => Ok(line),
                            Ok(None) => break,
                            Err(e) => Err(e),
                        };
                        let failed = line.is_err();
                        if tx.send(line).await.is_err() || failed {
                            break;
                        }
                    }
                });
                Ok((rx, Some(task)))
            }
        }
    }
}

/// Interactive console connector. Input can be consumed by a single `start`.
pub struct ConsoleChannel {
    input: Mutex<Option<Input>>,
    output: Mutex<Output>,
    handler: Arc<dyn MessageHandler>,
    stop: StopSignal,
}

impl ConsoleChannel {
    /// Console on the process stdin/stdout.
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self::with_input(handler, Input::Stdin, tokio::io::stdout())
    }

    /// Console on arbitrary streams (tests, pipes).
    pub fn with_io(
        handler: Arc<dyn MessageHandler>,
        input: impl AsyncBufRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self::with_input(handler, Input::Reader(Box::new(input)), output)
    }

    fn with_input(
        handler: Arc<dyn MessageHandler>,
        input: Input,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            input: Mutex::new(Some(input)),
            output: Mutex::new(Box::new(output)),
            handler,
            stop: StopSignal::new(),
        }
    }

    async fn write_out(&self, text: &str) -> std::io::Result<()> {
        let mut out = self.output.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.flush().await
    }

    async fn serve(&self, lines: &mut Lines) -> Result<(), ChannelError> {
        let io_err = |e: std::io::Error| ChannelError::Transport(e.to_string());
        self.write_out("switchboard console ready. Type a message (Ctrl+C to quit).\n\n")
            .await
            .map_err(io_err)?;

        loop {
            self.write_out("> ").await.map_err(io_err)?;
            let line = tokio::select! {
                _ = self.stop.triggered() => break,
                line = lines.recv() => line,
            };
            let Some(line) = line else {
                log::info!("console: end of input");
                break;
            };
            let line = line.map_err(io_err)?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            let msg = Message::direct(CONSOLE_CHANNEL, CONSOLE_SENDER_ID, text)
                .with_sender_name(CONSOLE_SENDER_NAME);
            let reply = tokio::select! {
                _ = self.stop.triggered() => break,
                reply = self.handler.handle(msg) => reply,
            };
            if let Err(e) = self.send(CONSOLE_SENDER_ID, &reply).await {
                log::warn!("console: send failed: {}", e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        CONSOLE_CHANNEL
    }

    /// Returns on stop or at end of input. End of input does not trigger stop.
    async fn start(&self) -> Result<(), ChannelError> {
        let input = self
            .input
            .lock()
            .await
            .take()
            .ok_or_else(|| ChannelError::Transport("console input already consumed".to_string()))?;
        if self.stop.is_triggered() {
            return Ok(());
        }
        let (mut lines, reader) = input.spawn_reader()?;
        let result = self.serve(&mut lines).await;
        if let Some(task) = reader {
            task.abort();
        }
        result
    }

    async fn stop(&self) {
        self.stop.trigger();
    }

    async fn send(&self, _recipient_id: &str, text: &str) -> Result<(), ChannelError> {
        self.write_out(&format!("\n{}\n\n", text))
            .await
            .map_err(|e| ChannelError::Delivery(e.to_string()))
    }
}
