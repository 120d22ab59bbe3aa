//! Communication channels (console, Slack).
//!
//! Channel trait and registry so the supervisor can start/stop every connector the same way.
//! Each connector normalizes its native events into [`crate::message::Message`]s, asks its
//! handler for a reply, and delivers the reply on its own transport.

mod console;
mod registry;
mod slack;
mod stop;

pub use console::{ConsoleChannel, CONSOLE_CHANNEL, CONSOLE_SENDER_ID};
pub use registry::{ActiveChannels, Channel, ChannelError, ChannelRegistry, MessageHandler};
pub use slack::{normalize_event, ReplyTarget, SlackChannel, SlackEvent, SLACK_CHANNEL};
pub use stop::StopSignal;
