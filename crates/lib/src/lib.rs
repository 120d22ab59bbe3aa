//! Switchboard core library: normalized messages, channel connectors, the agent gateway,
//! and the supervisor that runs them.

pub mod agent;
pub mod backend;
pub mod channels;
pub mod config;
pub mod health;
pub mod init;
pub mod message;
pub mod session;
pub mod supervisor;
pub mod tools;
