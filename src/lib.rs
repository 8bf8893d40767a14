//! Sequential Telegram channel forwarder
//!
//! This library provides:
//! - A resumable cursor persisted in `progress.json`
//! - A throttled forward loop that relays source messages one at a time
//! - A command interpreter for operator start/stop/reconfigure commands
//! - Telegram glue for sessions, chat resolution and forwarding
//! - Prometheus metrics

pub mod chat;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod forwarder;
pub mod metrics;
pub mod progress;
pub mod session;
pub mod state;
pub mod transport;

// Re-export common types
pub use command::{Command, ParseError};
pub use config::{ChatEntity, Config};
pub use controller::{Controller, Reply};
pub use error::{Error, Result};
pub use forwarder::{ForwardLoop, Sleeper, SourceMessage, TokioSleeper, Transport};
pub use progress::{MessageId, ProgressStore};
pub use state::{ForwarderState, Phase, RunOutcome, RunSummary, Settings};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
