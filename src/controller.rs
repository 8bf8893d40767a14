//! Command interpreter
//!
//! [`Controller::apply`] turns one [`Command`] into a state transition on the
//! shared [`ForwarderState`] and returns a [`Reply`] for the operator. Starting
//! spawns the [`ForwardLoop`] task; stopping only clears the running flag.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::command::{self, Command, ParseError, HELP};
use crate::forwarder::{ForwardLoop, Sleeper, Transport};
use crate::metrics;
use crate::progress::MessageId;
use crate::state::{ForwarderState, RunSummary, StartRejected, StatusSnapshot, StopRejected};

/// Outcome of one operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Started { begin: MessageId },
    Rejected(StartRejected),
    Stopping,
    NotRunning(StopRejected),
    IntervalSet { minutes: u64 },
    StartSet { id: MessageId, from_link: bool },
    /// The change is active in memory but could not be saved.
    NotPersisted { change: String, error: String },
    Status(StatusSnapshot),
    Help,
    Invalid(ParseError),
}

impl Reply {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Reply::Started { .. }
                | Reply::Stopping
                | Reply::IntervalSet { .. }
                | Reply::StartSet { .. }
                | Reply::Status(_)
                | Reply::Help
        )
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Started { begin } => {
                write!(f, "▶️ Forwarding started from message {}", begin)
            }
            Reply::Rejected(reason) => write!(f, "⚠️ {}", reason),
            Reply::Stopping => f.write_str(
                "⏹ Forwarding will stop before the next message (the current wait is not interrupted)",
            ),
            Reply::NotRunning(reason) => write!(f, "⚠️ {}", reason),
            Reply::IntervalSet { minutes } => {
                write!(f, "⏱ Interval set to {} minute(s)", minutes)
            }
            Reply::StartSet { id, from_link } => {
                let source = if *from_link { " (from link)" } else { "" };
                write!(f, "📌 Next run starts at message {}{}", id, source)
            }
            Reply::NotPersisted { change, error } => {
                write!(f, "⚠️ {} but could not be saved: {}", change, error)
            }
            Reply::Status(s) => {
                writeln!(
                    f,
                    "Forwarding: {} ({})",
                    if s.running { "running" } else { "stopped" },
                    s.phase
                )?;
                writeln!(f, "Interval: {} minute(s)", s.interval_minutes)?;
                writeln!(f, "Desired start: {}", s.desired_start)?;
                writeln!(f, "Last forwarded: {}", s.cursor)?;
                writeln!(f, "Next run begins at: {}", s.next_begin)?;
                writeln!(f, "Forwarded this run: {}", s.forwarded_this_run)?;
                match s.last_forward_at {
                    Some(at) => write!(f, "Last forward at: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                    None => f.write_str("Last forward at: never"),
                }
            }
            Reply::Help => f.write_str(HELP),
            Reply::Invalid(err) => write!(f, "❌ {}\n\n{}", err, HELP),
        }
    }
}

/// Whether a message sender may issue commands. An unset owner (0) admits
/// nobody.
pub fn is_operator(sender_id: Option<i64>, owner_id: i64) -> bool {
    owner_id != 0 && sender_id == Some(owner_id)
}

/// Where an incoming message came from, as far as the command gate cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub sender_id: Option<i64>,
    /// Sent by this account; includes the forwarder's own replies.
    pub outgoing: bool,
    /// One-to-one chat with the sender (Saved Messages included).
    pub private: bool,
}

/// Whether a message should be interpreted as an operator command.
pub fn accepts_command(origin: Origin, owner_id: i64) -> bool {
    !origin.outgoing && origin.private && is_operator(origin.sender_id, owner_id)
}

pub struct Controller {
    state: Arc<ForwarderState>,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    current: Mutex<Option<JoinHandle<RunSummary>>>,
}

impl Controller {
    pub fn new(
        state: Arc<ForwarderState>,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            state,
            transport,
            sleeper,
            current: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<ForwarderState> {
        &self.state
    }

    /// Parse and apply one line of operator input.
    pub fn handle_text(&self, text: &str) -> Reply {
        match command::parse(text) {
            Ok(command) => self.apply(command),
            Err(err) => {
                info!(input = %text.trim(), "Rejected command: {}", err);
                metrics::record_command("invalid", false);
                Reply::Invalid(err)
            }
        }
    }

    /// Apply a parsed command. Must be called inside a tokio runtime because
    /// starting spawns the loop task.
    pub fn apply(&self, command: Command) -> Reply {
        let reply = match command {
            Command::Start => self.start(),
            Command::Stop => match self.state.stop() {
                Ok(()) => {
                    metrics::set_running(false);
                    Reply::Stopping
                }
                Err(reason) => Reply::NotRunning(reason),
            },
            Command::SetInterval(minutes) => match self.state.set_interval(minutes) {
                Ok(()) => Reply::IntervalSet { minutes },
                Err(err) => not_persisted(format!("Interval set to {} minute(s)", minutes), err),
            },
            Command::SetStart(id) => self.set_start(id, false),
            Command::SetStartFromLink(id) => self.set_start(id, true),
            Command::Status => Reply::Status(self.state.snapshot()),
            Command::Help => Reply::Help,
        };

        metrics::record_command(command.name(), reply.is_success());
        info!(command = command.name(), success = reply.is_success(), "Command handled");
        reply
    }

    fn start(&self) -> Reply {
        let begin = match self.state.try_start() {
            Ok(begin) => begin,
            Err(reason) => return Reply::Rejected(reason),
        };
        metrics::set_running(true);

        let run = ForwardLoop::new(
            self.state.clone(),
            self.transport.clone(),
            self.sleeper.clone(),
            begin,
        )
        .run();
        let handle = tokio::spawn(run);

        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current = Some(handle);
        Reply::Started { begin }
    }

    fn set_start(&self, id: MessageId, from_link: bool) -> Reply {
        match self.state.set_desired_start(id) {
            Ok(()) => Reply::StartSet { id, from_link },
            Err(err) => not_persisted(format!("Next run starts at message {}", id), err),
        }
    }

    /// Wait for the most recently started loop task to finish.
    pub async fn wait_for_loop(&self) -> Option<RunSummary> {
        let handle = self
            .current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()?;
        match handle.await {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!("Forward loop task failed: {}", err);
                None
            }
        }
    }
}

fn not_persisted(change: String, err: crate::error::Error) -> Reply {
    warn!("{} but saving failed: {}", change, err);
    Reply::NotPersisted {
        change,
        error: err.to_string(),
    }
}
