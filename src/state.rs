//! Shared forwarder state
//!
//! [`ForwarderState`] holds the settings that the command interpreter mutates
//! and the forward loop reads: the running flag, the interval and the desired
//! start id. It also owns the loop handle that guarantees at most one loop
//! task at a time.
//!
//! The lock is never held across an `.await`; every getter takes it briefly so
//! the loop always sees the latest values.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ENV_INTERVAL_MINUTES, ENV_START_FROM_ID};
use crate::error::{Error, Result};
use crate::progress::{MessageId, ProgressStore};

/// Destination for settings that must survive a restart.
pub trait SettingsSink: Send + Sync {
    fn persist(&self, key: &str, value: &str) -> Result<()>;
}

/// Sink that keeps nothing. Used when runtime changes should stay in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSettings;

impl SettingsSink for NoopSettings {
    fn persist(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle phase of the forward loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ResolvingStart,
    Streaming,
    Throttling,
    Completed,
    Stopped,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::ResolvingStart => "resolving start",
            Phase::Streaming => "streaming",
            Phase::Throttling => "throttling",
            Phase::Completed => "completed",
            Phase::Stopped => "stopped",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Source exhausted while still running.
    Completed,
    /// Operator cleared the running flag.
    Stopped,
    /// The message source could not be read.
    SourceFailed(String),
}

impl RunOutcome {
    fn phase(&self) -> Phase {
        match self {
            RunOutcome::Completed => Phase::Completed,
            RunOutcome::Stopped => Phase::Stopped,
            RunOutcome::SourceFailed(_) => Phase::Failed,
        }
    }
}

/// Statistics for one loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub begin_id: MessageId,
    pub forwarded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub last_forwarded: Option<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartRejected {
    #[error("forwarding is already running")]
    AlreadyRunning,
    #[error("the previous run is still stopping, try again after the current wait")]
    StillStopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StopRejected {
    #[error("forwarding is already stopped")]
    AlreadyStopped,
}

/// Initial values, normally taken from [`crate::config::Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub interval_minutes: u64,
    pub desired_start: MessageId,
}

/// Point-in-time view used by the `status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub running: bool,
    pub loop_active: bool,
    pub phase: Phase,
    pub interval_minutes: u64,
    pub desired_start: MessageId,
    pub cursor: MessageId,
    pub next_begin: MessageId,
    pub forwarded_this_run: u64,
    pub last_forward_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    running: bool,
    loop_active: bool,
    phase: Phase,
    interval_minutes: u64,
    desired_start: MessageId,
    override_pending: bool,
    forwarded_this_run: u64,
    last_forward_at: Option<DateTime<Utc>>,
}

/// Settings shared between the command interpreter and the forward loop.
pub struct ForwarderState {
    inner: Mutex<Inner>,
    progress: ProgressStore,
    sink: Arc<dyn SettingsSink>,
}

impl fmt::Debug for ForwarderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwarderState")
            .field("inner", &self.inner)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

/// Where the next run begins.
///
/// An explicit operator override wins, even when it moves backwards.
/// Otherwise the run resumes right after the cursor, but never before the
/// configured start; with no progress yet it begins at the configured start.
pub fn resolve_begin(
    desired_start: MessageId,
    cursor: MessageId,
    override_pending: bool,
) -> MessageId {
    if override_pending || cursor <= 0 {
        desired_start
    } else {
        cursor.saturating_add(1).max(desired_start)
    }
}

impl ForwarderState {
    pub fn new(settings: Settings, progress: ProgressStore, sink: Arc<dyn SettingsSink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                running: false,
                loop_active: false,
                phase: Phase::Idle,
                interval_minutes: settings.interval_minutes,
                desired_start: settings.desired_start,
                override_pending: false,
                forwarded_this_run: 0,
                last_forward_at: None,
            }),
            progress,
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The guarded data stays consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_loop_active(&self) -> bool {
        self.lock().loop_active
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn interval_minutes(&self) -> u64 {
        self.lock().interval_minutes
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes().saturating_mul(60))
    }

    pub fn desired_start(&self) -> MessageId {
        self.lock().desired_start
    }

    /// Change the post-forward delay. The in-memory value applies even when
    /// persisting it fails; the persistence error is returned.
    pub fn set_interval(&self, minutes: u64) -> Result<()> {
        self.lock().interval_minutes = minutes;
        info!(minutes, "Interval updated");
        self.sink.persist(ENV_INTERVAL_MINUTES, &minutes.to_string())
    }

    /// Change where the next run begins. Takes effect at the next start.
    ///
    /// The id is also written into the progress record so the next resume
    /// treats it as the baseline even before anything is forwarded.
    pub fn set_desired_start(&self, id: MessageId) -> Result<()> {
        if id < 0 {
            return Err(Error::InvalidArgument(format!(
                "start id must be non-negative, got {}",
                id
            )));
        }

        {
            let mut inner = self.lock();
            inner.desired_start = id;
            inner.override_pending = true;
        }
        info!(id, "Desired start updated");

        let persisted = self.sink.persist(ENV_START_FROM_ID, &id.to_string());
        let recorded = self.progress.save(id);
        persisted.and(recorded)
    }

    /// Claim the loop handle, set the running flag and fix where the run
    /// begins. A pending override is consumed here, so a set-start arriving
    /// after this call only affects the following run.
    pub fn try_start(&self) -> std::result::Result<MessageId, StartRejected> {
        let cursor = self.progress.load();
        let mut inner = self.lock();
        if inner.running {
            return Err(StartRejected::AlreadyRunning);
        }
        if inner.loop_active {
            return Err(StartRejected::StillStopping);
        }
        let begin = resolve_begin(inner.desired_start, cursor, inner.override_pending);
        inner.override_pending = false;
        inner.running = true;
        inner.loop_active = true;
        inner.phase = Phase::ResolvingStart;
        inner.forwarded_this_run = 0;
        Ok(begin)
    }

    /// Clear the running flag. The loop notices at its next iteration
    /// boundary and releases the handle itself.
    pub fn stop(&self) -> std::result::Result<(), StopRejected> {
        let mut inner = self.lock();
        if !inner.running {
            return Err(StopRejected::AlreadyStopped);
        }
        inner.running = false;
        Ok(())
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.lock().phase = phase;
    }

    pub(crate) fn record_forward(&self) {
        let mut inner = self.lock();
        inner.forwarded_this_run += 1;
        inner.last_forward_at = Some(Utc::now());
    }

    /// Terminal transition of a loop run: release the loop handle.
    pub(crate) fn finish_run(&self, summary: &RunSummary) {
        let mut inner = self.lock();
        inner.loop_active = false;
        inner.phase = summary.outcome.phase();
        if summary.outcome != RunOutcome::Stopped {
            inner.running = false;
        }
        if let RunOutcome::SourceFailed(reason) = &summary.outcome {
            warn!(%reason, "Forward loop ended because the source failed");
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let cursor = self.progress.load();
        let inner = self.lock();
        StatusSnapshot {
            running: inner.running,
            loop_active: inner.loop_active,
            phase: inner.phase,
            interval_minutes: inner.interval_minutes,
            desired_start: inner.desired_start,
            cursor,
            next_begin: resolve_begin(inner.desired_start, cursor, inner.override_pending),
            forwarded_this_run: inner.forwarded_this_run,
            last_forward_at: inner.last_forward_at,
        }
    }
}
