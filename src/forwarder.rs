//! Sequential throttled forward loop
//!
//! One run of [`ForwardLoop`] resolves its begin id, then pulls batches of
//! source messages in ascending id order and forwards them one by one. After
//! every successful forward the cursor is saved and the loop sleeps for the
//! current interval. The running flag is checked before each message, so a
//! stop request takes effect between forwards and never interrupts one.
//!
//! A forward that hangs stalls the loop; no timeout is applied to the
//! transport call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::metrics;
use crate::progress::MessageId;
use crate::state::{ForwarderState, Phase, RunOutcome, RunSummary};

/// A message as seen by the forward loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub id: MessageId,
    /// Join/leave/pin and other service notices. Never forwarded.
    pub is_service: bool,
    /// Short text excerpt for logs.
    pub preview: String,
}

impl SourceMessage {
    pub fn new(id: MessageId, preview: impl Into<String>) -> Self {
        Self {
            id,
            is_service: false,
            preview: preview.into(),
        }
    }

    pub fn service(id: MessageId) -> Self {
        Self {
            id,
            is_service: true,
            preview: String::new(),
        }
    }
}

/// Messaging platform seen from the loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Messages with `id >= begin`, oldest first. An empty batch means the
    /// source is exhausted for now. Implementations may return only a prefix
    /// of the remaining messages; the loop asks again after the last one.
    async fn messages_from(&self, begin: MessageId) -> Result<Vec<SourceMessage>>;

    /// Forward a single message to the target chat.
    async fn forward(&self, message: &SourceMessage) -> Result<()>;
}

/// Delay between forwards.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct ForwardLoop {
    state: Arc<ForwarderState>,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    begin: MessageId,
}

impl ForwardLoop {
    pub fn new(
        state: Arc<ForwarderState>,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
        begin: MessageId,
    ) -> Self {
        Self {
            state,
            transport,
            sleeper,
            begin,
        }
    }

    /// Drive one run to its terminal phase and release the loop handle.
    ///
    /// The caller must have claimed the handle with
    /// [`ForwarderState::try_start`], which also yields `begin`.
    pub async fn run(self) -> RunSummary {
        let summary = self.drive().await;
        self.state.finish_run(&summary);
        metrics::set_running(self.state.is_running());

        info!(
            outcome = ?summary.outcome,
            begin = summary.begin_id,
            forwarded = summary.forwarded,
            failed = summary.failed,
            skipped = summary.skipped,
            last = ?summary.last_forwarded,
            "Forward loop finished"
        );
        summary
    }

    async fn drive(&self) -> RunSummary {
        let begin = self.begin;
        info!(
            begin,
            interval_minutes = self.state.interval_minutes(),
            "Forward loop starting"
        );

        let mut summary = RunSummary {
            outcome: RunOutcome::Completed,
            begin_id: begin,
            forwarded: 0,
            failed: 0,
            skipped: 0,
            last_forwarded: None,
        };
        // i64 so the id after MessageId::MAX is representable.
        let mut next = i64::from(begin);
        self.state.set_phase(Phase::Streaming);

        loop {
            if !self.state.is_running() {
                summary.outcome = RunOutcome::Stopped;
                return summary;
            }

            let Ok(from) = MessageId::try_from(next) else {
                summary.outcome = RunOutcome::Completed;
                return summary;
            };

            let batch = match self.transport.messages_from(from).await {
                Ok(batch) => batch,
                Err(err) => {
                    error!(next, "Failed to read source messages: {}", err);
                    summary.outcome = RunOutcome::SourceFailed(err.to_string());
                    return summary;
                }
            };

            let batch_start = next;
            for message in batch {
                if !self.state.is_running() {
                    summary.outcome = RunOutcome::Stopped;
                    return summary;
                }

                // Below the begin id, or already handled in an earlier batch.
                if i64::from(message.id) < next {
                    continue;
                }
                next = i64::from(message.id) + 1;

                if message.is_service {
                    debug!(id = message.id, "Skipping service message");
                    summary.skipped += 1;
                    metrics::record_forward(metrics::FORWARD_SKIPPED);
                    continue;
                }

                self.forward_one(&message, &mut summary).await;
            }

            if next == batch_start {
                info!("All messages forwarded");
                summary.outcome = RunOutcome::Completed;
                return summary;
            }
        }
    }

    async fn forward_one(&self, message: &SourceMessage, summary: &mut RunSummary) {
        if let Err(err) = self.transport.forward(message).await {
            warn!(id = message.id, "Failed to forward message: {}", err);
            summary.failed += 1;
            metrics::record_forward(metrics::FORWARD_FAILED);
            return;
        }

        if let Err(err) = self.state.progress().save(message.id) {
            error!(id = message.id, "Failed to save progress: {}", err);
        }
        summary.forwarded += 1;
        summary.last_forwarded = Some(message.id);
        self.state.record_forward();
        metrics::record_forward(metrics::FORWARD_OK);
        metrics::set_cursor(message.id);

        // Read fresh so a live interval change applies to this very wait.
        let wait = self.state.interval();
        info!(
            id = message.id,
            preview = %message.preview,
            wait_minutes = wait.as_secs() / 60,
            "Forwarded message"
        );

        self.state.set_phase(Phase::Throttling);
        self.sleeper.sleep(wait).await;
        self.state.set_phase(Phase::Streaming);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use crate::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Event {
        Fetch(MessageId),
        Forward(MessageId),
        Sleep(Duration),
    }

    pub type EventLog = Arc<Mutex<Vec<Event>>>;

    /// In-memory source channel.
    pub struct ScriptedTransport {
        pub messages: Mutex<Vec<SourceMessage>>,
        pub failing: HashSet<MessageId>,
        pub batch_size: usize,
        pub fail_fetch: bool,
        pub events: EventLog,
    }

    impl ScriptedTransport {
        pub fn new(messages: Vec<SourceMessage>, events: EventLog) -> Self {
            Self {
                messages: Mutex::new(messages),
                failing: HashSet::new(),
                batch_size: usize::MAX,
                fail_fetch: false,
                events,
            }
        }

        pub fn push(&self, message: SourceMessage) {
            self.messages.lock().unwrap().push(message);
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn messages_from(&self, begin: MessageId) -> Result<Vec<SourceMessage>> {
            self.events.lock().unwrap().push(Event::Fetch(begin));
            if self.fail_fetch {
                return Err(Error::TelegramError("CHANNEL_PRIVATE".into()));
            }
            let mut batch: Vec<_> = self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.id >= begin)
                .cloned()
                .collect();
            batch.sort_by_key(|m| m.id);
            batch.truncate(self.batch_size);
            Ok(batch)
        }

        async fn forward(&self, message: &SourceMessage) -> Result<()> {
            if self.failing.contains(&message.id) {
                return Err(Error::TelegramError("CHAT_WRITE_FORBIDDEN".into()));
            }
            self.events.lock().unwrap().push(Event::Forward(message.id));
            Ok(())
        }
    }

    type Hook = Box<dyn Fn(usize) + Send + Sync>;

    /// Records sleeps instead of waiting and runs a hook on each one.
    pub struct RecordingSleeper {
        pub events: EventLog,
        calls: Mutex<usize>,
        hook: Option<Hook>,
    }

    impl RecordingSleeper {
        pub fn new(events: EventLog) -> Self {
            Self {
                events,
                calls: Mutex::new(0),
                hook: None,
            }
        }

        /// `hook` receives the zero-based index of the sleep.
        pub fn with_hook(events: EventLog, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
            Self {
                events,
                calls: Mutex::new(0),
                hook: Some(Box::new(hook)),
            }
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.events.lock().unwrap().push(Event::Sleep(duration));
            let index = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls - 1
            };
            if let Some(hook) = &self.hook {
                hook(index);
            }
            tokio::task::yield_now().await;
        }
    }

    pub fn forwarded(events: &EventLog) -> Vec<MessageId> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Forward(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn messages(ids: impl IntoIterator<Item = MessageId>) -> Vec<SourceMessage> {
        ids.into_iter()
            .map(|id| SourceMessage::new(id, format!("post {}", id)))
            .collect()
    }
}
