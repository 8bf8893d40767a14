//! In-memory transport and sleeper shared by the integration tests

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use channel_forwarder::{Error, MessageId, Result, Sleeper, SourceMessage, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Forward(MessageId),
    Wait(Duration),
}

pub type Journal = Arc<Mutex<Vec<Step>>>;

pub struct FakeChannel {
    pub messages: Vec<SourceMessage>,
    pub broken: HashSet<MessageId>,
    pub attempts: Mutex<Vec<MessageId>>,
    pub journal: Journal,
}

impl FakeChannel {
    pub fn new(messages: Vec<SourceMessage>, journal: Journal) -> Self {
        Self {
            messages,
            broken: HashSet::new(),
            attempts: Mutex::new(Vec::new()),
            journal,
        }
    }
}

#[async_trait]
impl Transport for FakeChannel {
    async fn messages_from(&self, begin: MessageId) -> Result<Vec<SourceMessage>> {
        Ok(self
            .messages
            .iter()
            .filter(|m| m.id >= begin)
            .cloned()
            .collect())
    }

    async fn forward(&self, message: &SourceMessage) -> Result<()> {
        self.attempts.lock().unwrap().push(message.id);
        if self.broken.contains(&message.id) {
            return Err(Error::TelegramError("MESSAGE_ID_INVALID".into()));
        }
        self.journal.lock().unwrap().push(Step::Forward(message.id));
        Ok(())
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Journals waits instead of sleeping.
pub struct FakeClock {
    pub journal: Journal,
    pub on_wait: Option<Hook>,
}

impl FakeClock {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            on_wait: None,
        }
    }
}

#[async_trait]
impl Sleeper for FakeClock {
    async fn sleep(&self, duration: Duration) {
        self.journal.lock().unwrap().push(Step::Wait(duration));
        if let Some(hook) = &self.on_wait {
            hook();
        }
    }
}

pub fn posts(ids: impl IntoIterator<Item = MessageId>) -> Vec<SourceMessage> {
    ids.into_iter()
        .map(|id| SourceMessage::new(id, format!("post {}", id)))
        .collect()
}

pub fn forwarded(journal: &Journal) -> Vec<MessageId> {
    journal
        .lock()
        .unwrap()
        .iter()
        .filter_map(|s| match s {
            Step::Forward(id) => Some(*id),
            Step::Wait(_) => None,
        })
        .collect()
}
