//! Telegram implementation of [`Transport`]

use async_trait::async_trait;
use grammers_client::types::peer::Peer;
use grammers_client::types::Message;
use grammers_client::Client;
use tracing::debug;

use crate::chat::peer_name;
use crate::error::{Error, Result};
use crate::forwarder::{SourceMessage, Transport};
use crate::progress::MessageId;

const PREVIEW_CHARS: usize = 60;

/// Forwards from one resolved source peer to one resolved target peer.
pub struct TelegramTransport {
    client: Client,
    source: Peer,
    target: Peer,
}

impl TelegramTransport {
    pub fn new(client: Client, source: Peer, target: Peer) -> Self {
        Self {
            client,
            source,
            target,
        }
    }

    pub fn source_name(&self) -> String {
        peer_name(&self.source)
    }

    pub fn target_name(&self) -> String {
        peer_name(&self.target)
    }
}

/// Log-friendly excerpt of a message.
pub fn preview(text: &str, has_media: bool) -> String {
    let text = text.trim();
    if text.is_empty() {
        return if has_media { "[media]" } else { "[empty]" }.to_string();
    }
    let mut excerpt: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        excerpt.push('…');
    }
    excerpt.replace('\n', " ")
}

fn to_source_message(msg: &Message) -> SourceMessage {
    SourceMessage {
        id: msg.id(),
        is_service: msg.action().is_some(),
        preview: preview(msg.text(), msg.media().is_some()),
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    /// History is served newest first, so the batch is collected down to
    /// `begin` and reversed. Every message newer than `begin` is returned in
    /// one batch.
    async fn messages_from(&self, begin: MessageId) -> Result<Vec<SourceMessage>> {
        let mut iter = self.client.iter_messages(&self.source);
        let mut batch = Vec::new();

        while let Some(msg) = iter.next().await? {
            if msg.id() < begin {
                break;
            }
            batch.push(to_source_message(&msg));
        }

        batch.reverse();
        debug!(begin, count = batch.len(), "Fetched source messages");
        Ok(batch)
    }

    async fn forward(&self, message: &SourceMessage) -> Result<()> {
        let forwarded = self
            .client
            .forward_messages(&self.target, &[message.id], &self.source)
            .await?;

        if forwarded.iter().all(Option::is_none) {
            return Err(Error::TelegramError(format!(
                "message {} was not forwarded",
                message.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(100);
        let out = preview(&long, false);
        assert_eq!(out.chars().count(), PREVIEW_CHARS + 1);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn preview_flattens_newlines() {
        assert_eq!(preview("line one\nline two", false), "line one line two");
    }

    #[test]
    fn preview_marks_media_and_empty() {
        assert_eq!(preview("   ", true), "[media]");
        assert_eq!(preview("", false), "[empty]");
    }
}
