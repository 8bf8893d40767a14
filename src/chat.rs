//! Chat operations and entity resolution

use grammers_client::types::peer::Peer;
use grammers_client::types::Message;
use grammers_client::Client;

use crate::config::ChatEntity;
use crate::error::{Error, Result};

fn raw_chat_id(chat: &grammers_tl_types::enums::Chat) -> i64 {
    match chat {
        grammers_tl_types::enums::Chat::Empty(c) => c.id,
        grammers_tl_types::enums::Chat::Chat(c) => c.id,
        grammers_tl_types::enums::Chat::Forbidden(c) => c.id,
        grammers_tl_types::enums::Chat::Channel(c) => c.id,
        grammers_tl_types::enums::Chat::ChannelForbidden(c) => c.id,
    }
}

/// Resolve a ChatEntity to an actual Peer
pub async fn resolve_chat(client: &Client, entity: &ChatEntity) -> Result<Peer> {
    match entity {
        ChatEntity::Username(username) => client
            .resolve_username(username)
            .await
            .map_err(|e| Error::TelegramError(e.to_string()))?
            .ok_or_else(|| Error::ChatNotFound(format!("Username @{} not found", username))),
        ChatEntity::Channel(target_id) | ChatEntity::Chat(target_id) => {
            // Numeric ids are only resolvable through the account's dialogs
            let mut dialogs = client.iter_dialogs();

            while let Some(dialog) = dialogs
                .next()
                .await
                .map_err(|e| Error::TelegramError(e.to_string()))?
            {
                let matches = match &dialog.peer {
                    Peer::Channel(channel) => {
                        matches!(entity, ChatEntity::Channel(_)) && channel.raw.id == *target_id
                    }
                    // Megagroups show up as groups but carry a channel id
                    Peer::Group(group) => raw_chat_id(&group.raw) == *target_id,
                    Peer::User(_) => false,
                };
                if matches {
                    return Ok(dialog.peer.clone());
                }
            }

            Err(Error::ChatNotFound(format!("{} not found in dialogs", entity)))
        }
    }
}

/// Id of the user or chat that sent `msg`.
pub fn sender_id(msg: &Message) -> Option<i64> {
    msg.sender().map(|s| match s {
        Peer::User(u) => u.raw.id(),
        Peer::Group(g) => raw_chat_id(&g.raw),
        Peer::Channel(c) => c.raw.id,
    })
}

/// Whether `msg` was sent in a one-to-one chat with its sender.
pub fn is_private(msg: &Message) -> bool {
    msg.sender().map(|s| s.id()) == Some(msg.peer_id())
}

/// Get the display name for a peer
pub fn peer_name(peer: &Peer) -> String {
    peer.name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
