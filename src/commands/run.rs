//! Run the forwarder and listen for operator commands
//!
//! Connects with the existing session, resolves the source and target chats,
//! then processes operator commands one at a time from private messages until
//! Ctrl+C. The forward loop runs as a separate task on the same runtime.

use std::sync::Arc;

use grammers_client::client::UpdatesConfiguration;
use grammers_client::types::update::Update;
use grammers_client::types::Message;
use tokio::signal;
use tracing::{error, info, warn};

use crate::chat::{is_private, resolve_chat, sender_id};
use crate::command::Command;
use crate::config::{Config, EnvFile};
use crate::controller::{accepts_command, Controller, Origin};
use crate::error::{Error, Result};
use crate::forwarder::TokioSleeper;
use crate::metrics;
use crate::progress::ProgressStore;
use crate::session::ForwarderSession;
use crate::state::{ForwarderState, Settings};
use crate::transport::TelegramTransport;

pub async fn run(config: Config, autostart: bool) -> Result<()> {
    let mut session = ForwarderSession::open(&config).await?;

    let source = resolve_chat(&session, &config.source_channel).await?;
    let target = resolve_chat(&session, &config.target_channel).await?;
    let transport = TelegramTransport::new(session.client.clone(), source, target);

    let state = Arc::new(ForwarderState::new(
        Settings {
            interval_minutes: config.interval_minutes,
            desired_start: config.start_from_id,
        },
        ProgressStore::new(&config.progress_file),
        Arc::new(EnvFile::new(&config.env_file)),
    ));

    let snapshot = state.snapshot();
    metrics::set_cursor(snapshot.cursor);
    metrics::set_running(false);

    info!(
        source = %config.source_channel,
        source_name = %transport.source_name(),
        target = %config.target_channel,
        target_name = %transport.target_name(),
        "Forwarder connected"
    );
    info!(
        cursor = snapshot.cursor,
        next_begin = snapshot.next_begin,
        interval_minutes = snapshot.interval_minutes,
        "Progress loaded"
    );

    let controller = Controller::new(state, Arc::new(transport), Arc::new(TokioSleeper));

    if autostart || config.auto_start {
        let reply = controller.apply(Command::Start);
        info!("{}", reply);
    }

    if config.owner_id == 0 {
        warn!("OWNER_ID is not set; runtime commands are disabled");
    }

    let result = listen(&mut session, &controller, config.owner_id).await;

    if controller.state().stop().is_ok() {
        info!("Forwarding stopped for shutdown");
    }
    result
}

/// Text of `msg` if it is a command from the operator.
fn operator_command(msg: &Message, owner_id: i64) -> Option<String> {
    let origin = Origin {
        sender_id: sender_id(msg),
        outgoing: msg.outgoing(),
        private: is_private(msg),
    };
    if !accepts_command(origin, owner_id) {
        return None;
    }
    let text = msg.text().trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

async fn listen(
    session: &mut ForwarderSession,
    controller: &Controller,
    owner_id: i64,
) -> Result<()> {
    let updates_rx = session.take_updates().ok_or_else(|| {
        Error::TelegramError("Updates stream already taken. Restart the forwarder.".into())
    })?;

    let mut updates = session.stream_updates(
        updates_rx,
        UpdatesConfiguration {
            catch_up: false,
            ..Default::default()
        },
    );

    info!("Listening for operator commands. Press Ctrl+C to stop.");

    let result = loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutting down");
                break Ok(());
            }
            update = updates.next() => {
                match update {
                    Ok(Update::NewMessage(msg)) => {
                        let Some(text) = operator_command(&msg, owner_id) else {
                            continue;
                        };
                        let reply = controller.handle_text(&text);
                        if let Err(err) = msg.reply(reply.to_string()).await {
                            warn!("Failed to send reply: {}", err);
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!("Update stream failed: {}", err);
                        break Err(Error::TelegramError(err.to_string()));
                    }
                }
            }
        }
    };

    updates.sync_update_state();
    result
}
