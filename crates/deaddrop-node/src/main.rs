//! # deaddrop-node
//!
//! Runs the dead-drop delivery layer for one user against a filesystem root.
//!
//! This binary:
//! - loads the user's X25519 key pair and contact roster
//! - publishes presence heartbeats to every contact and monitors theirs
//! - polls contacts' dead-drops for offline messages
//! - logs every notification until Ctrl+C

mod config;
mod roster;

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use deaddrop_client::{HeartbeatService, NewMessages, OfflineMessagingService, PresenceUpdated};
use deaddrop_shared::constants::APP_NAME;
use deaddrop_shared::{Keypair, SealedBoxCodec};
use deaddrop_store::{FsStorage, RemoteStorage};

use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,deaddrop_client=debug")),
        )
        .init();

    info!("Starting {} node v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration, identity and roster
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env()?;
    info!(
        user = %config.user_id,
        storage = %config.storage_path.display(),
        path_style = ?config.path_style,
        roster = ?config.roster_path,
        client = ?config.client,
        "Loaded configuration"
    );

    let keypair = match &config.secret_key {
        Some(secret) => Keypair::from_secret_hex(secret)?,
        None => {
            let keypair = Keypair::generate();
            warn!("No DEADDROP_SECRET_KEY set, using an ephemeral key pair");
            keypair
        }
    };
    info!(user = %config.user_id, public_key = %keypair.public_key_hex(), "Identity ready");

    let contacts = match &config.roster_path {
        Some(path) => roster::load(path).await?,
        None => Vec::new(),
    };

    // -----------------------------------------------------------------------
    // 3. Wire storage and services
    // -----------------------------------------------------------------------
    let storage: Arc<dyn RemoteStorage> = Arc::new(
        FsStorage::new(config.storage_path.clone())
            .await?
            .with_path_style(config.path_style),
    );
    let codec = Arc::new(SealedBoxCodec);

    let offline = OfflineMessagingService::new(
        config.user_id.clone(),
        keypair.clone(),
        storage.clone(),
        codec.clone(),
        contacts.clone(),
        config.client.clone(),
    )?;
    let heartbeat = HeartbeatService::new(
        config.user_id.clone(),
        keypair,
        storage,
        codec,
        &contacts,
        config.client.clone(),
    )?;

    let mut sent_rx = offline.subscribe_sent();
    let mut new_rx = offline.subscribe_new_messages();
    let mut presence_rx = heartbeat.subscribe_presence();

    // -----------------------------------------------------------------------
    // 4. Start the loops (the monitor follows the first beat)
    // -----------------------------------------------------------------------
    offline.start_send().await;
    offline.start_receive().await;
    heartbeat.start_beat().await;

    // -----------------------------------------------------------------------
    // 5. Log notifications until shutdown
    // -----------------------------------------------------------------------
    loop {
        tokio::select! {
            event = sent_rx.recv() => match event {
                Ok(sent) => {
                    for message in &sent.messages {
                        info!(to = %message.to, id = %message.id, "Message left in dead-drop");
                    }
                }
                Err(e) => if !log_recv_error("offline-sent", e) { break },
            },
            event = new_rx.recv() => match event {
                Ok(NewMessages(messages)) => {
                    info!(total = messages.len(), "Offline messages available");
                    for message in &messages {
                        info!(from = %message.from, id = %message.id, payload = %message.payload, "Offline message");
                    }
                }
                Err(e) => if !log_recv_error("new-messages", e) { break },
            },
            event = presence_rx.recv() => match event {
                Ok(PresenceUpdated(table)) => {
                    let online = table.values().filter(|p| p.is_some()).count();
                    info!(online, contacts = table.len(), "Presence updated");
                }
                Err(e) => if !log_recv_error("presence-updated", e) { break },
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    offline.shutdown().await;
    heartbeat.shutdown().await;
    info!("Node stopped");

    Ok(())
}

/// Returns `false` once the channel is closed.
fn log_recv_error(channel: &'static str, e: RecvError) -> bool {
    match e {
        RecvError::Lagged(skipped) => {
            warn!(channel, skipped, "Notification listener lagged");
            true
        }
        RecvError::Closed => {
            warn!(channel, "Notification channel closed");
            false
        }
    }
}
