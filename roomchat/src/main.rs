//! `RoomChat` demo binary.
//!
//! Runs a scripted private-room conversation against the in-process
//! loopback transport and logs every room event. Configuration via CLI
//! flags, environment variables, or config file
//! (`~/.config/roomchat/config.toml`).
//!
//! ```bash
//! cargo run --bin roomchat -- --user-id alice --peer bob --log-level debug
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use roomchat::api::InMemoryApi;
use roomchat::chat::ChatManager;
use roomchat::chat::room::{RoomEvent, RoomParams, RoomType};
use roomchat::chat::uploads::{UploadEvent, UploadId};
use roomchat::config::{CliArgs, ClientConfig};
use roomchat::contacts::{Contact, InMemoryContacts};
use roomchat::transport::TransportEvent;
use roomchat::transport::loopback::LoopbackTransport;
use roomchat_proto::codec;
use roomchat_proto::management::NodeMeta;
use roomchat_proto::message::{Message, MessageId, NodeHandle, Timestamp, UserId};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("roomchat starting");

    if let Err(e) = run_demo(&config).await {
        tracing::error!(error = %e, "demo failed");
        eprintln!("demo failed: {e}");
    }

    tracing::info!("roomchat exiting");
}

/// Initialize file-based logging.
///
/// Returns the appender guard; dropping it flushes pending log lines.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("roomchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run_demo(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let me = UserId::new(config.user_id.as_deref().unwrap_or("alice"));
    let peer = UserId::new(config.peer.as_deref().unwrap_or("bob"));

    let contacts: InMemoryContacts = [Contact::new(
        peer.clone(),
        peer.as_str(),
        format!("{peer}@example.com"),
    )]
    .into_iter()
    .collect();

    let api = InMemoryApi::new();
    api.insert_node(NodeMeta {
        h: NodeHandle::new("node-notes"),
        k: vec![0x1234, 0x5678],
        t: 0,
        s: 2048,
        name: "notes.txt".into(),
        hash: None,
        fa: None,
        ts: Timestamp::now().as_secs(),
    });
    api.insert_node(NodeMeta {
        h: NodeHandle::new("node-photo"),
        k: vec![0x9abc],
        t: 0,
        s: 480_000,
        name: "photo.jpg".into(),
        hash: None,
        fa: Some("thumb".into()),
        ts: Timestamp::now().as_secs(),
    });

    let (transport, mut frames) = LoopbackTransport::new(config.chat.event_buffer);
    let (manager, mut events) = ChatManager::new(
        me.clone(),
        transport,
        api,
        Arc::new(contacts),
        config.chat.clone(),
    );

    let frame_logger = tokio::spawn(async move {
        while let Some(bytes) = frames.recv().await {
            match codec::decode_framed(&bytes) {
                Ok((frame, _)) => tracing::debug!(room_id = %frame.room_id(), ?frame, "frame on the wire"),
                Err(e) => tracing::warn!(error = %e, "undecodable frame"),
            }
        }
    });
    let event_logger = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(event) = events.recv().await {
            log_event(&event);
            count += 1;
        }
        count
    });

    let room_id = manager.create_room(RoomParams::new(
        format!("{me}-{peer}").as_str(),
        RoomType::Private,
        [me.clone(), peer.clone()],
    ))?;
    manager.handle_transport_event(TransportEvent::HistoryLoading {
        room_id: room_id.clone(),
        loading: true,
    })?;
    manager.handle_transport_event(TransportEvent::Joined {
        room_id: room_id.clone(),
    })?;
    manager.handle_transport_event(TransportEvent::HistoryLoading {
        room_id: room_id.clone(),
        loading: false,
    })?;

    manager
        .send_message(&room_id, "hi, got a minute?")?
        .delivered()
        .await;
    manager.handle_transport_event(TransportEvent::MessageReceived {
        room_id: room_id.clone(),
        message: Message::incoming(
            MessageId::new("remote-1"),
            peer.clone(),
            "sure, send it over".into(),
            Timestamp::now(),
            None,
        ),
    })?;

    let report = manager
        .attach_nodes(&room_id, &[NodeHandle::new("node-notes")])
        .await?;
    tracing::info!(attached = report.attached.len(), complete = report.is_complete(), "shared notes");

    let upload_id = UploadId::new("upload-photo");
    for event in [
        UploadEvent::Started {
            upload_id: upload_id.clone(),
            room_id: room_id.clone(),
            requires_asset: true,
        },
        UploadEvent::Completed {
            upload_id: upload_id.clone(),
            node: NodeHandle::new("node-photo"),
            asset_id: Some("thumb".into()),
            has_asset: false,
        },
        UploadEvent::AssetReady {
            node: NodeHandle::new("node-photo"),
        },
    ] {
        if let Some(report) = manager.handle_upload_event(event).await? {
            tracing::info!(attached = report.attached.len(), "uploaded photo shared");
        }
    }

    manager
        .revoke_attachment(&room_id, &NodeHandle::new("node-notes"))?
        .delivered()
        .await;
    if let Some(card) = manager.attach_contacts(&room_id, &[peer.clone()])? {
        card.delivered().await;
    }

    if let Some(title) = manager.room_title(&room_id) {
        println!("== {title} ==");
    }
    {
        let mut registry = manager.registry();
        if let Some(room) = registry.get_room_mut(&room_id) {
            for message in room.buffer().ordered() {
                let body = if message.is_management() {
                    "<management message>"
                } else {
                    message.text_contents.as_str()
                };
                println!(
                    "[{:?}{}] {}: {}",
                    message.sent,
                    if message.revoked { ", revoked" } else { "" },
                    message.user_id,
                    body
                );
            }
            let seen = room.mark_all_seen();
            tracing::info!(seen, "marked messages seen");
        }
        if let Some(at) = registry.last_interaction(&peer) {
            println!("last interaction with {peer}: {at}");
        }
    }

    manager.destroy_room(&room_id, false)?;
    drop(manager);

    let count = event_logger.await?;
    frame_logger.await?;
    println!("{count} room events emitted");
    Ok(())
}

fn log_event(event: &RoomEvent) {
    match event {
        RoomEvent::StateChanged { room_id, old, new } => {
            tracing::info!(room_id = %room_id, from = %old, to = %new, "state changed");
        }
        RoomEvent::ManualRetryRequired {
            room_id,
            message_id,
        } => {
            tracing::warn!(room_id = %room_id, message_id = %message_id, "message needs manual retry");
        }
        other => tracing::debug!(event = ?other, "room event"),
    }
}
