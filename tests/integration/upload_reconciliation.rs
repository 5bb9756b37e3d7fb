//! Integration tests for sharing uploads started from a room.
//!
//! Upload and asset events are fed through the manager in the orders the
//! pipelines can produce them; the node is shared into the room exactly once,
//! after both the node and its derived asset exist.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use roomchat::api::InMemoryApi;
use roomchat::chat::ChatManager;
use roomchat::chat::room::{RoomParams, RoomType};
use roomchat::chat::uploads::{UploadEvent, UploadId};
use roomchat::config::ChatConfig;
use roomchat::contacts::{Contact, InMemoryContacts};
use roomchat::transport::TransportEvent;
use roomchat::transport::loopback::{AckMode, LoopbackTransport};
use roomchat_proto::management::{ManagementMessage, NodeMeta};
use roomchat_proto::message::{DeliveryState, NodeHandle, RoomId, UserId};

type Manager = ChatManager<LoopbackTransport, InMemoryApi, InMemoryContacts>;

fn node(handle: &str, name: &str) -> NodeMeta {
    NodeMeta {
        h: NodeHandle::new(handle),
        k: vec![1, 2, 3, 4],
        t: 0,
        s: 2048,
        name: name.into(),
        hash: None,
        fa: None,
        ts: 1_700_000_000,
    }
}

/// Alice's manager with a joined private room shared with Bob; the API
/// knows `doc` and `photo`. The frame receiver keeps the transport open.
fn setup() -> (Manager, RoomId, mpsc::Receiver<Vec<u8>>) {
    let (transport, frames) = LoopbackTransport::new(64);
    let api = InMemoryApi::new();
    api.insert_node(node("doc", "report.pdf"));
    api.insert_node(node("photo", "beach.jpg"));
    let contacts: InMemoryContacts = [Contact::new("bob", "Bob", "bob@example.com")]
        .into_iter()
        .collect();
    let (manager, _events) = ChatManager::new(
        UserId::new("alice"),
        transport,
        api,
        Arc::new(contacts),
        ChatConfig::default(),
    );
    let room_id = manager
        .create_room(RoomParams::new(
            "alice-bob",
            RoomType::Private,
            [UserId::new("alice"), UserId::new("bob")],
        ))
        .unwrap();
    manager
        .handle_transport_event(TransportEvent::Joined {
            room_id: room_id.clone(),
        })
        .unwrap();
    (manager, room_id, frames)
}

fn started(id: &str, room_id: &RoomId, requires_asset: bool) -> UploadEvent {
    UploadEvent::Started {
        upload_id: UploadId::new(id),
        room_id: room_id.clone(),
        requires_asset,
    }
}

fn completed(id: &str, node: &str, asset_id: Option<&str>) -> UploadEvent {
    UploadEvent::Completed {
        upload_id: UploadId::new(id),
        node: NodeHandle::new(node),
        asset_id: asset_id.map(str::to_string),
        has_asset: false,
    }
}

/// Handles of the nodes attached in the room, in buffer order.
fn attached_nodes(manager: &Manager, room_id: &RoomId) -> Vec<NodeHandle> {
    let registry = manager.registry();
    let room = registry.get_room(room_id).unwrap();
    room.buffer()
        .iter()
        .filter_map(|m| match m.management() {
            Ok(Some(ManagementMessage::Attachment(nodes))) => Some(nodes),
            _ => None,
        })
        .flatten()
        .map(|n| n.h)
        .collect()
}

#[tokio::test]
async fn plain_file_is_shared_on_completion() {
    let (manager, room_id, _frames) = setup();

    assert!(
        manager
            .handle_upload_event(started("u1", &room_id, false))
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(manager.pending_uploads(), 1);

    let report = manager
        .handle_upload_event(completed("u1", "doc", None))
        .await
        .unwrap()
        .expect("upload should be ready");
    assert!(report.is_complete());
    assert_eq!(report.attached.len(), 1);
    assert_eq!(manager.pending_uploads(), 0);

    assert_eq!(attached_nodes(&manager, &room_id), vec![NodeHandle::new("doc")]);
    assert_eq!(
        manager.api().shares(),
        vec![(NodeHandle::new("doc"), UserId::new("bob"))]
    );
}

#[tokio::test]
async fn image_waits_for_its_asset() {
    let (manager, room_id, _frames) = setup();

    manager
        .handle_upload_event(started("u1", &room_id, true))
        .await
        .unwrap();
    assert!(
        manager
            .handle_upload_event(completed("u1", "photo", Some("thumb-1")))
            .await
            .unwrap()
            .is_none()
    );
    assert!(attached_nodes(&manager, &room_id).is_empty());

    let report = manager
        .handle_upload_event(UploadEvent::AssetReady {
            node: NodeHandle::new("photo"),
        })
        .await
        .unwrap();
    assert!(report.is_some_and(|r| r.is_complete()));
    assert_eq!(attached_nodes(&manager, &room_id), vec![NodeHandle::new("photo")]);
}

#[tokio::test]
async fn asset_arriving_before_completion_is_remembered() {
    let (manager, room_id, _frames) = setup();

    manager
        .handle_upload_event(started("u1", &room_id, true))
        .await
        .unwrap();
    assert!(
        manager
            .handle_upload_event(UploadEvent::AssetReady {
                node: NodeHandle::new("photo"),
            })
            .await
            .unwrap()
            .is_none()
    );

    let report = manager
        .handle_upload_event(completed("u1", "photo", Some("thumb-1")))
        .await
        .unwrap();
    assert!(report.is_some());
    assert_eq!(attached_nodes(&manager, &room_id), vec![NodeHandle::new("photo")]);
}

#[tokio::test]
async fn asset_failure_shares_without_it() {
    let (manager, room_id, _frames) = setup();

    manager
        .handle_upload_event(started("u1", &room_id, true))
        .await
        .unwrap();
    manager
        .handle_upload_event(completed("u1", "photo", Some("thumb-1")))
        .await
        .unwrap();

    let report = manager
        .handle_upload_event(UploadEvent::AssetFailed {
            asset_id: "thumb-1".into(),
        })
        .await
        .unwrap();
    assert!(report.is_some());
    assert_eq!(attached_nodes(&manager, &room_id), vec![NodeHandle::new("photo")]);
}

#[tokio::test]
async fn aborted_upload_is_never_shared() {
    let (manager, room_id, _frames) = setup();

    manager
        .handle_upload_event(started("u1", &room_id, true))
        .await
        .unwrap();
    manager
        .handle_upload_event(UploadEvent::Aborted {
            upload_id: UploadId::new("u1"),
        })
        .await
        .unwrap();
    assert_eq!(manager.pending_uploads(), 0);

    assert!(
        manager
            .handle_upload_event(completed("u1", "doc", None))
            .await
            .unwrap()
            .is_none()
    );
    assert!(attached_nodes(&manager, &room_id).is_empty());
    assert!(manager.api().shares().is_empty());
}

#[tokio::test]
async fn interleaved_uploads_are_shared_independently() {
    let (manager, room_id, _frames) = setup();

    manager
        .handle_upload_event(started("img", &room_id, true))
        .await
        .unwrap();
    manager
        .handle_upload_event(started("pdf", &room_id, false))
        .await
        .unwrap();
    manager
        .handle_upload_event(completed("img", "photo", Some("thumb-1")))
        .await
        .unwrap();
    manager
        .handle_upload_event(completed("pdf", "doc", None))
        .await
        .unwrap();
    assert_eq!(manager.pending_uploads(), 1);

    manager
        .handle_upload_event(UploadEvent::AssetReady {
            node: NodeHandle::new("photo"),
        })
        .await
        .unwrap();
    assert_eq!(manager.pending_uploads(), 0);
    assert_eq!(
        attached_nodes(&manager, &room_id),
        vec![NodeHandle::new("doc"), NodeHandle::new("photo")]
    );
}

#[tokio::test]
async fn upload_is_shared_before_the_transport_acknowledges() {
    let (manager, room_id, mut frames) = setup();
    manager.transport().set_mode(AckMode::Hold);

    manager
        .handle_upload_event(started("u1", &room_id, false))
        .await
        .unwrap();
    let report = tokio::time::timeout(
        Duration::from_secs(2),
        manager.handle_upload_event(completed("u1", "doc", None)),
    )
    .await
    .expect("sharing must not wait for the transport")
    .unwrap()
    .expect("upload should be ready");
    assert!(report.is_complete());

    let attachment = report.attached[0].clone();
    let sent = |manager: &Manager| {
        manager
            .registry()
            .get_room(&room_id)
            .and_then(|room| room.message_by_id(&attachment).map(|m| m.sent))
    };
    assert_eq!(sent(&manager), Some(DeliveryState::NotSent));

    frames.recv().await.unwrap();
    manager.transport().release_held();
    while sent(&manager) != Some(DeliveryState::Sent) {
        tokio::task::yield_now().await;
    }
}
