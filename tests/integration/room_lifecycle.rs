//! Integration tests for room lifecycle through the registry and manager.
//!
//! Verifies:
//! 1. A group room starts with every member read-only until the roster
//!    confirms permissions.
//! 2. Join, connection loss and recovery drive the state machine.
//! 3. Leaving and destroying reach `Left` and emit the expected events,
//!    and a second leave is silent.
//! 4. Incoming and outgoing messages update last-interaction times for
//!    contacts only, and backfill never moves them backwards.
//! 5. Revoking an attachment marks the earlier attachment message.

use std::sync::Arc;

use tokio::sync::mpsc;

use roomchat::api::InMemoryApi;
use roomchat::chat::ChatManager;
use roomchat::chat::members::Permission;
use roomchat::chat::registry::RoomRegistry;
use roomchat::chat::room::{EMPTY_ROOM_TITLE, RoomError, RoomEvent, RoomParams, RoomState, RoomType};
use roomchat::config::ChatConfig;
use roomchat::contacts::{Contact, InMemoryContacts};
use roomchat::transport::loopback::LoopbackTransport;
use roomchat::transport::{RosterEntry, TransportEvent};
use roomchat_proto::management::NodeMeta;
use roomchat_proto::message::{Message, MessageId, NodeHandle, RoomId, Timestamp, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn contacts() -> Arc<InMemoryContacts> {
    Arc::new(
        [
            Contact::new("b", "Bea", "bea@example.com"),
            Contact::new("c", "Cy", "cy@example.com"),
        ]
        .into_iter()
        .collect(),
    )
}

fn users(ids: &[&str]) -> Vec<UserId> {
    ids.iter().map(|id| UserId::new(*id)).collect()
}

fn drain(events: &mut mpsc::Receiver<RoomEvent>) -> Vec<RoomEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn from(user: &str, id: &str, secs: u64) -> Message {
    Message::incoming(
        MessageId::new(id),
        UserId::new(user),
        format!("{user} says {id}"),
        Timestamp::from_secs(secs),
        None,
    )
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

#[test]
fn group_members_are_read_only_until_roster_confirms() {
    let (mut registry, _events) = RoomRegistry::new(UserId::new("a"), contacts(), 64);
    let room_id = RoomId::new("g");
    registry
        .create_room(RoomParams::new("g", RoomType::Group, users(&["a", "b", "c"])))
        .unwrap();

    {
        let room = registry.get_room(&room_id).unwrap();
        for user in ["b", "c"] {
            assert_eq!(
                room.members().permission(&UserId::new(user)),
                Some(Permission::None)
            );
        }
        assert!(room.is_read_only());
    }

    registry
        .dispatch(TransportEvent::RosterUpdated {
            room_id: room_id.clone(),
            members: vec![
                RosterEntry::member("a", Permission::Full),
                RosterEntry::member("b", Permission::Standard),
            ],
        })
        .unwrap();

    let room = registry.get_room(&room_id).unwrap();
    assert_eq!(
        room.members().permission(&UserId::new("b")),
        Some(Permission::Standard)
    );
    assert_eq!(
        room.members().permission(&UserId::new("c")),
        Some(Permission::None)
    );
    assert!(!room.is_read_only());
    assert!(room.is_operator());
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[test]
fn join_loss_and_recovery() {
    let (mut registry, mut events) = RoomRegistry::new(UserId::new("a"), contacts(), 64);
    let room_id = RoomId::new("dm");
    registry
        .create_room(RoomParams::new("dm", RoomType::Private, users(&["a", "b"])))
        .unwrap();
    registry.get_room_mut(&room_id).unwrap().set_call_request(Some("call".into()));

    registry
        .dispatch(TransportEvent::Joined {
            room_id: room_id.clone(),
        })
        .unwrap();
    assert_eq!(registry.get_room(&room_id).unwrap().state(), RoomState::Ready);

    registry
        .dispatch(TransportEvent::ConnectionLost {
            room_id: room_id.clone(),
        })
        .unwrap();
    let room = registry.get_room(&room_id).unwrap();
    assert_eq!(room.state(), RoomState::Joining);
    assert!(room.call_request().is_none());

    registry
        .dispatch(TransportEvent::Joined {
            room_id: room_id.clone(),
        })
        .unwrap();
    assert_eq!(registry.get_room(&room_id).unwrap().state(), RoomState::Ready);

    let created = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, RoomEvent::RoomCreated { .. }))
        .count();
    assert_eq!(created, 2);
}

#[test]
fn left_room_cannot_recover() {
    let (mut registry, _events) = RoomRegistry::new(UserId::new("a"), contacts(), 64);
    let room_id = RoomId::new("g");
    registry
        .create_room(RoomParams::new("g", RoomType::Group, users(&["a", "b"])))
        .unwrap();
    registry.get_room_mut(&room_id).unwrap().leave(false).unwrap();

    let result = registry.dispatch(TransportEvent::ConnectionLost {
        room_id: room_id.clone(),
    });
    assert_eq!(
        result,
        Err(RoomError::InvalidStateTransition {
            from: RoomState::Left,
            to: RoomState::Joining,
        })
    );
    assert_eq!(registry.get_room(&room_id).unwrap().state(), RoomState::Left);
}

#[test]
fn second_leave_is_silent() {
    let (mut registry, mut events) = RoomRegistry::new(UserId::new("a"), contacts(), 64);
    let room_id = RoomId::new("g");
    registry
        .create_room(RoomParams::new("g", RoomType::Group, users(&["a", "b"])))
        .unwrap();

    let room = registry.get_room_mut(&room_id).unwrap();
    room.leave(false).unwrap();
    assert_eq!(room.state(), RoomState::Left);
    drain(&mut events);

    room.leave(false).unwrap();
    assert_eq!(room.state(), RoomState::Left);
    assert!(drain(&mut events).is_empty());
}

#[test]
fn destroying_a_group_room_notifies_peers() {
    let (mut registry, mut events) = RoomRegistry::new(UserId::new("a"), contacts(), 64);
    let room_id = RoomId::new("g");
    registry
        .create_room(RoomParams::new("g", RoomType::Group, users(&["a", "b"])))
        .unwrap();
    registry
        .dispatch(TransportEvent::Joined {
            room_id: room_id.clone(),
        })
        .unwrap();
    drain(&mut events);

    let room = registry.destroy_room(&room_id, true).unwrap();
    assert_eq!(room.state(), RoomState::Left);
    assert!(registry.is_empty());

    let events = drain(&mut events);
    assert_eq!(
        events.first(),
        Some(&RoomEvent::RoomDestroyed {
            room_id: room_id.clone()
        })
    );
    assert!(events.contains(&RoomEvent::LeaveChatRequested {
        room_id: room_id.clone()
    }));
    assert_eq!(
        events.last(),
        Some(&RoomEvent::StateChanged {
            room_id,
            old: RoomState::Leaving,
            new: RoomState::Left,
        })
    );
}

// ---------------------------------------------------------------------------
// Last interaction
// ---------------------------------------------------------------------------

#[test]
fn interactions_track_contacts_and_ignore_backfill() {
    let (mut registry, _events) = RoomRegistry::new(UserId::new("a"), contacts(), 64);
    let room_id = RoomId::new("g");
    registry
        .create_room(RoomParams::new("g", RoomType::Group, users(&["a", "b", "c", "z"])))
        .unwrap();

    registry.append_message(&room_id, from("b", "m1", 100)).unwrap();
    registry.append_message(&room_id, from("z", "m2", 110)).unwrap();
    assert_eq!(
        registry.last_interaction(&UserId::new("b")),
        Some(Timestamp::from_secs(100))
    );
    assert!(registry.last_interaction(&UserId::new("z")).is_none());

    registry.append_message(&room_id, from("c", "old", 50)).unwrap();
    assert!(registry.last_interaction(&UserId::new("c")).is_none());

    registry.append_message(&room_id, from("a", "mine", 200)).unwrap();
    assert_eq!(
        registry.last_interaction(&UserId::new("b")),
        Some(Timestamp::from_secs(200))
    );
    assert_eq!(
        registry.last_interaction(&UserId::new("c")),
        Some(Timestamp::from_secs(200))
    );
    assert_eq!(
        registry.get_room(&room_id).unwrap().last_activity(),
        Some(Timestamp::from_secs(200))
    );

    let order: Vec<UserId> = registry
        .interactions()
        .most_recent_first()
        .into_iter()
        .map(|(user, _)| user)
        .collect();
    assert_eq!(order, users(&["b", "c"]));
}

// ---------------------------------------------------------------------------
// Titles and revocation via the manager
// ---------------------------------------------------------------------------

#[tokio::test]
async fn titles_and_revocation() {
    let (transport, _frames) = LoopbackTransport::new(64);
    let api = InMemoryApi::new();
    api.insert_node(NodeMeta {
        h: NodeHandle::new("n1"),
        k: vec![9],
        t: 0,
        s: 12,
        name: "plan.md".into(),
        hash: None,
        fa: None,
        ts: 1,
    });
    let (manager, _events) = ChatManager::new(
        UserId::new("a"),
        transport,
        api,
        contacts(),
        ChatConfig {
            title_max_len: 8,
            ..ChatConfig::default()
        },
    );

    let lonely = manager
        .create_room(RoomParams::new("lonely", RoomType::Group, users(&["a", "z"])))
        .unwrap();
    assert_eq!(manager.room_title(&lonely).as_deref(), Some(EMPTY_ROOM_TITLE));

    let group = manager
        .create_room(
            RoomParams::new("g", RoomType::Group, users(&["a", "b", "c"]))
                .with_topic("quarterly planning"),
        )
        .unwrap();
    assert_eq!(manager.room_title(&group).as_deref(), Some("quarterl"));
    manager
        .handle_transport_event(TransportEvent::RosterUpdated {
            room_id: group.clone(),
            members: vec![RosterEntry::member("a", Permission::Full)],
        })
        .unwrap();

    let report = manager
        .attach_nodes(&group, &[NodeHandle::new("n1")])
        .await
        .unwrap();
    assert!(report.is_complete());
    let attachment = report.attached[0].clone();

    manager
        .revoke_attachment(&group, &NodeHandle::new("n1"))
        .unwrap()
        .delivered()
        .await;
    let registry = manager.registry();
    let room = registry.get_room(&group).unwrap();
    assert!(room.message_by_id(&attachment).unwrap().revoked);
    assert_eq!(room.buffer().len(), 2);
}
