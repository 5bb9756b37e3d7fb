//! Property-based tests for the management payload and frame codecs.
//!
//! Uses proptest to verify:
//! 1. Any attachment, contact or revoke array survives encode → decode.
//! 2. Free text without the marker never decodes as a management message.
//! 3. Random bodies behind the marker never panic the decoder.
//! 4. Any loopback frame survives a framed encode → decode round-trip.

use proptest::prelude::*;
use roomchat_proto::codec::{self, Frame};
use roomchat_proto::management::{self, ContactMeta, ManagementMessage, NodeMeta, RevokeMeta};
use roomchat_proto::message::{Message, MessageId, NodeHandle, RoomId, Timestamp, UserId};

// --- Strategies ---

fn arb_handle() -> impl Strategy<Value = NodeHandle> {
    "[A-Za-z0-9]{8}".prop_map(NodeHandle::new)
}

fn arb_node_meta() -> impl Strategy<Value = NodeMeta> {
    (
        arb_handle(),
        prop::collection::vec(any::<u32>(), 0..8),
        0u8..2,
        any::<u64>(),
        "\\PC{0,40}",
        prop::option::of("[A-Za-z0-9+/]{22}"),
        prop::option::of("[0-9]{1,3}:[0-9]\\*[A-Za-z0-9]{11}"),
        any::<u64>(),
    )
        .prop_map(|(h, k, t, s, name, hash, fa, ts)| NodeMeta {
            h,
            k,
            t,
            s,
            name,
            hash,
            fa,
            ts,
        })
}

fn arb_contact_meta() -> impl Strategy<Value = ContactMeta> {
    ("[A-Za-z0-9_-]{1,11}", "[a-z]{1,8}@[a-z]{1,8}\\.com", "\\PC{0,30}").prop_map(
        |(u, email, name)| ContactMeta {
            u: UserId::new(u),
            email,
            name,
        },
    )
}

fn arb_management() -> impl Strategy<Value = ManagementMessage> {
    prop_oneof![
        prop::collection::vec(arb_node_meta(), 0..5).prop_map(ManagementMessage::Attachment),
        prop::collection::vec(arb_contact_meta(), 0..5).prop_map(ManagementMessage::Contact),
        prop::collection::vec(arb_handle().prop_map(|h| RevokeMeta { h }), 0..5)
            .prop_map(ManagementMessage::RevokeAttachment),
    ]
}

fn arb_message() -> impl Strategy<Value = Message> {
    ("[a-z0-9-]{1,36}", "[a-z]{1,11}", "\\PC{1,200}", any::<u64>()).prop_map(
        |(id, user, text, secs)| {
            Message::outgoing(
                MessageId::new(id),
                UserId::new(user),
                text,
                Timestamp::from_secs(secs),
            )
        },
    )
}

fn arb_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        ("[a-z0-9]{1,16}".prop_map(RoomId::new), arb_message()).prop_map(|(room_id, message)| Frame::Send { room_id, message }),
        ("[a-z0-9]{1,16}".prop_map(RoomId::new), "[a-z0-9-]{1,36}").prop_map(|(room_id, id)| Frame::Discard {
            room_id,
            message_id: MessageId::new(id),
        }),
    ]
}

// --- Property tests ---

proptest! {
    /// Any management payload survives an encode → decode round-trip.
    #[test]
    fn management_round_trip(message in arb_management()) {
        let body = management::encode(&message).expect("encode should succeed");
        prop_assert!(management::is_management(&body));
        prop_assert_eq!(body.chars().nth(1), Some(message.sub_type()));
        let decoded = management::decode(&body).expect("decode should succeed");
        prop_assert_eq!(decoded, Some(message));
    }

    /// Text that does not start with the marker is always free text.
    #[test]
    fn free_text_is_not_management(text in "[^\\x00]\\PC{0,200}") {
        prop_assert!(!management::is_management(&text));
        prop_assert!(management::decode(&text).expect("free text decodes").is_none());
    }

    /// Arbitrary bytes after the marker never panic the decoder.
    #[test]
    fn marker_with_garbage_does_not_panic(tail in "\\PC{0,64}") {
        let body = format!("\u{0}{tail}");
        let _ = management::decode(&body);
    }

    /// Any loopback frame survives a framed encode → decode round-trip.
    #[test]
    fn framed_round_trip(frame in arb_frame()) {
        let bytes = codec::encode_framed(&frame).expect("encode_framed should succeed");
        let (decoded, consumed) = codec::decode_framed(&bytes).expect("decode_framed should succeed");
        prop_assert_eq!(&frame, &decoded);
        prop_assert_eq!(consumed, bytes.len());
    }

    /// Random bytes never cause a panic when decoded as a framed message.
    #[test]
    fn random_bytes_decode_framed_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_framed(&bytes);
    }
}
