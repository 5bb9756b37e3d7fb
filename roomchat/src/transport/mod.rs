//! Message transport abstraction.
//!
//! The core never talks to the messaging backend directly. Outbound, it hands
//! messages to a [`MessageTransport`] and waits for the order key the backend
//! assigns. Inbound, the transport's events are fed to the registry as
//! [`TransportEvent`]s.
//!
//! - [`loopback::LoopbackTransport`]: in-process transport for tests and the demo binary

pub mod loopback;

use roomchat_proto::codec::CodecError;
use roomchat_proto::message::{Message, MessageId, OrderKey, RoomId, UserId};

use crate::chat::members::Permission;

/// Routing information the transport needs to reach a room.
///
/// Everything except `room_id` is passed through opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRoute {
    /// Room identifier.
    pub room_id: RoomId,
    /// Transport-level chat identifier.
    pub chat_id: String,
    /// Backend shard hosting the chat.
    pub chat_shard: Option<u32>,
    /// Backend endpoint URL for the shard.
    pub chatd_url: Option<String>,
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the backend has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The backend refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The outbound frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// One roster line: `permission` of `None` means the participant left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Participant.
    pub user_id: UserId,
    /// New permission, or `None` if removed from the room.
    pub permission: Option<Permission>,
}

impl RosterEntry {
    /// A participant with the given permission.
    pub fn member(user_id: impl Into<UserId>, permission: Permission) -> Self {
        Self {
            user_id: user_id.into(),
            permission: Some(permission),
        }
    }

    /// A participant that left the room.
    pub fn removed(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            permission: None,
        }
    }
}

/// Inbound events from the transport, routed by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message arrived (live or history backfill).
    MessageReceived {
        /// Target room.
        room_id: RoomId,
        /// The message.
        message: Message,
    },
    /// The backend confirmed the room roster.
    RosterUpdated {
        /// Target room.
        room_id: RoomId,
        /// Changed roster lines.
        members: Vec<RosterEntry>,
    },
    /// The local user joined the room on the backend.
    Joined {
        /// Target room.
        room_id: RoomId,
    },
    /// The connection serving the room was lost.
    ConnectionLost {
        /// Target room.
        room_id: RoomId,
    },
    /// History fetch started or finished.
    HistoryLoading {
        /// Target room.
        room_id: RoomId,
        /// Whether history is loading.
        loading: bool,
    },
    /// An outgoing message was confirmed outside of its send call.
    MessageConfirmed {
        /// Target room.
        room_id: RoomId,
        /// Temporary id of the confirmed message.
        message_id: MessageId,
        /// Order key assigned by the backend.
        order_key: OrderKey,
    },
}

impl TransportEvent {
    /// The room this event is addressed to.
    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        match self {
            Self::MessageReceived { room_id, .. }
            | Self::RosterUpdated { room_id, .. }
            | Self::Joined { room_id }
            | Self::ConnectionLost { room_id }
            | Self::HistoryLoading { room_id, .. }
            | Self::MessageConfirmed { room_id, .. } => room_id,
        }
    }
}

/// Async transport for outgoing room messages.
///
/// # Invariant
///
/// A message may be submitted more than once under the same temporary id
/// (manual retry). Implementations must treat resubmission as idempotent.
pub trait MessageTransport: Send + Sync {
    /// Submit a message to a room.
    ///
    /// Resolves with the order key the backend assigned once the message is
    /// accepted. The future may stay pending indefinitely; callers apply
    /// their own deadlines.
    fn send(
        &self,
        route: &RoomRoute,
        message: &Message,
    ) -> impl std::future::Future<Output = Result<OrderKey, TransportError>> + Send;

    /// Drop any partial record of an unconfirmed message.
    fn discard(
        &self,
        route: &RoomRoute,
        message_id: &MessageId,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}
