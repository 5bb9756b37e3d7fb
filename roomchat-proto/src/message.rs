//! Message entity and identifier types shared with the transport layer.
//!
//! A [`Message`] is created locally with a temporary [`MessageId`] and a
//! [`DeliveryState::NotSent`] state, or arrives from the transport already
//! carrying its transport-assigned order key. The buffer that owns it decides
//! display order from [`Message::order_value`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::management::{self, ManagementError, ManagementMessage};

/// Maximum allowed message payload size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Namespace for temporary message ids (UUID v5 over room, nonce and content).
const TEMP_MESSAGE_NAMESPACE: Uuid = Uuid::from_u128(0x726f_6f6d_6368_6174_2d74_656d_706d_7367);

/// Transport-assigned ordering key for a confirmed message.
pub type OrderKey = u64;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wraps an opaque identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Opaque room identifier (a chat id or a synthesized room key).
    RoomId
);

string_id!(
    /// Participant / author identifier (user handle).
    UserId
);

string_id!(
    /// Handle of a cloud-storage node (file or folder).
    NodeHandle
);

string_id!(
    /// Message identifier, temporary until the transport confirms it.
    MessageId
);

impl MessageId {
    /// Derives a temporary id for an outgoing message.
    ///
    /// The id is a pure function of room, nonce and content, so a queued
    /// message that is resubmitted keeps the same id and the transport can
    /// de-duplicate it.
    #[must_use]
    pub fn temporary(room_id: &RoomId, content: &str, nonce: u64) -> Self {
        let mut name = Vec::with_capacity(room_id.as_str().len() + content.len() + 9);
        name.extend_from_slice(room_id.as_str().as_bytes());
        name.push(0);
        name.extend_from_slice(&nonce.to_be_bytes());
        name.extend_from_slice(content.as_bytes());
        Self(Uuid::new_v5(&TEMP_MESSAGE_NAMESPACE, &name).to_string())
    }
}

/// Second-precision UTC timestamp (unix seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self(secs)
    }

    /// Creates a timestamp from seconds since the UNIX epoch.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the timestamp as seconds since the UNIX epoch.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Seconds elapsed between `self` and `later`, zero if `later` is earlier.
    #[must_use]
    pub const fn secs_until(&self, later: Self) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Delivery lifecycle of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryState {
    /// No state known (malformed or not yet decrypted).
    Null,
    /// Incoming message the local user has not seen yet.
    NotSeen,
    /// Accepted by the transport.
    Sent,
    /// Outgoing message waiting for transport confirmation.
    NotSent,
    /// Outgoing message that stayed unsent past the resend horizon.
    NotSentExpired,
    /// Delivered to the other side.
    Delivered,
    /// Incoming message the local user has seen.
    Seen,
    /// Removed by its author.
    Deleted,
}

/// One chat message and its delivery state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Temporary client id, or the transport id for incoming messages.
    pub message_id: MessageId,
    /// Transport-assigned order key, once confirmed.
    pub internal_id: Option<OrderKey>,
    /// Author.
    pub user_id: UserId,
    /// Raw payload; management messages start with a marker byte.
    pub text_contents: String,
    /// Creation time assigned locally.
    pub delay: Timestamp,
    /// Server-confirmed time for historical messages.
    pub ts: Option<Timestamp>,
    /// Delivery state.
    pub sent: DeliveryState,
    /// Display ordering key.
    pub order_value: Option<f64>,
    /// Deleted messages are never appended.
    pub deleted: bool,
    /// Set on attachment messages whose nodes were revoked.
    pub revoked: bool,
    /// Set once an unsent message outlives the automatic retry window.
    pub requires_manual_retry: bool,
    /// Room the message was relayed from, for system echoes.
    pub from_room: Option<RoomId>,
}

impl Message {
    /// Builds an optimistic outgoing message in the `NotSent` state.
    #[must_use]
    pub const fn outgoing(
        message_id: MessageId,
        user_id: UserId,
        text_contents: String,
        delay: Timestamp,
    ) -> Self {
        Self {
            message_id,
            internal_id: None,
            user_id,
            text_contents,
            delay,
            ts: None,
            sent: DeliveryState::NotSent,
            order_value: None,
            deleted: false,
            revoked: false,
            requires_manual_retry: false,
            from_room: None,
        }
    }

    /// Builds a message received from the transport.
    ///
    /// An empty body means the author deleted the message.
    #[must_use]
    pub fn incoming(
        message_id: MessageId,
        user_id: UserId,
        text_contents: String,
        ts: Timestamp,
        order_key: Option<OrderKey>,
    ) -> Self {
        let deleted = text_contents.is_empty();
        #[allow(clippy::cast_precision_loss)]
        let order_value = order_key.map(|key| key as f64);
        Self {
            message_id,
            internal_id: order_key,
            user_id,
            text_contents,
            delay: ts,
            ts: Some(ts),
            sent: DeliveryState::NotSeen,
            order_value,
            deleted,
            revoked: false,
            requires_manual_retry: false,
            from_room: None,
        }
    }

    /// Timestamp used for activity tracking: `delay`, falling back to `ts`.
    #[must_use]
    pub fn activity_timestamp(&self) -> Option<Timestamp> {
        if self.delay.as_secs() > 0 {
            Some(self.delay)
        } else {
            self.ts
        }
    }

    /// Whether the payload is a structured management message.
    #[must_use]
    pub fn is_management(&self) -> bool {
        management::is_management(&self.text_contents)
    }

    /// Decodes the management payload, `Ok(None)` for free text.
    ///
    /// # Errors
    ///
    /// Returns [`ManagementError`] if the marker is present but the
    /// sub-type or JSON body is invalid.
    pub fn management(&self) -> Result<Option<ManagementMessage>, ManagementError> {
        management::decode(&self.text_contents)
    }

    /// Whether the local user may still edit or delete this message.
    #[must_use]
    pub fn is_editable(
        &self,
        self_id: &UserId,
        now: Timestamp,
        edit_window_secs: u64,
        room_read_only: bool,
    ) -> bool {
        self.user_id == *self_id
            && !self.deleted
            && !self.requires_manual_retry
            && !room_read_only
            && self.delay.secs_until(now) < edit_window_secs
    }
}

/// Error returned when outgoing text fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message content is empty.
    #[error("message content is empty")]
    Empty,
    /// Message content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validates outgoing text: non-empty and within [`MAX_MESSAGE_SIZE`].
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] or [`ValidationError::TooLarge`].
pub const fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = text.len();
    if size > MAX_MESSAGE_SIZE {
        return Err(ValidationError::TooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}
