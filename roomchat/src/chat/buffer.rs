//! Ordered, de-duplicated message log of one room.
//!
//! Messages are kept in append order. Display order comes from
//! [`Message::order_value`]: confirmed messages carry their transport order
//! key, unconfirmed ones get a provisional value a fixed step above the
//! current last message so they always sort after it.

use std::collections::HashSet;

use roomchat_proto::management::ManagementMessage;
use roomchat_proto::message::{DeliveryState, Message, MessageId, OrderKey, RoomId, Timestamp, UserId};

/// Gap between a provisional order value and the one before it.
pub const PROVISIONAL_ORDER_STEP: f64 = 0.1;

/// Result of appending a message to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The message was stored.
    Accepted,
    /// A message with the same id is already present.
    Duplicate,
    /// The message is marked deleted.
    Deleted,
    /// The message is the room echoing itself.
    SystemEcho,
}

impl AppendOutcome {
    /// Whether the message was stored.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Message history of a single room.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    room_id: RoomId,
    self_id: UserId,
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    history_loading: bool,
}

impl MessageBuffer {
    /// Creates an empty buffer for `room_id`, viewed by `self_id`.
    #[must_use]
    pub fn new(room_id: RoomId, self_id: UserId) -> Self {
        Self {
            room_id,
            self_id,
            messages: Vec::new(),
            seen: HashSet::new(),
            history_loading: false,
        }
    }

    /// Appends a message unless it is deleted, a system echo, or a duplicate.
    ///
    /// A message without an order value is placed after the current last
    /// message. The first message of an empty buffer keeps no order value.
    pub fn append(&mut self, mut message: Message) -> AppendOutcome {
        if message.deleted {
            return AppendOutcome::Deleted;
        }
        if message.from_room.as_ref() == Some(&self.room_id) {
            return AppendOutcome::SystemEcho;
        }
        if self.seen.contains(&message.message_id) {
            return AppendOutcome::Duplicate;
        }

        if message.order_value.is_none() {
            message.order_value = self.provisional_order();
        }
        self.seen.insert(message.message_id.clone());
        self.messages.push(message);
        AppendOutcome::Accepted
    }

    fn provisional_order(&self) -> Option<f64> {
        if self.messages.is_empty() {
            return None;
        }
        let base = self
            .messages
            .iter()
            .filter_map(|m| m.order_value)
            .max_by(f64::total_cmp)
            .unwrap_or(0.0);
        if !base.is_finite() {
            tracing::error!(room_id = %self.room_id, base, "corrupt order value in buffer, leaving new message unordered");
            return None;
        }
        Some(base + PROVISIONAL_ORDER_STEP)
    }

    /// Looks up a message by id.
    #[must_use]
    pub fn get(&self, message_id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.message_id == *message_id)
    }

    fn get_mut(&mut self, message_id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.message_id == *message_id)
    }

    /// Removes a message, forgetting its id.
    pub fn remove(&mut self, message_id: &MessageId) -> Option<Message> {
        let index = self
            .messages
            .iter()
            .position(|m| m.message_id == *message_id)?;
        self.seen.remove(message_id);
        Some(self.messages.remove(index))
    }

    /// Records the transport confirmation of an outgoing message.
    ///
    /// Returns `false` if the message is no longer in the buffer.
    pub fn confirm(&mut self, message_id: &MessageId, order_key: OrderKey) -> bool {
        let Some(message) = self.get_mut(message_id) else {
            return false;
        };
        message.internal_id = Some(order_key);
        #[allow(clippy::cast_precision_loss)]
        let order_value = order_key as f64;
        message.order_value = Some(order_value);
        message.sent = DeliveryState::Sent;
        message.requires_manual_retry = false;
        true
    }

    /// Flags an unsent message as needing a manual retry.
    ///
    /// Returns `true` only when the flag was newly set.
    pub fn flag_manual_retry(&mut self, message_id: &MessageId) -> bool {
        match self.get_mut(message_id) {
            Some(message)
                if message.sent == DeliveryState::NotSent && !message.requires_manual_retry =>
            {
                message.requires_manual_retry = true;
                true
            }
            _ => false,
        }
    }

    /// Clears the manual-retry flag of an unsent message and returns a copy
    /// of it for resubmission.
    pub fn take_for_retry(&mut self, message_id: &MessageId) -> Option<Message> {
        let message = self.get_mut(message_id)?;
        if message.sent != DeliveryState::NotSent {
            return None;
        }
        message.requires_manual_retry = false;
        Some(message.clone())
    }

    /// Moves unsent messages created more than `max_age_secs` before `now`
    /// to [`DeliveryState::NotSentExpired`]. Expired messages can no longer
    /// be retried.
    pub fn expire_unsent(&mut self, now: Timestamp, max_age_secs: u64) -> Vec<MessageId> {
        let mut expired = Vec::new();
        for message in &mut self.messages {
            if message.sent == DeliveryState::NotSent
                && message.delay.secs_until(now) > max_age_secs
            {
                message.sent = DeliveryState::NotSentExpired;
                expired.push(message.message_id.clone());
            }
        }
        expired
    }

    /// Marks earlier attachment messages revoked by `revoke`.
    ///
    /// Returns the ids of messages that changed.
    pub fn apply_revocation(&mut self, revoke: &ManagementMessage) -> Vec<MessageId> {
        let ManagementMessage::RevokeAttachment(revoked) = revoke else {
            return Vec::new();
        };
        let mut changed = Vec::new();
        for message in &mut self.messages {
            if message.revoked {
                continue;
            }
            if let Ok(Some(ManagementMessage::Attachment(nodes))) = message.management()
                && nodes.iter().any(|n| revoked.iter().any(|r| r.h == n.h))
            {
                message.revoked = true;
                changed.push(message.message_id.clone());
            }
        }
        changed
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the buffer holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages in append order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Messages in display order. Unordered messages sort first.
    #[must_use]
    pub fn ordered(&self) -> Vec<&Message> {
        let mut out: Vec<&Message> = self.messages.iter().collect();
        out.sort_by(|a, b| {
            a.order_value
                .unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&b.order_value.unwrap_or(f64::NEG_INFINITY))
        });
        out
    }

    /// Incoming messages not yet seen by the local user.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sent == DeliveryState::NotSeen && m.user_id != self.self_id)
            .count()
    }

    /// Marks every unseen incoming message as seen, returning how many changed.
    pub fn mark_all_seen(&mut self) -> usize {
        let mut changed = 0;
        for message in &mut self.messages {
            if message.sent == DeliveryState::NotSeen {
                message.sent = DeliveryState::Seen;
                changed += 1;
            }
        }
        changed
    }

    /// The most recent free-text message in display order.
    #[must_use]
    pub fn latest_text_message(&self) -> Option<&Message> {
        self.ordered()
            .into_iter()
            .rev()
            .find(|m| !m.is_management() && !m.deleted)
    }

    /// Whether the transport is still loading history into this buffer.
    #[must_use]
    pub const fn messages_history_is_loading(&self) -> bool {
        self.history_loading
    }

    /// Sets the history-loading flag.
    pub const fn set_history_loading(&mut self, loading: bool) {
        self.history_loading = loading;
    }
}
