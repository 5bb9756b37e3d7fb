//! Per-room membership table: participant to permission level.

use std::collections::HashMap;

use roomchat_proto::message::UserId;

use super::room::{RoomError, RoomState, RoomType};

/// Permission level of a room participant.
///
/// The numeric values are shared with the transport roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    /// Read-only. Also the placeholder while a group roster is loading.
    None = 0,
    /// Read-only member with limited visibility.
    ReadOnly = 1,
    /// Regular member.
    Standard = 2,
    /// Operator.
    Full = 3,
}

impl Permission {
    /// Numeric level as used on the wire.
    #[must_use]
    pub const fn level(self) -> u8 {
        self as u8
    }

    /// Parses a wire level, `None` for values outside the enum.
    #[must_use]
    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::None),
            1 => Some(Self::ReadOnly),
            2 => Some(Self::Standard),
            3 => Some(Self::Full),
            _ => None,
        }
    }
}

/// Mapping of participant to permission level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    entries: HashMap<UserId, Permission>,
}

impl Membership {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the initial table for a new room.
    ///
    /// Private rooms grant [`Permission::Full`] to both participants; group
    /// rooms start everyone at [`Permission::None`] until the roster arrives.
    #[must_use]
    pub fn for_room(room_type: RoomType, participants: &[UserId]) -> Self {
        let level = match room_type {
            RoomType::Private => Permission::Full,
            RoomType::Group => Permission::None,
        };
        Self {
            entries: participants.iter().map(|u| (u.clone(), level)).collect(),
        }
    }

    /// Sets (or overwrites) a participant's permission.
    ///
    /// Returns `true` if the stored value changed.
    pub fn set_permission(&mut self, user_id: UserId, level: Permission) -> bool {
        self.entries.insert(user_id, level) != Some(level)
    }

    /// Removes a participant, returning their previous permission.
    pub fn remove(&mut self, user_id: &UserId) -> Option<Permission> {
        self.entries.remove(user_id)
    }

    /// Permission of a participant, if a member.
    #[must_use]
    pub fn permission(&self, user_id: &UserId) -> Option<Permission> {
        self.entries.get(user_id).copied()
    }

    /// Whether `user_id` is a member.
    #[must_use]
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.entries.contains_key(user_id)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(participant, permission)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&UserId, Permission)> {
        self.entries.iter().map(|(u, p)| (u, *p))
    }

    /// All participants except `user_id`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvariantViolation`] if `user_id` is not a
    /// member: the local model is out of sync with the transport.
    pub fn participants_except(&self, user_id: &UserId) -> Result<Vec<UserId>, RoomError> {
        if !self.entries.contains_key(user_id) {
            return Err(RoomError::InvariantViolation(format!(
                "{user_id} is not a member"
            )));
        }
        let mut others: Vec<UserId> = self
            .entries
            .keys()
            .filter(|u| *u != user_id)
            .cloned()
            .collect();
        others.sort();
        Ok(others)
    }

    /// Whether `self_id` may not write to the room.
    ///
    /// True if their permission is [`Permission::None`] or the room is
    /// leaving or left.
    #[must_use]
    pub fn is_read_only(&self, self_id: &UserId, state: RoomState) -> bool {
        self.permission(self_id) == Some(Permission::None)
            || matches!(state, RoomState::Leaving | RoomState::Left)
    }

    /// Whether `self_id` has operator rights.
    ///
    /// Both participants of a private room are implicitly operators.
    #[must_use]
    pub fn is_operator(&self, self_id: &UserId, room_type: RoomType) -> bool {
        room_type == RoomType::Private || self.permission(self_id) == Some(Permission::Full)
    }
}
