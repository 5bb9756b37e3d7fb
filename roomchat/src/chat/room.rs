//! Room state machine.
//!
//! A [`Room`] owns its [`Membership`] table and [`MessageBuffer`] and is the
//! only place either is mutated. Every observable change is reported as a
//! [`RoomEvent`] on the channel shared by all rooms of a registry.
//!
//! # Lifecycle
//!
//! ```text
//! Initialized(5) -> Joining(10) -> Joined(20) -> Ready(150) -> Ended(190) -> Leaving(200) -> Left(250)
//! ```
//!
//! States only move forward. The one exception is connection recovery,
//! which may drop back to `Joining` or `Initialized`. `Left` is terminal.

use std::fmt;

use tokio::sync::mpsc;

use roomchat_proto::management::ManagementMessage;
use roomchat_proto::message::{Message, MessageId, OrderKey, RoomId, Timestamp, UserId};

use super::buffer::{AppendOutcome, MessageBuffer};
use super::members::{Membership, Permission};
use crate::contacts::ContactDirectory;
use crate::transport::{RoomRoute, RosterEntry};

/// Title of a group room with no topic and no known participants.
pub const EMPTY_ROOM_TITLE: &str = "Empty conversation";

/// Errors that can occur during room operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    /// Room creation parameters are malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A state change would move the room backwards.
    #[error("invalid state transition {from} -> {to}")]
    InvalidStateTransition {
        /// State before the attempted change.
        from: RoomState,
        /// Rejected target state.
        to: RoomState,
    },

    /// The local model is out of sync with the transport.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// No room found with the given ID.
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// A 1:1 room cannot be left explicitly.
    #[error("cannot leave private room {0}")]
    CannotLeavePrivate(RoomId),
}

/// Kind of conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomType {
    /// Exactly two participants.
    Private,
    /// Any number of participants.
    Group,
}

/// Lifecycle state. Ordered by its numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoomState {
    /// Created locally.
    Initialized = 5,
    /// Join in progress.
    Joining = 10,
    /// Joined on the backend.
    Joined = 20,
    /// Fully usable.
    Ready = 150,
    /// Conversation ended.
    Ended = 190,
    /// Leave in progress.
    Leaving = 200,
    /// Left; terminal.
    Left = 250,
}

impl RoomState {
    /// Numeric value of the state.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "INITIALIZED",
            Self::Joining => "JOINING",
            Self::Joined => "JOINED",
            Self::Ready => "READY",
            Self::Ended => "ENDED",
            Self::Leaving => "LEAVING",
            Self::Left => "LEFT",
        };
        f.write_str(name)
    }
}

/// Events emitted by rooms and the registry for UI or transport consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// A room was created, or recovered and needs its observers re-attached.
    RoomCreated {
        /// The room.
        room_id: RoomId,
    },
    /// The room moved to a new lifecycle state.
    StateChanged {
        /// The room.
        room_id: RoomId,
        /// Previous state.
        old: RoomState,
        /// New state.
        new: RoomState,
    },
    /// A message was added to the buffer.
    MessageAppended {
        /// The room.
        room_id: RoomId,
        /// The appended message.
        message_id: MessageId,
    },
    /// A stored message changed (confirmed, revoked, retried).
    MessageUpdated {
        /// The room.
        room_id: RoomId,
        /// The changed message.
        message_id: MessageId,
    },
    /// A message was removed from the buffer.
    MessageRemoved {
        /// The room.
        room_id: RoomId,
        /// The removed message.
        message_id: MessageId,
    },
    /// The membership table changed.
    MembersUpdated {
        /// The room.
        room_id: RoomId,
    },
    /// The local user asked to leave a group room; peers must be notified.
    LeaveChatRequested {
        /// The room.
        room_id: RoomId,
    },
    /// The room is about to be removed from the registry.
    RoomDestroyed {
        /// The room.
        room_id: RoomId,
    },
    /// An outgoing message outlived the retry window unsent.
    ManualRetryRequired {
        /// The room.
        room_id: RoomId,
        /// The stuck message.
        message_id: MessageId,
    },
}

/// Parameters for creating a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomParams {
    /// Room identifier.
    pub room_id: RoomId,
    /// Private or group.
    pub room_type: RoomType,
    /// All participants, including the local user.
    pub participants: Vec<UserId>,
    /// Creation time.
    pub ctime: Timestamp,
    /// Last known activity, if any.
    pub last_activity: Option<Timestamp>,
    /// Transport chat identifier.
    pub chat_id: String,
    /// Transport shard hint.
    pub chat_shard: Option<u32>,
    /// Transport endpoint hint.
    pub chatd_url: Option<String>,
    /// Group topic.
    pub topic: Option<String>,
}

impl RoomParams {
    /// Parameters with `ctime = now`, no activity, and the room id reused as
    /// the chat id.
    pub fn new(
        room_id: impl Into<RoomId>,
        room_type: RoomType,
        participants: impl IntoIterator<Item = UserId>,
    ) -> Self {
        let room_id = room_id.into();
        Self {
            chat_id: room_id.to_string(),
            room_id,
            room_type,
            participants: participants.into_iter().collect(),
            ctime: Timestamp::now(),
            last_activity: None,
            chat_shard: None,
            chatd_url: None,
            topic: None,
        }
    }

    /// Sets the group topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the last known activity.
    #[must_use]
    pub fn with_last_activity(mut self, last_activity: Timestamp) -> Self {
        self.last_activity = Some(last_activity);
        self
    }
}

/// Contact whose last-interaction time should move forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    /// The contact.
    pub user_id: UserId,
    /// When the interaction happened.
    pub at: Timestamp,
}

/// Result of [`Room::append_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReport {
    /// Whether the buffer took the message.
    pub outcome: AppendOutcome,
    /// Interaction candidates; the registry filters them by contact list.
    pub interactions: Vec<Interaction>,
}

/// One chat room.
#[derive(Debug)]
pub struct Room {
    room_id: RoomId,
    room_type: RoomType,
    state: RoomState,
    self_id: UserId,
    members: Membership,
    buffer: MessageBuffer,
    route: RoomRoute,
    ctime: Timestamp,
    last_activity: Option<Timestamp>,
    topic: Option<String>,
    call_request: Option<String>,
    event_tx: mpsc::Sender<RoomEvent>,
}

impl Room {
    /// Validates `params` and builds a room in [`RoomState::Initialized`].
    pub(crate) fn new(
        self_id: UserId,
        params: RoomParams,
        event_tx: mpsc::Sender<RoomEvent>,
    ) -> Result<Self, RoomError> {
        let RoomParams {
            room_id,
            room_type,
            mut participants,
            ctime,
            last_activity,
            chat_id,
            chat_shard,
            chatd_url,
            topic,
        } = params;

        if room_id.as_str().is_empty() {
            return Err(RoomError::InvalidArgument("room id is empty".into()));
        }
        participants.sort();
        participants.dedup();
        if room_type == RoomType::Private
            && (participants.len() != 2 || !participants.contains(&self_id))
        {
            return Err(RoomError::InvalidArgument(format!(
                "private room {room_id} needs the local user plus exactly one other participant, got {}",
                participants.len()
            )));
        }

        Ok(Self {
            members: Membership::for_room(room_type, &participants),
            buffer: MessageBuffer::new(room_id.clone(), self_id.clone()),
            route: RoomRoute {
                room_id: room_id.clone(),
                chat_id,
                chat_shard,
                chatd_url,
            },
            room_id,
            room_type,
            state: RoomState::Initialized,
            self_id,
            ctime,
            last_activity,
            topic,
            call_request: None,
            event_tx,
        })
    }

    fn emit(&self, event: RoomEvent) {
        // A dropped receiver means nobody is listening.
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            tracing::warn!(room_id = %self.room_id, ?event, "event channel full, dropping event");
        }
    }

    // --- Accessors ---

    /// Room identifier.
    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Private or group.
    #[must_use]
    pub const fn room_type(&self) -> RoomType {
        self.room_type
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RoomState {
        self.state
    }

    /// Membership table.
    #[must_use]
    pub const fn members(&self) -> &Membership {
        &self.members
    }

    /// Message buffer.
    #[must_use]
    pub const fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    /// Transport routing information.
    #[must_use]
    pub const fn route(&self) -> &RoomRoute {
        &self.route
    }

    /// Creation time.
    #[must_use]
    pub const fn ctime(&self) -> Timestamp {
        self.ctime
    }

    /// Most recent activity.
    #[must_use]
    pub const fn last_activity(&self) -> Option<Timestamp> {
        self.last_activity
    }

    /// Group topic.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Sets or clears the group topic.
    pub fn set_topic(&mut self, topic: Option<String>) {
        self.topic = topic;
    }

    /// Pending incoming call request, if any.
    #[must_use]
    pub fn call_request(&self) -> Option<&str> {
        self.call_request.as_deref()
    }

    /// Records or clears a pending call request.
    pub fn set_call_request(&mut self, call_request: Option<String>) {
        self.call_request = call_request;
    }

    /// A message by id.
    #[must_use]
    pub fn message_by_id(&self, message_id: &MessageId) -> Option<&Message> {
        self.buffer.get(message_id)
    }

    /// Whether history is still loading.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.buffer.messages_history_is_loading()
    }

    /// Sets the history-loading flag.
    pub const fn set_history_loading(&mut self, loading: bool) {
        self.buffer.set_history_loading(loading);
    }

    // --- Membership queries ---

    /// All participants, sorted.
    #[must_use]
    pub fn participants(&self) -> Vec<UserId> {
        let mut all: Vec<UserId> = self.members.iter().map(|(u, _)| u.clone()).collect();
        all.sort();
        all
    }

    /// Participants other than the local user.
    ///
    /// A membership desync is logged and yields an empty list.
    #[must_use]
    pub fn participants_except_self(&self) -> Vec<UserId> {
        self.members
            .participants_except(&self.self_id)
            .unwrap_or_else(|e| {
                tracing::warn!(room_id = %self.room_id, error = %e, "membership desync");
                Vec::new()
            })
    }

    /// Whether the local user may not write.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.members.is_read_only(&self.self_id, self.state)
    }

    /// Whether the local user has operator rights.
    #[must_use]
    pub fn is_operator(&self) -> bool {
        self.members.is_operator(&self.self_id, self.room_type)
    }

    /// Whether the room is leaving or has left.
    #[must_use]
    pub fn is_left_or_leaving(&self) -> bool {
        matches!(self.state, RoomState::Leaving | RoomState::Left)
    }

    /// Display title of the room.
    ///
    /// Group rooms use the topic cut to `max_len` characters, else the names
    /// of the other participants that are known contacts. Private rooms use
    /// the other participant's name.
    pub fn title(&self, contacts: &impl ContactDirectory, max_len: usize) -> String {
        match self.room_type {
            RoomType::Private => self
                .participants_except_self()
                .first()
                .and_then(|other| contacts.display_name(other))
                .unwrap_or_default(),
            RoomType::Group => {
                if let Some(topic) = self.topic.as_deref()
                    && !topic.is_empty()
                {
                    return topic.chars().take(max_len).collect();
                }
                let names: Vec<String> = self
                    .participants()
                    .iter()
                    .filter(|u| **u != self.self_id)
                    .filter_map(|u| contacts.display_name(u))
                    .collect();
                if names.is_empty() {
                    EMPTY_ROOM_TITLE.to_string()
                } else {
                    names.join(", ")
                }
            }
        }
    }

    // --- State machine ---

    /// Moves the room to `new_state`.
    ///
    /// Setting the current state again is a no-op. Otherwise the new state
    /// must be greater than the current one, unless `is_recover` is set and
    /// the target is `Joining` or `Initialized`. Nothing leaves `Left`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidStateTransition`]; the state is unchanged.
    pub fn set_state(&mut self, new_state: RoomState, is_recover: bool) -> Result<(), RoomError> {
        if new_state == self.state {
            tracing::debug!(room_id = %self.room_id, state = %new_state, "ignoring same-state change");
            return Ok(());
        }

        let recovering =
            is_recover && matches!(new_state, RoomState::Joining | RoomState::Initialized);
        if self.state == RoomState::Left || !(new_state > self.state || recovering) {
            tracing::warn!(
                room_id = %self.room_id,
                from = %self.state,
                to = %new_state,
                is_recover,
                "rejected state transition"
            );
            return Err(RoomError::InvalidStateTransition {
                from: self.state,
                to: new_state,
            });
        }

        let old = self.state;
        self.state = new_state;
        tracing::debug!(room_id = %self.room_id, from = %old, to = %new_state, "room state changed");
        self.emit(RoomEvent::StateChanged {
            room_id: self.room_id.clone(),
            old,
            new: new_state,
        });
        Ok(())
    }

    /// Leaves the room.
    ///
    /// Drops the local user to [`Permission::None`], asks peers to be
    /// notified when `trigger_leave_request` is set on a group room, then
    /// walks through `Leaving` to `Left`. Calling it on a left room only
    /// re-applies the permission.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::CannotLeavePrivate`] if `trigger_leave_request`
    /// is set on a private room; the state is then left unchanged.
    pub fn leave(&mut self, trigger_leave_request: bool) -> Result<(), RoomError> {
        if self
            .members
            .set_permission(self.self_id.clone(), Permission::None)
        {
            self.emit(RoomEvent::MembersUpdated {
                room_id: self.room_id.clone(),
            });
        }

        if trigger_leave_request {
            if self.room_type == RoomType::Private {
                tracing::error!(room_id = %self.room_id, "can't leave a private room");
                return Err(RoomError::CannotLeavePrivate(self.room_id.clone()));
            }
            self.emit(RoomEvent::LeaveChatRequested {
                room_id: self.room_id.clone(),
            });
        }

        if self.state != RoomState::Left {
            self.set_state(RoomState::Leaving, false)?;
            self.set_state(RoomState::Left, false)?;
        }
        Ok(())
    }

    /// Recovers from a lost connection.
    ///
    /// Clears any pending call request, drops back to `Joining` and
    /// re-announces the room so observers re-attach.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidStateTransition`] if the room has left.
    pub fn recover(&mut self) -> Result<(), RoomError> {
        self.call_request = None;
        self.set_state(RoomState::Joining, true)?;
        self.emit(RoomEvent::RoomCreated {
            room_id: self.room_id.clone(),
        });
        Ok(())
    }

    /// Applies roster lines from the transport.
    ///
    /// Private rooms only take permission changes for existing participants.
    /// Returns `true` if the table changed.
    pub fn apply_roster(&mut self, entries: &[RosterEntry]) -> bool {
        let mut changed = false;
        for entry in entries {
            let known = self.members.contains(&entry.user_id);
            if self.room_type == RoomType::Private && (!known || entry.permission.is_none()) {
                tracing::warn!(
                    room_id = %self.room_id,
                    user_id = %entry.user_id,
                    "ignoring roster change that would break a private room"
                );
                continue;
            }
            changed |= match entry.permission {
                Some(level) => self.members.set_permission(entry.user_id.clone(), level),
                None => self.members.remove(&entry.user_id).is_some(),
            };
        }
        if changed {
            self.emit(RoomEvent::MembersUpdated {
                room_id: self.room_id.clone(),
            });
        }
        changed
    }

    // --- Messages ---

    /// Appends a message and updates the room's activity.
    ///
    /// Rejected messages (deleted, echo, duplicate) change nothing. For an
    /// accepted message whose time is strictly newer than the room's last
    /// activity, `last_activity` moves forward and the report lists the
    /// contacts the local user interacted with.
    pub fn append_message(&mut self, message: Message) -> AppendReport {
        let management = message.management().unwrap_or_else(|e| {
            tracing::warn!(
                room_id = %self.room_id,
                message_id = %message.message_id,
                error = %e,
                "undecodable management payload, keeping raw text"
            );
            None
        });
        let message_id = message.message_id.clone();
        let author = message.user_id.clone();
        let activity = message.activity_timestamp();

        let outcome = self.buffer.append(message);
        if !outcome.is_accepted() {
            tracing::debug!(room_id = %self.room_id, message_id = %message_id, ?outcome, "message not appended");
            return AppendReport {
                outcome,
                interactions: Vec::new(),
            };
        }
        self.emit(RoomEvent::MessageAppended {
            room_id: self.room_id.clone(),
            message_id,
        });

        if let Some(revoke @ ManagementMessage::RevokeAttachment(_)) = &management {
            for revoked in self.buffer.apply_revocation(revoke) {
                self.emit(RoomEvent::MessageUpdated {
                    room_id: self.room_id.clone(),
                    message_id: revoked,
                });
            }
        }

        let interactions = activity
            .map(|at| self.record_activity(&author, at))
            .unwrap_or_default();
        AppendReport {
            outcome,
            interactions,
        }
    }

    fn record_activity(&mut self, author: &UserId, at: Timestamp) -> Vec<Interaction> {
        if self.last_activity.is_some_and(|last| last >= at) {
            return Vec::new();
        }
        self.last_activity = Some(at);

        let targets = if *author == self.self_id {
            self.participants_except_self()
        } else {
            match self.room_type {
                RoomType::Private => {
                    let others = self.participants_except_self();
                    if others.is_empty() {
                        vec![author.clone()]
                    } else {
                        others
                    }
                }
                RoomType::Group => vec![author.clone()],
            }
        };
        targets
            .into_iter()
            .filter(|u| *u != self.self_id)
            .map(|user_id| Interaction { user_id, at })
            .collect()
    }

    /// Records the transport confirmation of an outgoing message.
    ///
    /// Returns `false` (and does nothing) if the message is gone.
    pub fn confirm_message(&mut self, message_id: &MessageId, order_key: OrderKey) -> bool {
        if !self.buffer.confirm(message_id, order_key) {
            tracing::debug!(room_id = %self.room_id, message_id = %message_id, "confirmation for unknown message ignored");
            return false;
        }
        self.emit(RoomEvent::MessageUpdated {
            room_id: self.room_id.clone(),
            message_id: message_id.clone(),
        });
        true
    }

    /// Flags an unsent message for manual retry.
    pub fn flag_manual_retry(&mut self, message_id: &MessageId) -> bool {
        if !self.buffer.flag_manual_retry(message_id) {
            return false;
        }
        tracing::info!(room_id = %self.room_id, message_id = %message_id, "message requires manual retry");
        self.emit(RoomEvent::ManualRetryRequired {
            room_id: self.room_id.clone(),
            message_id: message_id.clone(),
        });
        true
    }

    /// Prepares an unsent message for resubmission.
    pub fn take_for_retry(&mut self, message_id: &MessageId) -> Option<Message> {
        let message = self.buffer.take_for_retry(message_id)?;
        self.emit(RoomEvent::MessageUpdated {
            room_id: self.room_id.clone(),
            message_id: message_id.clone(),
        });
        Some(message)
    }

    /// Expires unsent messages older than `max_age_secs`.
    pub fn expire_unsent(&mut self, now: Timestamp, max_age_secs: u64) -> usize {
        let expired = self.buffer.expire_unsent(now, max_age_secs);
        for message_id in &expired {
            tracing::info!(room_id = %self.room_id, message_id = %message_id, "unsent message expired");
            self.emit(RoomEvent::MessageUpdated {
                room_id: self.room_id.clone(),
                message_id: message_id.clone(),
            });
        }
        expired.len()
    }

    /// Removes a message from the buffer.
    pub fn remove_message(&mut self, message_id: &MessageId) -> Option<Message> {
        let removed = self.buffer.remove(message_id)?;
        self.emit(RoomEvent::MessageRemoved {
            room_id: self.room_id.clone(),
            message_id: message_id.clone(),
        });
        Some(removed)
    }

    /// Marks all incoming messages seen.
    pub fn mark_all_seen(&mut self) -> usize {
        self.buffer.mark_all_seen()
    }
}
