//! Room registry: owns every [`Room`] and routes transport events to them.
//!
//! The registry is the only place rooms are created or destroyed, and the
//! single entry point for inbound [`TransportEvent`]s. It also applies the
//! interaction side effects of appended messages to the
//! [`LastInteractions`] record, filtered through the contact directory.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use roomchat_proto::message::{Message, RoomId, Timestamp, UserId};

use super::buffer::AppendOutcome;
use super::interactions::LastInteractions;
use super::room::{Room, RoomError, RoomEvent, RoomParams, RoomState};
use crate::contacts::ContactDirectory;
use crate::transport::TransportEvent;

/// Owner of all rooms of the local user.
pub struct RoomRegistry<D: ContactDirectory> {
    self_id: UserId,
    rooms: HashMap<RoomId, Room>,
    interactions: LastInteractions,
    contacts: Arc<D>,
    event_tx: mpsc::Sender<RoomEvent>,
}

impl<D: ContactDirectory> RoomRegistry<D> {
    /// Creates an empty registry and the receiver for every room's events.
    #[must_use]
    pub fn new(
        self_id: UserId,
        contacts: Arc<D>,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<RoomEvent>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        let registry = Self {
            self_id,
            rooms: HashMap::new(),
            interactions: LastInteractions::new(),
            contacts,
            event_tx,
        };
        (registry, event_rx)
    }

    /// The local user.
    #[must_use]
    pub const fn self_id(&self) -> &UserId {
        &self.self_id
    }

    fn emit(&self, event: RoomEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            tracing::warn!(?event, "event channel full, dropping event");
        }
    }

    /// Creates a room in [`RoomState::Initialized`] and announces it.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidArgument`] if the parameters are malformed
    /// (e.g. a private room without exactly the local user plus one other) or
    /// the room id is already registered.
    pub fn create_room(&mut self, params: RoomParams) -> Result<&mut Room, RoomError> {
        if self.rooms.contains_key(&params.room_id) {
            return Err(RoomError::InvalidArgument(format!(
                "room {} already exists",
                params.room_id
            )));
        }
        let room = Room::new(self.self_id.clone(), params, self.event_tx.clone())?;
        let room_id = room.room_id().clone();
        tracing::info!(room_id = %room_id, room_type = ?room.room_type(), "room created");

        self.emit(RoomEvent::RoomCreated {
            room_id: room_id.clone(),
        });
        Ok(self.rooms.entry(room_id).or_insert(room))
    }

    /// Destroys a room.
    ///
    /// Observers get [`RoomEvent::RoomDestroyed`] first. A room that is not
    /// leaving or left is made to leave (notifying peers if `notify` is set
    /// and the room is a group), and it is always driven to `Left` before
    /// removal.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::RoomNotFound`] if no such room exists.
    pub fn destroy_room(&mut self, room_id: &RoomId, notify: bool) -> Result<Room, RoomError> {
        if !self.rooms.contains_key(room_id) {
            return Err(RoomError::RoomNotFound(room_id.clone()));
        }

        self.emit(RoomEvent::RoomDestroyed {
            room_id: room_id.clone(),
        });

        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;

        if !room.is_left_or_leaving()
            && let Err(e) = room.leave(notify)
        {
            tracing::warn!(room_id = %room_id, error = %e, "leave failed during destroy, leaving silently");
            if let Err(e) = room.leave(false) {
                tracing::warn!(room_id = %room_id, error = %e, "silent leave failed during destroy");
            }
        }
        if room.state() != RoomState::Left
            && let Err(e) = room.set_state(RoomState::Left, false)
        {
            tracing::warn!(room_id = %room_id, error = %e, "could not finish leaving before destroy");
        }

        tracing::info!(room_id = %room_id, "room destroyed");
        self.rooms
            .remove(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))
    }

    /// Looks up a room.
    #[must_use]
    pub fn get_room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Looks up a room for mutation.
    pub fn get_room_mut(&mut self, room_id: &RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    fn room_mut(&mut self, room_id: &RoomId) -> Result<&mut Room, RoomError> {
        self.rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))
    }

    /// Ids of all rooms, sorted.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether the registry has no rooms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Last interaction with a contact.
    #[must_use]
    pub fn last_interaction(&self, user_id: &UserId) -> Option<Timestamp> {
        self.interactions.get(user_id)
    }

    /// The interaction record.
    #[must_use]
    pub const fn interactions(&self) -> &LastInteractions {
        &self.interactions
    }

    /// Appends a message to a room and records the resulting interactions
    /// with known contacts.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::RoomNotFound`] if no such room exists.
    pub fn append_message(
        &mut self,
        room_id: &RoomId,
        message: Message,
    ) -> Result<AppendOutcome, RoomError> {
        let report = self.room_mut(room_id)?.append_message(message);
        for interaction in report.interactions {
            if self.contacts.is_contact(&interaction.user_id) {
                self.interactions
                    .record(interaction.user_id, interaction.at);
            }
        }
        Ok(report.outcome)
    }

    /// Routes one transport event to its room.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::RoomNotFound`] for an unknown room, or the
    /// room's own error for a rejected transition.
    pub fn dispatch(&mut self, event: TransportEvent) -> Result<(), RoomError> {
        tracing::trace!(room_id = %event.room_id(), ?event, "transport event");
        match event {
            TransportEvent::MessageReceived { room_id, message } => {
                self.append_message(&room_id, message)?;
            }
            TransportEvent::RosterUpdated { room_id, members } => {
                self.room_mut(&room_id)?.apply_roster(&members);
            }
            TransportEvent::Joined { room_id } => {
                let room = self.room_mut(&room_id)?;
                if room.state() < RoomState::Joined {
                    room.set_state(RoomState::Joined, false)?;
                }
                if room.state() < RoomState::Ready {
                    room.set_state(RoomState::Ready, false)?;
                }
            }
            TransportEvent::ConnectionLost { room_id } => {
                self.room_mut(&room_id)?.recover()?;
            }
            TransportEvent::HistoryLoading { room_id, loading } => {
                self.room_mut(&room_id)?.set_history_loading(loading);
            }
            TransportEvent::MessageConfirmed {
                room_id,
                message_id,
                order_key,
            } => {
                self.room_mut(&room_id)?
                    .confirm_message(&message_id, order_key);
            }
        }
        Ok(())
    }
}
