//! Chat application layer for `RoomChat`.
//!
//! Contains the [`ChatManager`] which orchestrates the send pipeline
//! (validate -> optimistic append -> transmit -> reconcile), attachment
//! sharing, pending-upload reconciliation, and inbound event routing to the
//! [`RoomRegistry`].
//!
//! Sending returns as soon as the optimistic message is in the room. The
//! transport call runs on its own task and applies its outcome to the room
//! by id; the returned [`Outgoing`] handle can be awaited for that outcome
//! or dropped.

pub mod buffer;
pub mod interactions;
pub mod members;
pub mod registry;
pub mod room;
pub mod uploads;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use roomchat_proto::management::{
    self, ContactMeta, ManagementError, ManagementMessage, RevokeMeta,
};
use roomchat_proto::message::{
    Message, MessageId, NodeHandle, RoomId, Timestamp, UserId, ValidationError, validate_text,
};

use crate::api::{ApiError, RestClient};
use crate::config::ChatConfig;
use crate::contacts::ContactDirectory;
use crate::transport::{MessageTransport, RoomRoute, TransportEvent};

use registry::RoomRegistry;
use room::{Room, RoomError, RoomEvent, RoomParams};
use uploads::{PendingUploads, UploadEvent};

/// Errors returned by the send pipeline before a message reaches the
/// transport.
///
/// Transport failures are not in this list: they end up as message state
/// (`NotSent`, then `requires_manual_retry`).
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No room with the given ID.
    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),

    /// No retryable or cancellable message with the given ID.
    #[error("no unsent message {0}")]
    UnknownMessage(MessageId),

    /// The local user may not write to the room.
    #[error("room {0} is read-only")]
    ReadOnly(RoomId),

    /// Message validation failed (empty, too large).
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The room rejected the operation.
    #[error("room error: {0}")]
    Room(#[from] RoomError),

    /// A management payload could not be encoded.
    #[error("management payload error: {0}")]
    Management(#[from] ManagementError),

    /// A REST call needed before composing the message failed.
    #[error("api error: {0}")]
    Api(#[from] ApiError),
}

/// Outcome of [`ChatManager::attach_nodes`].
///
/// Nodes are shared independently; a failed node does not roll back the
/// messages already sent for the others.
#[derive(Debug, Default)]
pub struct AttachReport {
    /// Attachment messages sent, one per successful node.
    pub attached: Vec<MessageId>,
    /// Nodes that could not be shared.
    pub failed: Vec<(NodeHandle, SendError)>,
}

impl AttachReport {
    /// Whether every node was shared.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// An optimistic message whose delivery runs in the background.
///
/// Dropping the handle detaches the delivery; it still runs to completion.
#[derive(Debug)]
pub struct Outgoing {
    message_id: MessageId,
    delivery: JoinHandle<()>,
}

impl Outgoing {
    /// Id the message was appended under.
    #[must_use]
    pub const fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Detaches the delivery and returns the message id.
    #[must_use]
    pub fn detach(self) -> MessageId {
        self.message_id
    }

    /// Waits until the transport outcome has been applied to the room.
    pub async fn delivered(self) -> MessageId {
        let Self {
            message_id,
            delivery,
        } = self;
        if let Err(e) = delivery.await {
            tracing::error!(message_id = %message_id, error = %e, "delivery task failed");
        }
        message_id
    }
}

/// Manages the rooms of the local user and the message send pipeline.
///
/// All room state lives in a [`RoomRegistry`] behind a synchronous lock
/// that is never held across an `.await`. Transport and REST calls happen
/// outside the lock; their outcomes are applied back to the room by id, so
/// a room or message that disappeared in the meantime is skipped.
pub struct ChatManager<T: MessageTransport, A: RestClient, D: ContactDirectory> {
    self_id: UserId,
    registry: Arc<Mutex<RoomRegistry<D>>>,
    transport: Arc<T>,
    api: A,
    contacts: Arc<D>,
    uploads: Mutex<PendingUploads>,
    config: ChatConfig,
    /// Mixed into temporary message ids so identical texts get distinct ids.
    nonce: AtomicU64,
}

impl<T, A, D> ChatManager<T, A, D>
where
    T: MessageTransport + 'static,
    A: RestClient,
    D: ContactDirectory + 'static,
{
    /// Creates a new `ChatManager`.
    ///
    /// Returns the manager and a receiver for the [`RoomEvent`]s of every
    /// room, which the UI layer should consume.
    pub fn new(
        self_id: UserId,
        transport: T,
        api: A,
        contacts: Arc<D>,
        config: ChatConfig,
    ) -> (Self, mpsc::Receiver<RoomEvent>) {
        let (registry, event_rx) =
            RoomRegistry::new(self_id.clone(), Arc::clone(&contacts), config.event_buffer);
        let manager = Self {
            self_id,
            registry: Arc::new(Mutex::new(registry)),
            transport: Arc::new(transport),
            api,
            contacts,
            uploads: Mutex::new(PendingUploads::new()),
            config,
            nonce: AtomicU64::new(rand::random()),
        };
        (manager, event_rx)
    }

    /// The local user.
    #[must_use]
    pub const fn self_id(&self) -> &UserId {
        &self.self_id
    }

    /// Chat configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// The transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The REST client.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Locks the room registry.
    ///
    /// The guard must not be held across an `.await`.
    pub fn registry(&self) -> MutexGuard<'_, RoomRegistry<D>> {
        self.registry.lock()
    }

    // --- Room lifecycle ---

    /// Creates a room.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidArgument`] for malformed parameters or a
    /// duplicate room id.
    pub fn create_room(&self, params: RoomParams) -> Result<RoomId, RoomError> {
        let mut registry = self.registry.lock();
        let room = registry.create_room(params)?;
        Ok(room.room_id().clone())
    }

    /// Destroys a room, leaving it first (notifying peers if `notify`).
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::RoomNotFound`] if no such room exists.
    pub fn destroy_room(&self, room_id: &RoomId, notify: bool) -> Result<(), RoomError> {
        self.registry.lock().destroy_room(room_id, notify)?;
        Ok(())
    }

    /// Display title of a room.
    #[must_use]
    pub fn room_title(&self, room_id: &RoomId) -> Option<String> {
        let registry = self.registry.lock();
        let room = registry.get_room(room_id)?;
        Some(room.title(self.contacts.as_ref(), self.config.title_max_len))
    }

    /// Whether the local user may still edit `message_id`.
    #[must_use]
    pub fn is_editable(&self, room_id: &RoomId, message_id: &MessageId) -> bool {
        let registry = self.registry.lock();
        let Some(room) = registry.get_room(room_id) else {
            return false;
        };
        room.message_by_id(message_id).is_some_and(|m| {
            m.is_editable(
                &self.self_id,
                Timestamp::now(),
                self.config.edit_window.as_secs(),
                room.is_read_only(),
            )
        })
    }

    /// Routes one inbound transport event to its room.
    ///
    /// # Errors
    ///
    /// Returns the [`RoomError`] of the registry; unknown rooms and rejected
    /// transitions are reported, not fatal.
    pub fn handle_transport_event(&self, event: TransportEvent) -> Result<(), RoomError> {
        self.registry.lock().dispatch(event)
    }

    fn courier(&self) -> Courier<T, D> {
        Courier {
            registry: Arc::clone(&self.registry),
            transport: Arc::clone(&self.transport),
            retry_window: self.config.retry_window,
        }
    }

    // --- Send pipeline ---

    /// Send a text message to a room.
    ///
    /// Pipeline steps:
    /// 1. Validate the text (non-empty, within size limit)
    /// 2. Build an optimistic [`Message`] with a temporary id and
    ///    `sent = NotSent`, and append it to the room immediately
    /// 3. Submit it to the transport on a background task
    /// 4. On acceptance, record the transport order key on the message
    ///
    /// Returns once step 2 is done. If the transport has not accepted the
    /// message within the retry window, or fails outright, the message is
    /// flagged for manual retry. The window is a soft deadline: a late
    /// acceptance still confirms the message.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the text is invalid or the room is unknown
    /// or read-only. Transport failures are not errors.
    pub fn send_message(&self, room_id: &RoomId, text: &str) -> Result<Outgoing, SendError> {
        validate_text(text)?;

        let (route, message) = {
            let mut registry = self.registry.lock();
            let room = registry
                .get_room(room_id)
                .ok_or_else(|| SendError::UnknownRoom(room_id.clone()))?;
            if room.is_read_only() {
                return Err(SendError::ReadOnly(room_id.clone()));
            }
            let route = room.route().clone();

            let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
            let message = Message::outgoing(
                MessageId::temporary(room_id, text, nonce),
                self.self_id.clone(),
                text.to_string(),
                Timestamp::now(),
            );
            registry.append_message(room_id, message.clone())?;
            (route, message)
        };

        tracing::debug!(room_id = %room_id, message_id = %message.message_id, "message queued");
        Ok(self.courier().spawn(route, message))
    }

    /// Resubmits a message flagged for manual retry, under the same id.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::UnknownMessage`] if the message is gone,
    /// already sent, or expired.
    pub fn retry_message(&self, room_id: &RoomId, message_id: &MessageId) -> Result<Outgoing, SendError> {
        let (route, message) = {
            let mut registry = self.registry.lock();
            let room = registry
                .get_room_mut(room_id)
                .ok_or_else(|| SendError::UnknownRoom(room_id.clone()))?;
            let message = room
                .take_for_retry(message_id)
                .ok_or_else(|| SendError::UnknownMessage(message_id.clone()))?;
            (room.route().clone(), message)
        };

        tracing::info!(room_id = %room_id, message_id = %message_id, "retrying message");
        Ok(self.courier().spawn(route, message))
    }

    /// Removes an unconfirmed message and asks the transport to discard it.
    ///
    /// A transport acknowledgement arriving afterwards is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::UnknownMessage`] if the message is not in the
    /// room.
    pub async fn cancel_message(&self, room_id: &RoomId, message_id: &MessageId) -> Result<(), SendError> {
        let route = {
            let mut registry = self.registry.lock();
            let room = registry
                .get_room_mut(room_id)
                .ok_or_else(|| SendError::UnknownRoom(room_id.clone()))?;
            room.remove_message(message_id)
                .ok_or_else(|| SendError::UnknownMessage(message_id.clone()))?;
            room.route().clone()
        };

        if let Err(e) = self.transport.discard(&route, message_id).await {
            tracing::warn!(room_id = %room_id, message_id = %message_id, error = %e, "discard failed");
        }
        Ok(())
    }

    /// Expires unsent messages older than the requeue age.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::UnknownRoom`] if no such room exists.
    pub fn expire_unsent(&self, room_id: &RoomId) -> Result<usize, SendError> {
        let mut registry = self.registry.lock();
        let room = registry
            .get_room_mut(room_id)
            .ok_or_else(|| SendError::UnknownRoom(room_id.clone()))?;
        Ok(room.expire_unsent(Timestamp::now(), self.config.requeue_max_age.as_secs()))
    }

    // --- Attachments ---

    /// Shares nodes into a room: one attachment message per node.
    ///
    /// Each node is first shared with every other participant, then its
    /// metadata is fetched and sent as a management message. Nodes are
    /// handled concurrently and independently. The report reflects the
    /// shares only; the attachment messages are delivered in the background.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] only if the room is unknown or read-only;
    /// per-node failures are collected in the [`AttachReport`].
    pub async fn attach_nodes(&self, room_id: &RoomId, nodes: &[NodeHandle]) -> Result<AttachReport, SendError> {
        let participants = {
            let registry = self.registry.lock();
            let room = registry
                .get_room(room_id)
                .ok_or_else(|| SendError::UnknownRoom(room_id.clone()))?;
            if room.is_read_only() {
                return Err(SendError::ReadOnly(room_id.clone()));
            }
            room.participants_except_self()
        };

        let results = join_all(
            nodes
                .iter()
                .map(|node| self.attach_node(room_id, node, &participants)),
        )
        .await;

        let mut report = AttachReport::default();
        for (node, result) in nodes.iter().zip(results) {
            match result {
                Ok(message_id) => report.attached.push(message_id),
                Err(e) => {
                    tracing::warn!(room_id = %room_id, node = %node, error = %e, "attaching node failed");
                    report.failed.push((node.clone(), e));
                }
            }
        }
        Ok(report)
    }

    async fn attach_node(
        &self,
        room_id: &RoomId,
        node: &NodeHandle,
        participants: &[UserId],
    ) -> Result<MessageId, SendError> {
        let shares = join_all(participants.iter().map(|user| self.api.share_node(node, user))).await;
        for result in shares {
            result?;
        }

        let meta = self.api.fetch_node_metadata(node).await?;
        let text = management::encode(&ManagementMessage::Attachment(vec![meta]))?;
        self.send_message(room_id, &text).map(Outgoing::detach)
    }

    /// Shares contact cards into a room as one management message.
    ///
    /// Users that are not known contacts are skipped. Returns `None` if
    /// nothing was left to send.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the room is unknown or read-only.
    pub fn attach_contacts(
        &self,
        room_id: &RoomId,
        users: &[UserId],
    ) -> Result<Option<Outgoing>, SendError> {
        let cards: Vec<ContactMeta> = users
            .iter()
            .filter_map(|user| {
                if !self.contacts.is_contact(user) {
                    tracing::debug!(room_id = %room_id, user_id = %user, "skipping unknown contact");
                    return None;
                }
                let email = self.contacts.email(user).unwrap_or_default();
                let name = self
                    .contacts
                    .display_name(user)
                    .unwrap_or_else(|| email.clone());
                Some(ContactMeta {
                    u: user.clone(),
                    email,
                    name,
                })
            })
            .collect();
        if cards.is_empty() {
            return Ok(None);
        }

        let text = management::encode(&ManagementMessage::Contact(cards))?;
        self.send_message(room_id, &text).map(Some)
    }

    /// Revokes a previously shared node.
    ///
    /// Earlier attachment messages for the node are marked revoked as soon
    /// as the revoke message is appended.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the room is unknown or read-only.
    pub fn revoke_attachment(&self, room_id: &RoomId, node: &NodeHandle) -> Result<Outgoing, SendError> {
        let text = management::encode(&ManagementMessage::RevokeAttachment(vec![RevokeMeta {
            h: node.clone(),
        }]))?;
        self.send_message(room_id, &text)
    }

    // --- Uploads ---

    /// Feeds an upload or asset event, sharing the node once it is ready.
    ///
    /// Returns the attach report if this event completed an upload.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the upload's room is gone or read-only.
    pub async fn handle_upload_event(&self, event: UploadEvent) -> Result<Option<AttachReport>, SendError> {
        let ready = self.uploads.lock().handle(event);
        let Some(ready) = ready else {
            return Ok(None);
        };
        tracing::info!(room_id = %ready.room_id, node = %ready.node, "attaching uploaded node");
        self.attach_nodes(&ready.room_id, std::slice::from_ref(&ready.node))
            .await
            .map(Some)
    }

    /// Number of uploads waiting for their node or asset.
    #[must_use]
    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().len()
    }
}

// --- Background delivery ---

/// Shared handles a delivery task needs from its manager.
struct Courier<T, D: ContactDirectory> {
    registry: Arc<Mutex<RoomRegistry<D>>>,
    transport: Arc<T>,
    retry_window: Duration,
}

impl<T, D> Courier<T, D>
where
    T: MessageTransport + 'static,
    D: ContactDirectory + 'static,
{
    fn spawn(self, route: RoomRoute, message: Message) -> Outgoing {
        let message_id = message.message_id.clone();
        let delivery = tokio::spawn(async move { self.deliver(&route, &message).await });
        Outgoing {
            message_id,
            delivery,
        }
    }

    fn with_room<R>(&self, room_id: &RoomId, f: impl FnOnce(&mut Room) -> R) -> Option<R> {
        let mut registry = self.registry.lock();
        let Some(room) = registry.get_room_mut(room_id) else {
            tracing::debug!(room_id = %room_id, "room gone, dropping delivery outcome");
            return None;
        };
        Some(f(room))
    }

    async fn deliver(&self, route: &RoomRoute, message: &Message) {
        let room_id = &route.room_id;
        let message_id = &message.message_id;
        let deadline = Instant::now() + self.retry_window;

        let send = self.transport.send(route, message);
        tokio::pin!(send);

        let result = tokio::select! {
            result = &mut send => result,
            () = tokio::time::sleep_until(deadline) => {
                tracing::debug!(room_id = %room_id, message_id = %message_id, "retry window elapsed, still waiting for transport");
                self.with_room(room_id, |room| room.flag_manual_retry(message_id));
                send.await
            }
        };

        match result {
            Ok(order_key) => {
                tracing::debug!(room_id = %room_id, message_id = %message_id, order_key, "message confirmed");
                self.with_room(room_id, |room| room.confirm_message(message_id, order_key));
            }
            Err(e) => {
                tracing::warn!(room_id = %room_id, message_id = %message_id, error = %e, "transport send failed");
                tokio::time::sleep_until(deadline).await;
                self.with_room(room_id, |room| room.flag_manual_retry(message_id));
            }
        }
    }
}
