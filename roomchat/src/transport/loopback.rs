//! Loopback transport for testing.
//!
//! Every submitted or discarded message is encoded as a length-prefixed
//! [`Frame`] and pushed onto an in-process [`tokio::sync::mpsc`] channel, so
//! a test (or the demo binary) can observe exactly what would have gone on
//! the wire. Order keys are handed out from an increasing counter.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use roomchat_proto::codec::{self, Frame};
use roomchat_proto::message::{Message, MessageId, OrderKey};

use super::{MessageTransport, RoomRoute, TransportError};

/// How the loopback answers `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Confirm immediately with the next order key.
    #[default]
    Ack,
    /// Reject every message.
    Fail,
    /// Hold the confirmation until [`LoopbackTransport::release_held`].
    Hold,
}

/// In-process [`MessageTransport`] backed by an mpsc channel.
pub struct LoopbackTransport {
    mode: Mutex<AckMode>,
    next_key: AtomicU64,
    released: Notify,
    frames: mpsc::Sender<Vec<u8>>,
}

impl LoopbackTransport {
    /// Creates a transport and the receiver of its encoded frames.
    ///
    /// The first assigned order key is 1. `buffer` is the frame channel
    /// capacity; the receiver must be drained or kept alive, a dropped
    /// receiver makes every call fail with
    /// [`TransportError::ConnectionClosed`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use roomchat::transport::loopback::LoopbackTransport;
    /// use roomchat::transport::{MessageTransport, RoomRoute};
    /// use roomchat_proto::codec;
    /// use roomchat_proto::message::{Message, MessageId, RoomId, Timestamp, UserId};
    ///
    /// # async fn example() {
    /// let (transport, mut frames) = LoopbackTransport::new(32);
    /// let route = RoomRoute {
    ///     room_id: RoomId::new("room"),
    ///     chat_id: "room".into(),
    ///     chat_shard: None,
    ///     chatd_url: None,
    /// };
    /// let message = Message::outgoing(
    ///     MessageId::new("m1"),
    ///     UserId::new("alice"),
    ///     "hello".into(),
    ///     Timestamp::now(),
    /// );
    /// let key = transport.send(&route, &message).await.unwrap();
    /// let bytes = frames.recv().await.unwrap();
    /// let (frame, _) = codec::decode_framed(&bytes).unwrap();
    /// # }
    /// ```
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(buffer);
        let transport = Self {
            mode: Mutex::new(AckMode::default()),
            next_key: AtomicU64::new(1),
            released: Notify::new(),
            frames: tx,
        };
        (transport, rx)
    }

    /// Starts the order-key counter at `first_key`.
    #[must_use]
    pub fn with_first_key(self, first_key: OrderKey) -> Self {
        self.next_key.store(first_key, Ordering::Relaxed);
        self
    }

    /// Switches how subsequent sends are answered.
    pub fn set_mode(&self, mode: AckMode) {
        *self.mode.lock() = mode;
    }

    /// Current answer mode.
    #[must_use]
    pub fn mode(&self) -> AckMode {
        *self.mode.lock()
    }

    /// Confirms every send currently held in [`AckMode::Hold`].
    pub fn release_held(&self) {
        self.released.notify_waiters();
    }

    fn assign_key(&self) -> OrderKey {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    async fn push(&self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = codec::encode_framed(frame)?;
        self.frames
            .send(bytes)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

impl MessageTransport for LoopbackTransport {
    async fn send(&self, route: &RoomRoute, message: &Message) -> Result<OrderKey, TransportError> {
        self.push(&Frame::Send {
            room_id: route.room_id.clone(),
            message: message.clone(),
        })
        .await?;

        let mode = self.mode();
        match mode {
            AckMode::Ack => Ok(self.assign_key()),
            AckMode::Fail => Err(TransportError::Rejected(format!(
                "loopback refused {}",
                message.message_id
            ))),
            AckMode::Hold => {
                self.released.notified().await;
                Ok(self.assign_key())
            }
        }
    }

    async fn discard(&self, route: &RoomRoute, message_id: &MessageId) -> Result<(), TransportError> {
        self.push(&Frame::Discard {
            room_id: route.room_id.clone(),
            message_id: message_id.clone(),
        })
        .await
    }
}
