//! Shared message model and wire encodings for `RoomChat`.

pub mod codec;
pub mod management;
pub mod message;
