//! `RoomChat`: chat room lifecycle and message delivery core.

pub mod api;
pub mod chat;
pub mod config;
pub mod contacts;
pub mod transport;
