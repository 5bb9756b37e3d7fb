//! Management-message wire encoding.
//!
//! A management message is a structured payload carried in the text body of
//! a chat message:
//!
//! ```text
//! [MANAGEMENT marker][sub-type marker][UTF-8 JSON array]
//! ```
//!
//! The marker values are fixed by the messaging backend and other clients;
//! they must not change.

use serde::{Deserialize, Serialize};

use crate::message::{NodeHandle, UserId};

/// First byte of every management message.
pub const MANAGEMENT: char = '\u{0}';

/// Sub-type: file/folder nodes shared into the room.
pub const ATTACHMENT: char = '\u{10}';

/// Sub-type: previously shared nodes revoked.
pub const REVOKE_ATTACHMENT: char = '\u{11}';

/// Sub-type: contact cards shared into the room.
pub const CONTACT: char = '\u{12}';

/// Errors from decoding or encoding a management payload.
#[derive(Debug, thiserror::Error)]
pub enum ManagementError {
    /// The management marker is present but no sub-type follows.
    #[error("management message is missing its sub-type byte")]
    MissingSubType,

    /// The sub-type byte is not one of the known markers.
    #[error("unknown management sub-type 0x{0:02x}")]
    UnknownSubType(u32),

    /// The JSON body could not be parsed or produced.
    #[error("management payload JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Metadata of a shared node, as sent to other participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Node handle.
    pub h: NodeHandle,
    /// Node key words.
    pub k: Vec<u32>,
    /// Node type (0 = file, 1 = folder).
    pub t: u8,
    /// Size in bytes.
    pub s: u64,
    /// Display name.
    pub name: String,
    /// Content fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// File attribute (thumbnail / preview) descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fa: Option<String>,
    /// Last modification time (unix seconds).
    pub ts: u64,
}

/// A shared contact card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMeta {
    /// Contact user handle.
    pub u: UserId,
    /// Contact email.
    pub email: String,
    /// Display name (falls back to the email).
    pub name: String,
}

/// A revoked node reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeMeta {
    /// Handle of the node whose share is revoked.
    pub h: NodeHandle,
}

/// Decoded management payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementMessage {
    /// Nodes shared into the room.
    Attachment(Vec<NodeMeta>),
    /// Contact cards shared into the room.
    Contact(Vec<ContactMeta>),
    /// Node shares revoked.
    RevokeAttachment(Vec<RevokeMeta>),
}

impl ManagementMessage {
    /// The sub-type marker for this payload.
    #[must_use]
    pub const fn sub_type(&self) -> char {
        match self {
            Self::Attachment(_) => ATTACHMENT,
            Self::Contact(_) => CONTACT,
            Self::RevokeAttachment(_) => REVOKE_ATTACHMENT,
        }
    }
}

/// Returns `true` if `text` starts with the management marker.
#[must_use]
pub fn is_management(text: &str) -> bool {
    text.starts_with(MANAGEMENT)
}

/// Encodes a management payload into a message body.
///
/// # Errors
///
/// Returns [`ManagementError::Json`] if serialization fails.
pub fn encode(message: &ManagementMessage) -> Result<String, ManagementError> {
    let json = match message {
        ManagementMessage::Attachment(nodes) => serde_json::to_string(nodes)?,
        ManagementMessage::Contact(contacts) => serde_json::to_string(contacts)?,
        ManagementMessage::RevokeAttachment(revoked) => serde_json::to_string(revoked)?,
    };
    let mut body = String::with_capacity(json.len() + 2);
    body.push(MANAGEMENT);
    body.push(message.sub_type());
    body.push_str(&json);
    Ok(body)
}

/// Decodes a message body. Free text yields `Ok(None)`.
///
/// # Errors
///
/// Returns [`ManagementError`] if the management marker is present but the
/// sub-type is missing/unknown or the JSON body does not parse.
pub fn decode(text: &str) -> Result<Option<ManagementMessage>, ManagementError> {
    let mut chars = text.chars();
    if chars.next() != Some(MANAGEMENT) {
        return Ok(None);
    }
    let sub_type = chars.next().ok_or(ManagementError::MissingSubType)?;
    let body = chars.as_str();

    let message = match sub_type {
        ATTACHMENT => ManagementMessage::Attachment(serde_json::from_str(body)?),
        CONTACT => ManagementMessage::Contact(serde_json::from_str(body)?),
        REVOKE_ATTACHMENT => ManagementMessage::RevokeAttachment(serde_json::from_str(body)?),
        other => return Err(ManagementError::UnknownSubType(u32::from(other))),
    };
    Ok(Some(message))
}
