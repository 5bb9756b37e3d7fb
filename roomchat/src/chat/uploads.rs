//! Pending-upload reconciliation.
//!
//! A file uploaded from inside a room is shared into that room once two
//! things are true: the upload produced a node, and the node has its
//! derived asset (thumbnail/preview) if its type needs one. Upload and asset
//! events arrive in any order, so entries are keyed by upload id and matched
//! to assets by node handle (or asset id, for asset failures).

use std::collections::{HashMap, HashSet};
use std::fmt;

use roomchat_proto::message::{NodeHandle, RoomId};

/// Identifier of an upload started from a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadId(String);

impl UploadId {
    /// Wraps an upload identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events from the upload and asset pipelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// An upload was initiated from a room.
    Started {
        /// Upload id.
        upload_id: UploadId,
        /// Room to share the file into.
        room_id: RoomId,
        /// Whether the file type needs a derived asset first.
        requires_asset: bool,
    },
    /// The upload finished and produced a node.
    Completed {
        /// Upload id.
        upload_id: UploadId,
        /// The new node.
        node: NodeHandle,
        /// Id of the asset being generated, if any.
        asset_id: Option<String>,
        /// Whether the node already carries its asset.
        has_asset: bool,
    },
    /// A derived asset was attached to a node.
    AssetReady {
        /// The node.
        node: NodeHandle,
    },
    /// Generating a derived asset failed.
    AssetFailed {
        /// The asset id reported at completion.
        asset_id: String,
    },
    /// The upload failed.
    Failed {
        /// Upload id.
        upload_id: UploadId,
    },
    /// The upload was cancelled.
    Aborted {
        /// Upload id.
        upload_id: UploadId,
    },
}

/// An upload whose node can now be shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyUpload {
    /// Room to share into.
    pub room_id: RoomId,
    /// Node to share.
    pub node: NodeHandle,
}

#[derive(Debug, Clone)]
struct PendingUpload {
    room_id: RoomId,
    requires_asset: bool,
    node: Option<NodeHandle>,
    asset_id: Option<String>,
    asset_attached: bool,
}

impl PendingUpload {
    fn ready_node(&self) -> Option<&NodeHandle> {
        self.node
            .as_ref()
            .filter(|_| !self.requires_asset || self.asset_attached)
    }
}

/// Uploads waiting for their node and asset.
#[derive(Debug, Default)]
pub struct PendingUploads {
    pending: HashMap<UploadId, PendingUpload>,
    early_assets: HashSet<NodeHandle>,
    early_failures: HashSet<String>,
}

impl PendingUploads {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of uploads still pending.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether `upload_id` is pending.
    #[must_use]
    pub fn contains(&self, upload_id: &UploadId) -> bool {
        self.pending.contains_key(upload_id)
    }

    /// Whether an upload is still waiting for its node, so an asset event
    /// for an unknown node may belong to it.
    fn awaiting_node(&self) -> bool {
        self.pending.values().any(|p| p.node.is_none())
    }

    fn forget_early_events_if_idle(&mut self) {
        if !self.awaiting_node() {
            self.early_assets.clear();
            self.early_failures.clear();
        }
    }

    /// Feeds one event. Returns the upload that became ready, which is
    /// removed from the tracker.
    pub fn handle(&mut self, event: UploadEvent) -> Option<ReadyUpload> {
        let upload_id = match event {
            UploadEvent::Started {
                upload_id,
                room_id,
                requires_asset,
            } => {
                tracing::debug!(upload_id = %upload_id, room_id = %room_id, requires_asset, "upload pending");
                self.pending.insert(
                    upload_id.clone(),
                    PendingUpload {
                        room_id,
                        requires_asset,
                        node: None,
                        asset_id: None,
                        asset_attached: false,
                    },
                );
                upload_id
            }
            UploadEvent::Completed {
                upload_id,
                node,
                asset_id,
                has_asset,
            } => {
                let Some(entry) = self.pending.get_mut(&upload_id) else {
                    tracing::debug!(upload_id = %upload_id, "completion for untracked upload");
                    return None;
                };
                entry.asset_attached = has_asset || self.early_assets.remove(&node);
                if let Some(id) = &asset_id
                    && self.early_failures.remove(id)
                {
                    entry.requires_asset = false;
                }
                entry.node = Some(node);
                entry.asset_id = asset_id;
                upload_id
            }
            UploadEvent::AssetReady { node } => {
                let found = self
                    .pending
                    .iter_mut()
                    .find(|(_, p)| p.node.as_ref() == Some(&node));
                let Some((upload_id, entry)) = found else {
                    if self.awaiting_node() {
                        self.early_assets.insert(node);
                    }
                    return None;
                };
                entry.asset_attached = true;
                upload_id.clone()
            }
            UploadEvent::AssetFailed { asset_id } => {
                let found = self
                    .pending
                    .iter_mut()
                    .find(|(_, p)| p.asset_id.as_ref() == Some(&asset_id));
                let Some((upload_id, entry)) = found else {
                    if self.awaiting_node() {
                        self.early_failures.insert(asset_id);
                    }
                    return None;
                };
                tracing::warn!(upload_id = %upload_id, asset_id = %asset_id, "asset generation failed, sharing without it");
                entry.requires_asset = false;
                upload_id.clone()
            }
            UploadEvent::Failed { upload_id } | UploadEvent::Aborted { upload_id } => {
                if self.pending.remove(&upload_id).is_some() {
                    tracing::debug!(upload_id = %upload_id, "upload dropped");
                }
                self.forget_early_events_if_idle();
                return None;
            }
        };

        let ready = self.pending.get(&upload_id)?.ready_node().cloned()?;
        let entry = self.pending.remove(&upload_id)?;
        self.forget_early_events_if_idle();
        tracing::debug!(upload_id = %upload_id, node = %ready, "upload ready to share");
        Some(ReadyUpload {
            room_id: entry.room_id,
            node: ready,
        })
    }
}
