//! REST client seam for node sharing and node metadata.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use roomchat_proto::management::NodeMeta;
use roomchat_proto::message::{NodeHandle, UserId};

/// Errors from the REST client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The node does not exist or is not accessible.
    #[error("node {0} not found")]
    NodeNotFound(NodeHandle),

    /// The server refused the request.
    #[error("request failed: {0}")]
    Request(String),
}

/// Calls the core needs from the storage API.
pub trait RestClient: Send + Sync {
    /// Grants `user_id` access to the node's metadata and key.
    fn share_node(
        &self,
        node: &NodeHandle,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// Fetches the metadata attached to a node share.
    fn fetch_node_metadata(
        &self,
        node: &NodeHandle,
    ) -> impl std::future::Future<Output = Result<NodeMeta, ApiError>> + Send;
}

/// In-memory [`RestClient`] holding a fixed set of nodes.
#[derive(Debug, Default)]
pub struct InMemoryApi {
    nodes: Mutex<HashMap<NodeHandle, NodeMeta>>,
    shares: Mutex<Vec<(NodeHandle, UserId)>>,
    failing_shares: Mutex<HashSet<NodeHandle>>,
}

impl InMemoryApi {
    /// Creates an API with no nodes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node.
    pub fn insert_node(&self, meta: NodeMeta) {
        self.nodes.lock().insert(meta.h.clone(), meta);
    }

    /// Makes every share of `node` fail.
    pub fn fail_shares_of(&self, node: NodeHandle) {
        self.failing_shares.lock().insert(node);
    }

    /// Shares performed so far, in call order.
    #[must_use]
    pub fn shares(&self) -> Vec<(NodeHandle, UserId)> {
        self.shares.lock().clone()
    }
}

impl RestClient for InMemoryApi {
    async fn share_node(&self, node: &NodeHandle, user_id: &UserId) -> Result<(), ApiError> {
        if self.failing_shares.lock().contains(node) {
            return Err(ApiError::Request(format!("share of {node} refused")));
        }
        if !self.nodes.lock().contains_key(node) {
            return Err(ApiError::NodeNotFound(node.clone()));
        }
        self.shares.lock().push((node.clone(), user_id.clone()));
        Ok(())
    }

    async fn fetch_node_metadata(&self, node: &NodeHandle) -> Result<NodeMeta, ApiError> {
        self.nodes
            .lock()
            .get(node)
            .cloned()
            .ok_or_else(|| ApiError::NodeNotFound(node.clone()))
    }
}
