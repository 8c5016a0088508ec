//! The content store the file system commits nodes to
//!
//! The store is a map of [`Location`] to [`KeyedNode`] with one atomic
//! primitive: commit a node only if the slot still holds the node we last
//! saw. A conflict is an ordinary [`CommitOutcome`], not an error, so
//! callers can refresh and retry.

mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::{CodecError, NodeHash};
use crate::config::FsConfig;
use crate::crypto::{SecretKey, Signature};
use crate::cryptree::{
    Capability, CryptreeError, EntryPoint, KeyedNode, Location, RetrievedCapability,
};

pub use memory::MemoryContentStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The signature does not verify against the location's writer
    #[error("unauthorized write to {0:?}")]
    Unauthorized(Location),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("cryptree error: {0}")]
    Cryptree(#[from] CryptreeError),
    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Result of a compare-and-swap commit
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// The slot now holds the new node
    Committed(NodeHash),
    /// Someone else got there first. Carries the node currently in the
    /// slot, or `None` if the slot is empty.
    Conflict(Option<KeyedNode>),
}

#[async_trait]
pub trait ContentStore: Send + Sync + Debug + 'static {
    async fn fetch_node(&self, location: &Location) -> Result<Option<KeyedNode>, StoreError>;

    /// Write `node` if the slot's current hash is `expected`.
    ///
    /// `expected == None` means the slot must be empty. The signature is
    /// over the new node's hash and must verify against `location.writer`.
    async fn commit(
        &self,
        location: &Location,
        node: &KeyedNode,
        expected: Option<NodeHash>,
        signature: &Signature,
    ) -> Result<CommitOutcome, StoreError>;

    /// Delete a slot if it still holds `expected`.
    ///
    /// The signature is over [`removal_message`] of the expected hash.
    async fn remove(
        &self,
        location: &Location,
        expected: NodeHash,
        signature: &Signature,
    ) -> Result<CommitOutcome, StoreError>;

    /// Whether the store runs in this process
    fn is_local_execution_environment(&self) -> bool {
        true
    }
}

/// The bytes signed to authorise removing a node
pub fn removal_message(expected: &NodeHash) -> Vec<u8> {
    let mut msg = b"remove:".to_vec();
    msg.extend_from_slice(expected.as_bytes());
    msg
}

/// Handle on a content store plus the file system config.
///
/// Cheap to clone; every [`FileHandle`](crate::fs::FileHandle) carries one.
#[derive(Debug, Clone)]
pub struct Network {
    store: Arc<dyn ContentStore>,
    config: FsConfig,
}

impl Network {
    pub fn new(store: Arc<dyn ContentStore>, config: FsConfig) -> Self {
        Self { store, config }
    }

    /// A network over a fresh in-memory store
    pub fn memory(config: FsConfig) -> Self {
        Self::new(Arc::new(MemoryContentStore::new()), config)
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub async fn get(&self, location: &Location) -> Result<Option<KeyedNode>, StoreError> {
        self.store.fetch_node(location).await
    }

    /// Sign and commit a node
    pub async fn commit(
        &self,
        location: &Location,
        signer: &SecretKey,
        node: &KeyedNode,
        expected: Option<NodeHash>,
    ) -> Result<CommitOutcome, StoreError> {
        let hash = node.content_hash()?;
        let signature = signer.sign(hash.as_bytes());
        let outcome = self
            .store
            .commit(location, node, expected, &signature)
            .await?;
        if let CommitOutcome::Conflict(_) = &outcome {
            tracing::debug!("commit conflict at {:?}", location);
        }
        Ok(outcome)
    }

    /// Sign and remove a node
    pub async fn remove(
        &self,
        location: &Location,
        signer: &SecretKey,
        expected: NodeHash,
    ) -> Result<CommitOutcome, StoreError> {
        let signature = signer.sign(&removal_message(&expected));
        self.store.remove(location, expected, &signature).await
    }

    pub async fn retrieve(
        &self,
        capability: &Capability,
    ) -> Result<Option<RetrievedCapability>, StoreError> {
        Ok(self
            .get(&capability.location)
            .await?
            .map(|node| RetrievedCapability::new(capability.clone(), node)))
    }

    pub async fn resolve_capability(
        &self,
        entry: &EntryPoint,
    ) -> Result<Option<RetrievedCapability>, StoreError> {
        self.retrieve(&entry.pointer).await
    }
}
