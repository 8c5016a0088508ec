use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::codec::NodeHash;
use crate::crypto::Signature;
use crate::cryptree::{KeyedNode, Location};

use super::{removal_message, CommitOutcome, ContentStore, StoreError};

/// In-memory content store
#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    inner: Arc<RwLock<HashMap<Location, (NodeHash, KeyedNode)>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn fetch_node(&self, location: &Location) -> Result<Option<KeyedNode>, StoreError> {
        Ok(self
            .inner
            .read()
            .get(location)
            .map(|(_, node)| node.clone()))
    }

    async fn commit(
        &self,
        location: &Location,
        node: &KeyedNode,
        expected: Option<NodeHash>,
        signature: &Signature,
    ) -> Result<CommitOutcome, StoreError> {
        let hash = node.content_hash()?;
        location
            .writer
            .verify(hash.as_bytes(), signature)
            .map_err(|_| StoreError::Unauthorized(location.clone()))?;

        let mut inner = self.inner.write();

        let current = inner.get(location);
        if current.map(|(h, _)| *h) != expected {
            return Ok(CommitOutcome::Conflict(current.map(|(_, n)| n.clone())));
        }

        inner.insert(location.clone(), (hash, node.clone()));
        Ok(CommitOutcome::Committed(hash))
    }

    async fn remove(
        &self,
        location: &Location,
        expected: NodeHash,
        signature: &Signature,
    ) -> Result<CommitOutcome, StoreError> {
        location
            .writer
            .verify(&removal_message(&expected), signature)
            .map_err(|_| StoreError::Unauthorized(location.clone()))?;

        let mut inner = self.inner.write();

        let current = inner.get(location).map(|(hash, _)| *hash);
        if current != Some(expected) {
            return Ok(CommitOutcome::Conflict(
                inner.get(location).map(|(_, n)| n.clone()),
            ));
        }

        inner.remove(location);
        Ok(CommitOutcome::Committed(expected))
    }
}
