use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::capability_log::{CapabilityKind, CapabilityLog};
use crate::cryptree::EntryPoint;
use crate::fs::{canonicalise, FileHandle, FsError};
use crate::store::Network;

use super::{CapabilityTrie, TrieChild, TrieEntry, TrieNode};

#[derive(Debug)]
struct FriendState {
    root: TrieNode,
    shared_dir: FileHandle,
    read_caps_ingested: u64,
    write_caps_ingested: u64,
}

impl FriendState {
    fn ingested_mut(&mut self, kind: CapabilityKind) -> &mut u64 {
        match kind {
            CapabilityKind::ReadOnly => &mut self.read_caps_ingested,
            CapabilityKind::Edit => &mut self.write_caps_ingested,
        }
    }
}

/// Drop the leading owner segment of a recorded path
fn trim_owner(path: &str) -> String {
    let path = canonicalise(path);
    match path.split_once('/') {
        Some((_, rest)) => rest.to_string(),
        None => String::new(),
    }
}

/// The files a friend has shared with us, as a trie kept in step with
/// their capability logs.
///
/// Every read accessor first pulls any log records appended since the
/// last one. Resyncs are serialised, so concurrent callers wait for the
/// one in flight and then see its result.
#[derive(Debug)]
pub struct FriendCapabilityTrie<L: CapabilityLog> {
    owner_name: String,
    shared_entry: EntryPoint,
    log: L,
    network: Network,
    state: Mutex<FriendState>,
}

impl<L: CapabilityLog> FriendCapabilityTrie<L> {
    /// Load everything shared so far through `shared_entry`.
    ///
    /// Returns `None` if the shared directory can't be resolved.
    pub async fn build(
        shared_entry: EntryPoint,
        log: L,
        network: Network,
    ) -> Result<Option<Self>, FsError> {
        let Some(shared_dir) = FileHandle::from_entry_point(&shared_entry, &network).await? else {
            tracing::debug!("shared directory of {} not found", shared_entry.owner_name);
            return Ok(None);
        };

        let trie = Self {
            owner_name: shared_entry.owner_name.clone(),
            shared_entry,
            log,
            network,
            state: Mutex::new(FriendState {
                root: TrieNode::new(),
                shared_dir,
                read_caps_ingested: 0,
                write_caps_ingested: 0,
            }),
        };
        {
            let mut state = trie.state.lock().await;
            for kind in [CapabilityKind::ReadOnly, CapabilityKind::Edit] {
                trie.ingest(&mut state, kind).await?;
            }
        }
        Ok(Some(trie))
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    /// Merge records of `kind` we haven't seen yet
    async fn ingest(&self, state: &mut FriendState, kind: CapabilityKind) -> Result<(), FsError> {
        let shared = &self.shared_entry.pointer.location;
        let seen = *state.ingested_mut(kind);
        let count = self
            .log
            .capability_count(kind, shared)
            .await
            .map_err(FsError::capability_log)?;
        if count <= seen {
            return Ok(());
        }

        let page = self
            .log
            .capability_records(kind, shared, seen)
            .await
            .map_err(FsError::capability_log)?;
        for record in page.records {
            let path = trim_owner(&record.path);
            let entry = EntryPoint::new(record.capability, self.owner_name.clone());
            state.root.merge(&path, entry).await?;
        }
        *state.ingested_mut(kind) += page.count_read;
        tracing::debug!(
            "ingested {} {:?} capabilities from {}",
            page.count_read,
            kind,
            self.owner_name
        );
        Ok(())
    }

    /// Pull new log records, holding the state lock for the caller
    async fn ensure_up_to_date(&self) -> Result<MutexGuard<'_, FriendState>, FsError> {
        let mut state = self.state.lock().await;
        match FileHandle::from_entry_point(&self.shared_entry, &self.network).await? {
            Some(shared_dir) => state.shared_dir = shared_dir,
            None => tracing::warn!("shared directory of {} has gone", self.owner_name),
        }
        self.ingest(&mut state, CapabilityKind::ReadOnly).await?;
        self.ingest(&mut state, CapabilityKind::Edit).await?;
        Ok(state)
    }

    /// Resolve a path below the friend's home. The empty path is the home
    /// directory itself.
    pub async fn resolve(&self, path: &str) -> Result<Option<TrieEntry>, FsError> {
        let state = self.ensure_up_to_date().await?;
        if canonicalise(path).is_empty() {
            let home = match state.shared_dir.retrieve_parent().await? {
                Some(sharing) => sharing.retrieve_parent().await?,
                None => None,
            };
            return Ok(home.map(TrieEntry::Handle));
        }
        state.root.resolve(path, &self.network).await
    }

    pub async fn list_children(&self, path: &str) -> Result<Vec<TrieEntry>, FsError> {
        let state = self.ensure_up_to_date().await?;
        state.root.list_children(path, &self.network).await
    }

    pub async fn child_names(&self, path: &str) -> Result<Vec<String>, FsError> {
        Ok(self
            .list_children(path)
            .await?
            .iter()
            .map(|entry| entry.name().to_string())
            .collect())
    }

    pub async fn read_caps_ingested(&self) -> u64 {
        self.state.lock().await.read_caps_ingested
    }

    pub async fn write_caps_ingested(&self) -> u64 {
        self.state.lock().await.write_caps_ingested
    }
}

/// Mounted in a user's global trie. Writes go straight into the local
/// view and are not sent back to the friend.
#[async_trait]
impl<L: CapabilityLog> CapabilityTrie for FriendCapabilityTrie<L> {
    async fn resolve(&self, path: &str) -> Result<Option<TrieEntry>, FsError> {
        FriendCapabilityTrie::resolve(self, path).await
    }

    async fn list_children(&self, path: &str) -> Result<Vec<TrieEntry>, FsError> {
        FriendCapabilityTrie::list_children(self, path).await
    }

    async fn put(&self, path: &str, entry: EntryPoint) -> Result<(), FsError> {
        self.state.lock().await.root.put(path, entry).await
    }

    async fn put_subtree(&self, path: &str, subtree: TrieChild) -> Result<(), FsError> {
        self.state.lock().await.root.put_subtree(path, subtree).await
    }

    async fn remove(&self, path: &str) -> Result<Option<EntryPoint>, FsError> {
        self.state.lock().await.root.remove(path).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_trim_owner() {
        assert_eq!(trim_owner("/alice/docs/a.txt"), "docs/a.txt");
        assert_eq!(trim_owner("alice/docs"), "docs");
        assert_eq!(trim_owner("/alice"), "");
        assert_eq!(trim_owner("//alice//x/"), "x");
    }
}
