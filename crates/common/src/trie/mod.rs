//! Path-indexed tries of entry points
//!
//! A [`TrieNode`] maps canonical paths (`alice/docs/a.txt`, no leading or
//! trailing slash) to [`EntryPoint`]s. Paths that stop between entry
//! points are virtual directories. Paths that run past an entry point are
//! resolved by walking the real directory below it.
//!
//! A branch can also be a whole trie kept by another source. A user's
//! global trie mounts one [`FriendCapabilityTrie`] per friend, which keeps
//! itself in step with the capabilities that friend has shared, reading
//! only the log records it has not seen yet.

mod friend;
mod node;

use std::fmt::Debug;

use async_trait::async_trait;

use crate::cryptree::EntryPoint;
use crate::fs::FsError;

pub use friend::FriendCapabilityTrie;
pub use node::{TrieChild, TrieEntry, TrieNode};

/// A trie that can be mounted as a branch of another one.
///
/// Paths are relative to the mount point.
#[async_trait]
pub trait CapabilityTrie: Send + Sync + Debug {
    async fn resolve(&self, path: &str) -> Result<Option<TrieEntry>, FsError>;

    async fn list_children(&self, path: &str) -> Result<Vec<TrieEntry>, FsError>;

    async fn put(&self, path: &str, entry: EntryPoint) -> Result<(), FsError>;

    async fn put_subtree(&self, path: &str, subtree: TrieChild) -> Result<(), FsError>;

    async fn remove(&self, path: &str) -> Result<Option<EntryPoint>, FsError>;
}
