use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::cryptree::EntryPoint;
use crate::fs::{canonicalise, FileHandle, FsError};
use crate::store::Network;

use super::CapabilityTrie;

/// What a path in a trie resolves to
#[derive(Debug)]
pub enum TrieEntry {
    /// A path between entry points, listing the next segments
    Virtual {
        path: String,
        child_names: BTreeSet<String>,
    },
    Handle(FileHandle),
}

impl TrieEntry {
    pub fn name(&self) -> &str {
        match self {
            TrieEntry::Virtual { path, .. } => path.rsplit('/').next().unwrap_or(""),
            TrieEntry::Handle(handle) => handle.name(),
        }
    }

    pub fn into_handle(self) -> Option<FileHandle> {
        match self {
            TrieEntry::Handle(handle) => Some(handle),
            TrieEntry::Virtual { .. } => None,
        }
    }
}

/// A branch below a trie node
#[derive(Debug, Clone)]
pub enum TrieChild {
    Local(TrieNode),
    /// A trie kept by someone else, such as a friend's shares
    Mounted(Arc<dyn CapabilityTrie>),
}

impl TrieChild {
    fn is_empty(&self) -> bool {
        match self {
            TrieChild::Local(node) => node.is_empty(),
            TrieChild::Mounted(_) => false,
        }
    }
}

/// Where a path lands: in this trie, or inside a mounted one
enum Target<'a> {
    Local(&'a mut TrieNode),
    Mounted(Arc<dyn CapabilityTrie>, String),
}

/// One node of a path trie, optionally holding an entry point
#[derive(Debug, Clone, Default)]
pub struct TrieNode {
    value: Option<EntryPoint>,
    children: BTreeMap<String, TrieChild>,
}

fn segments(path: &str) -> Vec<String> {
    let path = canonicalise(path);
    if path.is_empty() {
        return Vec::new();
    }
    path.split('/').map(str::to_string).collect()
}

impl TrieNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> Option<&EntryPoint> {
        self.value.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    /// The local node at `segments`, not looking inside mounted tries
    fn local(&self, segments: &[String]) -> Option<&TrieNode> {
        let mut node = self;
        for segment in segments {
            match node.children.get(segment)? {
                TrieChild::Local(child) => node = child,
                TrieChild::Mounted(_) => return None,
            }
        }
        Some(node)
    }

    /// The first mounted trie on the way to `segments`, with the rest of
    /// the path relative to it
    fn mounted_on(&self, segments: &[String]) -> Option<(Arc<dyn CapabilityTrie>, String)> {
        let mut node = self;
        for (i, segment) in segments.iter().enumerate() {
            match node.children.get(segment)? {
                TrieChild::Local(child) => node = child,
                TrieChild::Mounted(source) => {
                    return Some((source.clone(), segments[i + 1..].join("/")))
                }
            }
        }
        None
    }

    /// Walk to `segments`, creating local nodes until a mounted trie
    fn descend_mut(&mut self, segments: &[String]) -> Target<'_> {
        let mut node = self;
        for (i, segment) in segments.iter().enumerate() {
            let child = node
                .children
                .entry(segment.clone())
                .or_insert_with(|| TrieChild::Local(TrieNode::new()));
            match child {
                TrieChild::Local(next) => node = next,
                TrieChild::Mounted(source) => {
                    return Target::Mounted(source.clone(), segments[i + 1..].join("/"))
                }
            }
        }
        Target::Local(node)
    }

    /// Set the entry point at `path`, replacing whatever was there
    pub async fn put(&mut self, path: &str, entry: EntryPoint) -> Result<(), FsError> {
        match self.descend_mut(&segments(path)) {
            Target::Local(node) => {
                node.value = Some(entry);
                Ok(())
            }
            Target::Mounted(source, rest) => source.put(&rest, entry).await,
        }
    }

    /// Add an entry point without downgrading access.
    ///
    /// A writable entry point is never replaced by a read-only one.
    /// Otherwise the new entry wins. Returns whether it was stored.
    pub async fn merge(&mut self, path: &str, entry: EntryPoint) -> Result<bool, FsError> {
        let node = match self.descend_mut(&segments(path)) {
            Target::Local(node) => node,
            Target::Mounted(source, rest) => {
                source.put(&rest, entry).await?;
                return Ok(true);
            }
        };
        match &node.value {
            Some(existing) if existing.is_writable() && !entry.is_writable() => {
                tracing::debug!("keeping writable entry at {:?}", path);
                Ok(false)
            }
            _ => {
                node.value = Some(entry);
                Ok(true)
            }
        }
    }

    /// Graft `subtree` at `path`, replacing the branch there
    pub async fn put_subtree(&mut self, path: &str, subtree: TrieChild) -> Result<(), FsError> {
        let segments = segments(path);
        let Some((last, parent)) = segments.split_last() else {
            return match subtree {
                TrieChild::Local(node) => {
                    *self = node;
                    Ok(())
                }
                TrieChild::Mounted(_) => Err(FsError::NotImplemented(
                    "mounting a trie over the root",
                )),
            };
        };
        match self.descend_mut(parent) {
            Target::Local(node) => {
                node.children.insert(last.clone(), subtree);
                Ok(())
            }
            Target::Mounted(source, rest) => {
                let path = if rest.is_empty() {
                    last.clone()
                } else {
                    format!("{}/{}", rest, last)
                };
                source.put_subtree(&path, subtree).await
            }
        }
    }

    /// Remove the entry point at `path`, pruning local nodes left empty
    pub async fn remove(&mut self, path: &str) -> Result<Option<EntryPoint>, FsError> {
        fn remove_at(node: &mut TrieNode, segments: &[String]) -> Option<EntryPoint> {
            let Some((first, rest)) = segments.split_first() else {
                return node.value.take();
            };
            let TrieChild::Local(child) = node.children.get_mut(first)? else {
                return None;
            };
            let removed = remove_at(child, rest);
            if child.is_empty() {
                node.children.remove(first);
            }
            removed
        }
        let segments = segments(path);
        if let Some((source, rest)) = self.mounted_on(&segments) {
            return source.remove(&rest).await;
        }
        Ok(remove_at(self, &segments))
    }

    /// The entry point held at `path` by this trie itself
    pub fn get(&self, path: &str) -> Option<&EntryPoint> {
        self.local(&segments(path))?.value.as_ref()
    }

    /// Next segments below `path` in this trie itself, mount points
    /// included
    pub fn child_names(&self, path: &str) -> BTreeSet<String> {
        self.local(&segments(path))
            .map(|node| node.children.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolve `path` against the trie and the directories it points into.
    ///
    /// Trie nodes are followed as far as they go. The rest of the path is
    /// walked from the deepest entry point on the way down, or handed to
    /// a mounted trie if one is met first.
    pub async fn resolve(
        &self,
        path: &str,
        network: &Network,
    ) -> Result<Option<TrieEntry>, FsError> {
        let segments = segments(path);
        let mut node = self;
        let mut deepest = node.value.as_ref().map(|value| (0, value));
        let mut depth = 0;
        for segment in &segments {
            let child = match node.children.get(segment) {
                Some(TrieChild::Local(child)) => child,
                Some(TrieChild::Mounted(source)) => {
                    return source.resolve(&segments[depth + 1..].join("/")).await;
                }
                None => break,
            };
            node = child;
            depth += 1;
            if let Some(value) = &node.value {
                deepest = Some((depth, value));
            }
        }

        if depth == segments.len() {
            if let Some(entry) = &node.value {
                if let Some(handle) = FileHandle::from_entry_point(entry, network).await? {
                    return Ok(Some(TrieEntry::Handle(handle)));
                }
                tracing::warn!("entry point at {:?} no longer resolves", path);
            }
            if node.children.is_empty() && depth > 0 {
                return Ok(None);
            }
            return Ok(Some(TrieEntry::Virtual {
                path: segments.join("/"),
                child_names: node.children.keys().cloned().collect(),
            }));
        }

        let Some((at, entry)) = deepest else {
            return Ok(None);
        };
        let Some(handle) = FileHandle::from_entry_point(entry, network).await? else {
            return Ok(None);
        };
        handle
            .descendant_by_path(&segments[at..].join("/"))
            .await
            .map(|found| found.map(TrieEntry::Handle))
    }

    /// Everything directly below `path`, from the trie and from the real
    /// directory `path` resolves to.
    pub async fn list_children(
        &self,
        path: &str,
        network: &Network,
    ) -> Result<Vec<TrieEntry>, FsError> {
        let path = canonicalise(path);
        if let Some((source, rest)) = self.mounted_on(&segments(&path)) {
            return source.list_children(&rest).await;
        }
        let mut names = self.child_names(&path);
        if let Some(TrieEntry::Handle(handle)) = self.resolve(&path, network).await? {
            if handle.is_directory() && handle.is_readable() {
                names.extend(handle.child_names().await?);
            }
        }

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let child_path = if path.is_empty() {
                name
            } else {
                format!("{}/{}", path, name)
            };
            if let Some(entry) = self.resolve(&child_path, network).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{SecretKey, SymmetricKey};
    use crate::cryptree::{Capability, Location};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    fn entry(writable: bool) -> EntryPoint {
        let key = SecretKey::generate().unwrap();
        let location = Location::random(key.public(), key.public()).unwrap();
        let base_key = SymmetricKey::generate().unwrap();
        let capability = if writable {
            Capability::writable(location, key, base_key)
        } else {
            Capability::new(location, base_key)
        };
        EntryPoint::new(capability, "alice")
    }

    /// A mounted trie that just holds a local one
    #[derive(Debug, Default)]
    struct Held(Mutex<TrieNode>);

    #[async_trait]
    impl CapabilityTrie for Held {
        async fn resolve(&self, _path: &str) -> Result<Option<TrieEntry>, FsError> {
            Ok(None)
        }

        async fn list_children(&self, _path: &str) -> Result<Vec<TrieEntry>, FsError> {
            Ok(Vec::new())
        }

        async fn put(&self, path: &str, entry: EntryPoint) -> Result<(), FsError> {
            self.0.lock().await.put(path, entry).await
        }

        async fn put_subtree(&self, path: &str, subtree: TrieChild) -> Result<(), FsError> {
            self.0.lock().await.put_subtree(path, subtree).await
        }

        async fn remove(&self, path: &str) -> Result<Option<EntryPoint>, FsError> {
            self.0.lock().await.remove(path).await
        }
    }

    #[tokio::test]
    async fn test_put_get_canonicalises() {
        let mut trie = TrieNode::new();
        let e = entry(false);
        trie.put("/docs//a.txt/", e.clone()).await.unwrap();
        assert_eq!(trie.get("docs/a.txt"), Some(&e));
        assert_eq!(trie.get("/docs/a.txt"), Some(&e));
        assert!(trie.get("docs").is_none());
        assert_eq!(
            trie.child_names("/"),
            BTreeSet::from(["docs".to_string()])
        );
    }

    #[tokio::test]
    async fn test_merge_write_shadows_read() {
        let read = entry(false);
        let write = entry(true);

        let mut trie = TrieNode::new();
        assert!(trie.merge("docs", read.clone()).await.unwrap());
        assert!(trie.merge("docs", write.clone()).await.unwrap());
        assert_eq!(trie.get("docs"), Some(&write));

        let mut trie = TrieNode::new();
        assert!(trie.merge("docs", write.clone()).await.unwrap());
        assert!(!trie.merge("docs", read).await.unwrap());
        assert_eq!(trie.get("docs"), Some(&write));
    }

    #[tokio::test]
    async fn test_merge_same_kind_takes_newer() {
        let first = entry(false);
        let second = entry(false);
        let mut trie = TrieNode::new();
        trie.merge("a", first).await.unwrap();
        trie.merge("a", second.clone()).await.unwrap();
        assert_eq!(trie.get("a"), Some(&second));
    }

    #[tokio::test]
    async fn test_remove_prunes_empty_nodes() {
        let mut trie = TrieNode::new();
        let e = entry(false);
        trie.put("a/b/c", e.clone()).await.unwrap();
        trie.put("a/d", entry(false)).await.unwrap();

        assert_eq!(trie.remove("a/b/c").await.unwrap(), Some(e));
        assert_eq!(trie.child_names("a"), BTreeSet::from(["d".to_string()]));
        assert!(trie.remove("a/b/c").await.unwrap().is_none());
        assert!(trie.remove("a/d").await.unwrap().is_some());
        assert!(trie.is_empty());
    }

    #[tokio::test]
    async fn test_put_subtree() {
        let mut subtree = TrieNode::new();
        subtree.put("x", entry(false)).await.unwrap();
        subtree.put("y/z", entry(false)).await.unwrap();

        let mut trie = TrieNode::new();
        trie.put("mnt/old", entry(false)).await.unwrap();
        trie.put_subtree("mnt", TrieChild::Local(subtree))
            .await
            .unwrap();

        assert!(trie.get("mnt/old").is_none());
        assert!(trie.get("mnt/x").is_some());
        assert!(trie.get("mnt/y/z").is_some());
    }

    #[tokio::test]
    async fn test_writes_below_a_mount_are_forwarded() {
        let held = Arc::new(Held::default());
        let mut trie = TrieNode::new();
        trie.put_subtree("friends/bob", TrieChild::Mounted(held.clone()))
            .await
            .unwrap();
        assert_eq!(
            trie.child_names("friends"),
            BTreeSet::from(["bob".to_string()])
        );

        let e = entry(false);
        trie.put("friends/bob/docs/a.txt", e.clone()).await.unwrap();
        assert!(trie.get("friends/bob/docs/a.txt").is_none());
        assert_eq!(held.0.lock().await.get("docs/a.txt"), Some(&e));

        trie.put_subtree("friends/bob/more", TrieChild::Local(TrieNode::new()))
            .await
            .unwrap();
        assert!(held.0.lock().await.child_names("").contains("more"));

        assert_eq!(trie.remove("friends/bob/docs/a.txt").await.unwrap(), Some(e));
        assert!(held.0.lock().await.get("docs/a.txt").is_none());
        // the mount point itself is never pruned
        assert!(trie.child_names("friends").contains("bob"));
    }

    #[tokio::test]
    async fn test_mount_over_root_is_refused() {
        let mut trie = TrieNode::new();
        let result = trie
            .put_subtree("/", TrieChild::Mounted(Arc::new(Held::default())))
            .await;
        assert!(matches!(result, Err(FsError::NotImplemented(_))));
    }
}
