use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;

use crate::crypto::{SecretKey, SymmetricKey};
use crate::cryptree::{
    Capability, EntryPoint, FileProperties, KeyedNode, Location, RetrievedCapability,
};
use crate::store::Network;

use super::{canonicalise, FsError};

/// A capability resolved to its node, plus access metadata.
///
/// Clones share a superseded flag. Once any clone is consumed by a
/// mutating operation the others fail with [`FsError::StaleHandle`].
#[derive(Debug, Clone)]
pub struct FileHandle {
    pointer: RetrievedCapability,
    owner_name: String,
    readers: BTreeSet<String>,
    writers: BTreeSet<String>,
    /// signing key of the entry point this handle was reached through
    entry_writer: Option<SecretKey>,
    props: FileProperties,
    superseded: Arc<AtomicBool>,
    network: Network,
}

impl FileHandle {
    pub fn new(
        pointer: RetrievedCapability,
        owner_name: impl Into<String>,
        entry_writer: Option<SecretKey>,
        network: Network,
    ) -> Result<Self, FsError> {
        let props = pointer.node.properties(&pointer.capability.base_key)?;
        Ok(Self {
            pointer,
            owner_name: owner_name.into(),
            readers: BTreeSet::new(),
            writers: BTreeSet::new(),
            entry_writer,
            props,
            superseded: Arc::new(AtomicBool::new(false)),
            network,
        })
    }

    /// Resolve an entry point against the store
    pub async fn from_entry_point(
        entry: &EntryPoint,
        network: &Network,
    ) -> Result<Option<Self>, FsError> {
        let Some(pointer) = network.resolve_capability(entry).await? else {
            return Ok(None);
        };
        let entry_writer = entry.pointer.write_key.clone();
        Self::new(pointer, entry.owner_name.clone(), entry_writer, network.clone()).map(Some)
    }

    pub fn with_sharees(mut self, readers: BTreeSet<String>, writers: BTreeSet<String>) -> Self {
        self.readers = readers;
        self.writers = writers;
        self
    }

    pub fn capability(&self) -> &Capability {
        &self.pointer.capability
    }

    pub fn location(&self) -> &Location {
        &self.pointer.capability.location
    }

    pub fn node(&self) -> &KeyedNode {
        &self.pointer.node
    }

    pub fn properties(&self) -> &FileProperties {
        &self.props
    }

    pub fn name(&self) -> &str {
        &self.props.name
    }

    pub fn size(&self) -> u64 {
        self.props.size
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn readers(&self) -> &BTreeSet<String> {
        &self.readers
    }

    pub fn writers(&self) -> &BTreeSet<String> {
        &self.writers
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn is_directory(&self) -> bool {
        self.pointer.node.is_directory()
    }

    pub fn is_readable(&self) -> bool {
        self.pointer.node.is_readable(&self.pointer.capability.base_key)
    }

    pub fn is_writable(&self) -> bool {
        self.signer().is_ok()
    }

    pub fn is_dirty(&self) -> bool {
        self.pointer.node.is_dirty()
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }

    pub(crate) fn base_key(&self) -> &SymmetricKey {
        &self.pointer.capability.base_key
    }

    pub fn parent_key(&self) -> SymmetricKey {
        self.pointer.node.parent_key(self.base_key())
    }

    pub(crate) fn ensure_fresh(&self) -> Result<(), FsError> {
        if self.is_superseded() {
            return Err(FsError::StaleHandle);
        }
        Ok(())
    }

    /// Mark every clone of this handle stale
    pub(crate) fn supersede(&self) {
        self.superseded.store(true, Ordering::SeqCst);
    }

    /// The key that signs commits to this handle's location
    pub(crate) fn signer(&self) -> Result<&SecretKey, FsError> {
        let writer = &self.location().writer;
        self.pointer
            .capability
            .write_key
            .as_ref()
            .or(self.entry_writer.as_ref())
            .filter(|key| &key.public() == writer)
            .ok_or(FsError::NotWritable)
    }

    /// A new version of this handle with its own superseded flag
    pub(crate) fn successor(
        &self,
        capability: Capability,
        node: KeyedNode,
    ) -> Result<FileHandle, FsError> {
        let props = node.properties(&capability.base_key)?;
        Ok(FileHandle {
            pointer: RetrievedCapability::new(capability, node),
            owner_name: self.owner_name.clone(),
            readers: self.readers.clone(),
            writers: self.writers.clone(),
            entry_writer: self.entry_writer.clone(),
            props,
            superseded: Arc::new(AtomicBool::new(false)),
            network: self.network.clone(),
        })
    }

    pub(crate) fn with_readers(mut self, readers: BTreeSet<String>) -> Self {
        self.readers = readers;
        self
    }

    /// Attach our signing key to a capability that shares our writer
    pub(crate) fn inherit_write(&self, capability: Capability) -> Capability {
        match self.signer() {
            Ok(key) if key.public() == capability.location.writer && !capability.is_writable() => {
                capability.with_write_key(Some(key.clone()))
            }
            _ => capability,
        }
    }

    fn derived(&self, pointer: RetrievedCapability) -> Result<FileHandle, FsError> {
        Ok(FileHandle::new(
            pointer,
            self.owner_name.clone(),
            self.entry_writer.clone(),
            self.network.clone(),
        )?
        .with_sharees(self.readers.clone(), self.writers.clone()))
    }

    pub(crate) fn require_directory(&self) -> Result<(), FsError> {
        if !self.is_directory() {
            return Err(FsError::NotADirectory);
        }
        Ok(())
    }

    /// Child capabilities of `node`, which must be a version of this directory
    pub(crate) fn capabilities_in(&self, node: &KeyedNode) -> Result<Vec<Capability>, FsError> {
        let dir = node.as_directory().map_err(|_| FsError::NotADirectory)?;
        if !node.is_readable(self.base_key()) {
            return Err(FsError::NotReadable);
        }
        Ok(dir
            .children(self.base_key())?
            .into_iter()
            .map(|cap| self.inherit_write(cap))
            .collect())
    }

    /// Names of the reachable children of `node`
    pub(crate) async fn names_in(&self, node: &KeyedNode) -> Result<BTreeSet<String>, FsError> {
        let caps = self.capabilities_in(node)?;
        let nodes = try_join_all(caps.iter().map(|cap| self.network.get(&cap.location))).await?;
        let mut names = BTreeSet::new();
        for (cap, node) in caps.iter().zip(nodes) {
            if let Some(node) = node {
                names.insert(node.properties(&cap.base_key)?.name);
            }
        }
        Ok(names)
    }

    /// All reachable children. Pointers whose node is gone are skipped.
    pub async fn children(&self) -> Result<Vec<FileHandle>, FsError> {
        self.ensure_fresh()?;
        let caps = self.capabilities_in(&self.pointer.node)?;
        let retrieved = try_join_all(caps.iter().map(|cap| self.network.retrieve(cap))).await?;
        retrieved
            .into_iter()
            .flatten()
            .map(|pointer| self.derived(pointer))
            .collect()
    }

    pub async fn child(&self, name: &str) -> Result<Option<FileHandle>, FsError> {
        Ok(self
            .children()
            .await?
            .into_iter()
            .find(|child| child.name() == name))
    }

    pub async fn child_names(&self) -> Result<BTreeSet<String>, FsError> {
        self.ensure_fresh()?;
        self.names_in(&self.pointer.node).await
    }

    pub async fn has_child(&self, name: &str) -> Result<bool, FsError> {
        Ok(self.child_names().await?.contains(name))
    }

    /// Walk down a relative path. An empty path is this handle.
    pub async fn descendant_by_path(&self, path: &str) -> Result<Option<FileHandle>, FsError> {
        self.ensure_fresh()?;
        let path = canonicalise(path);
        if path.is_empty() {
            return Ok(Some(self.clone()));
        }

        let mut segments = path.split('/');
        let Some(first) = segments.next() else {
            return Ok(Some(self.clone()));
        };
        let Some(mut current) = self.child(first).await? else {
            return Ok(None);
        };
        for segment in segments {
            match current.child(segment).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// The parent directory, reached through the parent link.
    ///
    /// The result carries only the parent key: it can read the parent's
    /// properties and keep walking up, but not list the parent's children.
    pub async fn retrieve_parent(&self) -> Result<Option<FileHandle>, FsError> {
        self.ensure_fresh()?;
        let Some(link) = self.pointer.node.parent_link(self.base_key())? else {
            return Ok(None);
        };
        let capability = self.inherit_write(link.capability());
        match self.network.retrieve(&capability).await? {
            Some(pointer) => self.derived(pointer).map(Some),
            None => Ok(None),
        }
    }

    /// Absolute path from the owner's root, e.g. `/alice/docs/a.txt`
    pub async fn path(&self) -> Result<String, FsError> {
        self.ensure_fresh()?;
        let mut names = vec![self.name().to_string()];
        let mut current = self.retrieve_parent().await?;
        while let Some(parent) = current {
            names.push(parent.name().to_string());
            current = parent.retrieve_parent().await?;
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }
}
