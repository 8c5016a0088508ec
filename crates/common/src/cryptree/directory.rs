use serde::{Deserialize, Serialize};

use crate::codec::NodeHash;
use crate::crypto::SymmetricKey;

use super::{open, seal, Capability, CryptreeError, FileProperties, KeyedNode, Location, ParentLink};

/// Encrypted directory node.
///
/// Child capabilities are stored without write keys. Children sharing the
/// directory's writer inherit write access from whoever holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryNode {
    /// parent key, sealed with the base key
    wrapped_parent_key: Vec<u8>,
    /// meta key, sealed with the parent key
    wrapped_meta_key: Vec<u8>,
    /// properties, sealed with the meta key
    properties: Vec<u8>,
    /// parent link, sealed with the parent key
    parent_link: Option<Vec<u8>>,
    /// child capabilities, sealed with the base key
    children: Vec<u8>,
}

impl DirectoryNode {
    /// A new empty directory with a fresh parent key and meta key
    pub fn create(
        base_key: &SymmetricKey,
        props: &FileProperties,
        parent_link: Option<&ParentLink>,
    ) -> Result<Self, CryptreeError> {
        let parent_key = SymmetricKey::generate()?;
        Self::build(base_key, &parent_key, props, parent_link, &[])
    }

    fn build(
        base_key: &SymmetricKey,
        parent_key: &SymmetricKey,
        props: &FileProperties,
        parent_link: Option<&ParentLink>,
        children: &[Capability],
    ) -> Result<Self, CryptreeError> {
        let meta_key = SymmetricKey::generate()?;
        let children: Vec<Capability> = children.iter().map(Capability::read_only).collect();
        Ok(Self {
            wrapped_parent_key: base_key.wrap(parent_key)?,
            wrapped_meta_key: parent_key.wrap(&meta_key)?,
            properties: seal(&meta_key, props)?,
            parent_link: parent_link.map(|link| seal(parent_key, link)).transpose()?,
            children: seal(base_key, &children)?,
        })
    }

    pub fn parent_key(&self, base_key: &SymmetricKey) -> Result<SymmetricKey, CryptreeError> {
        Ok(base_key.unwrap_key(&self.wrapped_parent_key)?)
    }

    fn meta_key(&self, parent_key: &SymmetricKey) -> Result<SymmetricKey, CryptreeError> {
        Ok(parent_key.unwrap_key(&self.wrapped_meta_key)?)
    }

    pub fn properties(&self, parent_key: &SymmetricKey) -> Result<FileProperties, CryptreeError> {
        open(&self.meta_key(parent_key)?, &self.properties)
    }

    pub fn parent_link(
        &self,
        parent_key: &SymmetricKey,
    ) -> Result<Option<ParentLink>, CryptreeError> {
        self.parent_link
            .as_ref()
            .map(|sealed| open(parent_key, sealed))
            .transpose()
    }

    /// Child capabilities, read-only as stored
    pub fn children(&self, base_key: &SymmetricKey) -> Result<Vec<Capability>, CryptreeError> {
        open(base_key, &self.children)
    }

    fn with_children(
        &self,
        base_key: &SymmetricKey,
        children: &[Capability],
    ) -> Result<(KeyedNode, NodeHash), CryptreeError> {
        let prior = KeyedNode::Directory(self.clone()).content_hash()?;
        let children: Vec<Capability> = children.iter().map(Capability::read_only).collect();
        let updated = DirectoryNode {
            children: seal(base_key, &children)?,
            ..self.clone()
        };
        Ok((updated.into(), prior))
    }

    /// Append a child pointer. Returns the new node and the hash to CAS against.
    pub fn add_child(
        &self,
        base_key: &SymmetricKey,
        child: &Capability,
    ) -> Result<(KeyedNode, NodeHash), CryptreeError> {
        let mut children = self.children(base_key)?;
        children.push(child.read_only());
        self.with_children(base_key, &children)
    }

    /// Drop every child pointer at `location`
    pub fn remove_child(
        &self,
        base_key: &SymmetricKey,
        location: &Location,
    ) -> Result<(KeyedNode, NodeHash), CryptreeError> {
        self.retain_children(base_key, |c| &c.location != location)
    }

    /// Keep only the children for which `keep` holds
    pub fn retain_children(
        &self,
        base_key: &SymmetricKey,
        keep: impl Fn(&Capability) -> bool,
    ) -> Result<(KeyedNode, NodeHash), CryptreeError> {
        let mut children = self.children(base_key)?;
        children.retain(|c| keep(c));
        self.with_children(base_key, &children)
    }

    /// Swap the pointer at `location` for `replacement`, keeping its position
    pub fn replace_child(
        &self,
        base_key: &SymmetricKey,
        location: &Location,
        replacement: &Capability,
    ) -> Result<(KeyedNode, NodeHash), CryptreeError> {
        let children: Vec<Capability> = self
            .children(base_key)?
            .into_iter()
            .map(|c| {
                if &c.location == location {
                    replacement.read_only()
                } else {
                    c
                }
            })
            .collect();
        self.with_children(base_key, &children)
    }

    /// Rebuild the node under new keys.
    ///
    /// Properties are carried over. Children and the parent link are taken
    /// from the caller since re-keying changes both.
    pub fn rekey(
        &self,
        old_base_key: &SymmetricKey,
        new_base_key: &SymmetricKey,
        new_parent_key: &SymmetricKey,
        children: &[Capability],
        parent_link: Option<&ParentLink>,
    ) -> Result<DirectoryNode, CryptreeError> {
        let old_parent_key = self.parent_key(old_base_key)?;
        let props = self.properties(&old_parent_key)?;
        Self::build(new_base_key, new_parent_key, &props, parent_link, children)
    }

    pub fn with_properties(
        &self,
        parent_key: &SymmetricKey,
        props: &FileProperties,
    ) -> Result<DirectoryNode, CryptreeError> {
        let meta_key = self.meta_key(parent_key)?;
        Ok(DirectoryNode {
            properties: seal(&meta_key, props)?,
            ..self.clone()
        })
    }
}
