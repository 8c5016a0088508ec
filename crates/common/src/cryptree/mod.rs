//! The cryptree: encrypted nodes and the capabilities that open them
//!
//! Every file and directory is a [`KeyedNode`] stored at a [`Location`].
//! All useful content of a node is sealed under one of its keys:
//!
//! ```text
//! Directory                              File (one node per chunk)
//! ---------                              -------------------------
//! base key   -> child capabilities       base key -> data key
//!            -> parent key                        -> meta key
//! parent key -> meta key                          -> parent link
//!            -> parent link              meta key -> properties
//! meta key   -> properties               data key -> chunk content, next chunk
//! ```
//!
//! A directory's base key doubles as the key for its subfolders, so
//! rotating it re-seals every child pointer. A file's base key doubles as
//! its parent key.

mod capability;
mod directory;
mod file;
mod properties;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::codec::{from_block, to_block, BlockEncoded, CodecError, NodeHash};
use crate::crypto::{SymmetricKey, SymmetricKeyError};

pub use capability::{
    Capability, EntryPoint, Location, ParentLink, RetrievedCapability, MAP_KEY_SIZE,
};
pub use directory::DirectoryNode;
pub use file::{FileHeader, FileNode, Retriever};
pub use properties::{FileProperties, MaybeMime};

#[derive(Debug, thiserror::Error)]
pub enum CryptreeError {
    /// Wrong key or corrupted ciphertext
    #[error(transparent)]
    Decryption(#[from] SymmetricKeyError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("expected a {expected} node")]
    WrongNodeType { expected: &'static str },
    #[error("random generator error: {0}")]
    Random(String),
}

/// Encrypt a serde value under a key
pub(crate) fn seal<T: Serialize + ?Sized>(
    key: &SymmetricKey,
    value: &T,
) -> Result<Vec<u8>, CryptreeError> {
    Ok(key.encrypt(&to_block(value)?)?)
}

/// Decrypt a value sealed with [`seal`]
pub(crate) fn open<T: DeserializeOwned>(
    key: &SymmetricKey,
    sealed: &[u8],
) -> Result<T, CryptreeError> {
    Ok(from_block(&key.decrypt(sealed)?)?)
}

/// A node in the cryptree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyedNode {
    Directory(DirectoryNode),
    File(FileNode),
}

impl BlockEncoded for KeyedNode {}

impl From<DirectoryNode> for KeyedNode {
    fn from(node: DirectoryNode) -> Self {
        KeyedNode::Directory(node)
    }
}

impl From<FileNode> for KeyedNode {
    fn from(node: FileNode) -> Self {
        KeyedNode::File(node)
    }
}

impl KeyedNode {
    pub fn is_directory(&self) -> bool {
        matches!(self, KeyedNode::Directory(_))
    }

    pub fn as_directory(&self) -> Result<&DirectoryNode, CryptreeError> {
        match self {
            KeyedNode::Directory(dir) => Ok(dir),
            KeyedNode::File(_) => Err(CryptreeError::WrongNodeType {
                expected: "directory",
            }),
        }
    }

    pub fn as_file(&self) -> Result<&FileNode, CryptreeError> {
        match self {
            KeyedNode::File(file) => Ok(file),
            KeyedNode::Directory(_) => Err(CryptreeError::WrongNodeType { expected: "file" }),
        }
    }

    /// The parent key, given whatever key the capability carries.
    ///
    /// A capability built from a parent link already holds the parent key,
    /// so a key that fails to unwrap is taken to be the parent key itself.
    pub fn parent_key(&self, base_key: &SymmetricKey) -> SymmetricKey {
        match self {
            KeyedNode::Directory(dir) => dir
                .parent_key(base_key)
                .unwrap_or_else(|_| base_key.clone()),
            KeyedNode::File(_) => base_key.clone(),
        }
    }

    /// Whether the key can open the node's contents, not just its metadata
    pub fn is_readable(&self, base_key: &SymmetricKey) -> bool {
        match self {
            KeyedNode::Directory(dir) => dir.parent_key(base_key).is_ok(),
            KeyedNode::File(file) => file.data_key(base_key).is_ok(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            KeyedNode::Directory(_) => false,
            KeyedNode::File(file) => file.is_dirty(),
        }
    }

    pub fn properties(&self, base_key: &SymmetricKey) -> Result<FileProperties, CryptreeError> {
        let parent_key = self.parent_key(base_key);
        match self {
            KeyedNode::Directory(dir) => dir.properties(&parent_key),
            KeyedNode::File(file) => file.header().properties(&parent_key),
        }
    }

    pub fn parent_link(&self, base_key: &SymmetricKey) -> Result<Option<ParentLink>, CryptreeError> {
        let parent_key = self.parent_key(base_key);
        match self {
            KeyedNode::Directory(dir) => dir.parent_link(&parent_key),
            KeyedNode::File(file) => file.header().parent_link(&parent_key),
        }
    }

    /// Same node with new properties sealed under the existing meta key
    pub fn with_properties(
        &self,
        base_key: &SymmetricKey,
        props: &FileProperties,
    ) -> Result<KeyedNode, CryptreeError> {
        let parent_key = self.parent_key(base_key);
        Ok(match self {
            KeyedNode::Directory(dir) => dir.with_properties(&parent_key, props)?.into(),
            KeyedNode::File(file) => file.with_properties(&parent_key, props)?.into(),
        })
    }

    pub fn content_hash(&self) -> Result<NodeHash, CryptreeError> {
        Ok(self.hash()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::SecretKey;

    fn location() -> Location {
        let key = SecretKey::generate().unwrap();
        Location::random(key.public(), key.public()).unwrap()
    }

    #[test]
    fn test_wrong_node_type() {
        let base = SymmetricKey::generate().unwrap();
        let dir: KeyedNode = DirectoryNode::create(&base, &FileProperties::directory("d"), None)
            .unwrap()
            .into();
        assert!(dir.as_directory().is_ok());
        assert!(matches!(
            dir.as_file(),
            Err(CryptreeError::WrongNodeType { expected: "file" })
        ));
    }

    #[test]
    fn test_parent_key_capability_reads_metadata_only() {
        let base = SymmetricKey::generate().unwrap();
        let link = ParentLink {
            location: location(),
            parent_key: SymmetricKey::generate().unwrap(),
        };
        let dir = DirectoryNode::create(&base, &FileProperties::directory("docs"), Some(&link))
            .unwrap();
        let node: KeyedNode = dir.clone().into();

        let parent_key = dir.parent_key(&base).unwrap();
        assert!(node.is_readable(&base));
        assert!(!node.is_readable(&parent_key));

        // parent key alone still reads the name and the link upward
        assert_eq!(node.properties(&parent_key).unwrap().name, "docs");
        assert_eq!(node.parent_link(&parent_key).unwrap(), Some(link));
        assert!(dir.children(&parent_key).is_err());
    }

    #[test]
    fn test_node_encode_decode() {
        let base = SymmetricKey::generate().unwrap();
        let node: KeyedNode = DirectoryNode::create(&base, &FileProperties::directory("d"), None)
            .unwrap()
            .into();
        let decoded = KeyedNode::decode(&node.encode().unwrap()).unwrap();
        assert_eq!(node, decoded);
        assert_eq!(node.content_hash().unwrap(), decoded.content_hash().unwrap());
    }

    #[test]
    fn test_directory_is_never_dirty() {
        let base = SymmetricKey::generate().unwrap();
        let node: KeyedNode = DirectoryNode::create(&base, &FileProperties::directory("d"), None)
            .unwrap()
            .into();
        assert!(!node.is_dirty());
    }
}
