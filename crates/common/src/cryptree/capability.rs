use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, SecretKey, SymmetricKey};

use super::{CryptreeError, KeyedNode};

/// Size of the random part of a location
pub const MAP_KEY_SIZE: usize = 32;

/// A mutable slot in the store.
///
/// The owner is the identity whose space the slot lives in, the writer is
/// the identity whose signatures the store accepts for it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub owner: PublicKey,
    pub writer: PublicKey,
    pub map_key: [u8; MAP_KEY_SIZE],
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Location({}/{})",
            &self.writer.to_hex()[..8],
            hex::encode(&self.map_key[..6])
        )
    }
}

impl Location {
    pub fn new(owner: PublicKey, writer: PublicKey, map_key: [u8; MAP_KEY_SIZE]) -> Self {
        Self {
            owner,
            writer,
            map_key,
        }
    }

    /// A fresh slot with a random map key
    pub fn random(owner: PublicKey, writer: PublicKey) -> Result<Self, CryptreeError> {
        let mut map_key = [0u8; MAP_KEY_SIZE];
        getrandom::getrandom(&mut map_key)
            .map_err(|e| CryptreeError::Random(e.to_string()))?;
        Ok(Self::new(owner, writer, map_key))
    }

    /// A fresh slot with the same owner and writer
    pub fn random_sibling(&self) -> Result<Self, CryptreeError> {
        Self::random(self.owner, self.writer)
    }
}

/// Location plus the keys needed to use it.
///
/// Without a write key the capability is read-only. The base key is either
/// the node's real base key or, for a capability built from a parent link,
/// only its parent key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub location: Location,
    pub write_key: Option<SecretKey>,
    pub base_key: SymmetricKey,
}

impl Capability {
    pub fn new(location: Location, base_key: SymmetricKey) -> Self {
        Self {
            location,
            write_key: None,
            base_key,
        }
    }

    pub fn writable(location: Location, write_key: SecretKey, base_key: SymmetricKey) -> Self {
        Self {
            location,
            write_key: Some(write_key),
            base_key,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.write_key.is_some()
    }

    pub fn read_only(&self) -> Capability {
        Capability::new(self.location.clone(), self.base_key.clone())
    }

    pub fn with_base_key(&self, base_key: SymmetricKey) -> Capability {
        Capability {
            location: self.location.clone(),
            write_key: self.write_key.clone(),
            base_key,
        }
    }

    pub fn with_write_key(&self, write_key: Option<SecretKey>) -> Capability {
        Capability {
            location: self.location.clone(),
            write_key,
            base_key: self.base_key.clone(),
        }
    }
}

/// A capability together with the name of the user who owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub pointer: Capability,
    pub owner_name: String,
}

impl EntryPoint {
    pub fn new(pointer: Capability, owner_name: impl Into<String>) -> Self {
        Self {
            pointer,
            owner_name: owner_name.into(),
        }
    }

    pub fn is_writable(&self) -> bool {
        self.pointer.is_writable()
    }
}

/// Where a node's parent lives, and the parent's parent key.
///
/// Enough to read the parent's properties and keep walking up, not
/// enough to list the parent's children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub location: Location,
    pub parent_key: SymmetricKey,
}

impl ParentLink {
    pub fn capability(&self) -> Capability {
        Capability::new(self.location.clone(), self.parent_key.clone())
    }
}

/// A capability resolved against the store
#[derive(Debug, Clone)]
pub struct RetrievedCapability {
    pub capability: Capability,
    pub node: KeyedNode,
}

impl RetrievedCapability {
    pub fn new(capability: Capability, node: KeyedNode) -> Self {
        Self { capability, node }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn location() -> Location {
        let key = SecretKey::generate().unwrap();
        Location::random(key.public(), key.public()).unwrap()
    }

    #[test]
    fn test_random_sibling_keeps_identities() {
        let loc = location();
        let sibling = loc.random_sibling().unwrap();
        assert_eq!(loc.owner, sibling.owner);
        assert_eq!(loc.writer, sibling.writer);
        assert_ne!(loc.map_key, sibling.map_key);
    }

    #[test]
    fn test_read_only_projection() {
        let writer = SecretKey::generate().unwrap();
        let cap = Capability::writable(
            location(),
            writer,
            SymmetricKey::generate().unwrap(),
        );
        assert!(cap.is_writable());

        let ro = cap.read_only();
        assert!(!ro.is_writable());
        assert_eq!(ro.location, cap.location);
        assert_eq!(ro.base_key, cap.base_key);
    }

    #[test]
    fn test_entry_point_writability_follows_pointer() {
        let cap = Capability::new(location(), SymmetricKey::generate().unwrap());
        assert!(!EntryPoint::new(cap.clone(), "alice").is_writable());

        let cap = cap.with_write_key(Some(SecretKey::generate().unwrap()));
        assert!(EntryPoint::new(cap, "alice").is_writable());
    }
}
