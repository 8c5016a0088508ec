/**
 * Append-only logs of shared capabilities,
 *  plus an in-memory implementation.
 */
pub mod capability_log;
/**
 * DAG-CBOR encoding and BLAKE3 content hashes
 *  for everything we put in the store.
 */
pub mod codec;
/**
 * Tunables: chunk size, CAS retry budget and
 *  the collision suffix bound.
 */
pub mod config;
/**
 * Cryptographic types and operations.
 *  - Ed25519 identities and signatures
 *  - Symmetric keys, key wrapping and AEAD
 */
pub mod crypto;
/**
 * The encrypted node format.
 *  Capabilities, locations, and the key hierarchy
 *  that lets a key holder read exactly what it should.
 */
pub mod cryptree;
/**
 * File handles and every operation on them:
 *  navigation, chunked transfer, CAS mutations,
 *  re-keying and structural changes.
 */
pub mod fs;
/**
 * The mutable store we commit nodes to.
 *  A trait for backends, an in-memory one,
 *  and the `Network` wrapper that signs commits.
 */
pub mod store;
/**
 * Path tries of entry points, including the
 *  incrementally synced view of a friend's shares.
 */
pub mod trie;

pub mod prelude {
    pub use crate::capability_log::{
        CapabilityKind, CapabilityLog, CapabilityWithPath, MemoryCapabilityLog,
    };
    pub use crate::config::FsConfig;
    pub use crate::crypto::{PublicKey, SecretKey, SymmetricKey};
    pub use crate::cryptree::{Capability, EntryPoint, FileProperties, Location};
    pub use crate::fs::{FileHandle, FsError};
    pub use crate::store::{ContentStore, MemoryContentStore, Network};
    pub use crate::trie::{CapabilityTrie, FriendCapabilityTrie, TrieChild, TrieEntry, TrieNode};
}
