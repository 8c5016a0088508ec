//! Cryptographic primitives for the capability file system
//!
//! - **Identity & Authorship**: Ed25519 keypairs. A location's writer key
//!   signs every committed node, and the store verifies the signature
//!   before accepting the commit.
//! - **Encryption**: ChaCha20-Poly1305 [`SymmetricKey`]s. Every field of a
//!   cryptree node is sealed under one of the node's keys, and keys are
//!   wrapped under other keys to form the hierarchy.
//!
//! # Key hierarchy
//!
//! A directory's base key seals its child list and its parent key. The
//! parent key seals the meta key and the parent link. The meta key seals
//! the properties. Handing someone the parent key alone therefore lets them
//! read a directory's name and walk upward, without listing its children.

mod keys;
mod symmetric;

pub use ed25519_dalek::Signature;
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
pub use symmetric::{
    Nonce, SymmetricKey, SymmetricKeyError, BLAKE3_HASH_SIZE, KEY_SIZE, NONCE_SIZE,
};
