//! File system operations over capabilities
//!
//! A [`FileHandle`] is a resolved capability plus what we know about the
//! user holding it. Reading operations borrow the handle. Operations that
//! change a node consume it and hand back a successor, and any clone of
//! the consumed handle fails with [`FsError::StaleHandle`] from then on.
//!
//! - [`handle`]: navigation and listing
//! - [`transfer`]: chunked upload, streaming reads, range overwrites
//! - [`mutation`]: compare-and-swap updates of a directory's children
//! - [`rekey`]: the dirty/clean re-keying state machine
//! - [`structure`]: mkdir, rename, copy, delete and links

mod handle;
mod mutation;
mod rekey;
mod structure;
mod transfer;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::crypto::SymmetricKeyError;
use crate::cryptree::{CryptreeError, Location};
use crate::store::StoreError;

pub use handle::FileHandle;
pub use mutation::{next_safe_replacement_name, CollisionPolicy};
pub use transfer::ByteStream;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("illegal file name: {0:?}")]
    IllegalName(String),
    /// The handle was consumed by a mutation, resolve it again
    #[error("stale file handle")]
    StaleHandle,
    #[error(transparent)]
    Cryptree(#[from] CryptreeError),
    #[error("concurrent modification of {location:?}")]
    ConcurrentModification { location: Location },
    #[error("too many files named like {name:?}")]
    TooManyCollisions { name: String },
    #[error("missing chunk at offset {offset} ({location:?})")]
    MissingChunk { location: Location, offset: u64 },
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("a child named {name:?} already exists")]
    NameCollision { name: String },
    #[error("not a directory")]
    NotADirectory,
    #[error("not a file")]
    NotAFile,
    #[error("not writable")]
    NotWritable,
    #[error("not readable")]
    NotReadable,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid range {start}..{end}")]
    InvalidRange { start: u64, end: u64 },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("capability log error: {0}")]
    CapabilityLog(anyhow::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<SymmetricKeyError> for FsError {
    fn from(e: SymmetricKeyError) -> Self {
        FsError::Cryptree(e.into())
    }
}

impl From<CodecError> for FsError {
    fn from(e: CodecError) -> Self {
        FsError::Cryptree(e.into())
    }
}

impl FsError {
    pub fn capability_log(e: impl std::fmt::Display) -> Self {
        FsError::CapabilityLog(anyhow::anyhow!("{}", e))
    }
}

/// A name is legal if it has no path separator
pub fn is_legal_name(name: &str) -> bool {
    !name.contains('/')
}

/// Names a new or renamed child may not take
pub(crate) fn name_is_empty_or_illegal(name: &str) -> bool {
    name.is_empty() || !is_legal_name(name)
}

/// Strip leading and trailing slashes and collapse repeats
pub fn canonicalise(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
