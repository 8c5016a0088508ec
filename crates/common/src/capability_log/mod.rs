//! Append-only logs of capabilities a user has shared
//!
//! Each shared directory (`/<owner>/shared/<friend>`) keys two logs, one for
//! read-only capabilities and one for edit capabilities. A friend only
//! ever asks for the count and for "everything from index N", which is
//! what makes incremental resync cheap.

mod memory;

use std::fmt::{Debug, Display};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cryptree::{Capability, Location};

pub use memory::{MemoryCapabilityLog, MemoryCapabilityLogError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    ReadOnly,
    Edit,
}

/// One shared capability and the path it was shared from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityWithPath {
    /// Absolute path, starting with the sharer's user name
    pub path: String,
    pub capability: Capability,
}

/// A page of log records
#[derive(Debug, Clone, Default)]
pub struct CapabilitiesFromIndex {
    pub records: Vec<CapabilityWithPath>,
    /// How many records were consumed, to be added to the reader's counter
    pub count_read: u64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityLogError<T> {
    #[error("unhandled capability log provider error: {0}")]
    Provider(#[from] T),
    /// Asked for records past the end of the log
    #[error("index {index} past end of log with {count} records")]
    IndexOutOfRange { index: u64, count: u64 },
}

#[async_trait]
pub trait CapabilityLog: Send + Sync + Debug + 'static {
    type Error: Display + Debug + Send + Sync;

    /// Number of records in the log
    async fn capability_count(
        &self,
        kind: CapabilityKind,
        shared_dir: &Location,
    ) -> Result<u64, CapabilityLogError<Self::Error>>;

    /// Every record from `from_index` to the end of the log
    async fn capability_records(
        &self,
        kind: CapabilityKind,
        shared_dir: &Location,
        from_index: u64,
    ) -> Result<CapabilitiesFromIndex, CapabilityLogError<Self::Error>>;

    /// Append a record and return the new count
    async fn append(
        &self,
        kind: CapabilityKind,
        shared_dir: &Location,
        record: CapabilityWithPath,
    ) -> Result<u64, CapabilityLogError<Self::Error>>;
}
