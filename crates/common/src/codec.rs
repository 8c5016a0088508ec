//! DAG-CBOR encoding and content hashing for everything we store or seal

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Encode any serde value as DAG-CBOR
pub fn to_block<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_ipld_dagcbor::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a DAG-CBOR block into any serde value
pub fn from_block<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    serde_ipld_dagcbor::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Types that are stored as standalone blocks
pub trait BlockEncoded: Serialize + DeserializeOwned {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        to_block(self)
    }

    fn decode(data: &[u8]) -> Result<Self, CodecError> {
        from_block(data)
    }

    /// BLAKE3 hash of the canonical encoding
    fn hash(&self) -> Result<NodeHash, CodecError> {
        let encoded = self.encode()?;
        Ok(NodeHash(*blake3::hash(&encoded).as_bytes()))
    }
}

/// Content hash of an encoded block.
///
/// This is the value compare-and-swap commits are checked against.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHash([u8; 32]);

impl NodeHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for NodeHash {
    fn from(bytes: [u8; 32]) -> Self {
        NodeHash(bytes)
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
