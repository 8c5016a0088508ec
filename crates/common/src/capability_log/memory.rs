use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{
    CapabilitiesFromIndex, CapabilityKind, CapabilityLog, CapabilityLogError, CapabilityWithPath,
};
use crate::cryptree::Location;

/// In-memory capability log
#[derive(Debug, Clone)]
pub struct MemoryCapabilityLog {
    inner: Arc<RwLock<MemoryCapabilityLogInner>>,
}

#[derive(Debug, Default)]
struct MemoryCapabilityLogInner {
    /// (shared dir, kind) -> records in append order
    logs: HashMap<(Location, CapabilityKind), Vec<CapabilityWithPath>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryCapabilityLogError {
    #[error("memory capability log error: {0}")]
    Internal(String),
}

impl MemoryCapabilityLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryCapabilityLogInner::default())),
        }
    }
}

impl Default for MemoryCapabilityLog {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> CapabilityLogError<MemoryCapabilityLogError> {
    CapabilityLogError::Provider(MemoryCapabilityLogError::Internal(format!(
        "failed to acquire lock: {}",
        e
    )))
}

#[async_trait]
impl CapabilityLog for MemoryCapabilityLog {
    type Error = MemoryCapabilityLogError;

    async fn capability_count(
        &self,
        kind: CapabilityKind,
        shared_dir: &Location,
    ) -> Result<u64, CapabilityLogError<Self::Error>> {
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner
            .logs
            .get(&(shared_dir.clone(), kind))
            .map(|records| records.len() as u64)
            .unwrap_or(0))
    }

    async fn capability_records(
        &self,
        kind: CapabilityKind,
        shared_dir: &Location,
        from_index: u64,
    ) -> Result<CapabilitiesFromIndex, CapabilityLogError<Self::Error>> {
        let inner = self.inner.read().map_err(lock_error)?;
        let records = inner
            .logs
            .get(&(shared_dir.clone(), kind))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let count = records.len() as u64;
        if from_index > count {
            return Err(CapabilityLogError::IndexOutOfRange {
                index: from_index,
                count,
            });
        }

        let records = records[from_index as usize..].to_vec();
        Ok(CapabilitiesFromIndex {
            count_read: records.len() as u64,
            records,
        })
    }

    async fn append(
        &self,
        kind: CapabilityKind,
        shared_dir: &Location,
        record: CapabilityWithPath,
    ) -> Result<u64, CapabilityLogError<Self::Error>> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        let records = inner.logs.entry((shared_dir.clone(), kind)).or_default();
        records.push(record);
        Ok(records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{SecretKey, SymmetricKey};
    use crate::cryptree::Capability;

    fn location() -> Location {
        let key = SecretKey::generate().unwrap();
        Location::random(key.public(), key.public()).unwrap()
    }

    fn record(path: &str) -> CapabilityWithPath {
        CapabilityWithPath {
            path: path.to_string(),
            capability: Capability::new(location(), SymmetricKey::generate().unwrap()),
        }
    }

    #[tokio::test]
    async fn test_append_and_count() {
        let log = MemoryCapabilityLog::new();
        let dir = location();

        assert_eq!(log.capability_count(CapabilityKind::ReadOnly, &dir).await.unwrap(), 0);
        assert_eq!(
            log.append(CapabilityKind::ReadOnly, &dir, record("/alice/a"))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            log.append(CapabilityKind::ReadOnly, &dir, record("/alice/b"))
                .await
                .unwrap(),
            2
        );

        // kinds are independent
        assert_eq!(log.capability_count(CapabilityKind::Edit, &dir).await.unwrap(), 0);
        assert_eq!(log.capability_count(CapabilityKind::ReadOnly, &dir).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_records_from_index() {
        let log = MemoryCapabilityLog::new();
        let dir = location();
        for path in ["/alice/a", "/alice/b", "/alice/c"] {
            log.append(CapabilityKind::Edit, &dir, record(path)).await.unwrap();
        }

        let page = log
            .capability_records(CapabilityKind::Edit, &dir, 1)
            .await
            .unwrap();
        assert_eq!(page.count_read, 2);
        let paths: Vec<_> = page.records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/alice/b", "/alice/c"]);

        let page = log
            .capability_records(CapabilityKind::Edit, &dir, 3)
            .await
            .unwrap();
        assert_eq!(page.count_read, 0);
    }

    #[tokio::test]
    async fn test_index_out_of_range() {
        let log = MemoryCapabilityLog::new();
        let result = log
            .capability_records(CapabilityKind::ReadOnly, &location(), 1)
            .await;
        assert!(matches!(
            result,
            Err(CapabilityLogError::IndexOutOfRange { index: 1, count: 0 })
        ));
    }
}
