//! Shared test utilities for file system integration tests
#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;

use common::codec::NodeHash;
use common::config::FsConfig;
use common::crypto::{SecretKey, Signature};
use common::cryptree::{KeyedNode, Location};
use common::fs::FileHandle;
use common::store::{CommitOutcome, ContentStore, MemoryContentStore, Network, StoreError};

/// Small chunks so multi-chunk files stay cheap
pub const CHUNK: usize = 16;

pub struct TestEnv {
    pub network: Network,
    pub store: MemoryContentStore,
    pub owner: SecretKey,
    pub root: FileHandle,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> FsConfig {
    FsConfig::default().with_chunk_size(CHUNK).unwrap()
}

/// Set up a test environment with an in-memory store and a fresh root for `alice`
pub async fn setup_test_env() -> TestEnv {
    init_tracing();
    let store = MemoryContentStore::new();
    let network = Network::new(Arc::new(store.clone()), config());
    let owner = SecretKey::generate().unwrap();
    let root = FileHandle::create_root(&owner, "alice", &network)
        .await
        .unwrap();
    TestEnv {
        network,
        store,
        owner,
        root,
    }
}

/// `len` bytes of a repeating pattern, so misplaced chunks show up
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Upload `data` as `name` into `dir`, returning the updated directory
pub async fn upload(dir: FileHandle, name: &str, data: &[u8]) -> FileHandle {
    dir.upload_file(name, data, 0, data.len() as u64, false)
        .await
        .unwrap()
}

/// A store whose commits to one location always conflict
#[derive(Debug)]
pub struct ContendedStore {
    pub inner: MemoryContentStore,
    pub contended: Location,
}

#[async_trait]
impl ContentStore for ContendedStore {
    async fn fetch_node(&self, location: &Location) -> Result<Option<KeyedNode>, StoreError> {
        self.inner.fetch_node(location).await
    }

    async fn commit(
        &self,
        location: &Location,
        node: &KeyedNode,
        expected: Option<NodeHash>,
        signature: &Signature,
    ) -> Result<CommitOutcome, StoreError> {
        if location == &self.contended {
            let current = self.inner.fetch_node(location).await?;
            return Ok(CommitOutcome::Conflict(current));
        }
        self.inner.commit(location, node, expected, signature).await
    }

    async fn remove(
        &self,
        location: &Location,
        expected: NodeHash,
        signature: &Signature,
    ) -> Result<CommitOutcome, StoreError> {
        self.inner.remove(location, expected, signature).await
    }
}

/// A store that runs another writer's work just before the `nth` commit
/// to `watched`
pub struct InterleavedStore {
    inner: MemoryContentStore,
    watched: Location,
    nth: usize,
    commits: AtomicUsize,
    interleave: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl InterleavedStore {
    pub fn new(
        inner: MemoryContentStore,
        watched: Location,
        nth: usize,
        interleave: BoxFuture<'static, ()>,
    ) -> Self {
        Self {
            inner,
            watched,
            nth,
            commits: AtomicUsize::new(0),
            interleave: Mutex::new(Some(interleave)),
        }
    }
}

impl fmt::Debug for InterleavedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterleavedStore")
            .field("watched", &self.watched)
            .field("nth", &self.nth)
            .finish()
    }
}

#[async_trait]
impl ContentStore for InterleavedStore {
    async fn fetch_node(&self, location: &Location) -> Result<Option<KeyedNode>, StoreError> {
        self.inner.fetch_node(location).await
    }

    async fn commit(
        &self,
        location: &Location,
        node: &KeyedNode,
        expected: Option<NodeHash>,
        signature: &Signature,
    ) -> Result<CommitOutcome, StoreError> {
        if location == &self.watched && self.commits.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
            let pending = self.interleave.lock().await.take();
            if let Some(work) = pending {
                work.await;
            }
        }
        self.inner.commit(location, node, expected, signature).await
    }

    async fn remove(
        &self,
        location: &Location,
        expected: NodeHash,
        signature: &Signature,
    ) -> Result<CommitOutcome, StoreError> {
        self.inner.remove(location, expected, signature).await
    }
}
