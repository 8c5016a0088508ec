//! Integration tests for concurrent directory updates

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::FutureExt;

use ::common::cryptree::EntryPoint;
use ::common::fs::{FileHandle, FsError};
use ::common::store::Network;
use crate::common::{config, setup_test_env, upload, ContendedStore, InterleavedStore};

async fn resolve(entry: &EntryPoint, network: &Network) -> FileHandle {
    FileHandle::from_entry_point(entry, network)
        .await
        .unwrap()
        .unwrap()
}

fn names(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn test_racing_uploads_of_same_name_both_survive() {
    let env = setup_test_env().await;
    let entry = env.root.entry_point();
    let alice = resolve(&entry, &env.network).await;
    let bob = resolve(&entry, &env.network).await;

    upload(alice, "report.txt", b"first").await;
    // bob's view of the directory is now out of date
    let bob = bob
        .upload_file("report.txt", &b"second"[..], 0, 6, false)
        .await
        .unwrap();

    assert_eq!(
        bob.child_names().await.unwrap(),
        names(&["report.txt", "report[1].txt"])
    );
    let first = bob.child("report.txt").await.unwrap().unwrap();
    let second = bob.child("report[1].txt").await.unwrap().unwrap();
    assert_eq!(first.read_all().await.unwrap(), b"first");
    assert_eq!(second.read_all().await.unwrap(), b"second");
}

#[tokio::test]
async fn test_third_writer_pushes_rename_to_next_suffix() {
    let env = setup_test_env().await;
    let entry = env.root.entry_point();

    // carol takes report[1].txt between bob's first and second try
    let carol = {
        let entry = entry.clone();
        let network = env.network.clone();
        async move {
            let carol = resolve(&entry, &network).await;
            upload(carol, "report[1].txt", b"carol").await;
        }
        .boxed()
    };
    let interleaved = Network::new(
        Arc::new(InterleavedStore::new(
            env.store.clone(),
            env.root.location().clone(),
            2,
            carol,
        )),
        config(),
    );
    let alice = resolve(&entry, &env.network).await;
    let bob = resolve(&entry, &interleaved).await;

    upload(alice, "report.txt", b"alice").await;
    let bob = bob
        .upload_file("report.txt", &b"bob"[..], 0, 3, false)
        .await
        .unwrap();

    assert_eq!(
        bob.child_names().await.unwrap(),
        names(&["report.txt", "report[1].txt", "report[2].txt"])
    );
    let renamed = bob.child("report[2].txt").await.unwrap().unwrap();
    assert_eq!(renamed.read_all().await.unwrap(), b"bob");
    let carols = bob.child("report[1].txt").await.unwrap().unwrap();
    assert_eq!(carols.read_all().await.unwrap(), b"carol");
}

#[tokio::test]
async fn test_racing_uploads_of_different_names_merge() {
    let env = setup_test_env().await;
    let entry = env.root.entry_point();
    let alice = resolve(&entry, &env.network).await;
    let bob = resolve(&entry, &env.network).await;

    upload(alice, "a.txt", b"a").await;
    let bob = upload(bob, "b.txt", b"b").await;

    assert_eq!(bob.child_names().await.unwrap(), names(&["a.txt", "b.txt"]));
}

#[tokio::test]
async fn test_racing_mkdir_fails_on_collision() {
    let env = setup_test_env().await;
    let entry = env.root.entry_point();
    let alice = resolve(&entry, &env.network).await;
    let bob = resolve(&entry, &env.network).await;

    alice.mkdir("docs").await.unwrap();
    let before = env.store.len();
    let result = bob.mkdir("docs").await;

    assert!(matches!(result, Err(FsError::NameCollision { name }) if name == "docs"));
    // the unlinked directory was cleaned up
    assert_eq!(env.store.len(), before);
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let env = setup_test_env().await;
    let contended = Network::new(
        Arc::new(ContendedStore {
            inner: env.store.clone(),
            contended: env.root.location().clone(),
        }),
        config(),
    );
    let root = resolve(&env.root.entry_point(), &contended).await;

    let result = root.clone().upload_file("a.txt", &b"a"[..], 0, 1, false).await;
    assert!(matches!(
        result,
        Err(FsError::ConcurrentModification { location }) if &location == env.root.location()
    ));

    let result = root.mkdir("docs").await;
    assert!(matches!(result, Err(FsError::ConcurrentModification { .. })));
}

#[tokio::test]
async fn test_stale_handle_rejected() {
    let env = setup_test_env().await;
    let retained = env.root.clone();
    let root = env.root.mkdir("docs").await.unwrap();

    assert!(matches!(retained.children().await, Err(FsError::StaleHandle)));
    assert!(matches!(
        retained.mkdir("other").await,
        Err(FsError::StaleHandle)
    ));
    assert!(root.has_child("docs").await.unwrap());
}

#[tokio::test]
async fn test_read_only_handle_cannot_write() {
    let env = setup_test_env().await;
    let entry = EntryPoint::new(env.root.capability().read_only(), "alice");
    let reader = resolve(&entry, &env.network).await;

    assert!(!reader.is_writable());
    assert!(matches!(reader.mkdir("docs").await, Err(FsError::NotWritable)));
}
