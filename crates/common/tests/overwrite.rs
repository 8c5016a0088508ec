//! Integration tests for in-place range overwrites

mod common;

use ::common::cryptree::{KeyedNode, Location};
use ::common::fs::{FileHandle, FsError};
use crate::common::{pattern, setup_test_env, upload, CHUNK};

/// Every chunk of `file`, in order
async fn chunks(file: &FileHandle) -> Vec<(Location, KeyedNode)> {
    let data_key = file
        .node()
        .as_file()
        .unwrap()
        .data_key(&file.capability().base_key)
        .unwrap();
    let mut out = vec![(file.location().clone(), file.node().clone())];
    loop {
        let (_, last) = out.last().unwrap();
        let next = last.as_file().unwrap().retriever().next(&data_key).unwrap();
        match next {
            Some(location) => {
                let node = file.network().get(&location).await.unwrap().unwrap();
                out.push((location, node));
            }
            None => return out,
        }
    }
}

async fn file_of(len: usize) -> (FileHandle, Vec<u8>) {
    let env = setup_test_env().await;
    let data = pattern(len);
    let root = upload(env.root, "f.bin", &data).await;
    (root.child("f.bin").await.unwrap().unwrap(), data)
}

#[tokio::test]
async fn test_overwrite_across_chunk_boundary() {
    let (file, mut expected) = file_of(3 * CHUNK).await;
    let before = chunks(&file).await;
    assert_eq!(before.len(), 3);

    let start = CHUNK + 10;
    let end = 2 * CHUNK + 4;
    let patch = vec![0xAA; end - start];
    let file = file
        .overwrite_range(patch.as_slice(), start as u64, end as u64)
        .await
        .unwrap();
    expected[start..end].copy_from_slice(&patch);

    assert_eq!(file.size(), 3 * CHUNK as u64);
    assert_eq!(file.read_all().await.unwrap(), expected);

    let after = chunks(&file).await;
    let locations = |c: &[(Location, KeyedNode)]| {
        c.iter().map(|(l, _)| l.clone()).collect::<Vec<_>>()
    };
    assert_eq!(locations(&before), locations(&after));

    // chunk 0 was outside the range
    assert_eq!(
        before[0].1.content_hash().unwrap(),
        after[0].1.content_hash().unwrap()
    );
    assert_ne!(before[1].1, after[1].1);
    assert_ne!(before[2].1, after[2].1);
}

#[tokio::test]
async fn test_overwrite_grows_file() {
    let (file, original) = file_of(CHUNK + 4).await;

    let start = CHUNK + 2;
    let end = 2 * CHUNK + 8;
    let patch = pattern(end - start).into_iter().rev().collect::<Vec<_>>();
    let file = file
        .overwrite_range(patch.as_slice(), start as u64, end as u64)
        .await
        .unwrap();

    let mut expected = original[..start].to_vec();
    expected.extend_from_slice(&patch);
    assert_eq!(file.size(), end as u64);
    assert_eq!(file.read_all().await.unwrap(), expected);
    assert_eq!(chunks(&file).await.len(), 3);
}

#[tokio::test]
async fn test_append_at_full_chunk_boundary() {
    let (file, mut expected) = file_of(2 * CHUNK).await;

    let tail = b"appended";
    let start = 2 * CHUNK as u64;
    let file = file
        .overwrite_range(&tail[..], start, start + tail.len() as u64)
        .await
        .unwrap();
    expected.extend_from_slice(tail);

    assert_eq!(file.read_all().await.unwrap(), expected);
    assert_eq!(chunks(&file).await.len(), 3);
}

#[tokio::test]
async fn test_overwrite_through_upload() {
    let env = setup_test_env().await;
    let root = upload(env.root, "a.txt", b"hello world").await;
    let root = root
        .upload_file("a.txt", &b"W"[..], 6, 7, true)
        .await
        .unwrap();
    let file = root.child("a.txt").await.unwrap().unwrap();
    assert_eq!(file.read_all().await.unwrap(), b"hello World");
    assert_eq!(root.child_names().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_overwrite_size_never_shrinks() {
    let (file, mut expected) = file_of(CHUNK + 4).await;
    let file = file.overwrite_range(&b"xy"[..], 0, 2).await.unwrap();
    expected[..2].copy_from_slice(b"xy");
    assert_eq!(file.size(), CHUNK as u64 + 4);
    assert_eq!(file.read_all().await.unwrap(), expected);
}

#[tokio::test]
async fn test_overwrite_edge_cases() {
    let (file, data) = file_of(10).await;

    let result = file.clone().overwrite_range(&b"x"[..], 11, 12).await;
    assert!(matches!(result, Err(FsError::NotImplemented(_))));

    let result = file.clone().overwrite_range(&b"x"[..], 5, 4).await;
    assert!(matches!(result, Err(FsError::InvalidRange { .. })));

    let file = file.overwrite_range(&b""[..], 3, 3).await.unwrap();
    assert_eq!(file.read_all().await.unwrap(), data);
}

#[tokio::test]
async fn test_consumed_handle_is_stale() {
    let (file, _) = file_of(4).await;
    let retained = file.clone();
    file.overwrite_range(&b"z"[..], 0, 1).await.unwrap();

    assert!(retained.is_superseded());
    assert!(matches!(retained.read_all().await, Err(FsError::StaleHandle)));
}

#[tokio::test]
async fn test_missing_middle_chunk() {
    let env = setup_test_env().await;
    let root = upload(env.root, "f.bin", &pattern(3 * CHUNK)).await;
    let file = root.child("f.bin").await.unwrap().unwrap();

    let (middle, node) = chunks(&file).await.swap_remove(1);
    env.network
        .remove(&middle, &env.owner, node.content_hash().unwrap())
        .await
        .unwrap();

    assert!(matches!(
        file.read_all().await,
        Err(FsError::MissingChunk { location, .. }) if location == middle
    ));

    let start = 2 * CHUNK as u64 + 1;
    let result = file.overwrite_range(&b"zz"[..], start, start + 2).await;
    assert!(matches!(
        result,
        Err(FsError::MissingChunk { location, .. }) if location == middle
    ));
}
