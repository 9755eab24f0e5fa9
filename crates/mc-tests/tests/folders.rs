//! Storage folder administration: registration, removal, resizing.

use std::collections::HashMap;
use std::time::Duration;

use mc_blobs::{BlobStoreError, CancellationToken, FileBlobsManager};
use mc_codec::checksum_of;
use mc_tests::{TestStore, assert_within_capacity, blob_files, content};
use tokio::io::AsyncWriteExt;
use mc_types::{BlobId, METADATA_FILE_NAME, StorageFolderConfig};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// A store with `count` blobs of 10 KB, all in folder 0, plus an empty
/// folder 1 of `second_size` bytes.
async fn store_with_blobs(count: u64, second_size: u64) -> (TestStore, HashMap<BlobId, Vec<u8>>) {
    let store = TestStore::with_folders(&[MIB]).await;
    let mut blobs = HashMap::new();
    for seed in 0..count {
        let bytes = content(seed, 10_000);
        blobs.insert(store.add(&bytes).await.unwrap(), bytes);
    }

    let mut store = store;
    let dir = tempfile::tempdir().unwrap();
    store
        .manager
        .add_storage_folder(&StorageFolderConfig::new(dir.path(), second_size))
        .await
        .unwrap();
    store.dirs.push(dir);
    (store, blobs)
}

async fn assert_readable(manager: &FileBlobsManager, blobs: &HashMap<BlobId, Vec<u8>>) {
    for (id, bytes) in blobs {
        let lock = manager.lock_blob(id).await.unwrap();
        assert_eq!(&lock.read_to_vec().await.unwrap(), bytes);
    }
}

// ── Registration ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn same_folder_cannot_be_added_twice() {
    let store = TestStore::with_folders(&[MIB]).await;
    let err = store
        .manager
        .add_storage_folder(&StorageFolderConfig::new(store.path(0), MIB))
        .await
        .unwrap_err();
    assert!(matches!(err, BlobStoreError::DuplicateFolder { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn same_folder_through_a_symlink_is_detected() {
    let store = TestStore::with_folders(&[MIB]).await;
    let links = tempfile::tempdir().unwrap();
    let alias = links.path().join("alias");
    std::os::unix::fs::symlink(store.path(0), &alias).unwrap();

    let err = store
        .manager
        .add_storage_folder(&StorageFolderConfig::new(&alias, MIB))
        .await
        .unwrap_err();
    assert!(matches!(err, BlobStoreError::DuplicateFolder { .. }));
}

#[tokio::test]
async fn new_folder_with_files_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("unrelated.txt"), b"keep me").unwrap();
    let manager = FileBlobsManager::new();
    let err = manager
        .add_storage_folder(&StorageFolderConfig::new(dir.path(), MIB))
        .await
        .unwrap_err();
    assert!(matches!(err, BlobStoreError::InvalidOperation(_)));
    assert!(dir.path().join("unrelated.txt").exists());
    assert!(manager.storage_folder_status().is_empty());
}

#[tokio::test]
async fn missing_folder_is_created() {
    let parent = tempfile::tempdir().unwrap();
    let path = parent.path().join("nested").join("store");
    let manager = FileBlobsManager::new();
    manager
        .add_storage_folder(&StorageFolderConfig::new(&path, MIB))
        .await
        .unwrap();
    assert!(path.is_dir());
    let status = manager.storage_folder_status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].path, path);
    assert_eq!(status[0].current_size, 0);
    assert_eq!(status[0].maximum_size, MIB);
}

#[tokio::test]
async fn zero_maximum_size_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let manager = FileBlobsManager::new();
    let err = manager
        .add_storage_folder(&StorageFolderConfig::new(dir.path(), 0))
        .await
        .unwrap_err();
    assert!(matches!(err, BlobStoreError::InvalidOperation(_)));
}

// ── Removal ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn removing_a_folder_moves_every_blob() {
    let (store, blobs) = store_with_blobs(6, MIB).await;
    for id in blobs.keys() {
        store.manager.increase_reference(id).unwrap();
    }
    assert_eq!(blob_files(store.path(0)).len(), 6);

    store.manager.remove_storage_folder(store.path(0)).await.unwrap();

    assert!(blob_files(store.path(0)).is_empty());
    assert_eq!(blob_files(store.path(1)).len(), 6);
    let status = store.manager.storage_folder_status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].path, store.path(1));
    let expected: u64 = blobs
        .keys()
        .map(|id| store.manager.blob_info(id).unwrap().compressed_size)
        .sum();
    assert_eq!(status[0].current_size, expected);
    for id in blobs.keys() {
        assert_eq!(store.manager.blob_info(id).unwrap().reference_count, 2);
    }
    assert_readable(&store.manager, &blobs).await;
}

#[tokio::test]
async fn removed_folder_is_left_with_empty_metadata() {
    let (store, _) = store_with_blobs(2, MIB).await;
    store.manager.remove_storage_folder(store.path(0)).await.unwrap();

    let metadata = std::fs::read_to_string(store.path(0).join(METADATA_FILE_NAME)).unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&metadata).unwrap(),
        serde_json::json!({ "files": [] })
    );

    // Re-adding the emptied folder works and brings nothing back.
    store
        .manager
        .add_storage_folder(&StorageFolderConfig::new(store.path(0), MIB))
        .await
        .unwrap();
    assert_eq!(store.status_of(store.path(0)).unwrap().current_size, 0);
}

#[tokio::test]
async fn removal_waits_for_locked_blobs() {
    let (store, blobs) = store_with_blobs(3, MIB).await;
    let locked = *blobs.keys().next().unwrap();
    let lock = store.manager.lock_blob(&locked).await.unwrap();

    let manager = store.manager.clone();
    let source = store.path(0).to_path_buf();
    let removal = tokio::spawn(async move { manager.remove_storage_folder(&source).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!removal.is_finished());
    // The locked blob still lives in its original folder and reads fine.
    assert!(lock.path().exists());
    assert_eq!(&lock.read_to_vec().await.unwrap(), &blobs[&locked]);

    let old_path = lock.path().to_path_buf();
    drop(lock);
    tokio::time::timeout(Duration::from_secs(5), removal)
        .await
        .expect("removal should finish once the lock is released")
        .unwrap()
        .unwrap();

    assert!(!old_path.exists());
    assert!(blob_files(store.path(0)).is_empty());
    assert_readable(&store.manager, &blobs).await;
}

#[tokio::test]
async fn removal_waits_for_ingestions_into_the_folder() {
    let store = TestStore::with_folders(&[2 * MIB, MIB]).await;
    let bytes = content(7, 10_000);
    let checksum = checksum_of(&bytes);

    // Folder 0 has the most room, so the ingestion lands there.
    let (mut writer, reader) = tokio::io::duplex(1024);
    let manager = store.manager.clone();
    let ingestion = tokio::spawn(async move {
        manager
            .add_blob(reader, 10_000, checksum, &CancellationToken::new())
            .await
    });
    writer.write_all(&bytes[..4_000]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.status_of(store.path(0)).unwrap().current_size, 10_000);

    let manager = store.manager.clone();
    let source = store.path(0).to_path_buf();
    let removal = tokio::spawn(async move { manager.remove_storage_folder(&source).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!removal.is_finished());
    assert!(store.status_of(store.path(0)).is_some());

    writer.write_all(&bytes[4_000..]).await.unwrap();
    drop(writer);
    let id = ingestion.await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(5), removal)
        .await
        .expect("removal should finish once the ingestion is done")
        .unwrap()
        .unwrap();

    assert!(store.status_of(store.path(0)).is_none());
    assert!(blob_files(store.path(0)).is_empty());
    let info = store.manager.blob_info(&id).unwrap();
    assert!(info.path.starts_with(std::fs::canonicalize(store.path(1)).unwrap()));
    assert_eq!(info.reference_count, 1);
    let lock = store.manager.lock_blob(&id).await.unwrap();
    assert_eq!(lock.read_to_vec().await.unwrap(), bytes);
}

#[tokio::test]
async fn failed_copy_aborts_removal_and_drops_the_copy() {
    let (store, blobs) = store_with_blobs(1, 100 * KIB).await;
    let id = *blobs.keys().next().unwrap();
    let info = store.manager.blob_info(&id).unwrap();
    let used = store.status_of(store.path(0)).unwrap().current_size;
    std::fs::remove_file(&info.path).unwrap();

    let err = store
        .manager
        .remove_storage_folder(store.path(0))
        .await
        .unwrap_err();

    assert!(matches!(err, BlobStoreError::Io(_)), "unexpected error {err:?}");
    assert_eq!(store.status_of(store.path(0)).unwrap().current_size, used);
    assert_eq!(store.status_of(store.path(1)).unwrap().current_size, 0);
    assert!(blob_files(store.path(1)).is_empty());
    assert_eq!(store.manager.blob_info(&id).unwrap().path, info.path);

    // Folder 0 takes new content again.
    let fresh = store.add(&content(200, 1_000)).await.unwrap();
    let fresh_path = store.manager.blob_info(&fresh).unwrap().path;
    assert!(fresh_path.starts_with(std::fs::canonicalize(store.path(0)).unwrap()));
}

#[tokio::test]
async fn removal_without_room_elsewhere_changes_nothing() {
    let (store, blobs) = store_with_blobs(5, 20 * KIB).await;

    let err = store
        .manager
        .remove_storage_folder(store.path(0))
        .await
        .unwrap_err();
    assert!(matches!(err, BlobStoreError::StorageFull(_)));
    assert_eq!(blob_files(store.path(0)).len(), 5);
    assert!(blob_files(store.path(1)).is_empty());
    assert_readable(&store.manager, &blobs).await;

    // The folder is back in service.
    store.add(&content(100, 10_000)).await.unwrap();
    assert_within_capacity(&store.manager);
}

#[tokio::test]
async fn removing_an_unknown_folder_fails() {
    let store = TestStore::with_folders(&[MIB]).await;
    let elsewhere = tempfile::tempdir().unwrap();
    let err = store
        .manager
        .remove_storage_folder(elsewhere.path())
        .await
        .unwrap_err();
    assert!(matches!(err, BlobStoreError::UnknownFolder(_)));
}

#[tokio::test]
async fn removing_the_last_empty_folder_is_allowed() {
    let store = TestStore::with_folders(&[MIB]).await;
    store.manager.remove_storage_folder(store.path(0)).await.unwrap();
    assert!(store.manager.storage_folder_status().is_empty());
}

// ── Resizing ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shrinking_moves_just_enough() {
    let (store, blobs) = store_with_blobs(6, MIB).await;
    let before = store.status_of(store.path(0)).unwrap().current_size;
    let new_maximum = before / 2;

    store
        .manager
        .update_storage_folder(&StorageFolderConfig::new(store.path(0), new_maximum))
        .await
        .unwrap();

    let shrunk = store.status_of(store.path(0)).unwrap();
    assert_eq!(shrunk.maximum_size, new_maximum);
    assert!(shrunk.current_size <= new_maximum);
    assert!(shrunk.current_size > 0, "only the excess should move");
    assert_eq!(
        blob_files(store.path(0)).len() + blob_files(store.path(1)).len(),
        6
    );
    assert_within_capacity(&store.manager);
    assert_readable(&store.manager, &blobs).await;
}

#[tokio::test]
async fn shrinking_waits_for_ingestions_into_the_folder() {
    let store = TestStore::with_folders(&[2 * MIB, MIB]).await;
    let bytes = content(8, 30_000);
    let checksum = checksum_of(&bytes);

    let (mut writer, reader) = tokio::io::duplex(1024);
    let manager = store.manager.clone();
    let ingestion = tokio::spawn(async move {
        manager
            .add_blob(reader, 30_000, checksum, &CancellationToken::new())
            .await
    });
    writer.write_all(&bytes[..1_000]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let manager = store.manager.clone();
    let source = store.path(0).to_path_buf();
    let shrink = tokio::spawn(async move {
        manager
            .update_storage_folder(&StorageFolderConfig::new(&source, 10 * KIB))
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!shrink.is_finished());

    writer.write_all(&bytes[1_000..]).await.unwrap();
    drop(writer);
    let id = ingestion.await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(5), shrink)
        .await
        .expect("shrinking should finish once the ingestion is done")
        .unwrap()
        .unwrap();

    let shrunk = store.status_of(store.path(0)).unwrap();
    assert_eq!(shrunk.maximum_size, 10 * KIB);
    assert_eq!(shrunk.current_size, 0);
    let info = store.manager.blob_info(&id).unwrap();
    assert!(info.path.starts_with(std::fs::canonicalize(store.path(1)).unwrap()));
    assert_within_capacity(&store.manager);
}

#[tokio::test]
async fn growing_moves_nothing() {
    let (store, _) = store_with_blobs(3, MIB).await;
    store
        .manager
        .update_storage_folder(&StorageFolderConfig::new(store.path(0), 2 * MIB))
        .await
        .unwrap();
    assert_eq!(store.status_of(store.path(0)).unwrap().maximum_size, 2 * MIB);
    assert_eq!(blob_files(store.path(0)).len(), 3);
    assert!(blob_files(store.path(1)).is_empty());
}

#[tokio::test]
async fn shrinking_beyond_free_space_elsewhere_fails() {
    let (store, _) = store_with_blobs(5, 15 * KIB).await;
    let err = store
        .manager
        .update_storage_folder(&StorageFolderConfig::new(store.path(0), 10 * KIB))
        .await
        .unwrap_err();
    assert!(matches!(err, BlobStoreError::StorageFull(_)));
    assert_eq!(store.status_of(store.path(0)).unwrap().maximum_size, MIB);
}

#[tokio::test]
async fn resizing_an_unknown_folder_fails() {
    let store = TestStore::with_folders(&[MIB]).await;
    let elsewhere = tempfile::tempdir().unwrap();
    let err = store
        .manager
        .update_storage_folder(&StorageFolderConfig::new(elsewhere.path(), MIB))
        .await
        .unwrap_err();
    assert!(matches!(err, BlobStoreError::UnknownFolder(_)));
}

// ── Whole configuration ──────────────────────────────────────────────────────

#[tokio::test]
async fn apply_config_replaces_a_folder() {
    let (store, blobs) = store_with_blobs(4, MIB).await;
    let replacement = tempfile::tempdir().unwrap();

    store
        .manager
        .apply_config(&[
            StorageFolderConfig::new(store.path(1), 512 * KIB),
            StorageFolderConfig::new(replacement.path(), MIB),
        ])
        .await
        .unwrap();

    let status = store.manager.storage_folder_status();
    assert_eq!(status.len(), 2);
    assert!(store.status_of(store.path(0)).is_none());
    assert_eq!(store.status_of(store.path(1)).unwrap().maximum_size, 512 * KIB);
    assert!(store.status_of(replacement.path()).is_some());
    assert!(blob_files(store.path(0)).is_empty());
    assert_readable(&store.manager, &blobs).await;
}

#[tokio::test]
async fn apply_config_needs_a_folder() {
    let store = TestStore::with_folders(&[MIB]).await;
    let err = store.manager.apply_config(&[]).await.unwrap_err();
    assert!(matches!(err, BlobStoreError::InvalidOperation(_)));
    assert_eq!(store.manager.storage_folder_status().len(), 1);
}
