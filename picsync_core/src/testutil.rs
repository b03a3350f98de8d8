//! Test utilities for `TargetStore` implementations and the reconciler.
//!
//! # Usage
//!
//! In your store crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! picsync_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use picsync_core::testutil::TargetStoreTests;
//!
//! #[tokio::test]
//! async fn test_my_store() {
//!     let store = MyStore::new(...);
//!     TargetStoreTests::new(&store).run_all().await.unwrap();
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rand::Rng;

use crate::ledger::{Ledger, LedgerResult};
use crate::record::{OwnerKey, SyncRecord};
use crate::remote::{FolderId, RemoteFile, RemoteSource, SourceResult};
use crate::target::{ObjectMeta, TargetResult, TargetStore};

/// Conformance suite for [`TargetStore`] implementations.
///
/// Runs every test under a random key prefix so suites can run against a
/// shared backend (for example a real S3 bucket) without colliding.
pub struct TargetStoreTests<'a, S> {
    store: &'a S,
    prefix: String,
}

impl<'a, S: TargetStore> TargetStoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        let prefix = format!("_test_{}/", rand::rng().random::<u32>());
        Self::with_prefix(store, prefix)
    }

    pub fn with_prefix(store: &'a S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn meta(&self, remote_id: &str, content_hash: &str, size: u64) -> ObjectMeta {
        ObjectMeta {
            remote_id: remote_id.to_string(),
            content_hash: content_hash.to_string(),
            synced_at: Some(Utc::now()),
            size: Some(size),
        }
    }

    pub async fn run_all(&self) -> TargetResult<()> {
        self.test_put_then_head().await?;
        self.test_head_missing().await?;
        self.test_overwrite_replaces_metadata().await?;
        self.test_delete().await?;
        self.test_delete_missing_is_ok().await?;
        Ok(())
    }

    /// Put an object and read its metadata back unchanged.
    pub async fn test_put_then_head(&self) -> TargetResult<()> {
        let key = self.key("put_then_head.jpg");
        let data = random_bytes(256);
        let meta = self.meta("file-1", "hash-1", data.len() as u64);

        self.store.put(&key, data, "image/jpeg", &meta).await?;

        let head = self.store.head(&key).await?;
        assert_eq!(
            head.as_ref(),
            Some(&meta),
            "head should return the stored metadata"
        );

        self.store.delete(&key).await?;
        Ok(())
    }

    /// Head on an absent key is `None`, not an error.
    pub async fn test_head_missing(&self) -> TargetResult<()> {
        let key = self.key("never_written.jpg");
        assert!(
            self.store.head(&key).await?.is_none(),
            "absent key should head to None"
        );
        Ok(())
    }

    /// A second put fully replaces object and metadata.
    pub async fn test_overwrite_replaces_metadata(&self) -> TargetResult<()> {
        let key = self.key("overwrite.png");
        let first = self.meta("file-2", "hash-old", 3);
        let second = self.meta("file-2", "hash-new", 5);

        self.store
            .put(&key, Bytes::from_static(b"old"), "image/png", &first)
            .await?;
        self.store
            .put(&key, Bytes::from_static(b"newer"), "image/png", &second)
            .await?;

        let head = self.store.head(&key).await?;
        assert_eq!(
            head.map(|meta| meta.content_hash),
            Some("hash-new".to_string()),
            "overwrite should replace the metadata"
        );

        self.store.delete(&key).await?;
        Ok(())
    }

    /// Delete removes object and metadata together.
    pub async fn test_delete(&self) -> TargetResult<()> {
        let key = self.key("delete_me.jpg");
        let meta = self.meta("file-3", "hash-3", 2);

        self.store
            .put(&key, Bytes::from_static(b"xx"), "image/jpeg", &meta)
            .await?;
        self.store.delete(&key).await?;

        assert!(
            self.store.head(&key).await?.is_none(),
            "deleted key should head to None"
        );
        Ok(())
    }

    /// Deleting a key that was never written must succeed.
    pub async fn test_delete_missing_is_ok(&self) -> TargetResult<()> {
        self.store.delete(&self.key("ghost.jpg")).await?;
        Ok(())
    }
}

/// Generate random bytes for testing.
pub fn random_bytes(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    Bytes::from(data)
}

/// Build a listing entry plus its bytes. The content hash is the blake3
/// hex digest of the bytes, like a well-behaved source would report.
pub fn remote_file(
    remote_id: &str,
    name: &str,
    content_type: &str,
    bytes: &[u8],
) -> (RemoteFile, Bytes) {
    let file = RemoteFile {
        remote_id: remote_id.to_string(),
        name: name.to_string(),
        content_type: content_type.to_string(),
        content_hash: Some(blake3::hash(bytes).to_hex().to_string()),
        size_bytes: Some(bytes.len() as u64),
    };
    (file, Bytes::copy_from_slice(bytes))
}

/// Scriptable in-memory [`RemoteSource`].
///
/// Tests preload folder listings and bytes, inject failures and count
/// calls to assert how much network the engine actually used.
#[derive(Debug, Default)]
pub struct StaticSource {
    folders: Mutex<HashMap<String, Vec<(RemoteFile, Bytes)>>>,
    fail_listing: AtomicBool,
    fail_downloads: Mutex<HashSet<String>>,
    list_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to a folder, replacing any entry with the same remote id.
    pub fn insert(&self, folder: &str, file: RemoteFile, bytes: impl Into<Bytes>) {
        let mut folders = self.folders.lock().unwrap();
        let files = folders.entry(folder.to_string()).or_default();
        files.retain(|(existing, _)| existing.remote_id != file.remote_id);
        files.push((file, bytes.into()));
    }

    pub fn remove(&self, folder: &str, remote_id: &str) {
        let mut folders = self.folders.lock().unwrap();
        if let Some(files) = folders.get_mut(folder) {
            files.retain(|(existing, _)| existing.remote_id != remote_id);
        }
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_download(&self, remote_id: &str, fail: bool) {
        let mut ids = self.fail_downloads.lock().unwrap();
        if fail {
            ids.insert(remote_id.to_string());
        } else {
            ids.remove(remote_id);
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSource for StaticSource {
    async fn list_files(&self, folder: &FolderId) -> SourceResult<Vec<RemoteFile>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("listing unavailable"));
        }
        let folders = self.folders.lock().unwrap();
        Ok(folders
            .get(folder.as_str())
            .map(|files| files.iter().map(|(file, _)| file.clone()).collect())
            .unwrap_or_default())
    }

    async fn download(&self, remote_id: &str) -> SourceResult<Bytes> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_downloads.lock().unwrap().contains(remote_id) {
            return Err(anyhow::anyhow!("download refused"));
        }
        let folders = self.folders.lock().unwrap();
        folders
            .values()
            .flatten()
            .find(|(file, _)| file.remote_id == remote_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| anyhow::anyhow!("unknown remote id {remote_id}"))
    }
}

/// In-memory [`TargetStore`] that counts writes and deletes and lets tests
/// tamper with stored state out of band.
#[derive(Debug, Default)]
pub struct RecordingTarget {
    objects: Mutex<HashMap<String, (Bytes, String, ObjectMeta)>>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    fail_puts: AtomicBool,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Drop an object without going through `delete`, like an out-of-band
    /// deletion in the real store.
    pub fn forget(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    /// Overwrite the stored metadata hash, like an out-of-band mutation of
    /// the object.
    pub fn tamper_hash(&self, key: &str, content_hash: &str) {
        if let Some((_, _, meta)) = self.objects.lock().unwrap().get_mut(key) {
            meta.content_hash = content_hash.to_string();
        }
    }

    pub fn bytes(&self, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(bytes, _, _)| bytes.clone())
    }

    pub fn meta(&self, key: &str) -> Option<ObjectMeta> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, _, meta)| meta.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl TargetStore for RecordingTarget {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        meta: &ObjectMeta,
    ) -> TargetResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("put refused"));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(
            key.to_string(),
            (bytes, content_type.to_string(), meta.clone()),
        );
        Ok(())
    }

    async fn head(&self, key: &str) -> TargetResult<Option<ObjectMeta>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, _, meta)| meta.clone()))
    }

    async fn delete(&self, key: &str) -> TargetResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// In-memory [`Ledger`] with write counting and failure injection.
#[derive(Debug, Default)]
pub struct TestLedger {
    records: RwLock<HashMap<String, SyncRecord>>,
    upserts: AtomicUsize,
    fail_writes: AtomicBool,
}

impl TestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }
}

#[async_trait]
impl Ledger for TestLedger {
    async fn get(&self, remote_id: &str) -> LedgerResult<Option<SyncRecord>> {
        Ok(self.records.read().unwrap().get(remote_id).cloned())
    }

    async fn upsert(&self, record: SyncRecord) -> LedgerResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("ledger write refused"));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.records
            .write()
            .unwrap()
            .insert(record.remote_id.clone(), record);
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &OwnerKey) -> LedgerResult<Vec<String>> {
        let mut records = self.records.write().unwrap();
        let ids: Vec<String> = records
            .values()
            .filter(|record| record.owner == *owner)
            .map(|record| record.remote_id.clone())
            .collect();
        let mut keys = Vec::new();
        for id in ids {
            if let Some(record) = records.remove(&id) {
                if let Some(key) = record.target_key {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    async fn get_by_target_key(&self, target_key: &str) -> LedgerResult<Option<SyncRecord>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .find(|record| record.target_key.as_deref() == Some(target_key))
            .cloned())
    }

    async fn list_by_owner(&self, owner: &OwnerKey) -> LedgerResult<Vec<SyncRecord>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .filter(|record| record.owner == *owner)
            .cloned()
            .collect())
    }
}
