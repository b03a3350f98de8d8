use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::drift::{self, ReprocessCause, SyncDecision};
use crate::ledger::Ledger;
use crate::record::{OwnerKey, SyncRecord, SyncStatus};
use crate::remote::{FolderId, RemoteFile, RemoteSource};
use crate::target::{ObjectMeta, TargetConfig, TargetStore, TargetWriter};
use crate::transform::{self, TransformConfig, TransformOutput};

const MIB: u64 = 1024 * 1024;

/// Conditions that abort a whole sync pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid folder reference: '{0}'")]
    InvalidReference(String),
    #[error("remote listing failed")]
    RemoteUnavailable(#[source] anyhow::Error),
    #[error("ledger access failed")]
    Ledger(#[source] anyhow::Error),
}

/// Conditions that fail a single file. They are recorded on the file's
/// ledger record and never abort the pass.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("download failed: {0}")]
    Download(#[source] anyhow::Error),
    #[error("source is {size} bytes, limit is {limit}")]
    SizeExceeded { size: u64, limit: u64 },
    #[error("target write failed: {0}")]
    TargetWrite(#[source] anyhow::Error),
}

/// Tuning for a [`Reconciler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sources larger than this are failed without downloading.
    pub max_source_bytes: u64,
    /// Upper bound for a single download.
    pub download_timeout_secs: u64,
    /// Upper bound for a single target write.
    pub write_timeout_secs: u64,
    pub transform: TransformConfig,
    pub target: TargetConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: 50 * MIB,
            download_timeout_secs: 30,
            write_timeout_secs: 30,
            transform: TransformConfig::default(),
            target: TargetConfig::default(),
        }
    }
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Public refs of every artifact that is present and healthy after the
    /// pass, ordered by file name.
    pub refs: Vec<String>,
    /// Files downloaded and written this pass.
    pub processed: usize,
    /// Files verified current without any I/O beyond the probe.
    pub unchanged: usize,
    /// Previously failed files whose artifact turned out intact.
    pub recovered: usize,
    /// Files whose record is `Failed` after this pass.
    pub failed: usize,
}

struct Outcome {
    record: SyncRecord,
    wrote: bool,
}

/// Drives the per-file reconciliation state machine.
///
/// One reconciler serves any number of folders and owners; it keeps no
/// per-pass state. Calls for different owners may run concurrently,
/// concurrent calls for the same owner are not coordinated and should be
/// serialized by the caller.
pub struct Reconciler {
    source: Arc<dyn RemoteSource>,
    ledger: Arc<dyn Ledger>,
    target: TargetWriter,
    config: SyncConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn TargetStore>,
        config: SyncConfig,
    ) -> Self {
        let target = TargetWriter::new_shared(store, config.target.clone());
        Self {
            source,
            ledger,
            target,
            config,
        }
    }

    pub fn target(&self) -> &TargetWriter {
        &self.target
    }

    /// Reconcile one remote folder for one owner and return the refs of
    /// all healthy artifacts.
    ///
    /// Per-file problems are recorded in the ledger and reflected in the
    /// report. Only an unusable reference, a failing listing or a failing
    /// ledger abort the pass.
    pub async fn sync(&self, folder_ref: &str, owner: &OwnerKey) -> Result<SyncReport, SyncError> {
        let folder = FolderId::parse(folder_ref)
            .map_err(|_| SyncError::InvalidReference(folder_ref.to_string()))?;

        let listing = self
            .source
            .list_files(&folder)
            .await
            .map_err(SyncError::RemoteUnavailable)?;

        let mut files: Vec<RemoteFile> =
            listing.into_iter().filter(RemoteFile::is_image).collect();
        // Name order keeps refs stable across passes regardless of how the
        // source enumerates.
        files.sort_by(|a, b| a.name.cmp(&b.name));

        if files.is_empty() {
            debug!("sync: folder {folder} has no image files for {owner}");
            return Ok(SyncReport::default());
        }

        let mut report = SyncReport::default();

        for file in &files {
            let record = self
                .ledger
                .get(&file.remote_id)
                .await
                .map_err(SyncError::Ledger)?;
            let decision = drift::assess(&self.target, owner, record.as_ref(), file).await;
            debug!("sync: {} ({}): {:?}", file.name, file.remote_id, decision);

            match decision {
                SyncDecision::Unchanged => {
                    if let Some(record) = &record {
                        report.refs.push(self.ref_for(record));
                        report.unchanged += 1;
                    }
                }
                SyncDecision::Recovered => {
                    if let Some(record) = &record {
                        let mut promoted = record.clone();
                        promoted.status = SyncStatus::Processed;
                        promoted.file_name = file.name.clone();
                        promoted.last_error = None;
                        promoted.last_attempt_at = Some(Utc::now());
                        self.ledger
                            .upsert(promoted.clone())
                            .await
                            .map_err(SyncError::Ledger)?;
                        info!("sync: recovered {} without re-downloading", file.name);
                        report.refs.push(self.ref_for(&promoted));
                        report.recovered += 1;
                    }
                }
                SyncDecision::Fresh => {
                    let outcome = self.process_file(&folder, owner, file, record, None).await?;
                    self.tally(&mut report, outcome);
                }
                SyncDecision::Reprocess(cause) => {
                    let outcome = self
                        .process_file(&folder, owner, file, record, Some(cause))
                        .await?;
                    self.tally(&mut report, outcome);
                }
            }
        }

        Ok(report)
    }

    /// Remove every record and artifact belonging to `owner`.
    ///
    /// Records go first so a crash leaves orphaned objects rather than
    /// records pointing into the void. Object deletion is best effort.
    ///
    /// # Returns
    ///
    /// The number of artifacts whose deletion was attempted.
    pub async fn evict_owner(&self, owner: &OwnerKey) -> Result<usize, SyncError> {
        let keys = self
            .ledger
            .delete_by_owner(owner)
            .await
            .map_err(SyncError::Ledger)?;
        for key in &keys {
            self.target.delete_quiet(key).await;
        }
        if !keys.is_empty() {
            info!("evicted {} artifacts for {owner}", keys.len());
        }
        Ok(keys.len())
    }

    fn tally(&self, report: &mut SyncReport, outcome: Outcome) {
        match outcome.record.status {
            SyncStatus::Processed => {
                report.refs.push(self.ref_for(&outcome.record));
                if outcome.wrote {
                    report.processed += 1;
                } else {
                    report.unchanged += 1;
                }
            }
            _ => report.failed += 1,
        }
    }

    fn ref_for(&self, record: &SyncRecord) -> String {
        match (&record.target_ref, &record.target_key) {
            (Some(target_ref), _) => target_ref.clone(),
            (None, Some(key)) => self.target.public_ref(key),
            (None, None) => String::new(),
        }
    }

    /// Run the full fetch/transform/write path for one file and persist
    /// the outcome. File-level failures end up as a `Failed` record, never
    /// as an error.
    async fn process_file(
        &self,
        folder: &FolderId,
        owner: &OwnerKey,
        file: &RemoteFile,
        previous: Option<SyncRecord>,
        cause: Option<ReprocessCause>,
    ) -> Result<Outcome, SyncError> {
        // Seed a Pending record before touching the network so a crash in
        // the middle leaves a marker the next pass will pick up.
        let mut record = match previous {
            Some(mut previous) => {
                previous.status = SyncStatus::Pending;
                previous.remote_folder_id = folder.as_str().to_string();
                previous.owner = owner.clone();
                previous.file_name = file.name.clone();
                previous.last_attempt_at = Some(Utc::now());
                previous
            }
            None => SyncRecord {
                remote_id: file.remote_id.clone(),
                remote_folder_id: folder.as_str().to_string(),
                owner: owner.clone(),
                file_name: file.name.clone(),
                status: SyncStatus::Pending,
                content_hash: None,
                target_key: None,
                target_ref: None,
                original_size: None,
                stored_size: None,
                last_error: None,
                last_attempt_at: Some(Utc::now()),
            },
        };
        self.ledger
            .upsert(record.clone())
            .await
            .map_err(SyncError::Ledger)?;

        match self.fetch_and_store(owner, file, &mut record, cause).await {
            Ok(wrote) => {
                record.status = SyncStatus::Processed;
                record.last_error = None;
                self.ledger
                    .upsert(record.clone())
                    .await
                    .map_err(SyncError::Ledger)?;
                Ok(Outcome { record, wrote })
            }
            Err(err) => {
                warn!("sync: {} failed: {err}", file.name);
                // Keep the previous artifact fields; a later pass may still
                // recover them.
                record.status = SyncStatus::Failed;
                record.last_error = Some(err.to_string());
                self.ledger
                    .upsert(record.clone())
                    .await
                    .map_err(SyncError::Ledger)?;
                Ok(Outcome {
                    record,
                    wrote: false,
                })
            }
        }
    }

    /// Download, transform and write one file, updating `record` in place.
    ///
    /// # Returns
    ///
    /// Whether an object was written. `false` means the downloaded bytes
    /// turned out identical to what is already stored.
    async fn fetch_and_store(
        &self,
        owner: &OwnerKey,
        file: &RemoteFile,
        record: &mut SyncRecord,
        cause: Option<ReprocessCause>,
    ) -> Result<bool, FileError> {
        if let Some(size) = file.size_bytes {
            if size > self.config.max_source_bytes {
                return Err(FileError::SizeExceeded {
                    size,
                    limit: self.config.max_source_bytes,
                });
            }
        }

        let bytes = self.download(file).await?;
        if bytes.len() as u64 > self.config.max_source_bytes {
            return Err(FileError::SizeExceeded {
                size: bytes.len() as u64,
                limit: self.config.max_source_bytes,
            });
        }

        // The recorded hash is always the remote original's; when the
        // listing does not report one, digest the download.
        let source_hash = match &file.content_hash {
            Some(hash) => hash.clone(),
            None => blake3::hash(&bytes).to_hex().to_string(),
        };

        if cause == Some(ReprocessCause::HashUnavailable)
            && record.content_hash.as_deref() == Some(source_hash.as_str())
        {
            // The probe already confirmed the stored object matches the
            // record, and the download matches it too. Nothing to write.
            debug!("sync: {} unchanged after download-and-compare", file.name);
            return Ok(false);
        }

        record.original_size = Some(bytes.len() as u64);

        let output = self.run_transform(bytes, &file.content_type).await;

        let key = self
            .target
            .key_for(owner, &file.remote_id, &file.name, &output.content_type);
        let meta = ObjectMeta {
            remote_id: file.remote_id.clone(),
            content_hash: source_hash.clone(),
            synced_at: Some(Utc::now()),
            size: Some(output.bytes.len() as u64),
        };

        let stored_size = output.bytes.len() as u64;
        let write = self.target.put(&key, output.bytes, &output.content_type, &meta);
        match timeout(Duration::from_secs(self.config.write_timeout_secs), write).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(FileError::TargetWrite(err)),
            Err(_) => {
                return Err(FileError::TargetWrite(anyhow::anyhow!(
                    "timed out after {}s",
                    self.config.write_timeout_secs
                )));
            }
        }
        info!("sync: stored {} as {}", file.name, key);

        // A rename or format change moves the key; drop the stale object.
        if let Some(old_key) = record.target_key.take() {
            if old_key != key {
                self.target.delete_quiet(&old_key).await;
            }
        }

        record.content_hash = Some(source_hash);
        record.stored_size = Some(stored_size);
        record.target_ref = Some(self.target.public_ref(&key));
        record.target_key = Some(key);
        Ok(true)
    }

    async fn download(&self, file: &RemoteFile) -> Result<Bytes, FileError> {
        let fut = self.source.download(&file.remote_id);
        match timeout(Duration::from_secs(self.config.download_timeout_secs), fut).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(err)) => Err(FileError::Download(err)),
            Err(_) => Err(FileError::Download(anyhow::anyhow!(
                "timed out after {}s",
                self.config.download_timeout_secs
            ))),
        }
    }

    /// Image codecs are CPU-bound; keep them off the async runtime.
    async fn run_transform(&self, bytes: Bytes, content_type: &str) -> TransformOutput {
        let config = self.config.transform.clone();
        let content_type_owned = content_type.to_string();
        let original = bytes.clone();
        let task =
            tokio::task::spawn_blocking(move || transform::transform(&config, bytes, &content_type_owned));
        match task.await {
            Ok(output) => output,
            Err(err) => {
                warn!("transform task failed, storing original bytes: {err}");
                TransformOutput {
                    bytes: original,
                    content_type: content_type.to_string(),
                    attempts: 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{RecordingTarget, StaticSource, TestLedger, remote_file};

    struct Fixture {
        reconciler: Reconciler,
        source: Arc<StaticSource>,
        store: Arc<RecordingTarget>,
        ledger: Arc<TestLedger>,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(StaticSource::new());
        let store = Arc::new(RecordingTarget::new());
        let ledger = Arc::new(TestLedger::new());
        let config = SyncConfig {
            target: TargetConfig {
                key_prefix: None,
                public_base_url: "https://cdn.test".to_string(),
            },
            ..SyncConfig::default()
        };
        let reconciler = Reconciler::new(
            source.clone(),
            ledger.clone(),
            store.clone(),
            config,
        );
        Fixture {
            reconciler,
            source,
            store,
            ledger,
        }
    }

    fn owner() -> OwnerKey {
        OwnerKey::new("row-1", "images")
    }

    fn seed_three_files(source: &StaticSource) {
        for (id, name) in [("f-a", "a.jpg"), ("f-b", "b.jpg"), ("f-c", "c.jpg")] {
            let (file, bytes) = remote_file(id, name, "image/jpeg", name.as_bytes());
            source.insert("folder-1", file, bytes);
        }
    }

    #[tokio::test]
    async fn first_pass_stores_every_file() {
        let f = fixture();
        seed_three_files(&f.source);

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.refs.len(), 3);
        assert_eq!(f.store.put_count(), 3);
        assert!(report.refs.iter().all(|r| r.starts_with("https://cdn.test/")));

        let record = f.ledger.get("f-a").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Processed);
        assert!(record.content_hash.is_some());
        assert!(record.target_key.is_some());
    }

    #[tokio::test]
    async fn second_pass_does_no_io_and_returns_same_refs() {
        let f = fixture();
        seed_three_files(&f.source);

        let first = f.reconciler.sync("folder-1", &owner()).await.unwrap();
        let writes_after_first = f.ledger.upsert_count();
        let second = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(second.unchanged, 3);
        assert_eq!(second.processed, 0);
        assert_eq!(second.refs, first.refs);
        assert_eq!(f.store.put_count(), 3);
        assert_eq!(f.source.download_calls(), 3);
        // Unchanged files cause no ledger churn either.
        assert_eq!(f.ledger.upsert_count(), writes_after_first);
    }

    #[tokio::test]
    async fn changed_file_is_the_only_one_reprocessed() {
        let f = fixture();
        seed_three_files(&f.source);
        f.reconciler.sync("folder-1", &owner()).await.unwrap();

        let (file, bytes) = remote_file("f-b", "b.jpg", "image/jpeg", b"b.jpg v2");
        f.source.insert("folder-1", file, bytes);

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.unchanged, 2);
        assert_eq!(f.store.put_count(), 4);
        assert_eq!(f.source.download_calls(), 4);

        let record = f.ledger.get("f-b").await.unwrap().unwrap();
        let stored = f.store.bytes(record.target_key.as_deref().unwrap()).unwrap();
        assert_eq!(&stored[..], b"b.jpg v2");
    }

    #[tokio::test]
    async fn deleted_object_is_recreated() {
        let f = fixture();
        seed_three_files(&f.source);
        f.reconciler.sync("folder-1", &owner()).await.unwrap();

        let record = f.ledger.get("f-b").await.unwrap().unwrap();
        f.store.forget(record.target_key.as_deref().unwrap());

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.refs.len(), 3);
        assert!(f.store.bytes(record.target_key.as_deref().unwrap()).is_some());
    }

    #[tokio::test]
    async fn tampered_object_is_overwritten() {
        let f = fixture();
        seed_three_files(&f.source);
        f.reconciler.sync("folder-1", &owner()).await.unwrap();

        let record = f.ledger.get("f-a").await.unwrap().unwrap();
        let key = record.target_key.as_deref().unwrap();
        f.store.tamper_hash(key, "something-else");

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report.processed, 1);
        let meta = f.store.meta(key).unwrap();
        assert_eq!(Some(meta.content_hash), f.ledger.get("f-a").await.unwrap().unwrap().content_hash);
    }

    #[tokio::test]
    async fn empty_folder_touches_nothing() {
        let f = fixture();
        let (file, bytes) = remote_file("doc-1", "notes.pdf", "application/pdf", b"pdf");
        f.source.insert("folder-1", file, bytes);

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report, SyncReport::default());
        assert_eq!(f.store.put_count(), 0);
        assert!(f.ledger.is_empty());
    }

    #[tokio::test]
    async fn failing_download_is_isolated() {
        let f = fixture();
        seed_three_files(&f.source);
        f.source.set_fail_download("f-b", true);

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.refs.len(), 2);

        let record = f.ledger.get("f-b").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Failed);
        assert!(record.last_error.as_deref().unwrap().contains("download failed"));
    }

    #[tokio::test]
    async fn failed_file_recovers_on_retry() {
        let f = fixture();
        seed_three_files(&f.source);
        f.source.set_fail_download("f-b", true);
        f.reconciler.sync("folder-1", &owner()).await.unwrap();

        f.source.set_fail_download("f-b", false);
        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.refs.len(), 3);
        assert_eq!(
            f.ledger.get("f-b").await.unwrap().unwrap().status,
            SyncStatus::Processed
        );
    }

    #[tokio::test]
    async fn failed_record_with_intact_artifact_is_promoted_without_io() {
        let f = fixture();
        seed_three_files(&f.source);
        f.reconciler.sync("folder-1", &owner()).await.unwrap();
        let downloads = f.source.download_calls();

        // Fail the record out of band; artifact and hash stay intact.
        let mut record = f.ledger.get("f-b").await.unwrap().unwrap();
        record.status = SyncStatus::Failed;
        record.last_error = Some("interrupted".to_string());
        f.ledger.upsert(record).await.unwrap();

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report.recovered, 1);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.refs.len(), 3);
        assert_eq!(f.source.download_calls(), downloads);
        assert_eq!(f.store.put_count(), 3);

        let record = f.ledger.get("f-b").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Processed);
        assert!(record.last_error.is_none());
    }

    #[tokio::test]
    async fn failed_record_with_changed_remote_is_reprocessed() {
        let f = fixture();
        seed_three_files(&f.source);
        f.reconciler.sync("folder-1", &owner()).await.unwrap();

        let mut record = f.ledger.get("f-b").await.unwrap().unwrap();
        record.status = SyncStatus::Failed;
        f.ledger.upsert(record).await.unwrap();
        let (file, bytes) = remote_file("f-b", "b.jpg", "image/jpeg", b"b.jpg v2");
        f.source.insert("folder-1", file, bytes);

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report.recovered, 0);
        assert_eq!(report.processed, 1);
        assert_eq!(f.store.put_count(), 4);
    }

    #[tokio::test]
    async fn rename_moves_the_object_and_drops_the_stale_key() {
        let f = fixture();
        seed_three_files(&f.source);
        f.reconciler.sync("folder-1", &owner()).await.unwrap();

        let old_key = f
            .ledger
            .get("f-b")
            .await
            .unwrap()
            .unwrap()
            .target_key
            .unwrap();

        // Rename implies new bytes here so the change is detectable.
        let (file, bytes) = remote_file("f-b", "renamed.jpg", "image/jpeg", b"renamed");
        f.source.insert("folder-1", file, bytes);

        f.reconciler.sync("folder-1", &owner()).await.unwrap();

        let new_key = f
            .ledger
            .get("f-b")
            .await
            .unwrap()
            .unwrap()
            .target_key
            .unwrap();
        assert_ne!(new_key, old_key);
        assert!(f.store.bytes(&old_key).is_none());
        assert!(f.store.bytes(&new_key).is_some());
    }

    #[tokio::test]
    async fn source_without_hashes_downloads_but_skips_upload() {
        let f = fixture();
        for (id, name) in [("f-a", "a.jpg"), ("f-b", "b.jpg")] {
            let (mut file, bytes) = remote_file(id, name, "image/jpeg", name.as_bytes());
            file.content_hash = None;
            f.source.insert("folder-1", file, bytes);
        }

        let first = f.reconciler.sync("folder-1", &owner()).await.unwrap();
        assert_eq!(first.processed, 2);

        let second = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(second.unchanged, 2);
        assert_eq!(second.processed, 0);
        assert_eq!(second.refs, first.refs);
        // Without a listing hash every pass must download to compare.
        assert_eq!(f.source.download_calls(), 4);
        assert_eq!(f.store.put_count(), 2);
    }

    #[tokio::test]
    async fn oversized_file_fails_without_download() {
        let f = fixture();
        let (mut file, bytes) = remote_file("f-big", "big.jpg", "image/jpeg", b"tiny");
        file.size_bytes = Some(200 * MIB);
        f.source.insert("folder-1", file, bytes);

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(f.source.download_calls(), 0);
        assert_eq!(f.store.put_count(), 0);

        let record = f.ledger.get("f-big").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Failed);
        assert!(record.last_error.as_deref().unwrap().contains("limit"));
    }

    #[tokio::test]
    async fn failing_writes_fail_files_then_retry_converges() {
        let f = fixture();
        seed_three_files(&f.source);
        f.store.set_fail_puts(true);

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();
        assert_eq!(report.failed, 3);
        assert!(report.refs.is_empty());

        f.store.set_fail_puts(false);
        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.refs.len(), 3);
    }

    #[tokio::test]
    async fn refs_are_ordered_by_name() {
        let f = fixture();
        for (id, name) in [("f-3", "zebra.jpg"), ("f-1", "apple.jpg"), ("f-2", "mango.jpg")] {
            let (file, bytes) = remote_file(id, name, "image/jpeg", name.as_bytes());
            f.source.insert("folder-1", file, bytes);
        }

        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        let names: Vec<&str> = report
            .refs
            .iter()
            .map(|r| r.rsplit('/').next().unwrap())
            .collect();
        assert!(names[0].starts_with("apple"));
        assert!(names[1].starts_with("mango"));
        assert!(names[2].starts_with("zebra"));
    }

    #[tokio::test]
    async fn delisted_file_drops_out_of_refs_but_keeps_its_record() {
        let f = fixture();
        seed_three_files(&f.source);
        f.reconciler.sync("folder-1", &owner()).await.unwrap();

        f.source.remove("folder-1", "f-b");
        let report = f.reconciler.sync("folder-1", &owner()).await.unwrap();

        assert_eq!(report.refs.len(), 2);
        assert_eq!(report.unchanged, 2);
        assert_eq!(f.source.list_calls(), 2);
        // The record and its object linger until the owner is evicted.
        assert!(f.ledger.get("f-b").await.unwrap().is_some());
        assert_eq!(f.reconciler.evict_owner(&owner()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn invalid_reference_aborts() {
        let f = fixture();
        let err = f.reconciler.sync("not a ref", &owner()).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn unavailable_listing_aborts() {
        let f = fixture();
        f.source.set_fail_listing(true);
        let err = f.reconciler.sync("folder-1", &owner()).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn failing_ledger_aborts() {
        let f = fixture();
        seed_three_files(&f.source);
        f.ledger.set_fail_writes(true);
        let err = f.reconciler.sync("folder-1", &owner()).await.unwrap_err();
        assert!(matches!(err, SyncError::Ledger(_)));
    }

    #[tokio::test]
    async fn eviction_removes_records_and_objects() {
        let f = fixture();
        seed_three_files(&f.source);
        f.reconciler.sync("folder-1", &owner()).await.unwrap();

        let evicted = f.reconciler.evict_owner(&owner()).await.unwrap();

        assert_eq!(evicted, 3);
        assert!(f.ledger.is_empty());
        assert!(f.store.is_empty());
        assert_eq!(f.store.delete_count(), 3);

        // Idempotent: nothing left to evict.
        assert_eq!(f.reconciler.evict_owner(&owner()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn eviction_leaves_other_owners_alone() {
        let f = fixture();
        seed_three_files(&f.source);
        let (file, bytes) = remote_file("f-x", "x.jpg", "image/jpeg", b"x.jpg");
        f.source.insert("folder-2", file, bytes);

        let other = OwnerKey::new("row-2", "images");
        f.reconciler.sync("folder-1", &owner()).await.unwrap();
        f.reconciler.sync("folder-2", &other).await.unwrap();

        let evicted = f.reconciler.evict_owner(&owner()).await.unwrap();

        assert_eq!(evicted, 3);
        assert_eq!(f.ledger.len(), 1);
        assert_eq!(f.store.keys().len(), 1);
        assert!(f.store.keys()[0].starts_with("row-2/"));
    }

    #[tokio::test]
    async fn owner_change_migrates_artifacts() {
        let f = fixture();
        seed_three_files(&f.source);
        f.reconciler.sync("folder-1", &owner()).await.unwrap();

        // The same folder is now claimed by a different row.
        let other = OwnerKey::new("row-2", "images");
        let report = f.reconciler.sync("folder-1", &other).await.unwrap();

        assert_eq!(report.processed, 3);
        assert!(f.store.keys().iter().all(|k| k.starts_with("row-2/")));
        for id in ["f-a", "f-b", "f-c"] {
            assert_eq!(f.ledger.get(id).await.unwrap().unwrap().owner, other);
        }
        // The old owner has nothing left to evict.
        assert_eq!(f.reconciler.evict_owner(&owner()).await.unwrap(), 0);
    }
}
