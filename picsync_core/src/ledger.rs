use async_trait::async_trait;

use crate::record::{OwnerKey, SyncRecord};

pub type LedgerResult<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Durable store for [`SyncRecord`]s, keyed by remote file id.
///
/// Implementations must apply [`upsert`](Ledger::upsert) atomically per
/// record, including whatever indexes they keep for the owner and target
/// key lookups. Ordering across records is not required.
#[async_trait]
pub trait Ledger: std::fmt::Debug + Send + Sync {
    /// Look up the record for a remote file.
    ///
    /// # Arguments
    ///
    /// * `remote_id` - Stable id of the file at the source
    ///
    /// # Returns
    ///
    /// The record, or `None` if the file has never been seen.
    async fn get(&self, remote_id: &str) -> LedgerResult<Option<SyncRecord>>;

    /// Insert or fully replace the record for `record.remote_id`.
    async fn upsert(&self, record: SyncRecord) -> LedgerResult<()>;

    /// Delete every record belonging to `owner`.
    ///
    /// # Returns
    ///
    /// The target keys the deleted records pointed at, so the caller can
    /// remove the objects as well.
    async fn delete_by_owner(&self, owner: &OwnerKey) -> LedgerResult<Vec<String>>;

    /// Reverse lookup from a target key to the record that wrote it.
    async fn get_by_target_key(&self, target_key: &str) -> LedgerResult<Option<SyncRecord>>;

    /// All records belonging to `owner`.
    async fn list_by_owner(&self, owner: &OwnerKey) -> LedgerResult<Vec<SyncRecord>>;
}
