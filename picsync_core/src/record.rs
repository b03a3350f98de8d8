use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The entity/attribute pair an artifact belongs to.
///
/// Every sync record and every target key is partitioned by owner, so one
/// owner can be evicted without touching anything else. In the row-store
/// setup the entity id is the row id and the attribute is the watched
/// column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    pub entity_id: String,
    pub attribute: String,
}

impl OwnerKey {
    pub fn new(entity_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute: attribute.into(),
        }
    }
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.attribute)
    }
}

/// Lifecycle state of a sync record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Record created, processing has not completed yet.
    Pending,
    /// Artifact written and verified present in the target store.
    Processed,
    /// The last attempt failed; `last_error` says why.
    Failed,
}

/// Durable mapping between one remote file and its stored artifact.
///
/// At most one record exists per `remote_id`. Records are created on first
/// sighting, updated in place on every later pass and removed only by owner
/// eviction. A `Failed` record keeps its previous `target_key`,
/// `target_ref` and `content_hash`: a later pass can still recover the
/// artifact they describe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Stable id of the file at the source.
    pub remote_id: String,
    /// Folder the file was listed in during the last pass.
    pub remote_folder_id: String,
    pub owner: OwnerKey,
    /// Display name at the source during the last pass.
    pub file_name: String,
    pub status: SyncStatus,
    /// Content hash of the remote original this record was last synced
    /// against. Never the hash of the transformed bytes.
    pub content_hash: Option<String>,
    /// Key of the stored artifact inside the target store.
    pub target_key: Option<String>,
    /// Public reference handed back to callers.
    pub target_ref: Option<String>,
    pub original_size: Option<u64>,
    pub stored_size: Option<u64>,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}
