//! Core types and the reconciliation engine for picsync.
//!
//! This crate defines the domain model (remote files, sync records, owner
//! keys), the traits every backend implements ([`Ledger`], [`TargetStore`],
//! [`RemoteSource`]) and the [`Reconciler`] that ties them together: it
//! compares remote folder listings against the ledger and the actual state
//! of the target store, downloads and shrinks what changed and repairs what
//! drifted.
//!
//! Backends live in their own crates (`picsync_ledger_redb`,
//! `picsync_store_s3` and friends); this crate only knows the traits.

pub mod drift;
pub mod ledger;
pub mod reconcile;
pub mod record;
pub mod remote;
pub mod target;
pub mod transform;

// Test utilities (behind feature flag)
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

// --- Core Public Surface ---

pub use drift::{ReprocessCause, SyncDecision};
pub use ledger::{Ledger, LedgerResult};
pub use reconcile::{FileError, Reconciler, SyncConfig, SyncError, SyncReport};
pub use record::{OwnerKey, SyncRecord, SyncStatus};
pub use remote::{FolderId, FolderRefError, RemoteFile, RemoteSource, SourceResult};
pub use target::{ObjectMeta, TargetConfig, TargetResult, TargetStore, TargetWriter};
pub use transform::{SizeTier, TransformConfig, TransformOutput};
