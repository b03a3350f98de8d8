use tracing::warn;

use crate::record::{OwnerKey, SyncRecord, SyncStatus};
use crate::remote::RemoteFile;
use crate::target::{ObjectMeta, TargetWriter};

/// Why a file has to be fetched and written again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprocessCause {
    /// The remote content hash differs from the recorded one.
    RemoteChanged,
    /// The record belongs to a different owner than the current sync; the
    /// artifact has to move to the new owner's key space.
    OwnerChanged,
    /// A processed record has no target key to verify.
    MissingTargetKey,
    /// The recorded target object is gone.
    MissingObject,
    /// The stored object's metadata no longer matches the record.
    ObjectMutated,
    /// The listing reported no content hash; only a download can tell
    /// whether anything changed.
    HashUnavailable,
    /// The previous attempt failed and nothing recoverable remains.
    RetryFailed,
}

/// Outcome of comparing a ledger record, a fresh listing entry and the
/// actual state of the target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Never seen before.
    Fresh,
    /// Record and stored object both agree with the listing. Reuse the
    /// recorded ref, no I/O needed.
    Unchanged,
    /// A failed record turned out to have an intact, current artifact.
    /// Promote it instead of downloading again.
    Recovered,
    /// Fetch, transform and write again.
    Reprocess(ReprocessCause),
}

/// Pure decision function of the drift detector.
///
/// `probe` is the result of heading the record's target key, `None` either
/// because the record has no key or because the object is absent.
///
/// The rules, in order:
/// 1. no record: fresh
/// 2. record owned by someone else: reprocess (artifact must move)
/// 3. processed without target key: reprocess (inconsistent record)
/// 4. processed, object missing: reprocess (deleted out of band)
/// 5. processed, object hash differs from record: reprocess (mutated out of band)
/// 6. processed, object intact, remote hash differs: reprocess (remote changed)
/// 7. processed, object intact, remote hash equal: unchanged
/// 8. failed or pending: recover only an intact artifact that still
///    matches the remote, otherwise reprocess
pub fn classify(
    owner: &OwnerKey,
    record: Option<&SyncRecord>,
    remote: &RemoteFile,
    probe: Option<&ObjectMeta>,
) -> SyncDecision {
    let Some(record) = record else {
        return SyncDecision::Fresh;
    };

    if record.owner != *owner {
        return SyncDecision::Reprocess(ReprocessCause::OwnerChanged);
    }

    match record.status {
        SyncStatus::Processed => {
            if record.target_key.is_none() {
                return SyncDecision::Reprocess(ReprocessCause::MissingTargetKey);
            }
            let Some(probe) = probe else {
                return SyncDecision::Reprocess(ReprocessCause::MissingObject);
            };
            if record.content_hash.as_deref() != Some(probe.content_hash.as_str()) {
                return SyncDecision::Reprocess(ReprocessCause::ObjectMutated);
            }
            match (&record.content_hash, &remote.content_hash) {
                (Some(recorded), Some(current)) if recorded == current => SyncDecision::Unchanged,
                (Some(_), Some(_)) => SyncDecision::Reprocess(ReprocessCause::RemoteChanged),
                _ => SyncDecision::Reprocess(ReprocessCause::HashUnavailable),
            }
        }
        SyncStatus::Failed | SyncStatus::Pending => {
            let (Some(_), Some(recorded)) = (&record.target_key, &record.content_hash) else {
                return SyncDecision::Reprocess(ReprocessCause::RetryFailed);
            };
            let Some(probe) = probe else {
                return SyncDecision::Reprocess(ReprocessCause::RetryFailed);
            };
            if probe.content_hash != *recorded {
                return SyncDecision::Reprocess(ReprocessCause::RetryFailed);
            }
            // The stored artifact is intact. It may still be stale, so it
            // only counts as recovered while the remote hash matches.
            match &remote.content_hash {
                Some(current) if current == recorded => SyncDecision::Recovered,
                Some(_) => SyncDecision::Reprocess(ReprocessCause::RemoteChanged),
                None => SyncDecision::Reprocess(ReprocessCause::HashUnavailable),
            }
        }
    }
}

/// Evaluate [`classify`] against live store state.
///
/// Probes the target store only when the record names a target key. A
/// failing probe is logged and treated as an absent object; reprocessing is
/// the safe direction.
pub async fn assess(
    target: &TargetWriter,
    owner: &OwnerKey,
    record: Option<&SyncRecord>,
    remote: &RemoteFile,
) -> SyncDecision {
    let probe = match record.and_then(|r| r.target_key.as_deref()) {
        Some(key) => match target.head(key).await {
            Ok(meta) => meta,
            Err(err) => {
                warn!("drift: head probe for {key} failed, treating object as missing: {err}");
                None
            }
        },
        None => None,
    };
    classify(owner, record, remote, probe.as_ref())
}
