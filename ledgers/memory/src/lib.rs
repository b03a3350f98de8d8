//! In-memory `Ledger` implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use picsync_core::ledger::{Ledger, LedgerResult};
use picsync_core::record::{OwnerKey, SyncRecord};

/// In-memory ledger, useful for tests and ephemeral runs.
///
/// Nothing survives a restart; every file will count as fresh again.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<String, SyncRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Ledger for MemoryLedger {
    async fn get(&self, remote_id: &str) -> LedgerResult<Option<SyncRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.get(remote_id).cloned())
    }

    async fn upsert(&self, record: SyncRecord) -> LedgerResult<()> {
        let mut records = self.records.write().unwrap();
        records.insert(record.remote_id.clone(), record);
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &OwnerKey) -> LedgerResult<Vec<String>> {
        let mut records = self.records.write().unwrap();
        let ids: Vec<String> = records
            .values()
            .filter(|record| record.owner == *owner)
            .map(|record| record.remote_id.clone())
            .collect();

        let mut target_keys = Vec::new();
        for id in ids {
            if let Some(record) = records.remove(&id) {
                if let Some(key) = record.target_key {
                    target_keys.push(key);
                }
            }
        }
        Ok(target_keys)
    }

    async fn get_by_target_key(&self, target_key: &str) -> LedgerResult<Option<SyncRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .values()
            .find(|record| record.target_key.as_deref() == Some(target_key))
            .cloned())
    }

    async fn list_by_owner(&self, owner: &OwnerKey) -> LedgerResult<Vec<SyncRecord>> {
        let records = self.records.read().unwrap();
        let mut matching: Vec<SyncRecord> = records
            .values()
            .filter(|record| record.owner == *owner)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        Ok(matching)
    }
}
