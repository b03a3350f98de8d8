//! RedbLedger - a durable sync ledger backed by redb.

use std::{path::Path, sync::Arc};

use picsync_core::ledger::{Ledger, LedgerResult};
use picsync_core::record::{OwnerKey, SyncRecord};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

/// Primary table: remote id to postcard-encoded record.
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_records");
/// Owner index: (entity, attribute, remote id) to nothing. Range scans over
/// the first two components drive eviction and listing.
const OWNER_INDEX: TableDefinition<(&str, &str, &str), ()> = TableDefinition::new("owner_index");
/// Reverse index: target key to remote id.
const KEY_INDEX: TableDefinition<&str, &str> = TableDefinition::new("target_key_index");

/// `Ledger` implementation backed by a redb database.
///
/// All three tables are kept consistent inside a single write transaction,
/// so an upsert that moves a record to another owner or target key never
/// leaves a dangling index entry behind.
#[derive(Clone)]
pub struct RedbLedger {
    db: Arc<Database>,
}

impl RedbLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let db = Database::create(path.join("ledger.redb"))?;

        // Ensure all tables exist before returning so the first access on
        // a fresh database can be a read.
        {
            let write_txn = db.begin_write()?;
            {
                // `open_table` on a write transaction creates the table
                // if it does not already exist.
                let _ = write_txn.open_table(RECORDS)?;
                let _ = write_txn.open_table(OWNER_INDEX)?;
                let _ = write_txn.open_table(KEY_INDEX)?;
            }
            write_txn.commit()?;
        }

        Ok(Self { db: Arc::new(db) })
    }
}

impl std::fmt::Debug for RedbLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbLedger").finish()
    }
}

fn encode(record: &SyncRecord) -> anyhow::Result<Vec<u8>> {
    Ok(postcard::to_stdvec(record)?)
}

fn decode(bytes: &[u8]) -> anyhow::Result<SyncRecord> {
    Ok(postcard::from_bytes(bytes)?)
}

#[async_trait::async_trait]
impl Ledger for RedbLedger {
    async fn get(&self, remote_id: &str) -> LedgerResult<Option<SyncRecord>> {
        let db = self.db.clone();
        let remote_id = remote_id.to_string();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<SyncRecord>> {
            let read_txn = db.begin_read()?;
            let records = read_txn.open_table(RECORDS)?;

            let maybe_record = records
                .get(remote_id.as_str())?
                .map(|guard| decode(guard.value()))
                .transpose()?;
            Ok(maybe_record)
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb read task failed: {}", e))?
    }

    async fn upsert(&self, record: SyncRecord) -> LedgerResult<()> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let write_txn = db.begin_write()?;
            {
                let mut records = write_txn.open_table(RECORDS)?;
                let mut owner_index = write_txn.open_table(OWNER_INDEX)?;
                let mut key_index = write_txn.open_table(KEY_INDEX)?;

                let remote_id = record.remote_id.as_str();

                // The previous version may point at another owner or
                // target key; drop its index entries first.
                let previous = records
                    .get(remote_id)?
                    .map(|guard| decode(guard.value()))
                    .transpose()?;
                if let Some(previous) = previous {
                    owner_index.remove((
                        previous.owner.entity_id.as_str(),
                        previous.owner.attribute.as_str(),
                        remote_id,
                    ))?;
                    if let Some(key) = &previous.target_key {
                        key_index.remove(key.as_str())?;
                    }
                }

                records.insert(remote_id, encode(&record)?.as_slice())?;
                owner_index.insert(
                    (
                        record.owner.entity_id.as_str(),
                        record.owner.attribute.as_str(),
                        remote_id,
                    ),
                    (),
                )?;
                if let Some(key) = &record.target_key {
                    key_index.insert(key.as_str(), remote_id)?;
                }
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb write task failed: {}", e))?
    }

    async fn delete_by_owner(&self, owner: &OwnerKey) -> LedgerResult<Vec<String>> {
        let db = self.db.clone();
        let owner = owner.clone();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<String>> {
            let write_txn = db.begin_write()?;
            let target_keys = {
                let mut records = write_txn.open_table(RECORDS)?;
                let mut owner_index = write_txn.open_table(OWNER_INDEX)?;
                let mut key_index = write_txn.open_table(KEY_INDEX)?;

                let entity = owner.entity_id.as_str();
                let attribute = owner.attribute.as_str();

                // Collect ids first so the scan borrow ends before any
                // removal starts.
                let mut remote_ids = Vec::new();
                {
                    for item in owner_index.range((entity, attribute, "")..)? {
                        let (key_guard, _) = item?;
                        let (e, a, remote_id) = key_guard.value();
                        if e != entity || a != attribute {
                            break;
                        }
                        remote_ids.push(remote_id.to_string());
                    }
                }

                let mut target_keys = Vec::new();
                for remote_id in &remote_ids {
                    owner_index.remove((entity, attribute, remote_id.as_str()))?;
                    let removed = records
                        .remove(remote_id.as_str())?
                        .map(|guard| decode(guard.value()))
                        .transpose()?;
                    if let Some(record) = removed {
                        if let Some(key) = record.target_key {
                            key_index.remove(key.as_str())?;
                            target_keys.push(key);
                        }
                    }
                }
                target_keys
            };
            write_txn.commit()?;
            Ok(target_keys)
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb delete task failed: {}", e))?
    }

    async fn get_by_target_key(&self, target_key: &str) -> LedgerResult<Option<SyncRecord>> {
        let db = self.db.clone();
        let target_key = target_key.to_string();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<SyncRecord>> {
            let read_txn = db.begin_read()?;
            let key_index = read_txn.open_table(KEY_INDEX)?;
            let records = read_txn.open_table(RECORDS)?;

            let remote_id = match key_index.get(target_key.as_str())? {
                Some(guard) => guard.value().to_string(),
                None => return Ok(None),
            };

            let maybe_record = records
                .get(remote_id.as_str())?
                .map(|guard| decode(guard.value()))
                .transpose()?;
            Ok(maybe_record)
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb read task failed: {}", e))?
    }

    async fn list_by_owner(&self, owner: &OwnerKey) -> LedgerResult<Vec<SyncRecord>> {
        let db = self.db.clone();
        let owner = owner.clone();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<SyncRecord>> {
            let read_txn = db.begin_read()?;
            let owner_index = read_txn.open_table(OWNER_INDEX)?;
            let records = read_txn.open_table(RECORDS)?;

            let entity = owner.entity_id.as_str();
            let attribute = owner.attribute.as_str();

            let mut matching = Vec::new();
            for item in owner_index.range((entity, attribute, "")..)? {
                let (key_guard, _) = item?;
                let (e, a, remote_id) = key_guard.value();
                if e != entity || a != attribute {
                    break;
                }
                if let Some(guard) = records.get(remote_id)? {
                    matching.push(decode(guard.value())?);
                }
            }
            Ok(matching)
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb read task failed: {}", e))?
    }
}
