//! Wires the reconciliation engine to a row store, a remote file source
//! and a target store backend, and drives it from webhooks, a periodic
//! sweep and the CLI.

use std::sync::Arc;

use picsync_core::ledger::Ledger;
use picsync_core::reconcile::Reconciler;
use picsync_core::record::OwnerKey;
use picsync_core::target::TargetStore;
use picsync_ledger_memory::MemoryLedger;
use picsync_ledger_redb::RedbLedger;
use picsync_source_http::HttpSource;
use picsync_store_local::LocalStore;
use picsync_store_memory::MemoryStore;
use picsync_store_s3::S3Store;

use crate::config::{LedgerConfig, ServiceConfig, TargetStoreConfig, WatchConfig};
use crate::rows::{Row, RowStoreClient};

pub mod config;
pub mod rows;
pub mod sweep;
pub mod webhook;

pub fn create_target_store(config: TargetStoreConfig) -> Arc<dyn TargetStore> {
    match config {
        TargetStoreConfig::Memory => Arc::new(MemoryStore::new()),
        TargetStoreConfig::Local(config) => Arc::new(LocalStore::create(config)),
        TargetStoreConfig::S3(config) => Arc::new(S3Store::create(config)),
    }
}

pub fn create_ledger(config: LedgerConfig) -> anyhow::Result<Arc<dyn Ledger>> {
    Ok(match config {
        LedgerConfig::Memory => Arc::new(MemoryLedger::new()),
        LedgerConfig::Redb { path } => Arc::new(RedbLedger::open(path)?),
    })
}

pub struct PicsyncService {
    config: Arc<ServiceConfig>,
    reconciler: Arc<Reconciler>,
    rows: RowStoreClient,
    ledger: Arc<dyn Ledger>,
}

impl PicsyncService {
    pub fn create(config: ServiceConfig) -> anyhow::Result<Arc<Self>> {
        let source = Arc::new(HttpSource::create(config.source.clone()));
        let ledger = create_ledger(config.ledger.clone())?;
        let store = create_target_store(config.target.clone());
        let reconciler = Arc::new(Reconciler::new(
            source,
            ledger.clone(),
            store,
            config.sync.clone(),
        ));
        let rows = RowStoreClient::create(config.rows.clone());

        Ok(Arc::new(Self {
            config: Arc::new(config),
            reconciler,
            rows,
            ledger,
        }))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn rows(&self) -> &RowStoreClient {
        &self.rows
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Syncs one watched cell of one row and writes the ref list back to
    /// the row's refs column.
    ///
    /// A blank cell evicts instead; clearing the folder reference is how
    /// a row stops owning images.
    pub async fn sync_row(&self, watch: &WatchConfig, row: &Row) -> anyhow::Result<()> {
        let owner = OwnerKey::new(row.id.clone(), watch.column.clone());

        let Some(folder_ref) = row.text_cell(&watch.column) else {
            let evicted = self.reconciler.evict_owner(&owner).await?;
            if evicted > 0 {
                tracing::info!(
                    row = %row.id,
                    column = %watch.column,
                    evicted,
                    "folder reference cleared, artifacts evicted"
                );
                self.rows
                    .update_scalar(
                        &watch.table,
                        &row.id,
                        &watch.refs_column(),
                        serde_json::Value::String("[]".to_string()),
                    )
                    .await?;
            }
            return Ok(());
        };

        let report = self.reconciler.sync(folder_ref, &owner).await?;
        let refs_json = serde_json::to_string(&report.refs)?;
        self.rows
            .update_scalar(
                &watch.table,
                &row.id,
                &watch.refs_column(),
                serde_json::Value::String(refs_json),
            )
            .await?;

        tracing::info!(
            row = %row.id,
            column = %watch.column,
            processed = report.processed,
            unchanged = report.unchanged,
            recovered = report.recovered,
            failed = report.failed,
            "row synced"
        );
        Ok(())
    }

    /// Syncs every watched column of one row, identified by table and id.
    ///
    /// One failing column does not block the others.
    pub async fn sync_row_by_id(&self, table: &str, row_id: &str) -> anyhow::Result<()> {
        let watches: Vec<&WatchConfig> = self
            .config
            .watch
            .iter()
            .filter(|watch| watch.table == table)
            .collect();
        if watches.is_empty() {
            tracing::debug!(table, "ignoring event for unwatched table");
            return Ok(());
        }

        let Some(row) = self.rows.get_row(table, row_id).await? else {
            tracing::warn!(table, row = row_id, "row not found, skipping sync");
            return Ok(());
        };

        for watch in watches {
            if let Err(e) = self.sync_row(watch, &row).await {
                tracing::warn!(
                    table,
                    row = row_id,
                    column = %watch.column,
                    "row sync failed: {e:#}"
                );
            }
        }
        Ok(())
    }

    /// Drops all artifacts owned by a row, across every watched column.
    pub async fn evict_row(&self, table: &str, row_id: &str) -> anyhow::Result<usize> {
        let mut total = 0;
        for watch in self.config.watch.iter().filter(|w| w.table == table) {
            let owner = OwnerKey::new(row_id, watch.column.clone());
            total += self.reconciler.evict_owner(&owner).await?;
        }
        if total > 0 {
            tracing::info!(table, row = row_id, evicted = total, "row evicted");
        }
        Ok(total)
    }

    /// Creates the refs column for every watch that is missing it.
    pub async fn provision(&self) -> anyhow::Result<()> {
        for watch in &self.config.watch {
            self.rows
                .ensure_field(&watch.table, &watch.refs_column())
                .await?;
        }
        Ok(())
    }

    /// Runs one full sweep over every watched row.
    pub async fn sweep(self: &Arc<Self>) -> anyhow::Result<sweep::SweepSummary> {
        sweep::run(self).await
    }
}

/// Creates the service from config, provisions the row store and serves
/// webhooks plus the periodic sweep until Ctrl-C.
pub async fn run_service(config: ServiceConfig) -> anyhow::Result<()> {
    let service = PicsyncService::create(config)?;
    service.provision().await?;

    let sweeper = tokio::spawn(sweep::run_loop(service.clone()));
    let server = tokio::spawn(webhook::serve(service.clone()));

    tokio::signal::ctrl_c().await?;

    println!("Shutting down.");
    sweeper.abort();
    server.abort();

    Ok(())
}

#[cfg(test)]
pub(crate) fn memory_test_config() -> ServiceConfig {
    use crate::config::{RowStoreConfig, ServerConfig};
    use picsync_source_http::HttpSourceConfig;

    ServiceConfig {
        source: HttpSourceConfig {
            base_url: "https://drive.test/api".to_string(),
            token: None,
            page_size: 200,
        },
        rows: RowStoreConfig {
            base_url: "https://rows.test/api".to_string(),
            token: None,
        },
        ledger: LedgerConfig::Memory,
        target: TargetStoreConfig::Memory,
        sync: Default::default(),
        server: ServerConfig::default(),
        watch: Vec::new(),
    }
}
