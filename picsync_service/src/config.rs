use picsync_core::reconcile::SyncConfig;
use picsync_source_http::HttpSourceConfig;
use picsync_store_local::LocalStoreConfig;
use picsync_store_s3::S3StoreConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub source: HttpSourceConfig,
    pub rows: RowStoreConfig,
    pub ledger: LedgerConfig,
    pub target: TargetStoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub watch: Vec<WatchConfig>,
}

/// Connection to the row store whose cells reference remote folders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowStoreConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum LedgerConfig {
    Memory,
    Redb { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum TargetStoreConfig {
    Memory,
    Local(LocalStoreConfig),
    S3(S3StoreConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Key for the webhook body MAC. Unauthenticated when unset.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Period of the full sweep. Zero disables the timer.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Rows synced concurrently during a sweep.
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            webhook_secret: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_concurrency: default_sweep_concurrency(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8087".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_sweep_concurrency() -> usize {
    4
}

/// One watched table column holding remote folder references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub refs_column: Option<String>,
}

impl WatchConfig {
    /// Column that receives the JSON ref list after a sync.
    pub fn refs_column(&self) -> String {
        self.refs_column
            .clone()
            .unwrap_or_else(|| format!("{}_refs", self.column))
    }
}
