use anyhow::anyhow;
use bytes::Bytes;
use picsync_core::target::{ObjectMeta, TargetResult, TargetStore};
use std::path::PathBuf;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalStoreConfig {
    pub base_path: String,
}

/// Target store that writes objects to a local directory.
///
/// Object metadata lives in a JSON sidecar under `.meta/`, mirroring the
/// object's key, so `head` can answer hash probes without extended
/// attributes.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

/// Sidecar file layout. The content type rides along with the metadata so
/// anything serving these files does not have to guess from the extension.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Sidecar {
    content_type: String,
    #[serde(flatten)]
    meta: ObjectMeta,
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalStore {
            base_path: base_path.into(),
        }
    }

    pub fn create(config: LocalStoreConfig) -> Self {
        LocalStore {
            base_path: config.base_path.into(),
        }
    }

    fn resolve(&self, key: &str) -> TargetResult<(PathBuf, PathBuf)> {
        if key.contains("..") || key.starts_with('/') {
            return Err(anyhow!(
                "Invalid key: '{}'. Must be a relative path without '..'.",
                key
            ));
        }
        let data_path = self.base_path.join(key);
        let meta_path = self.base_path.join(".meta").join(format!("{key}.json"));
        Ok((data_path, meta_path))
    }
}

#[async_trait::async_trait]
impl TargetStore for LocalStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        meta: &ObjectMeta,
    ) -> TargetResult<()> {
        let (data_path, meta_path) = self.resolve(key)?;
        if let Some(parent) = data_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Some(parent) = meta_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&data_path, &bytes).await?;
        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            meta: meta.clone(),
        };
        tokio::fs::write(&meta_path, serde_json::to_vec_pretty(&sidecar)?).await?;
        Ok(())
    }

    async fn head(&self, key: &str) -> TargetResult<Option<ObjectMeta>> {
        let (data_path, meta_path) = self.resolve(key)?;
        if !tokio::fs::try_exists(&data_path).await? {
            return Ok(None);
        }
        // An object without its sidecar cannot be verified; report it as
        // absent so the caller rewrites it.
        match tokio::fs::read(&meta_path).await {
            Ok(raw) => {
                let sidecar: Sidecar = serde_json::from_slice(&raw)?;
                Ok(Some(sidecar.meta))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> TargetResult<()> {
        let (data_path, meta_path) = self.resolve(key)?;
        for path in [data_path, meta_path] {
            match tokio::fs::metadata(&path).await {
                Ok(_metadata) => {
                    tokio::fs::remove_file(&path).await?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
