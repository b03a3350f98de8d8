use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::record::OwnerKey;

pub type TargetResult<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Metadata stored alongside every object picsync writes.
///
/// The drift detector works from this alone. `content_hash` is the hash of
/// the remote original, not of the stored bytes (which may have been
/// transformed), so it stays comparable with fresh listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub remote_id: String,
    pub content_hash: String,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Write access to the blob store picsync mirrors into.
///
/// Keys are relative slash-separated paths. The trait is deliberately
/// small: the engine only ever writes whole objects, probes their metadata
/// and deletes them.
#[async_trait]
pub trait TargetStore: std::fmt::Debug + Send + Sync {
    /// Store an object under `key`, fully replacing any previous object.
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        meta: &ObjectMeta,
    ) -> TargetResult<()>;

    /// Metadata of the object at `key`.
    ///
    /// # Returns
    ///
    /// `None` when there is no object, or when the object carries no
    /// readable picsync metadata (for example because something else wrote
    /// it).
    async fn head(&self, key: &str) -> TargetResult<Option<ObjectMeta>>;

    /// Delete the object at `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> TargetResult<()>;
}

/// Static configuration for the target writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Optional prefix prepended to every derived key.
    pub key_prefix: Option<String>,
    /// Base URL under which the target store serves its objects. When
    /// empty, refs are the keys themselves.
    pub public_base_url: String,
}

/// High-level write API over a generic [`TargetStore`].
///
/// The writer derives deterministic keys from owner, file name and remote
/// id, so retries and re-syncs overwrite in place instead of accumulating
/// objects, and turns keys into public refs.
#[derive(Debug, Clone)]
pub struct TargetWriter {
    store: Arc<dyn TargetStore>,
    config: TargetConfig,
}

const MAX_STEM_LEN: usize = 64;

impl TargetWriter {
    pub fn new<S>(store: S, config: TargetConfig) -> Self
    where
        S: TargetStore + 'static,
    {
        Self {
            store: Arc::new(store),
            config,
        }
    }

    pub fn new_shared(store: Arc<dyn TargetStore>, config: TargetConfig) -> Self {
        Self { store, config }
    }

    /// Deterministic key for an artifact:
    /// `[prefix/]{entity}/{attribute}/{stem}-{id8}.{ext}`.
    ///
    /// The `id8` component is derived from the remote id, so two files with
    /// the same display name in the same folder never collide.
    pub fn key_for(
        &self,
        owner: &OwnerKey,
        remote_id: &str,
        file_name: &str,
        content_type: &str,
    ) -> String {
        let mut key = String::new();
        if let Some(prefix) = &self.config.key_prefix {
            let prefix = prefix.trim_matches('/');
            if !prefix.is_empty() {
                key.push_str(prefix);
                key.push('/');
            }
        }
        key.push_str(&sanitize_segment(&owner.entity_id));
        key.push('/');
        key.push_str(&sanitize_segment(&owner.attribute));
        key.push('/');
        key.push_str(&sanitize_stem(file_name));
        key.push('-');
        key.push_str(&short_id(remote_id));
        key.push('.');
        key.push_str(extension_for(content_type));
        key
    }

    /// Public reference for a key.
    pub fn public_ref(&self, key: &str) -> String {
        let base = self.config.public_base_url.trim_end_matches('/');
        if base.is_empty() {
            key.to_string()
        } else {
            format!("{base}/{key}")
        }
    }

    pub async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        meta: &ObjectMeta,
    ) -> TargetResult<()> {
        self.store.put(key, bytes, content_type, meta).await
    }

    pub async fn head(&self, key: &str) -> TargetResult<Option<ObjectMeta>> {
        self.store.head(key).await
    }

    /// Delete an object, logging instead of failing when the store errors.
    /// Used where a stale object is merely untidy, not incorrect.
    pub async fn delete_quiet(&self, key: &str) {
        if let Err(err) = self.store.delete(key).await {
            warn!("target: failed to delete object {key}: {err}");
        }
    }
}

/// First 8 hex chars of the blake3 hash of the remote id.
fn short_id(remote_id: &str) -> String {
    let hex = blake3::hash(remote_id.as_bytes()).to_hex();
    hex[..8].to_string()
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/avif" => "avif",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        _ => "bin",
    }
}

/// Lowercase `input` and replace runs of anything outside `[a-z0-9_-]`
/// (plus `.` when allowed) with a single dash.
fn sanitize_chars(input: &str, allow_dot: bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut gap = false;
    for c in input.chars() {
        let c = c.to_ascii_lowercase();
        let keep =
            c.is_ascii_alphanumeric() || c == '_' || c == '-' || (allow_dot && c == '.');
        if keep {
            out.push(c);
            gap = false;
        } else if !gap && !out.is_empty() {
            out.push('-');
            gap = true;
        }
    }
    out.trim_matches(|c| c == '-' || c == '.').to_string()
}

fn sanitize_segment(input: &str) -> String {
    let out = sanitize_chars(input, false);
    if out.is_empty() { "unknown".to_string() } else { out }
}

fn sanitize_stem(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    let mut out = sanitize_chars(stem, true);
    out.truncate(MAX_STEM_LEN);
    let out = out.trim_end_matches(|c| c == '-' || c == '.').to_string();
    if out.is_empty() { "image".to_string() } else { out }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(prefix: Option<&str>, base_url: &str) -> TargetWriter {
        #[derive(Debug)]
        struct NullStore;

        #[async_trait]
        impl TargetStore for NullStore {
            async fn put(
                &self,
                _key: &str,
                _bytes: Bytes,
                _content_type: &str,
                _meta: &ObjectMeta,
            ) -> TargetResult<()> {
                Ok(())
            }
            async fn head(&self, _key: &str) -> TargetResult<Option<ObjectMeta>> {
                Ok(None)
            }
            async fn delete(&self, _key: &str) -> TargetResult<()> {
                Ok(())
            }
        }

        TargetWriter::new(
            NullStore,
            TargetConfig {
                key_prefix: prefix.map(str::to_string),
                public_base_url: base_url.to_string(),
            },
        )
    }

    #[test]
    fn sanitize_stem_basics() {
        assert_eq!(sanitize_stem("Hello World.JPG"), "hello-world");
        assert_eq!(sanitize_stem("photo.v2.png"), "photo.v2");
        assert_eq!(sanitize_stem("  spaces  here .jpg"), "spaces-here");
        assert_eq!(sanitize_stem("...."), "image");
        assert_eq!(sanitize_stem(""), "image");
    }

    #[test]
    fn sanitize_stem_truncates_long_names() {
        let long = "a".repeat(200) + ".jpg";
        let stem = sanitize_stem(&long);
        assert_eq!(stem.len(), MAX_STEM_LEN);
        assert!(stem.chars().all(|c| c == 'a'));
    }

    #[test]
    fn sanitize_segment_never_empty() {
        assert_eq!(sanitize_segment("Row 1"), "row-1");
        assert_eq!(sanitize_segment("!!!"), "unknown");
    }

    #[test]
    fn key_is_deterministic() {
        let writer = writer(None, "");
        let owner = OwnerKey::new("row-1", "product_images");
        let a = writer.key_for(&owner, "remote-abc", "Photo.JPG", "image/jpeg");
        let b = writer.key_for(&owner, "remote-abc", "Photo.JPG", "image/jpeg");
        assert_eq!(a, b);
        assert!(a.starts_with("row-1/product_images/photo-"));
        assert!(a.ends_with(".jpg"));
    }

    #[test]
    fn same_name_different_ids_do_not_collide() {
        let writer = writer(None, "");
        let owner = OwnerKey::new("row-1", "images");
        let a = writer.key_for(&owner, "remote-1", "photo.jpg", "image/jpeg");
        let b = writer.key_for(&owner, "remote-2", "photo.jpg", "image/jpeg");
        assert_ne!(a, b);
    }

    #[test]
    fn key_prefix_is_applied() {
        let writer = writer(Some("/mirror/"), "");
        let owner = OwnerKey::new("row-1", "images");
        let key = writer.key_for(&owner, "r1", "photo.jpg", "image/png");
        assert!(key.starts_with("mirror/row-1/images/"));
        assert!(key.ends_with(".png"));
    }

    #[test]
    fn unknown_content_type_gets_bin_extension() {
        let writer = writer(None, "");
        let owner = OwnerKey::new("e", "a");
        let key = writer.key_for(&owner, "r1", "blob", "image/x-strange");
        assert!(key.ends_with(".bin"));
    }

    #[test]
    fn public_ref_joins_without_double_slash() {
        let writer = writer(None, "https://cdn.example.com/");
        assert_eq!(
            writer.public_ref("a/b/c.jpg"),
            "https://cdn.example.com/a/b/c.jpg"
        );
    }

    #[test]
    fn public_ref_without_base_is_the_key() {
        let writer = writer(None, "");
        assert_eq!(writer.public_ref("a/b/c.jpg"), "a/b/c.jpg");
    }
}
