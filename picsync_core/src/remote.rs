use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

pub type SourceResult<T, E = anyhow::Error> = std::result::Result<T, E>;

/// One entry of a remote folder listing.
///
/// A `RemoteFile` is ephemeral. It describes what the source reports right
/// now and is never persisted; durable state lives in
/// [`SyncRecord`](crate::record::SyncRecord).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Stable identity of the file at the source. Survives renames.
    pub remote_id: String,
    /// Display name. The target key is derived from it.
    pub name: String,
    /// MIME type as reported by the source.
    pub content_type: String,
    /// Content hash of the file as reported by the source, if it reports
    /// one. Sources that omit it force a download-and-compare.
    pub content_hash: Option<String>,
    /// Size in bytes as reported by the source, if known.
    pub size_bytes: Option<u64>,
}

impl RemoteFile {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

#[derive(Debug, Error)]
#[error("not a folder id or folder url: '{reference}'")]
pub struct FolderRefError {
    pub reference: String,
}

/// Identifier of a remote folder.
///
/// Folder ids are opaque to picsync; they only need to round-trip to the
/// source. [`FolderId::parse`] accepts the id itself or a share URL that
/// carries it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderId(String);

impl FolderId {
    /// Parse a folder reference.
    ///
    /// Accepted forms:
    /// - a bare id, e.g. `1aBcD-efg`
    /// - a URL with an `id` query parameter, e.g. `https://drive.example.com/open?id=1aBcD-efg`
    /// - a URL with the id as path segment, e.g. `https://drive.example.com/drive/folders/1aBcD-efg`
    pub fn parse(reference: &str) -> Result<Self, FolderRefError> {
        let reference = reference.trim();
        let err = || FolderRefError {
            reference: reference.to_string(),
        };

        if reference.is_empty() {
            return Err(err());
        }

        if let Ok(url) = Url::parse(reference) {
            if matches!(url.scheme(), "http" | "https") {
                if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "id") {
                    return Self::from_raw(&id).ok_or_else(err);
                }
                let segments: Vec<&str> = url
                    .path_segments()
                    .map(|segments| segments.filter(|s| !s.is_empty()).collect())
                    .unwrap_or_default();
                // "folders" style URLs carry the id right after that
                // segment; anything else ends in the id.
                let candidate = match segments.iter().position(|s| *s == "folders") {
                    Some(pos) => segments.get(pos + 1).copied(),
                    None => segments.last().copied(),
                };
                return candidate.and_then(Self::from_raw).ok_or_else(err);
            }
        }

        Self::from_raw(reference).ok_or_else(err)
    }

    fn from_raw(id: &str) -> Option<Self> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read access to the remote side of a sync.
#[async_trait]
pub trait RemoteSource: std::fmt::Debug + Send + Sync {
    /// List all files in the given folder.
    ///
    /// Implementations handle pagination internally and return the complete
    /// listing.
    async fn list_files(&self, folder: &FolderId) -> SourceResult<Vec<RemoteFile>>;

    /// Download the full content of a single file.
    async fn download(&self, remote_id: &str) -> SourceResult<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_id() {
        let folder = FolderId::parse("1aBcD-efg_42").unwrap();
        assert_eq!(folder.as_str(), "1aBcD-efg_42");
    }

    #[test]
    fn parse_trims_whitespace() {
        let folder = FolderId::parse("  abc123  ").unwrap();
        assert_eq!(folder.as_str(), "abc123");
    }

    #[test]
    fn parse_folders_url() {
        let folder =
            FolderId::parse("https://drive.example.com/drive/folders/1aBcD-efg").unwrap();
        assert_eq!(folder.as_str(), "1aBcD-efg");
    }

    #[test]
    fn parse_folders_url_with_trailing_segment() {
        let folder =
            FolderId::parse("https://drive.example.com/drive/folders/1aBcD/view").unwrap();
        assert_eq!(folder.as_str(), "1aBcD");
    }

    #[test]
    fn parse_query_url() {
        let folder =
            FolderId::parse("https://drive.example.com/open?id=1aBcD&usp=sharing").unwrap();
        assert_eq!(folder.as_str(), "1aBcD");
    }

    #[test]
    fn parse_plain_url_uses_last_segment() {
        let folder = FolderId::parse("https://drive.example.com/f/abc123/").unwrap();
        assert_eq!(folder.as_str(), "abc123");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(FolderId::parse("").is_err());
        assert!(FolderId::parse("   ").is_err());
        assert!(FolderId::parse("no spaces allowed").is_err());
        assert!(FolderId::parse("https://drive.example.com/").is_err());
        assert!(FolderId::parse("ftp://drive.example.com/folders/abc").is_err());
    }

    #[test]
    fn image_detection() {
        let mut file = RemoteFile {
            remote_id: "f1".to_string(),
            name: "photo.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            content_hash: None,
            size_bytes: None,
        };
        assert!(file.is_image());
        file.content_type = "application/pdf".to_string();
        assert!(!file.is_image());
    }
}
