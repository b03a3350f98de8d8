//! `RemoteSource` implementation for drive-style HTTP file APIs.

use bytes::Bytes;
use picsync_core::remote::{FolderId, RemoteFile, RemoteSource, SourceResult};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SourceError {
    #[error("Got HTTP {0} with content '{1}'")]
    HttpFailWithBody(u16, String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

fn default_page_size() -> u32 {
    200
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpSourceConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct HttpSource {
    http_client: reqwest::Client,
    config: HttpSourceConfig,
}

impl HttpSource {
    pub fn create(config: HttpSourceConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            config,
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http_client.get(url);
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn list_page(
        &self,
        folder: &FolderId,
        page_token: Option<&str>,
    ) -> Result<FileListRes, SourceError> {
        let url = format!("{}/folders/{}/files", self.config.base_url, folder);
        let mut req = self
            .request(&url)
            .query(&[("pageSize", self.config.page_size.to_string())]);
        if let Some(token) = page_token {
            req = req.query(&[("pageToken", token)]);
        }

        let res = req.send().await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(SourceError::HttpFailWithBody(status.as_u16(), body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl RemoteSource for HttpSource {
    async fn list_files(&self, folder: &FolderId) -> SourceResult<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(folder, page_token.as_deref()).await?;
            log::debug!(
                "listed {} files in folder {} (more: {})",
                page.files.len(),
                folder,
                page.next_page_token.is_some()
            );
            files.extend(page.files.into_iter().map(ApiFile::into_remote));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(files)
    }

    async fn download(&self, remote_id: &str) -> SourceResult<Bytes> {
        let url = format!("{}/files/{}/content", self.config.base_url, remote_id);
        let res = self.request(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(SourceError::HttpFailWithBody(status, body).into());
        }
        Ok(res.bytes().await?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListRes {
    #[serde(default)]
    files: Vec<ApiFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    content_hash: Option<String>,
    #[serde(default, deserialize_with = "de_size")]
    size: Option<u64>,
}

impl ApiFile {
    fn into_remote(self) -> RemoteFile {
        RemoteFile {
            remote_id: self.id,
            name: self.name,
            content_type: self.mime_type,
            content_hash: self.content_hash,
            size_bytes: self.size,
        }
    }
}

/// Some drive APIs serialize file sizes as JSON strings.
fn de_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) => s.parse::<u64>().map(Some).map_err(serde::de::Error::custom),
    }
}
