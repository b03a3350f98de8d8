use anyhow::anyhow;
use bytes::Bytes;
use picsync_core::target::{ObjectMeta, TargetResult, TargetStore};
use s3::{Bucket, Region, creds::Credentials};

/// Objects carry their sync metadata in this user-defined header as JSON.
const META_HEADER: &str = "x-amz-meta-picsync";
/// Header name as it comes back from `head_object`, with the
/// `x-amz-meta-` prefix stripped.
const META_KEY: &str = "picsync";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct S3StoreConfig {
    endpoint: String,
    #[serde(default)]
    region: String,
    bucket_name: String,
    access_key: String,
    secret_key: String,
}

#[derive(Debug, Clone)]
pub struct S3Store {
    bucket: Box<Bucket>,
}

impl S3Store {
    pub fn create(config: S3StoreConfig) -> Self {
        let bucket = Bucket::new(
            &config.bucket_name,
            Region::Custom {
                endpoint: config.endpoint,
                region: config.region,
            },
            Credentials::new(
                Some(&config.access_key),
                Some(&config.secret_key),
                None,
                None,
                None,
            )
            .unwrap(),
        )
        .unwrap()
        .with_path_style();
        s3::set_retries(5);
        Self { bucket }
    }
}

#[async_trait::async_trait]
impl TargetStore for S3Store {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        meta: &ObjectMeta,
    ) -> TargetResult<()> {
        let mut bucket = *self.bucket.clone();
        bucket.add_header(META_HEADER, &serde_json::to_string(meta)?);
        bucket
            .put_object_with_content_type(key, &bytes, content_type)
            .await?;
        Ok(())
    }

    async fn head(&self, key: &str) -> TargetResult<Option<ObjectMeta>> {
        let head = match self.bucket.head_object(key).await {
            Ok((head, 200)) => head,
            Ok((_, 404)) => return Ok(None),
            Ok((_, code)) => return Err(anyhow!("unexpected http status code {code}")),
            Err(e) => return Err(e.into()),
        };

        // Objects written by anything else lack parseable sync metadata
        // and read as unverifiable, which makes the caller rewrite them.
        let meta = head
            .metadata
            .as_ref()
            .and_then(|headers| headers.get(META_KEY).or_else(|| headers.get(META_HEADER)))
            .and_then(|json| serde_json::from_str(json).ok());
        Ok(meta)
    }

    async fn delete(&self, key: &str) -> TargetResult<()> {
        self.bucket.delete_object(key).await?;
        Ok(())
    }
}
