use bytes::Bytes;
use dashmap::DashMap;
use picsync_core::target::{ObjectMeta, TargetResult, TargetStore};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: String,
    meta: ObjectMeta,
}

#[derive(Debug)]
pub struct MemoryStore {
    objects: DashMap<String, StoredObject>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }

    /// Returns the stored bytes and content type for a key, if present.
    pub fn get(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects
            .get(key)
            .map(|obj| (obj.bytes.clone(), obj.content_type.clone()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TargetStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        meta: &ObjectMeta,
    ) -> TargetResult<()> {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                meta: meta.clone(),
            },
        );
        Ok(())
    }

    async fn head(&self, key: &str) -> TargetResult<Option<ObjectMeta>> {
        Ok(self.objects.get(key).map(|obj| obj.meta.clone()))
    }

    async fn delete(&self, key: &str) -> TargetResult<()> {
        self.objects.remove(key);
        Ok(())
    }
}
