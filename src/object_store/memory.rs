use super::{IfMatch, ObjectStore, ObjectStoreError, PutRequest, Result, compute_etag, paginate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    etag: String,
}

/// Process-local store. Clones share the same objects, which lets a test
/// play the external producer on one handle while polling another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    map: Arc<Mutex<HashMap<String, StoredObject>>>,
}

impl InMemoryStore {
    fn objects(&self) -> Result<MutexGuard<'_, HashMap<String, StoredObject>>> {
        self.map
            .lock()
            .map_err(|_| ObjectStoreError::Other("in-memory store lock poisoned".to_string()))
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects()
            .ok()
            .and_then(|map| map.get(key).map(|obj| obj.content_type.clone()))
    }

    pub fn len(&self) -> usize {
        self.objects().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.objects()?;
        Ok(map.get(key).map(|obj| obj.data.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects()?.contains_key(key))
    }

    async fn put(&self, request: &PutRequest, cond: IfMatch<'_>) -> Result<String> {
        let mut map = self.objects()?;

        match cond {
            IfMatch::Any => {}
            IfMatch::Tag(expected_etag) => match map.get(&request.key) {
                Some(obj) if obj.etag == expected_etag => {}
                _ => return Err(ObjectStoreError::PreconditionFailed),
            },
            IfMatch::NoneMatch => {
                if map.contains_key(&request.key) {
                    return Err(ObjectStoreError::PreconditionFailed);
                }
            }
        }

        let etag = compute_etag(&request.body);
        map.insert(
            request.key.clone(),
            StoredObject {
                data: request.body.clone(),
                content_type: request.content_type.clone(),
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.objects()?.remove(key) {
            Some(_) => Ok(()),
            None => Err(ObjectStoreError::NotFound(key.to_string())),
        }
    }

    async fn list(&self, prefix: &str, continuation: Option<String>) -> Result<(Vec<String>, Option<String>)> {
        let map = self.objects()?;
        let mut keys: Vec<String> = map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();

        Ok(paginate(keys, continuation))
    }
}
