use super::{IfMatch, ObjectStore, ObjectStoreError, PutRequest, Result, compute_etag, paginate};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

const TMP_PREFIX: &str = ".ariel-tmp-";

/// Objects as files under a root directory. Content types are not
/// persisted; etags are the md5 of the file body.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(ObjectStoreError::Other(format!("invalid object key: {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ObjectStoreError::Io(e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ObjectStoreError::Io(e)),
        }
    }

    async fn put(&self, request: &PutRequest, cond: IfMatch<'_>) -> Result<String> {
        let path = self.object_path(&request.key)?;

        // Check preconditions
        match cond {
            IfMatch::Any => {}
            IfMatch::Tag(expected_etag) => match self.get(&request.key).await? {
                Some(data) if compute_etag(&data) == expected_etag => {}
                _ => return Err(ObjectStoreError::PreconditionFailed),
            },
            IfMatch::NoneMatch => {
                if self.exists(&request.key).await? {
                    return Err(ObjectStoreError::PreconditionFailed);
                }
            }
        }

        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).await?;

        // Write then rename so pollers never observe a half-written object.
        let staging = parent.join(format!("{TMP_PREFIX}{}", uuid::Uuid::new_v4()));
        fs::write(&staging, &request.body).await?;
        if let Err(e) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(ObjectStoreError::Io(e));
        }

        Ok(compute_etag(&request.body))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ObjectStoreError::NotFound(key.to_string())),
            Err(e) => Err(ObjectStoreError::Io(e)),
        }
    }

    async fn list(&self, prefix: &str, continuation: Option<String>) -> Result<(Vec<String>, Option<String>)> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        let keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            if !root.exists() {
                return keys;
            }
            for entry in walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| !e.file_name().to_string_lossy().starts_with(TMP_PREFIX))
            {
                let Ok(rel_path) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = rel_path
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            keys
        })
        .await
        .map_err(|e| ObjectStoreError::Other(format!("listing task failed: {e}")))?;

        Ok(paginate(keys, continuation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::test_helpers::tests::run_object_store_tests;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn setup_store() -> (LocalStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        (store, tmp)
    }

    fn json(key: &str, body: &[u8]) -> PutRequest {
        PutRequest::json(key, body.to_vec())
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _tmp) = setup_store();
        let etag = store.put(&json("foo.json", b"[]"), IfMatch::Any).await.unwrap();
        assert!(!etag.is_empty());

        let data = store.get("foo.json").await.unwrap();
        assert_eq!(data, Some(b"[]".to_vec()));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _tmp) = setup_store();
        assert_eq!(store.get("nope.json").await.unwrap(), None);
        assert!(!store.exists("nope.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_conditional_put_tag_mismatch() {
        let (store, _tmp) = setup_store();
        store.put(&json("baz.json", b"1"), IfMatch::Any).await.unwrap();

        let result = store.put(&json("baz.json", b"2"), IfMatch::Tag("wrong-etag")).await;
        assert!(matches!(result, Err(ObjectStoreError::PreconditionFailed)));
        assert_eq!(store.get("baz.json").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_list_uses_forward_slashes() {
        let (store, _tmp) = setup_store();

        store.put(&json("folder/a.json", b"a"), IfMatch::Any).await.unwrap();
        store.put(&json("folder/b.json", b"b"), IfMatch::Any).await.unwrap();
        store.put(&json("other/c.json", b"c"), IfMatch::Any).await.unwrap();

        let (keys, next) = store.list("folder/", None).await.unwrap();
        assert_eq!(keys, vec!["folder/a.json".to_string(), "folder/b.json".to_string()]);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_parent_dirs_created() {
        let (store, tmp) = setup_store();
        let nested_path = "nested/dir/structure/file.json";
        store.put(&json(nested_path, b"deep"), IfMatch::Any).await.unwrap();

        let on_disk = std::fs::read(tmp.path().join(nested_path)).unwrap();
        assert_eq!(on_disk, b"deep");

        let long_key = format!("{}{}", "local_test", "a".repeat(512));
        let result = store.put(&json(&long_key, b"long"), IfMatch::Any).await;
        assert!(matches!(result, Err(ObjectStoreError::Io(_))));
    }

    #[tokio::test]
    async fn test_rejects_keys_outside_root() {
        let (store, _tmp) = setup_store();
        for key in ["../escape.json", "/etc/passwd", ""] {
            let result = store.get(key).await;
            assert!(matches!(result, Err(ObjectStoreError::Other(_))), "key {key:?}");
        }
    }

    #[tokio::test]
    async fn test_local_object_store() {
        let (store, _tmp) = setup_store();
        let prefix = format!("test/{}/", Uuid::new_v4());
        run_object_store_tests(&store, &prefix).await;
    }
}
