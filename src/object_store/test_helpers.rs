pub mod tests {
    use crate::object_store::memory::InMemoryStore;
    use crate::object_store::{IfMatch, ObjectStore, ObjectStoreError, PutRequest, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Generic tests for any ObjectStore implementation
    pub async fn run_object_store_tests(store: &dyn ObjectStore, prefix: &str) {
        // Put and get
        let key = format!("{}foo.json", prefix);
        let etag = store
            .put(&PutRequest::json(&key, b"{\"a\":1}".to_vec()), IfMatch::Any)
            .await
            .unwrap();
        assert!(!etag.is_empty());
        let data = store.get(&key).await.unwrap();
        assert_eq!(data, Some(b"{\"a\":1}".to_vec()));
        assert!(store.exists(&key).await.unwrap());

        // Conditional put: Tag match
        let etag2 = store
            .put(&PutRequest::json(&key, b"{\"a\":2}".to_vec()), IfMatch::Tag(&etag))
            .await
            .unwrap();
        assert_ne!(etag, etag2);

        // Conditional put: Tag mismatch
        let result = store
            .put(&PutRequest::json(&key, b"{}".to_vec()), IfMatch::Tag("wrong-etag"))
            .await;
        assert!(matches!(result, Err(ObjectStoreError::PreconditionFailed)));

        // Conditional put: NoneMatch
        let key2 = format!("{}bar.json", prefix);
        let etag3 = store
            .put(&PutRequest::json(&key2, b"[]".to_vec()), IfMatch::NoneMatch)
            .await
            .unwrap();
        assert!(!etag3.is_empty());
        let result = store
            .put(&PutRequest::json(&key2, b"[1]".to_vec()), IfMatch::NoneMatch)
            .await;
        assert!(matches!(result, Err(ObjectStoreError::PreconditionFailed)));

        // List
        let (keys, _next) = store.list(prefix, None).await.unwrap();
        assert!(keys.contains(&key));
        assert!(keys.contains(&key2));

        // Delete
        store.delete(&key2).await.unwrap();
        assert!(!store.exists(&key2).await.unwrap());
        assert_eq!(store.get(&key2).await.unwrap(), None);
        assert!(store.delete(&key2).await.unwrap_err().is_not_found());
    }

    /// One scripted answer to a `get` or `exists` call.
    #[derive(Debug)]
    pub enum Step {
        Absent,
        Present(Vec<u8>),
        Fail(ObjectStoreError),
    }

    /// Replays a fixed sequence of answers for `get`/`exists` and counts
    /// calls. Once the script runs out every probe sees `Absent`. Writes go
    /// to an inner in-memory store.
    #[derive(Debug, Default)]
    pub struct ScriptedStore {
        script: Mutex<VecDeque<Step>>,
        probes: AtomicUsize,
        inner: InMemoryStore,
    }

    impl ScriptedStore {
        pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                script: Mutex::new(steps.into_iter().collect()),
                probes: AtomicUsize::new(0),
                inner: InMemoryStore::default(),
            }
        }

        /// Number of `get` + `exists` calls served so far.
        pub fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }

        fn next_step(&self) -> Step {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .ok()
                .and_then(|mut script| script.pop_front())
                .unwrap_or(Step::Absent)
        }
    }

    #[async_trait]
    impl ObjectStore for ScriptedStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            match self.next_step() {
                Step::Absent => Ok(None),
                Step::Present(data) => Ok(Some(data)),
                Step::Fail(err) => Err(err),
            }
        }

        async fn exists(&self, _key: &str) -> Result<bool> {
            match self.next_step() {
                Step::Absent => Ok(false),
                Step::Present(_) => Ok(true),
                Step::Fail(err) => Err(err),
            }
        }

        async fn put(&self, request: &PutRequest, cond: IfMatch<'_>) -> Result<String> {
            self.inner.put(request, cond).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn list(&self, prefix: &str, continuation: Option<String>) -> Result<(Vec<String>, Option<String>)> {
            self.inner.list(prefix, continuation).await
        }
    }
}
