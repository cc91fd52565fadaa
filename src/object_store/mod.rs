pub mod memory;
pub mod local;
pub mod gcs;
pub mod s3;
#[cfg(any(test, feature = "test-helpers"))]
#[doc(hidden)]
pub mod test_helpers;

use std::io;

use async_trait::async_trait;
use thiserror::Error;

/// Keys returned per `list` page by the memory and local backends.
pub const PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("precondition failed")]
    PreconditionFailed,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("{0}")]
    Other(String),
}

impl ObjectStoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// True for failures that would likely succeed if repeated (5xx, 429,
    /// timeouts, dropped connections). Polling still treats these as fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ObjectStoreError>;

#[derive(Debug, Clone, Copy, Default)]
pub enum IfMatch<'a> {
    #[default]
    Any,
    Tag(&'a str),
    NoneMatch,
}

/// An object upload. Immutable once handed to a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
}

impl PutRequest {
    pub fn new(key: impl Into<String>, body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    pub fn json(key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(key, body, "application/json")
    }
}

/// Storage capability shared by every backend.
///
/// `get` reports a missing object as `Ok(None)` rather than an error so that
/// callers can tell "not there yet" apart from a failed request.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn put(&self, request: &PutRequest, cond: IfMatch<'_>) -> Result<String>;
    /// Deleting a missing object fails with `NotFound`.
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str, continuation: Option<String>) -> Result<(Vec<String>, Option<String>)>;
}

pub(crate) fn compute_etag(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Slices a sorted key list into one page. The continuation token is the
/// last key of the previous page.
pub(crate) fn paginate(keys: Vec<String>, continuation: Option<String>) -> (Vec<String>, Option<String>) {
    let start = match continuation {
        Some(token) => keys.iter().position(|k| k > &token).unwrap_or(keys.len()),
        None => 0,
    };
    let end = (start + PAGE_SIZE).min(keys.len());

    let next_token = if end < keys.len() {
        Some(keys[end - 1].clone())
    } else {
        None
    };

    (keys[start..end].to_vec(), next_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        let mut keys: Vec<String> = (0..n).map(|i| format!("k/{i:05}")).collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_paginate_walks_all_pages() {
        let all = keys(2500);
        let (page1, next) = paginate(all.clone(), None);
        assert_eq!(page1.len(), PAGE_SIZE);
        let (page2, next) = paginate(all.clone(), next);
        assert_eq!(page2.len(), PAGE_SIZE);
        let (page3, next) = paginate(all.clone(), next);
        assert_eq!(page3.len(), 500);
        assert!(next.is_none());
        assert_eq!(page3.last(), all.last());
    }

    #[test]
    fn test_paginate_token_past_end_is_empty() {
        let (page, next) = paginate(keys(3), Some("z".to_string()));
        assert!(page.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn test_error_classification() {
        assert!(ObjectStoreError::NotFound("a".into()).is_not_found());
        assert!(ObjectStoreError::Io(io::Error::from(io::ErrorKind::NotFound)).is_not_found());
        assert!(ObjectStoreError::Transient("503".into()).is_transient());
        assert!(ObjectStoreError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_transient());
        assert!(!ObjectStoreError::Other("403".into()).is_transient());
        assert!(!ObjectStoreError::PreconditionFailed.is_not_found());
    }
}
