//! Backend selection and construction.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::object_store::ObjectStore;
use crate::object_store::gcs::{DEFAULT_ENDPOINT, GcsStore};
use crate::object_store::local::LocalStore;
use crate::object_store::s3::S3Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    Local,
    #[default]
    Gcs,
    S3,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "gcs" => Ok(Self::Gcs),
            "s3" => Ok(Self::S3),
            other => Err(format!("unknown backend {other:?} (expected local, gcs or s3)")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Gcs => "gcs",
            Self::S3 => "s3",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the {0} backend needs a bucket name")]
    MissingBucket(Backend),

    #[error("the local backend needs a root directory")]
    MissingRoot,

    #[error("the gcs backend needs an access token")]
    MissingToken,
}

/// Everything needed to open a store.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub backend: Backend,
    pub bucket: Option<String>,
    pub root: Option<PathBuf>,
    /// Overrides the GCS or S3 endpoint.
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

impl StoreConfig {
    /// Checks that the options the chosen backend needs are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            Backend::Local if self.root.is_none() => Err(ConfigError::MissingRoot),
            Backend::Gcs | Backend::S3 if self.bucket.is_none() => Err(ConfigError::MissingBucket(self.backend)),
            Backend::Gcs if self.token.is_none() => Err(ConfigError::MissingToken),
            _ => Ok(()),
        }
    }

    pub async fn build(&self) -> Result<Arc<dyn ObjectStore>, ConfigError> {
        self.validate()?;
        let bucket = self.bucket.clone().unwrap_or_default();

        let store: Arc<dyn ObjectStore> = match self.backend {
            Backend::Local => Arc::new(LocalStore::new(self.root.clone().unwrap_or_default())),
            Backend::Gcs => Arc::new(GcsStore::with_client(
                reqwest::Client::new(),
                self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT),
                bucket,
                self.token.clone().unwrap_or_default(),
            )),
            Backend::S3 => {
                let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                let mut builder = aws_sdk_s3::config::Builder::from(&shared);
                if let Some(endpoint) = &self.endpoint {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }
                Arc::new(S3Store::new(bucket, aws_sdk_s3::Client::from_conf(builder.build())))
            }
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse_roundtrip() {
        for backend in [Backend::Local, Backend::Gcs, Backend::S3] {
            assert_eq!(backend.to_string().parse::<Backend>().unwrap(), backend);
        }
        assert_eq!("GCS".parse::<Backend>().unwrap(), Backend::Gcs);
        assert!("azure".parse::<Backend>().is_err());
    }

    #[test]
    fn test_validate_reports_missing_options() {
        let gcs = StoreConfig {
            bucket: Some("proj-ariel".into()),
            ..StoreConfig::default()
        };
        assert_eq!(gcs.validate(), Err(ConfigError::MissingToken));

        let s3 = StoreConfig {
            backend: Backend::S3,
            ..StoreConfig::default()
        };
        assert_eq!(s3.validate(), Err(ConfigError::MissingBucket(Backend::S3)));

        let local = StoreConfig {
            backend: Backend::Local,
            ..StoreConfig::default()
        };
        assert_eq!(local.validate(), Err(ConfigError::MissingRoot));
    }

    #[tokio::test]
    async fn test_build_local_store() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = StoreConfig {
            backend: Backend::Local,
            root: Some(tmp.path().to_path_buf()),
            ..StoreConfig::default()
        };
        let store = config.build().await.unwrap();
        assert!(!store.exists("missing.json").await.unwrap());
    }
}
