//! Google Cloud Storage over the JSON API.

use super::{IfMatch, ObjectStore, ObjectStoreError, PutRequest, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// GCS bucket accessed with a bearer token.
///
/// Etags returned by `put` are object generations, so `IfMatch::Tag` maps
/// onto `ifGenerationMatch`.
#[derive(Debug, Clone)]
pub struct GcsStore {
    client: Client,
    endpoint: String,
    bucket: String,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    generation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
}

impl GcsStore {
    pub fn new(bucket: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), DEFAULT_ENDPOINT, bucket, token)
    }

    /// Use a custom HTTP client and endpoint (emulators, proxies, timeouts).
    pub fn with_client(
        client: Client,
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into();
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            token: token.into(),
        }
    }

    fn objects_url(&self) -> Result<Url> {
        parse_url(&format!("{}/storage/v1/b/{}/o", self.endpoint, self.bucket))
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        let mut url = self.objects_url()?;
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::Other(format!("endpoint cannot be a base: {}", self.endpoint)))?
            .push(key);
        Ok(url)
    }

    fn upload_url(&self, key: &str) -> Result<Url> {
        let mut url = parse_url(&format!("{}/upload/storage/v1/b/{}/o", self.endpoint, self.bucket))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| ObjectStoreError::Other(format!("invalid GCS url {raw}: {e}")))
}

fn transport_error(err: reqwest::Error) -> ObjectStoreError {
    if err.is_timeout() || err.is_connect() {
        ObjectStoreError::Transient(format!("GCS request error: {err}"))
    } else {
        ObjectStoreError::Other(format!("GCS request error: {err}"))
    }
}

/// Maps a non-success status onto the store taxonomy.
pub(crate) fn status_error(status: StatusCode, key: &str, body: &str) -> ObjectStoreError {
    match status {
        StatusCode::NOT_FOUND => ObjectStoreError::NotFound(key.to_string()),
        StatusCode::PRECONDITION_FAILED => ObjectStoreError::PreconditionFailed,
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            ObjectStoreError::Transient(format!("GCS status {s} for {key}: {body}"))
        }
        s => ObjectStoreError::Other(format!("GCS status {s} for {key}: {body}")),
    }
}

async fn error_for(response: Response, key: &str) -> ObjectStoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    status_error(status, key, &body)
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut url = self.object_url(key)?;
        url.query_pairs_mut().append_pair("alt", "media");
        debug!(%url, "GCS get");

        let response = self.send(self.client.get(url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let bytes = response.bytes().await.map_err(transport_error)?;
                Ok(Some(bytes.to_vec()))
            }
            _ => Err(error_for(response, key).await),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let url = self.object_url(key)?;
        let response = self.send(self.client.get(url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(error_for(response, key).await),
        }
    }

    async fn put(&self, request: &PutRequest, cond: IfMatch<'_>) -> Result<String> {
        let mut url = self.upload_url(&request.key)?;
        match cond {
            IfMatch::Any => {}
            IfMatch::Tag(generation) => {
                url.query_pairs_mut().append_pair("ifGenerationMatch", generation);
            }
            IfMatch::NoneMatch => {
                url.query_pairs_mut().append_pair("ifGenerationMatch", "0");
            }
        }
        debug!(%url, content_type = %request.content_type, "GCS upload");

        let builder = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, request.content_type.as_str())
            .body(request.body.clone());
        let response = self.send(builder).await?;
        if !response.status().is_success() {
            return Err(error_for(response, &request.key).await);
        }

        let resource: ObjectResource = response
            .json()
            .await
            .map_err(|e| ObjectStoreError::Other(format!("GCS upload response: {e}")))?;
        resource
            .generation
            .ok_or_else(|| ObjectStoreError::Other("GCS upload response missing generation".to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.object_url(key)?;
        let response = self.send(self.client.delete(url)).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_for(response, key).await)
        }
    }

    async fn list(&self, prefix: &str, continuation: Option<String>) -> Result<(Vec<String>, Option<String>)> {
        let mut url = self.objects_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("prefix", prefix);
            if let Some(token) = &continuation {
                query.append_pair("pageToken", token);
            }
        }

        let response = self.send(self.client.get(url)).await?;
        if !response.status().is_success() {
            return Err(error_for(response, prefix).await);
        }
        let page: ListResponse = response
            .json()
            .await
            .map_err(|e| ObjectStoreError::Other(format!("GCS list response: {e}")))?;

        let keys = page.items.into_iter().map(|item| item.name).collect();
        Ok((keys, page.next_page_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GcsStore {
        GcsStore::with_client(Client::new(), "https://storage.example.test/", "ariel-bucket", "t0k")
    }

    #[test]
    fn test_object_url_escapes_slashes() {
        let url = store().object_url("clip.mp4--1700000000000/utterances.json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.example.test/storage/v1/b/ariel-bucket/o/clip.mp4--1700000000000%2Futterances.json"
        );
    }

    #[test]
    fn test_upload_url_carries_name() {
        let url = store().upload_url("folder/config.json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.example.test/upload/storage/v1/b/ariel-bucket/o?uploadType=media&name=folder%2Fconfig.json"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(status_error(StatusCode::NOT_FOUND, "k", "").is_not_found());
        assert!(matches!(
            status_error(StatusCode::PRECONDITION_FAILED, "k", ""),
            ObjectStoreError::PreconditionFailed
        ));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "k", "").is_transient());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "k", "").is_transient());

        let forbidden = status_error(StatusCode::FORBIDDEN, "k", "denied");
        assert!(!forbidden.is_transient());
        assert!(!forbidden.is_not_found());
        assert!(forbidden.to_string().contains("denied"));
    }
}
