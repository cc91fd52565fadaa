use super::{IfMatch, ObjectStore, ObjectStoreError, PutRequest, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;

/// S3-compatible bucket, including the GCS XML interoperability endpoint.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(bucket: String, client: Client) -> Self {
        Self { client, bucket }
    }

    async fn current_etag(&self, key: &str) -> Result<Option<String>> {
        let head = self.client.head_object().bucket(&self.bucket).key(key).send().await;
        match head {
            Ok(meta) => Ok(Some(
                meta.e_tag().map(|s| s.trim_matches('"').to_string()).unwrap_or_default(),
            )),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(sdk_error("head", e)),
        }
    }
}

fn sdk_error<E>(op: &str, err: SdkError<E, HttpResponse>) -> ObjectStoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = format!("S3 {op} error: {}", DisplayErrorContext(&err));
    match (&err, status) {
        (SdkError::TimeoutError(_) | SdkError::DispatchFailure(_), _) => ObjectStoreError::Transient(message),
        (_, Some(412)) => ObjectStoreError::PreconditionFailed,
        (_, Some(s)) if s == 429 || s >= 500 => ObjectStoreError::Transient(message),
        _ => ObjectStoreError::Other(message),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self.client.get_object().bucket(&self.bucket).key(key).send().await;

        match resp {
            Ok(obj) => {
                let data = obj
                    .body
                    .collect()
                    .await
                    .map_err(|e| ObjectStoreError::Transient(format!("S3 body error: {e}")))?;
                Ok(Some(data.into_bytes().to_vec()))
            }
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => Ok(None),
            Err(e) => Err(sdk_error("get", e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.current_etag(key).await?.is_some())
    }

    async fn put(&self, request: &PutRequest, cond: IfMatch<'_>) -> Result<String> {
        // Preconditions are checked with a HEAD first; not every
        // S3-compatible endpoint honours conditional writes.
        match cond {
            IfMatch::Any => {}
            IfMatch::Tag(expected_etag) => {
                if self.current_etag(&request.key).await?.as_deref() != Some(expected_etag) {
                    return Err(ObjectStoreError::PreconditionFailed);
                }
            }
            IfMatch::NoneMatch => {
                if self.current_etag(&request.key).await?.is_some() {
                    return Err(ObjectStoreError::PreconditionFailed);
                }
            }
        }

        let resp = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .content_type(&request.content_type)
            .body(ByteStream::from(request.body.clone()))
            .send()
            .await
            .map_err(|e| sdk_error("put", e))?;

        // S3 returns ETag as a quoted string
        let etag = resp
            .e_tag()
            .map(|s| s.trim_matches('"').to_string())
            .unwrap_or_else(|| super::compute_etag(&request.body));
        Ok(etag)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 deletes are idempotent, so absence has to be checked up front.
        if self.current_etag(key).await?.is_none() {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("delete", e))?;
        Ok(())
    }

    async fn list(&self, prefix: &str, continuation: Option<String>) -> Result<(Vec<String>, Option<String>)> {
        let mut req = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);

        if let Some(token) = continuation {
            req = req.continuation_token(token);
        }

        let resp = req.send().await.map_err(|e| sdk_error("list", e))?;

        let keys = resp
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(|s| s.to_string()))
            .collect::<Vec<_>>();

        let next_token = resp.next_continuation_token().map(|s| s.to_string());

        Ok((keys, next_token))
    }
}
