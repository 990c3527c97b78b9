use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode, header::CONTENT_TYPE};
use tracing::{debug, warn};

use parlay_types::api::{SignedUrl, SignedUrlRequest};

use crate::StorageClient;
use crate::error::{BackendError, Result};

/// Storage gateway client.
///
/// `PUT    {base}/objects/{key}`             upload raw bytes
/// `POST   {base}/objects/{key}/signed-url`  `{ "expires_in": secs }` -> `SignedUrl`
/// `DELETE {base}/objects/{key}`             remove
pub struct RestStorageClient {
    http: Client,
    base_url: String,
    token: String,
}

impl RestStorageClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Keys keep their `/` separators; each segment is percent-encoded.
    fn object_url(&self, key: &str) -> String {
        let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
        format!("{}/objects/{}", self.base_url, encoded.join("/"))
    }
}

async fn check(response: Response, key: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!("storage request for {} failed: {} {}", key, status, body);

    Err(match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(key.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized(body),
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => BackendError::Validation(body),
        _ => BackendError::Storage(format!("{}: {}", status, body)),
    })
}

#[async_trait]
impl StorageClient for RestStorageClient {
    async fn upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let size = data.len();
        let response = self
            .http
            .put(self.object_url(key))
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;
        check(response, key).await?;
        debug!("uploaded {} ({} bytes)", key, size);
        Ok(())
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<SignedUrl> {
        let response = self
            .http
            .post(format!("{}/signed-url", self.object_url(key)))
            .bearer_auth(&self.token)
            .json(&SignedUrlRequest {
                expires_in: expires_in.as_secs(),
            })
            .send()
            .await?;
        let signed = check(response, key).await?.json::<SignedUrl>().await?;
        Ok(signed)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.object_url(key))
            .bearer_auth(&self.token)
            .send()
            .await?;
        check(response, key).await?;
        Ok(())
    }
}
