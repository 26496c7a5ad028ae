use super::Storage;
use crate::error::DeliveryError;
use crate::upload::{self, PostRequest, RetryPolicy};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Uploads gzipped blobs to the collector. The 2xx response body is the
/// locator.
#[derive(Debug, Clone)]
pub struct HttpStorage {
    url: String,
    api_key: String,
    env: String,
    policy: RetryPolicy,
    client: ureq::Agent,
}

impl HttpStorage {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            env: env.into(),
            policy: RetryPolicy::default(),
            client: ureq::AgentBuilder::new().timeout(UPLOAD_TIMEOUT).build(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Storage for HttpStorage {
    async fn upload(
        &self,
        blob: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, DeliveryError> {
        if self.url.is_empty() || self.api_key.is_empty() {
            return Err(DeliveryError::MissingCredentials);
        }
        upload::ensure_secure(&self.url, &self.env)?;

        let body = Arc::new(upload::read_and_compress(blob).await?);
        log::debug!(
            "uploading {} ({} compressed bytes) to {}",
            blob.display(),
            body.len(),
            self.url
        );

        upload::send_with_retry(&self.policy, cancel, |_| {
            let request = PostRequest {
                url: self.url.clone(),
                api_key: self.api_key.clone(),
                content_type: "application/octet-stream",
                content_encoding: Some(upload::CONTENT_ENCODING),
                body: Arc::clone(&body),
            };
            upload::post(&self.client, request)
        })
        .await
    }
}
