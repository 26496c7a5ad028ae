//! Compression, transport checks and the HTTP POST used by every network
//! delivery path.

mod retry;

pub use retry::{send_with_retry, RetryPolicy, DEFAULT_ATTEMPTS, DEFAULT_BASE_DELAY};

use crate::error::DeliveryError;
use flate2::{write::GzEncoder, Compression};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// Scheme advertised in `Content-Encoding` for compressed blobs.
pub const CONTENT_ENCODING: &str = "gzip";

/// Environment name under which plain-HTTP endpoints are accepted.
pub const LOCAL_ENV: &str = "local";

pub fn compress(data: &[u8]) -> Result<Vec<u8>, DeliveryError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Reads the whole blob into memory and gzips it.
pub async fn read_and_compress(path: &Path) -> Result<Vec<u8>, DeliveryError> {
    let data = tokio::fs::read(path).await?;
    compress(&data)
}

/// Refuses anything but HTTPS unless running in the local environment.
pub fn ensure_secure(url: &str, env: &str) -> Result<Url, DeliveryError> {
    let parsed = Url::parse(url)?;
    if parsed.scheme() != "https" && env != LOCAL_ENV {
        return Err(DeliveryError::InsecureTransport(url.to_string()));
    }
    Ok(parsed)
}

#[derive(Debug, Clone)]
pub(crate) struct PostRequest {
    pub url: String,
    pub api_key: String,
    pub content_type: &'static str,
    pub content_encoding: Option<&'static str>,
    pub body: Arc<Vec<u8>>,
}

/// Sends one POST and returns the response body of a 2xx answer.
///
/// ureq blocks, so the call is moved onto the blocking pool to keep the
/// calling task's runtime thread free.
pub(crate) async fn post(agent: &ureq::Agent, request: PostRequest) -> Result<String, DeliveryError> {
    let agent = agent.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let mut req = agent
            .post(&request.url)
            .set("Content-Type", request.content_type)
            .set("Authorization", &format!("Bearer {}", request.api_key));
        if let Some(encoding) = request.content_encoding {
            req = req.set("Content-Encoding", encoding);
        }

        let response = match req.send_bytes(&request.body) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => return Err(DeliveryError::from_status(status)),
            Err(ureq::Error::Transport(err)) => return Err(DeliveryError::Transport(err.to_string())),
        };

        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(DeliveryError::from_status(status));
        }

        response
            .into_string()
            .map_err(|e| DeliveryError::Transport(format!("failed to read response: {}", e)))
    });

    match handle.await {
        Ok(result) => result,
        Err(e) => Err(DeliveryError::Transport(format!("request task failed: {}", e))),
    }
}
