use std::io;
use thiserror::Error;

/// Problems found while validating a [`crate::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("api key is required")]
    MissingApiKey,
    #[error("ingest url is required")]
    MissingIngestUrl,
    #[error("service name is required")]
    MissingServiceName,
    #[error("invalid ingest url")]
    InvalidIngestUrl(#[from] url::ParseError),
    #[error("failed to prepare output directory")]
    OutputDirectory(#[source] io::Error),
}

/// Outcome of a failed delivery attempt, either of a profile blob or of a
/// metadata record.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("authentication failed: {0}")]
    Unauthorized(u16),
    #[error("unexpected status code: {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTPS is required for secure uploads: {0}")]
    InsecureTransport(String),
    #[error("invalid url")]
    InvalidUrl(#[from] url::ParseError),
    #[error("url and api key are required")]
    MissingCredentials,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to encode payload")]
    Encode(#[from] serde_json::Error),
    #[error("delivery cancelled")]
    Cancelled,
    #[error("delivery failed after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Maps a non-success HTTP status to its delivery error.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(status),
            _ => Self::Status(status),
        }
    }

    /// Rate limits, server errors and transport failures are worth another
    /// attempt. Everything else aborts the delivery.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status(status) => *status == 429 || (500..600).contains(status),
            Self::Transport(_) => true,
            _ => false,
        }
    }
}

/// Failure of one export: the blob upload or the metadata that follows it.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to upload profile")]
    Upload(#[source] DeliveryError),
    #[error("failed to send metadata")]
    Metadata(#[source] DeliveryError),
    #[error("failed to output metadata to stdout")]
    Diagnostic(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("profiler already started")]
    AlreadyRunning,
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
}
