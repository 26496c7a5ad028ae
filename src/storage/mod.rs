mod file;
mod http;
mod stdout;

pub use file::FileStorage;
pub use http::HttpStorage;
pub use stdout::{StdoutStorage, STDOUT_LOCATOR};

use crate::error::DeliveryError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Destination for captured profile blobs.
///
/// `upload` receives the path of a finished blob and returns a locator that
/// says where the blob ended up (a URL, a path or a sentinel). The blob file
/// belongs to the caller and is removed after the call returns. Network
/// backends give up once `cancel` fires.
#[async_trait]
pub trait Storage: Debug + Send + Sync {
    async fn upload(
        &self,
        blob: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, DeliveryError>;

    /// Returns the diagnostic printer when this backend is one. Metadata for
    /// such a backend is printed instead of being sent over the network.
    fn diagnostic(&self) -> Option<&StdoutStorage> {
        None
    }
}
