use crate::capture::ProfileKind;
use crate::config::Config;
use crate::error::ExportError;
use crate::metadata::{MetadataClient, MetadataRecord};
use crate::storage::{StdoutStorage, Storage};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Ships one blob to storage, then publishes its metadata.
#[derive(Debug)]
pub struct Exporter {
    storage: Arc<dyn Storage>,
    metadata: Option<MetadataClient>,
    service_name: String,
    tags: HashMap<String, String>,
}

impl Exporter {
    pub fn new(storage: Arc<dyn Storage>, metadata: Option<MetadataClient>, config: &Config) -> Self {
        Self {
            storage,
            metadata,
            service_name: config.service_name.clone(),
            tags: config.tags.clone(),
        }
    }

    /// Exporter for a validated config: its storage plus a metadata client
    /// when identity is configured and the backend is not the diagnostic one.
    pub fn from_config(config: &Config) -> Self {
        let storage: Arc<dyn Storage> = match &config.storage {
            Some(storage) => Arc::clone(storage),
            None => Arc::new(StdoutStorage::new()),
        };
        let metadata = (storage.diagnostic().is_none() && config.has_identity()).then(|| {
            MetadataClient::new(
                config.ingest_url.as_str(),
                config.api_key.as_str(),
                config.env.as_str(),
            )
            .with_retry_policy(config.retry_policy())
        });
        Self::new(storage, metadata, config)
    }

    /// Uploads `blob`, then publishes its metadata. Network deliveries are
    /// abandoned once `cancel` fires.
    pub async fn export(
        &self,
        kind: ProfileKind,
        blob: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, ExportError> {
        let locator = self
            .storage
            .upload(blob, cancel)
            .await
            .map_err(ExportError::Upload)?;

        let record = MetadataRecord::new(&self.service_name, kind, &locator)
            .with_tags(self.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(printer) = self.storage.diagnostic() {
            printer
                .output_metadata(&record)
                .map_err(ExportError::Diagnostic)?;
        } else if let Some(client) = &self.metadata {
            client
                .send(&record, cancel)
                .await
                .map_err(ExportError::Metadata)?;
        } else {
            log::debug!("no metadata endpoint configured, skipping {} metadata", kind);
        }

        Ok(locator)
    }
}
