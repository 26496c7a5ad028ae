use super::Storage;
use crate::capture::ProfileKind;
use crate::error::DeliveryError;
use crate::metadata::MetadataRecord;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Locator returned by [`StdoutStorage`] in place of a real location.
pub const STDOUT_LOCATOR: &str = "stdout";

/// Diagnostic backend: prints a summary of every blob and the metadata that
/// goes with it instead of shipping anything.
pub struct StdoutStorage {
    out: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for StdoutStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdoutStorage").finish_non_exhaustive()
    }
}

impl Default for StdoutStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StdoutStorage {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }

    pub fn with_writer(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    /// Prints the record as a single `METADATA: {...}` line.
    pub fn output_metadata(&self, record: &MetadataRecord) -> io::Result<()> {
        let json = serde_json::to_string(record)?;
        self.write_all(format!("METADATA: {}\n", json).as_bytes())
    }

    fn write_all(&self, text: &[u8]) -> io::Result<()> {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        out.write_all(text)?;
        out.flush()
    }

    fn summary(blob: &Path, size: u64, created: Option<DateTime<Local>>) -> String {
        let kind = ProfileKind::from_file_name(blob).map_or("unknown", ProfileKind::display_name);
        let file = blob
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let created = created
            .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "PROFILE_DATA (size: {size} bytes):\n  Type: {kind}\n  File: {file}\n  Size: {size} bytes\n  Created: {created}\n\n"
        )
    }
}

#[async_trait]
impl Storage for StdoutStorage {
    async fn upload(
        &self,
        blob: &Path,
        _cancel: &CancellationToken,
    ) -> Result<String, DeliveryError> {
        let meta = tokio::fs::metadata(blob).await?;
        let created = meta.modified().ok().map(DateTime::<Local>::from);

        self.write_all(Self::summary(blob, meta.len(), created).as_bytes())?;
        Ok(STDOUT_LOCATOR.to_string())
    }

    fn diagnostic(&self) -> Option<&StdoutStorage> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Cloneable in-memory writer for inspecting diagnostic output.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stdout_upload_prints_summary() {
        let buf = SharedBuf::default();
        let storage = StdoutStorage::with_writer(buf.clone());

        let blob = tempfile::Builder::new()
            .prefix("cpu-")
            .suffix(".pprof")
            .tempfile()
            .unwrap();
        std::fs::write(blob.path(), vec![0u8; 128]).unwrap();

        let locator = storage.upload(blob.path(), &CancellationToken::new()).await.unwrap();
        assert_eq!(locator, STDOUT_LOCATOR);

        let out = buf.contents();
        assert!(out.starts_with("PROFILE_DATA (size: 128 bytes):\n"));
        assert!(out.contains("  Type: CPU Profile\n"));
        assert!(out.contains("  Size: 128 bytes\n"));
        let name = blob.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(out.contains(&format!("  File: {}\n", name)));
        assert!(storage.diagnostic().is_some());
    }

    #[test]
    fn test_stdout_outputs_metadata() {
        let buf = SharedBuf::default();
        let storage = StdoutStorage::with_writer(buf.clone());

        let record = MetadataRecord::new("checkout", ProfileKind::Memory, STDOUT_LOCATOR)
            .with_tags([("env".to_string(), "testing".to_string())]);
        storage.output_metadata(&record).unwrap();

        let out = buf.contents();
        let line = out.strip_prefix("METADATA: ").unwrap().trim_end();
        let parsed: std::collections::BTreeMap<String, String> =
            serde_json::from_str(line).unwrap();
        assert_eq!(parsed["service"], "checkout");
        assert_eq!(parsed["type"], "memory");
        assert_eq!(parsed["profile_url"], STDOUT_LOCATOR);
        assert_eq!(parsed["env"], "testing");
    }
}
