use super::Storage;
use crate::error::DeliveryError;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Copies blobs into a local directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    /// Creates the target directory when it does not exist yet.
    pub fn new(directory: impl Into<PathBuf>) -> io::Result<Self> {
        let directory = directory.into();
        if directory.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "directory is required",
            ));
        }
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn upload(
        &self,
        blob: &Path,
        _cancel: &CancellationToken,
    ) -> Result<String, DeliveryError> {
        let file_name = blob.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("blob path has no file name: {}", blob.display()),
            )
        })?;
        let target = self.directory.join(file_name);

        tokio::fs::copy(blob, &target).await?;
        log::debug!("copied {} to {}", blob.display(), target.display());

        Ok(target.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_storage_copies_blob() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("profiles");
        let storage = FileStorage::new(&target).unwrap();
        assert!(target.is_dir());

        let blob = tempfile::Builder::new()
            .prefix("memory-")
            .suffix(".pprof")
            .tempfile()
            .unwrap();
        std::fs::write(blob.path(), b"heap").unwrap();

        let locator = storage.upload(blob.path(), &CancellationToken::new()).await.unwrap();
        let expected = target.join(blob.path().file_name().unwrap());

        assert_eq!(locator, expected.to_string_lossy());
        assert_eq!(std::fs::read(&expected).unwrap(), b"heap");
        assert!(storage.diagnostic().is_none());
    }

    #[test]
    fn test_file_storage_requires_directory() {
        let err = FileStorage::new("").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_file_storage_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let result = storage
            .upload(&dir.path().join("gone.pprof"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DeliveryError::Io(_))));
    }
}
