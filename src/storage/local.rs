/// Local directory sink
///
/// Containers are sub-directories of a root directory. A blob is written to a
/// temporary file next to its final name and then hard-linked into place, so
/// readers never see a partial file and an existing blob is never replaced.
/// The temporary file is removed whether or not the commit succeeds.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::SinkError;
use crate::storage::BlobSink;

#[derive(Debug, Clone)]
pub struct LocalDirSink {
    root: PathBuf,
}

impl LocalDirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn io_error(path: &Path, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    async fn write_temp(temp: &Path, bytes: &[u8]) -> Result<(), SinkError> {
        let mut file = tokio::fs::File::create(temp)
            .await
            .map_err(|e| Self::io_error(temp, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| Self::io_error(temp, e))?;
        file.sync_all()
            .await
            .map_err(|e| Self::io_error(temp, e))
    }
}

/// Remove a half-written temp file when staging it failed
async fn discard_on_error<T>(temp: &Path, result: Result<T, SinkError>) -> Result<T, SinkError> {
    if result.is_err() {
        let _ = tokio::fs::remove_file(temp).await;
    }
    result
}

#[async_trait]
impl BlobSink for LocalDirSink {
    async fn ensure_container(&self, container: &str) -> Result<(), SinkError> {
        let dir = self.root.join(container);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Self::io_error(&dir, e))
    }

    async fn commit(
        &self,
        container: &str,
        blob_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, SinkError> {
        let dir = self.root.join(container);
        let target = dir.join(blob_name);
        let temp = dir.join(format!(".{}.{}.tmp", blob_name, Uuid::new_v4().simple()));

        let staged = Self::write_temp(&temp, &bytes).await;
        discard_on_error(&temp, staged).await?;

        let linked = tokio::fs::hard_link(&temp, &target).await;
        let _ = tokio::fs::remove_file(&temp).await;

        match linked {
            Ok(()) => Ok(target.display().to_string()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(SinkError::AlreadyExists(
                format!("{}/{}", container, blob_name),
            )),
            Err(e) => Err(Self::io_error(&target, e)),
        }
    }

    fn describe(&self) -> String {
        format!("local directory {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_commit_writes_complete_file() {
        let dir = TempDir::new().unwrap();
        let sink = LocalDirSink::new(dir.path());

        sink.ensure_container("merged-patients").await.unwrap();
        let location = sink
            .commit("merged-patients", "out.csv", b"a,b\n".to_vec())
            .await
            .unwrap();

        let path = dir.path().join("merged-patients").join("out.csv");
        assert_eq!(location, path.display().to_string());
        assert_eq!(std::fs::read(&path).unwrap(), b"a,b\n");

        // no temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("merged-patients"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_container_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let sink = LocalDirSink::new(dir.path());

        sink.ensure_container("test").await.unwrap();
        sink.ensure_container("test").await.unwrap();

        assert!(dir.path().join("test").is_dir());
    }

    #[tokio::test]
    async fn test_commit_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let sink = LocalDirSink::new(dir.path());
        sink.ensure_container("test").await.unwrap();

        sink.commit("test", "out.csv", b"first\n".to_vec()).await.unwrap();
        let err = sink
            .commit("test", "out.csv", b"second\n".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::AlreadyExists(_)));
        assert_eq!(
            std::fs::read(dir.path().join("test").join("out.csv")).unwrap(),
            b"first\n"
        );
    }

    #[tokio::test]
    async fn test_failed_staging_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join(".out.csv.tmp");
        std::fs::write(&temp, b"partial").unwrap();

        let failed: Result<(), SinkError> = Err(SinkError::Io {
            path: temp.display().to_string(),
            source: std::io::Error::new(ErrorKind::Other, "disk full"),
        });
        assert!(discard_on_error(&temp, failed).await.is_err());
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_successful_staging_keeps_temp_file() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join(".out.csv.tmp");
        std::fs::write(&temp, b"complete").unwrap();

        discard_on_error(&temp, Ok(())).await.unwrap();
        assert!(temp.exists());
    }

    #[tokio::test]
    async fn test_commit_without_container_fails() {
        let dir = TempDir::new().unwrap();
        let sink = LocalDirSink::new(dir.path());

        let err = sink.commit("missing", "out.csv", Vec::new()).await.unwrap_err();

        assert!(matches!(err, SinkError::Io { .. }));
    }
}
