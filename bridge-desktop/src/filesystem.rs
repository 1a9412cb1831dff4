//! `FileSystemAccess` over `tokio::fs`, used for cover lookups and playlist
//! files.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::FileSystemAccess,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }

    /// Keeps access refusals distinguishable from missing files.
    fn map_io_error(e: std::io::Error) -> BridgeError {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            BridgeError::PermissionDenied(e.to_string())
        } else {
            BridgeError::Io(e)
        }
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error)?
        {
            entries.push(entry.path());
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    async fn is_file(&self, path: &Path) -> bool {
        fs::metadata(path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
    }

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).await.map_err(Self::map_io_error)
    }

    async fn write_string(&self, path: &Path, contents: &str) -> Result<()> {
        fs::write(path, contents).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, bytes = contents.len(), "Wrote file");
        Ok(())
    }
}
