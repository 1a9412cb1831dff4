//! Playlist file serialization.
//!
//! Contract: files are line oriented, one relative or absolute path per
//! line; comment lines are skipped and paths are percent-decoded. Formats
//! other than the supported ones fail with `BridgeError::UnsupportedFormat`.

use std::path::{Path, PathBuf};

use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PlaylistSerializer: Send + Sync {
    /// Reads the ordered song paths stored in `file`, resolved to absolute
    /// paths.
    async fn read(&self, file: &Path) -> Result<Vec<PathBuf>>;

    /// Writes `songs` to `file` in order.
    async fn write(&self, file: &Path, songs: &[PathBuf]) -> Result<()>;
}
