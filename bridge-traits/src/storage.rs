//! Filesystem access.
//!
//! The reader only needs a narrow slice of the filesystem: listing a folder
//! when looking for cover images, checking that playlist entries point at
//! real files, and reading/writing playlist files.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// File system access trait.
///
/// Implementations return absolute paths from `list_directory`.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// List all entries in a directory.
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Whether `path` exists and is a regular file. Errors count as `false`.
    async fn is_file(&self, path: &Path) -> bool;

    /// Read a whole file as UTF-8 text.
    async fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Write `contents`, replacing any existing file.
    async fn write_string(&self, path: &Path, contents: &str) -> Result<()>;
}
