//! M3U playlist files.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    playlist::PlaylistSerializer,
    storage::FileSystemAccess,
};
use tracing::debug;

/// Reads and writes `.m3u` / `.m3u8` playlists through a
/// [`FileSystemAccess`].
///
/// Reading skips `#` lines, percent-decodes each entry and resolves relative
/// entries against the playlist's folder. Writing emits an `#EXTM3U` header
/// followed by one path per line, relative to the playlist's folder where
/// possible.
pub struct M3uPlaylistSerializer {
    fs: Arc<dyn FileSystemAccess>,
}

impl M3uPlaylistSerializer {
    pub fn new(fs: Arc<dyn FileSystemAccess>) -> Self {
        Self { fs }
    }

    fn check_format(file: &Path) -> Result<()> {
        let extension = file
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "m3u" | "m3u8" => Ok(()),
            _ => Err(BridgeError::UnsupportedFormat(extension)),
        }
    }

    fn parent_of(file: &Path) -> Result<&Path> {
        file.parent().ok_or_else(|| {
            BridgeError::OperationFailed(format!("Playlist {} has no parent folder", file.display()))
        })
    }
}

#[async_trait]
impl PlaylistSerializer for M3uPlaylistSerializer {
    async fn read(&self, file: &Path) -> Result<Vec<PathBuf>> {
        Self::check_format(file)?;
        let parent = Self::parent_of(file)?;
        let contents = self.fs.read_to_string(file).await?;

        let entries: Vec<PathBuf> = contents
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                let decoded = urlencoding::decode(line)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| line.to_string());
                normalize(&parent.join(decoded))
            })
            .collect();

        debug!(playlist = ?file, entries = entries.len(), "Read playlist file");
        Ok(entries)
    }

    async fn write(&self, file: &Path, songs: &[PathBuf]) -> Result<()> {
        Self::check_format(file)?;
        let parent = Self::parent_of(file)?;

        let body = songs
            .iter()
            .map(|song| relative_to(song, parent).display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let contents = format!("#EXTM3U\n{}", body.trim());

        self.fs.write_string(file, &contents).await
    }
}

/// Resolves `.` and `..` components lexically.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `path` relative to `base`, climbing with `..` where needed.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path_components: Vec<Component<'_>> = path.components().collect();
    let base_components: Vec<Component<'_>> = base.components().collect();
    let common = path_components
        .iter()
        .zip(&base_components)
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return path.to_path_buf();
    }

    let mut out = PathBuf::new();
    for _ in common..base_components.len() {
        out.push("..");
    }
    for component in &path_components[common..] {
        out.push(component.as_os_str());
    }
    out
}
