//! Folder cover lookup.

use std::path::{Path, PathBuf};

use bridge_traits::storage::FileSystemAccess;
use tracing::debug;

use crate::models::AlbumId;

/// Image extensions accepted as folder covers.
pub const COVER_EXTENSIONS: &[&str] = &["jpg", "png", "jpeg", "bmp", "tiff", "tif", "webp"];

/// File stems tried first, in order.
pub const PREFERRED_STEMS: &[&str] = &["cover", "folder", "front", "albumart"];

/// Generic per-album art URI.
pub fn album_art_uri(album_id: AlbumId) -> String {
    format!("content://media/external/audio/albumart/{album_id}")
}

/// Placeholder cover resolved lazily by the host image loader.
pub fn cover_stub_uri(scheme: &str, album_id: AlbumId, folder: &Path) -> String {
    format!("{scheme}://{album_id}{}", folder.display())
}

pub fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| COVER_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

fn stem_rank(path: &Path) -> usize {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    PREFERRED_STEMS
        .iter()
        .position(|preferred| *preferred == stem)
        .unwrap_or(PREFERRED_STEMS.len())
}

/// Picks the best image in `folder`: a preferred stem if present, otherwise
/// the first image by name. Listing failures count as "no cover".
pub async fn find_best_cover(fs: &dyn FileSystemAccess, folder: &Path) -> Option<PathBuf> {
    let entries = match fs.list_directory(folder).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(folder = ?folder, error = %e, "Cannot list folder for cover");
            return None;
        }
    };

    let mut candidates: Vec<PathBuf> = entries.into_iter().filter(|path| is_image(path)).collect();
    candidates.sort_by(|a, b| stem_rank(a).cmp(&stem_rank(b)).then_with(|| a.cmp(b)));

    for candidate in candidates {
        if fs.is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}
