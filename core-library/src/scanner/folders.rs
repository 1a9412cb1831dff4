//! Folder tree accumulation.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::models::{AlbumId, FileNode, ScanResult, Song};

/// Builds the full folder tree, the one-level shallow tree and the flat
/// folder set during a scan.
pub(crate) struct FolderTrees {
    root: FileNode,
    shallow: FileNode,
    folders: BTreeSet<String>,
    /// Folder holding the first song seen for each album
    first_folder: HashMap<AlbumId, PathBuf>,
}

impl FolderTrees {
    pub(crate) fn new() -> Self {
        Self {
            root: FileNode::new(ScanResult::FOLDER_ROOT),
            shallow: FileNode::new(ScanResult::SHALLOW_ROOT),
            folders: BTreeSet::new(),
            first_folder: HashMap::new(),
        }
    }

    pub(crate) fn add_to_tree(&mut self, song: &Arc<Song>, folder: &Path) {
        let node = components(folder).fold(&mut self.root, |node, name| node.child_mut(&name, &name));
        node.add_song(song.clone(), song.album_id);
        if let Some(album_id) = song.album_id {
            self.first_folder
                .entry(album_id)
                .or_insert_with(|| folder.to_path_buf());
        }
    }

    pub(crate) fn add_to_shallow(&mut self, song: &Arc<Song>, folder: &Path) {
        let key = folder.display().to_string();
        let name = folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.clone());
        self.shallow
            .child_mut(&key, &name)
            .add_song(song.clone(), song.album_id);
    }

    pub(crate) fn add_folder(&mut self, folder: &Path) {
        self.folders.insert(folder.display().to_string());
    }

    /// First-seen folder of `album_id` if every song directly inside it
    /// belongs to that album.
    pub(crate) fn single_album_folder(&self, album_id: AlbumId) -> Option<&Path> {
        let folder = self.first_folder.get(&album_id)?;
        let node = components(folder).try_fold(&self.root, |node, name| node.folders.get(&name))?;
        (node.single_album() == Some(album_id)).then_some(folder.as_path())
    }

    pub(crate) fn finish(
        mut self,
        blacklist: &BTreeSet<String>,
    ) -> (FileNode, FileNode, BTreeSet<String>) {
        self.folders.extend(blacklist.iter().cloned());
        (self.root, self.shallow, self.folders)
    }
}

fn components(path: &Path) -> impl Iterator<Item = String> + '_ {
    path.components().filter_map(|component| match component {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    })
}
