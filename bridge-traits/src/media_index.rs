//! Media Index Abstraction
//!
//! The host's index of audio files and playlists, modelled after a
//! content-provider table: queries take a column projection, a SQL-like
//! selection string and a sort order, and return rows as column maps.
//!
//! Mutations are announced through [`ChangeObserver`] callbacks that carry no
//! more detail than "something under this collection changed".
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_traits::media_index::{columns, MediaCollection, MediaQuery};
//!
//! let query = MediaQuery::new([columns::ID, columns::TITLE])
//!     .with_selection("is_music != 0")
//!     .with_sort_order("title COLLATE UNICODE ASC");
//! let rows = index.query(MediaCollection::Audio, &query).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Column names understood by every media index implementation.
pub mod columns {
    pub const ID: &str = "_id";
    pub const DATA: &str = "_data";
    pub const TITLE: &str = "title";
    pub const ARTIST: &str = "artist";
    pub const ARTIST_ID: &str = "artist_id";
    pub const ALBUM: &str = "album";
    pub const ALBUM_ID: &str = "album_id";
    pub const ALBUM_ARTIST: &str = "album_artist";
    pub const YEAR: &str = "year";
    pub const MIME_TYPE: &str = "mime_type";
    pub const TRACK: &str = "track";
    pub const DURATION: &str = "duration";
    pub const DATE_ADDED: &str = "date_added";
    pub const DATE_MODIFIED: &str = "date_modified";
    pub const DATE_TAKEN: &str = "datetaken";
    pub const COMPOSER: &str = "composer";
    pub const COMPILATION: &str = "compilation";
    pub const IS_MUSIC: &str = "is_music";

    // Extended columns, only present when `has_extended_columns()` is true.
    pub const DISC_NUMBER: &str = "disc_number";
    pub const CD_TRACK_NUMBER: &str = "cd_track_number";
    pub const GENRE: &str = "genre";
    pub const WRITER: &str = "writer";
    pub const AUTHOR: &str = "author";
    pub const IS_FAVORITE: &str = "is_favorite";

    // Playlist collections.
    pub const NAME: &str = "name";
    pub const AUDIO_ID: &str = "audio_id";
    pub const PLAY_ORDER: &str = "play_order";
}

/// Placeholder the index stores for missing artist/album tags.
pub const UNKNOWN_STRING: &str = "<unknown>";

// =============================================================================
// Query Result Types
// =============================================================================

/// A single row, keyed by column name. Columns absent from the row were
/// either not projected or not supported by the index.
pub type QueryRow = HashMap<String, QueryValue>;

/// A cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl QueryValue {
    /// Integer view. Text cells holding a number are parsed, real cells are
    /// truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            QueryValue::Integer(i) => Some(*i),
            QueryValue::Real(r) => Some(*r as i64),
            QueryValue::Text(s) => s.trim().parse().ok(),
            QueryValue::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// String view; integers are rendered.
    pub fn to_text(&self) -> Option<String> {
        match self {
            QueryValue::Text(s) => Some(s.clone()),
            QueryValue::Integer(i) => Some(i.to_string()),
            QueryValue::Real(r) => Some(r.to_string()),
            QueryValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::Integer(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        QueryValue::Integer(value.into())
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::Integer(value.into())
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Text(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Text(value)
    }
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(QueryValue::Null, Into::into)
    }
}

// =============================================================================
// Queries
// =============================================================================

/// Collections exposed by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaCollection {
    Audio,
    Playlists,
    /// Members of one playlist, by playlist id.
    PlaylistMembers(i64),
}

impl MediaCollection {
    /// Content identifier of the collection, used as the change-notification
    /// scope.
    pub fn content_uri(&self) -> String {
        match self {
            MediaCollection::Audio => "content://media/external/audio/media".to_string(),
            MediaCollection::Playlists => "content://media/external/audio/playlists".to_string(),
            MediaCollection::PlaylistMembers(id) => {
                format!("content://media/external/audio/playlists/{id}/members")
            }
        }
    }

    /// Whether changes to `other` are descendants of this collection.
    pub fn contains(&self, other: &MediaCollection) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (MediaCollection::Playlists, MediaCollection::PlaylistMembers(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MediaCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content_uri())
    }
}

/// Projection, selection and ordering for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaQuery {
    pub projection: Vec<String>,
    /// SQL-like filter, e.g. `is_music != 0 or mime_type = 'audio/ogg'`.
    pub selection: Option<String>,
    /// e.g. `title COLLATE UNICODE ASC`.
    pub sort_order: Option<String>,
}

impl MediaQuery {
    pub fn new<I, S>(projection: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            projection: projection.into_iter().map(Into::into).collect(),
            selection: None,
            sort_order: None,
        }
    }

    pub fn with_selection(mut self, selection: impl Into<String>) -> Self {
        self.selection = Some(selection.into());
        self
    }

    pub fn with_sort_order(mut self, sort_order: impl Into<String>) -> Self {
        self.sort_order = Some(sort_order.into());
        self
    }
}

// =============================================================================
// Change notifications
// =============================================================================

/// Registration handle returned by [`MediaIndex::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// One batched change ping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeNotification {
    pub self_change: bool,
    /// Changed content identifiers, when the platform reports them.
    pub uris: Vec<String>,
    /// Platform-specific delivery flags.
    pub flags: u32,
}

/// Receives change pings. Called from whatever thread the host delivers
/// notifications on, so implementations must not block.
pub trait ChangeObserver: Send + Sync {
    fn on_change(&self, notification: &ChangeNotification);
}

/// Media index trait.
///
/// ## Platform Notes
///
/// - **Android**: backed by `MediaStore` through a `ContentResolver`
/// - **Desktop**: `bridge_desktop::InMemoryMediaIndex`
///
/// Queries are read-only and may be issued concurrently.
#[async_trait::async_trait]
pub trait MediaIndex: Send + Sync {
    /// Runs a query against `collection`.
    ///
    /// Returns `BridgeError::PermissionDenied` when the host refuses access.
    async fn query(&self, collection: MediaCollection, query: &MediaQuery) -> Result<Vec<QueryRow>>;

    /// Registers `observer` for changes to `collection` (and, when
    /// `notify_for_descendants` is set, to collections it contains).
    fn register_observer(
        &self,
        collection: MediaCollection,
        notify_for_descendants: bool,
        observer: Arc<dyn ChangeObserver>,
    ) -> Result<ObserverId>;

    /// Removes a registration. Unknown ids are ignored.
    fn unregister_observer(&self, id: ObserverId);

    /// Whether the extended columns (disc number, favourite flag, genre,
    /// writer, author, cd track number) can be projected.
    fn has_extended_columns(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_value_conversions() {
        assert_eq!(QueryValue::Text("12".into()).as_i64(), Some(12));
        assert_eq!(QueryValue::Text("1/12".into()).as_i64(), None);
        assert_eq!(QueryValue::Integer(3).to_text(), Some("3".to_string()));
        assert_eq!(QueryValue::from(None::<i64>), QueryValue::Null);
        assert!(QueryValue::Null.as_str().is_none());
    }

    #[test]
    fn test_collection_containment() {
        assert!(MediaCollection::Playlists.contains(&MediaCollection::PlaylistMembers(4)));
        assert!(!MediaCollection::Audio.contains(&MediaCollection::Playlists));
        assert_eq!(
            MediaCollection::PlaylistMembers(4).content_uri(),
            "content://media/external/audio/playlists/4/members"
        );
    }

    #[test]
    fn test_query_builder() {
        let query = MediaQuery::new([columns::ID, columns::TITLE])
            .with_selection("is_music != 0")
            .with_sort_order("title COLLATE UNICODE ASC");
        assert_eq!(query.projection, vec!["_id", "title"]);
        assert_eq!(query.selection.as_deref(), Some("is_music != 0"));
    }
}
