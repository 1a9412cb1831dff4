//! Row builders for [`InMemoryMediaIndex`](crate::InMemoryMediaIndex).

use bridge_traits::media_index::{columns, QueryRow, QueryValue};

/// Builds one audio row with sensible defaults: a music file of three
/// minutes, `audio/mpeg`, added and modified at the epoch.
#[derive(Debug, Clone)]
pub struct AudioRowBuilder {
    row: QueryRow,
}

impl AudioRowBuilder {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        let mut row = QueryRow::new();
        row.insert(columns::ID.to_string(), QueryValue::Integer(id));
        row.insert(columns::TITLE.to_string(), QueryValue::Text(title.into()));
        row.insert(columns::IS_MUSIC.to_string(), QueryValue::Integer(1));
        row.insert(columns::MIME_TYPE.to_string(), "audio/mpeg".into());
        row.insert(columns::DURATION.to_string(), QueryValue::Integer(180_000));
        row.insert(columns::DATE_ADDED.to_string(), QueryValue::Integer(0));
        row.insert(columns::DATE_MODIFIED.to_string(), QueryValue::Integer(0));
        Self { row }
    }

    /// Sets an arbitrary column.
    pub fn set(mut self, column: &str, value: impl Into<QueryValue>) -> Self {
        self.row.insert(column.to_string(), value.into());
        self
    }

    pub fn path(self, path: impl Into<String>) -> Self {
        self.set(columns::DATA, QueryValue::Text(path.into()))
    }

    pub fn artist(self, name: impl Into<String>, id: i64) -> Self {
        self.set(columns::ARTIST, QueryValue::Text(name.into()))
            .set(columns::ARTIST_ID, id)
    }

    pub fn album(self, title: impl Into<String>, id: i64) -> Self {
        self.set(columns::ALBUM, QueryValue::Text(title.into()))
            .set(columns::ALBUM_ID, id)
    }

    pub fn album_artist(self, name: impl Into<String>) -> Self {
        self.set(columns::ALBUM_ARTIST, QueryValue::Text(name.into()))
    }

    pub fn track(self, track: i64) -> Self {
        self.set(columns::TRACK, track)
    }

    pub fn disc(self, disc: i64) -> Self {
        self.set(columns::DISC_NUMBER, disc)
    }

    pub fn year(self, year: i32) -> Self {
        self.set(columns::YEAR, year)
    }

    pub fn genre(self, genre: impl Into<String>) -> Self {
        self.set(columns::GENRE, QueryValue::Text(genre.into()))
    }

    pub fn duration_ms(self, duration: i64) -> Self {
        self.set(columns::DURATION, duration)
    }

    pub fn mime_type(self, mime_type: impl Into<String>) -> Self {
        self.set(columns::MIME_TYPE, QueryValue::Text(mime_type.into()))
    }

    pub fn favorite(self, favorite: bool) -> Self {
        self.set(columns::IS_FAVORITE, favorite)
    }

    pub fn date_added(self, unix_seconds: i64) -> Self {
        self.set(columns::DATE_ADDED, unix_seconds)
    }

    /// Marks the row as a non-music file (ringtone, recording).
    pub fn not_music(self) -> Self {
        self.set(columns::IS_MUSIC, 0i64)
    }

    pub fn build(self) -> QueryRow {
        self.row
    }
}

/// Builds a playlist row together with its member rows.
#[derive(Debug, Clone)]
pub struct PlaylistRowBuilder {
    row: QueryRow,
    members: Vec<QueryRow>,
}

impl PlaylistRowBuilder {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        let mut row = QueryRow::new();
        row.insert(columns::ID.to_string(), QueryValue::Integer(id));
        row.insert(columns::NAME.to_string(), QueryValue::Text(name.into()));
        row.insert(columns::DATE_ADDED.to_string(), QueryValue::Integer(0));
        row.insert(columns::DATE_MODIFIED.to_string(), QueryValue::Integer(0));
        Self {
            row,
            members: Vec::new(),
        }
    }

    /// Backing playlist file.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.row
            .insert(columns::DATA.to_string(), QueryValue::Text(path.into()));
        self
    }

    pub fn dates(mut self, added: i64, modified: i64) -> Self {
        self.row
            .insert(columns::DATE_ADDED.to_string(), QueryValue::Integer(added));
        self.row
            .insert(columns::DATE_MODIFIED.to_string(), QueryValue::Integer(modified));
        self
    }

    pub fn member(mut self, audio_id: i64, play_order: i64) -> Self {
        let mut member = QueryRow::new();
        member.insert(columns::AUDIO_ID.to_string(), QueryValue::Integer(audio_id));
        member.insert(columns::PLAY_ORDER.to_string(), QueryValue::Integer(play_order));
        self.members.push(member);
        self
    }

    pub fn build(self) -> (QueryRow, Vec<QueryRow>) {
        (self.row, self.members)
    }
}
