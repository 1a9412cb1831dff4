//! Album artist resolution.
//!
//! Per-song tags are unreliable, so an album's artist is voted on once the
//! album's song list is complete. An explicit album-artist tag wins; without
//! one, a song artist credited on at least [`MAJORITY_PERCENT`] of the songs
//! is used. Anything below that resolves to no album artist, which groups
//! the album under the unknown artist instead of guessing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{ArtistId, Song};

pub const MAJORITY_PERCENT: usize = 80;

/// Resolved album artist name and the id credited with it on a song, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumArtist {
    pub name: String,
    pub id: Option<ArtistId>,
}

pub fn find_best_album_artist(songs: &[Arc<Song>]) -> Option<AlbumArtist> {
    if let Some(tag) = most_common(songs.iter().filter_map(|song| song.album_artist.as_deref())) {
        let id = songs
            .iter()
            .find(|song| song.artist.as_deref() == Some(tag.0))
            .and_then(|song| song.artist_id);
        return Some(AlbumArtist {
            name: tag.0.to_string(),
            id,
        });
    }

    let (name, votes) = most_common(songs.iter().filter_map(|song| song.artist.as_deref()))?;
    if votes * 100 < songs.len() * MAJORITY_PERCENT {
        return None;
    }
    let id = songs
        .iter()
        .find(|song| song.artist.as_deref() == Some(name))
        .and_then(|song| song.artist_id);
    Some(AlbumArtist {
        name: name.to_string(),
        id,
    })
}

/// Most frequent value with its count. Ties go to the value seen first.
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Option<(&'a str, usize)> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, value) in values.enumerate() {
        counts.entry(value).or_insert((0, position)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (a_count, a_first)), (_, (b_count, b_first))| {
            a_count.cmp(b_count).then(b_first.cmp(a_first))
        })
        .map(|(value, (count, _))| (value, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SongExtras, SongId};

    fn song(id: i64, artist: &str, artist_id: i64, album_artist: Option<&str>) -> Arc<Song> {
        Arc::new(Song {
            id: SongId(id),
            path: None,
            content_uri: String::new(),
            title: format!("t{id}"),
            artist: Some(artist.to_string()),
            artist_id: Some(ArtistId(artist_id)),
            album: Some("A".to_string()),
            album_id: None,
            album_artist: album_artist.map(str::to_string),
            genre: None,
            track_number: None,
            disc_number: None,
            year: None,
            recorded_at: None,
            duration_ms: None,
            favorite: None,
            mime_type: String::new(),
            artwork_uri: String::new(),
            date_added: None,
            date_modified: None,
            has_no_metadata: false,
            extras: SongExtras::default(),
        })
    }

    #[test]
    fn test_four_of_five_is_majority() {
        let songs = vec![
            song(1, "X", 10, None),
            song(2, "X", 10, None),
            song(3, "Y", 11, None),
            song(4, "X", 10, None),
            song(5, "X", 10, None),
        ];
        assert_eq!(
            find_best_album_artist(&songs),
            Some(AlbumArtist {
                name: "X".to_string(),
                id: Some(ArtistId(10)),
            })
        );
    }

    #[test]
    fn test_three_of_five_has_no_album_artist() {
        let songs = vec![
            song(1, "X", 10, None),
            song(2, "X", 10, None),
            song(3, "Y", 11, None),
            song(4, "Z", 12, None),
            song(5, "X", 10, None),
        ];
        assert_eq!(find_best_album_artist(&songs), None);
    }

    #[test]
    fn test_explicit_tag_wins_over_majority() {
        let songs = vec![
            song(1, "X", 10, Some("Various")),
            song(2, "X", 10, None),
            song(3, "X", 10, None),
        ];
        let resolved = find_best_album_artist(&songs).unwrap();
        assert_eq!(resolved.name, "Various");
        assert_eq!(resolved.id, None);
    }

    #[test]
    fn test_empty_album() {
        assert_eq!(find_best_album_artist(&[]), None);
    }
}
