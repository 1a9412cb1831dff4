//! Track and disc number inference.
//!
//! The index stores whatever the tag reader produced, which is often nothing.
//! Missing track numbers are recovered from the `cd_track_number` column or
//! a numeric file name prefix, and `disc * 1000 + track` encodings are split.

use std::sync::OnceLock;

use regex::Regex;

/// Matches `04.Title.mp3` style file names.
fn track_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([0-9]+)\..*$").expect("track prefix pattern is valid"))
}

/// Track position as stored, before inference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RawPosition<'a> {
    pub track: Option<i32>,
    pub disc: Option<i32>,
    pub cd_track_number: Option<String>,
    pub file_name: Option<&'a str>,
    pub title: &'a str,
    pub has_no_metadata: bool,
}

/// Resolved track position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TrackPosition {
    pub track: Option<i32>,
    pub disc: Option<i32>,
    /// Left over when it was not a plain number
    pub cd_track_number: Option<String>,
}

pub(crate) fn resolve(raw: RawPosition<'_>) -> TrackPosition {
    let mut track = raw.track;
    let mut disc = raw.disc;
    let mut cd_track_number = raw.cd_track_number;

    if track.is_none() {
        if let Some(parsed) = cd_track_number.as_deref().and_then(|value| value.parse().ok()) {
            track = Some(parsed);
            cd_track_number = None;
        }
    }

    if track.is_none() {
        track = raw
            .file_name
            .and_then(|name| track_prefix().captures(name))
            .and_then(|captures| captures.get(1))
            .filter(|prefix| raw.has_no_metadata || !raw.title.starts_with(prefix.as_str()))
            .and_then(|prefix| prefix.as_str().parse().ok());
    }

    if let Some(value) = track {
        let encoded_disc = value / 1000;
        let disc_consistent = matches!(disc, None | Some(0)) || disc == Some(encoded_disc);
        if value >= 1000 && disc_consistent {
            disc = Some(encoded_disc);
            track = Some(value % 1000);
        }
    }

    TrackPosition {
        track,
        disc,
        cd_track_number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw<'a>(file_name: &'a str, title: &'a str) -> RawPosition<'a> {
        RawPosition {
            file_name: Some(file_name),
            title,
            ..RawPosition::default()
        }
    }

    #[test]
    fn test_disc_encoded_track_is_split() {
        let position = resolve(RawPosition {
            track: Some(1007),
            ..raw("x.mp3", "x")
        });
        assert_eq!(position.disc, Some(1));
        assert_eq!(position.track, Some(7));
    }

    #[test]
    fn test_disc_split_respects_conflicting_disc() {
        let position = resolve(RawPosition {
            track: Some(2003),
            disc: Some(1),
            ..raw("x.mp3", "x")
        });
        assert_eq!(position.track, Some(2003));
        assert_eq!(position.disc, Some(1));

        let consistent = resolve(RawPosition {
            track: Some(2003),
            disc: Some(2),
            ..raw("x.mp3", "x")
        });
        assert_eq!(consistent.track, Some(3));
    }

    #[test]
    fn test_file_name_prefix_inferred() {
        let position = resolve(raw("04.Song Title.mp3", "Song Title"));
        assert_eq!(position.track, Some(4));
    }

    #[test]
    fn test_title_with_prefix_is_not_overridden() {
        let position = resolve(raw("04.Song Title.mp3", "04 Song Title"));
        assert_eq!(position.track, None);
    }

    #[test]
    fn test_prefix_used_when_title_is_file_name() {
        let position = resolve(RawPosition {
            has_no_metadata: true,
            ..raw("04.Song Title.mp3", "04.Song Title")
        });
        assert_eq!(position.track, Some(4));
    }

    #[test]
    fn test_cd_track_number_fallback() {
        let numeric = resolve(RawPosition {
            cd_track_number: Some("12".to_string()),
            ..raw("a.mp3", "a")
        });
        assert_eq!(numeric.track, Some(12));
        assert_eq!(numeric.cd_track_number, None);

        let fraction = resolve(RawPosition {
            cd_track_number: Some("3/12".to_string()),
            ..raw("a.mp3", "a")
        });
        assert_eq!(fraction.track, None);
        assert_eq!(fraction.cd_track_number.as_deref(), Some("3/12"));
    }

    #[test]
    fn test_explicit_track_wins() {
        let position = resolve(RawPosition {
            track: Some(9),
            cd_track_number: Some("3".to_string()),
            ..raw("01.a.mp3", "a")
        });
        assert_eq!(position.track, Some(9));
        assert_eq!(position.cd_track_number.as_deref(), Some("3"));
    }
}
