//! MusicBrainz recording search followed by a Cover Art Archive fetch.

use std::time::Duration;

use log::debug;
use serde_json::Value;

use crate::error::PresenceError;
use crate::metadata::catalog_http::JsonTransport;
use crate::metadata::text_match::{normalize, normalize_album, pick_best, MatchQuery};
use crate::protocol::ResolvedLinks;

pub const MUSICBRAINZ_RECORDING_SEARCH_URL: &str = "https://musicbrainz.org/ws/2/recording";
pub const MUSICBRAINZ_RELEASE_PAGE_URL: &str = "https://musicbrainz.org/release";
pub const COVER_ART_RELEASE_URL: &str = "https://coverartarchive.org/release";
const RECORDING_SEARCH_LIMIT: &str = "5";
const RECORDING_ACCEPT_SCORE: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbRelease {
    pub id: String,
    pub title: String,
    pub has_front_art: bool,
    pub has_artwork: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbRecording {
    pub id: String,
    pub title: String,
    pub artist_credit: String,
    /// Search relevance reported by the server (0–100).
    pub search_score: i32,
    pub releases: Vec<MbRelease>,
}

fn escape_lucene_phrase(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Fielded Lucene query: `recording:"…" AND artist:"…" AND release:"…"`.
pub fn build_recording_query(title: &str, artist: &str, album: &str) -> String {
    [("recording", title), ("artist", artist), ("release", album)]
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(field, value)| format!("{field}:\"{}\"", escape_lucene_phrase(value.trim())))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn str_field<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn parse_release(item: &Value) -> Option<MbRelease> {
    let id = str_field(item, "id").trim();
    if id.is_empty() {
        return None;
    }
    let cover_art = item.get("cover-art-archive");
    let flag = |key: &str| {
        cover_art
            .and_then(|value| value.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    Some(MbRelease {
        id: id.to_string(),
        title: str_field(item, "title").to_string(),
        has_front_art: flag("front"),
        has_artwork: flag("artwork"),
    })
}

fn search_score(item: &Value) -> i32 {
    match item.get("score") {
        Some(Value::Number(number)) => number.as_i64().unwrap_or(0) as i32,
        Some(Value::String(text)) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Extracts recordings from a search response.
pub fn parse_recordings(value: &Value) -> Result<Vec<MbRecording>, PresenceError> {
    let recordings = value
        .get("recordings")
        .and_then(Value::as_array)
        .ok_or_else(|| PresenceError::Parse("recording search has no recordings array".to_string()))?;

    Ok(recordings
        .iter()
        .filter(|item| item.is_object())
        .map(|item| {
            let artist_credit = item
                .get("artist-credit")
                .and_then(Value::as_array)
                .map(|credits| {
                    credits
                        .iter()
                        .filter_map(|credit| credit.get("name").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();
            let releases = item
                .get("releases")
                .and_then(Value::as_array)
                .map(|releases| releases.iter().filter_map(parse_release).collect())
                .unwrap_or_default();
            MbRecording {
                id: str_field(item, "id").to_string(),
                title: str_field(item, "title").to_string(),
                artist_credit,
                search_score: search_score(item),
                releases,
            }
        })
        .collect())
}

fn equal_or_contains(wanted: &str, found: &str) -> (bool, bool) {
    let exact = !wanted.is_empty() && wanted == found;
    let partial = !wanted.is_empty()
        && !found.is_empty()
        && (wanted.contains(found) || found.contains(wanted));
    (exact, partial)
}

/// Scores a recording by title, credited artists, release titles, and the
/// server's own relevance.
pub fn score_recording(recording: &MbRecording, query: &MatchQuery) -> i32 {
    let mut score = 0;

    let (exact, partial) = equal_or_contains(&query.title, &normalize(&recording.title));
    if exact {
        score += 6;
    } else if partial {
        score += 3;
    }

    let (exact, partial) = equal_or_contains(&query.artist, &normalize(&recording.artist_credit));
    if exact {
        score += 4;
    } else if partial {
        score += 2;
    }

    if !query.album.is_empty() {
        for release in &recording.releases {
            let (exact, partial) = equal_or_contains(&query.album, &normalize_album(&release.title));
            if exact {
                score += 2;
                break;
            }
            if partial {
                score += 1;
                break;
            }
        }
    }

    score + recording.search_score.max(0) / 25
}

/// Chooses the release most likely to carry cover art.
pub fn pick_release_with_art<'a>(
    releases: &'a [MbRelease],
    query: &MatchQuery,
) -> Option<&'a MbRelease> {
    let scored = releases
        .iter()
        .map(|release| {
            let mut score = 0;
            let (exact, partial) = equal_or_contains(&query.album, &normalize_album(&release.title));
            if exact {
                score += 3;
            } else if partial {
                score += 1;
            }
            if release.has_front_art {
                score += 2;
            }
            if release.has_artwork {
                score += 1;
            }
            (release, score)
        })
        .collect();
    pick_best(scored, i32::MIN)
}

/// First image flagged `front`, else the first image.
pub fn parse_cover_art_image(value: &Value) -> Option<String> {
    let images = value.get("images").and_then(Value::as_array)?;
    let image_url = |image: &Value| {
        image
            .get("image")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(ToString::to_string)
    };
    images
        .iter()
        .find(|image| image.get("front").and_then(Value::as_bool) == Some(true))
        .and_then(image_url)
        .or_else(|| images.first().and_then(image_url))
}

/// Open-database step of the resolver pipeline.
pub struct MusicBrainzLookup<'a> {
    transport: &'a dyn JsonTransport,
    courtesy_delay: Duration,
}

impl<'a> MusicBrainzLookup<'a> {
    pub fn new(transport: &'a dyn JsonTransport, courtesy_delay: Duration) -> Self {
        Self {
            transport,
            courtesy_delay,
        }
    }

    /// Returns artwork and the release page, or `None` when any stage misses.
    pub fn lookup(
        &self,
        title: &str,
        artist: &str,
        album: &str,
        query: &MatchQuery,
    ) -> Result<Option<ResolvedLinks>, PresenceError> {
        let lucene = build_recording_query(title, artist, album);
        let search = self.transport.get_json(
            MUSICBRAINZ_RECORDING_SEARCH_URL,
            &[
                ("query", lucene.as_str()),
                ("fmt", "json"),
                ("limit", RECORDING_SEARCH_LIMIT),
            ],
        )?;
        let recordings = parse_recordings(&search)?;
        let scored = recordings
            .into_iter()
            .map(|recording| {
                let score = score_recording(&recording, query);
                (recording, score)
            })
            .collect();
        let Some(recording) = pick_best(scored, RECORDING_ACCEPT_SCORE) else {
            return Ok(None);
        };
        let Some(release) = pick_release_with_art(&recording.releases, query) else {
            debug!(
                "MusicBrainz: recording {} has no releases to fetch art for",
                recording.id
            );
            return Ok(None);
        };

        if !self.courtesy_delay.is_zero() {
            std::thread::sleep(self.courtesy_delay);
        }

        let cover_art_url = format!("{COVER_ART_RELEASE_URL}/{}", release.id);
        let cover_art = self.transport.get_json(&cover_art_url, &[])?;
        let Some(artwork_url) = parse_cover_art_image(&cover_art) else {
            return Ok(None);
        };

        Ok(Some(ResolvedLinks {
            artwork_url: Some(artwork_url),
            track_url: None,
            album_url: Some(format!("{MUSICBRAINZ_RELEASE_PAGE_URL}/{}", release.id)),
        }))
    }
}
