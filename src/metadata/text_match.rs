//! Text normalization and fuzzy scoring for catalog candidates.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Score assigned to candidates whose title shares no token with the wanted
/// title. Sits below every acceptance threshold.
pub const REJECTED_SCORE: i32 = -100;

const FEATURING_MARKERS: [&str; 3] = ["feat", "featuring", "ft"];
const EDITION_WORDS: [&str; 6] = [
    "deluxe",
    "remastered",
    "edition",
    "version",
    "clean",
    "explicit",
];

fn bracketed_segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("bracketed segment pattern is valid")
    })
}

fn artwork_size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\d{2,4}x\d{2,4}").expect("artwork size pattern is valid"))
}

fn split_alphanumeric_runs(value: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            current.push(ch);
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Lowercases, replaces `&` with `and` in place, drops featuring markers, and
/// collapses every non-alphanumeric run to a single space.
pub fn normalize(value: &str) -> String {
    let lowered = value.to_lowercase().replace('&', "and");
    split_alphanumeric_runs(&lowered)
        .into_iter()
        .filter(|word| !FEATURING_MARKERS.contains(&word.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// [`normalize`] after removing bracketed segments and edition words.
pub fn normalize_album(value: &str) -> String {
    let stripped = bracketed_segment_pattern().replace_all(value, " ");
    normalize(&stripped)
        .split_whitespace()
        .filter(|word| !EDITION_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// URL slug form: lowercase, `&` as `and`, non-alphanumeric runs as hyphens.
pub fn slugify(value: &str) -> String {
    let lowered = value.to_lowercase().replace('&', "and");
    split_alphanumeric_runs(&lowered).join("-")
}

/// True when any path segment of `url` equals `slug`.
pub fn url_has_path_segment(url: &str, slug: &str) -> bool {
    if slug.is_empty() {
        return false;
    }
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .split(&['?', '#'][..])
        .next()
        .unwrap_or_default();
    path.split('/')
        .skip(1)
        .any(|segment| segment.eq_ignore_ascii_case(slug))
}

/// Rewrites every `WxH` size token in a catalog artwork URL to `size`x`size`.
pub fn upscale_artwork_url(url: &str, size: u32) -> String {
    let replacement = format!("{size}x{size}");
    artwork_size_pattern()
        .replace_all(url, replacement.as_str())
        .into_owned()
}

fn tokens(value: &str) -> HashSet<&str> {
    value.split_whitespace().collect()
}

fn token_overlap(left: &str, right: &str) -> usize {
    let left_tokens = tokens(left);
    let right_tokens = tokens(right);
    left_tokens.intersection(&right_tokens).count()
}

fn contains_either_way(left: &str, right: &str) -> bool {
    !left.is_empty() && !right.is_empty() && (left.contains(right) || right.contains(left))
}

/// Wanted track fields, normalized once per lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchQuery {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl MatchQuery {
    pub fn new(title: &str, artist: &str, album: &str) -> Self {
        Self {
            title: normalize(title),
            artist: normalize(artist),
            album: normalize_album(album),
        }
    }

    /// Minimum winning score for a plain song search.
    pub fn song_threshold(&self) -> i32 {
        if self.artist.is_empty() {
            3
        } else {
            4
        }
    }
}

/// Catalog fields a candidate exposes for scoring; missing fields are empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateText<'a> {
    pub track_name: &'a str,
    pub artist_name: &'a str,
    pub album_name: &'a str,
    pub has_artwork: bool,
}

/// Scores a song candidate against the wanted fields.
pub fn score_candidate(query: &MatchQuery, candidate: &CandidateText<'_>) -> i32 {
    let track_name = normalize(candidate.track_name);
    let artist_name = normalize(candidate.artist_name);
    let album_name = normalize_album(candidate.album_name);
    let mut score = 0;

    if !query.title.is_empty() {
        let overlap = token_overlap(&query.title, &track_name);
        if overlap == 0 {
            return REJECTED_SCORE;
        }
        if track_name == query.title {
            score += 6;
        } else if contains_either_way(&query.title, &track_name) {
            score += 3;
        }
        score += overlap.min(2) as i32;
    }

    if !query.artist.is_empty() && !artist_name.is_empty() {
        if artist_name == query.artist {
            score += 4;
        } else if contains_either_way(&query.artist, &artist_name) {
            score += 2;
        }
        if token_overlap(&query.artist, &artist_name) == 0 {
            score -= 5;
        }
    }

    if !query.album.is_empty() {
        if album_name == query.album {
            score += 6;
        } else if contains_either_way(&query.album, &album_name) {
            score += 2;
        } else if token_overlap(&query.album, &album_name) == 0 {
            score -= 2;
        }
    }

    if candidate.has_artwork {
        score += 1;
    }

    score
}

/// Scores an album-entity candidate by album and artist name.
pub fn score_album_candidate(query: &MatchQuery, candidate: &CandidateText<'_>) -> i32 {
    let album_name = normalize_album(candidate.album_name);
    let artist_name = normalize(candidate.artist_name);
    let mut score = 0;

    if !album_name.is_empty() && album_name == query.album {
        score += 6;
    } else if contains_either_way(&query.album, &album_name) {
        score += 3;
    }

    if !query.artist.is_empty() && !artist_name.is_empty() {
        if artist_name == query.artist {
            score += 4;
        } else if contains_either_way(&query.artist, &artist_name) {
            score += 2;
        }
    }

    if candidate.has_artwork {
        score += 1;
    }

    score
}

/// True when the candidate album shares text with the wanted album.
pub fn album_overlaps(query: &MatchQuery, album_name: &str) -> bool {
    let album_name = normalize_album(album_name);
    contains_either_way(&query.album, &album_name) || token_overlap(&query.album, &album_name) > 0
}

/// Picks the highest-scoring candidate if it reaches `threshold`.
///
/// Ties keep the earliest candidate, preserving the catalog's own ranking.
pub fn pick_best<T>(scored: Vec<(T, i32)>, threshold: i32) -> Option<T> {
    let mut best: Option<(T, i32)> = None;
    for (candidate, score) in scored {
        let replace = best
            .as_ref()
            .map_or(true, |(_, best_score)| score > *best_score);
        if replace {
            best = Some((candidate, score));
        }
    }
    best.filter(|(_, score)| *score >= threshold)
        .map(|(candidate, _)| candidate)
}
