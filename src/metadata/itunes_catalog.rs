//! iTunes Search API client: song and album searches with tolerant parsing.

use serde_json::Value;

use crate::error::PresenceError;
use crate::metadata::catalog_http::JsonTransport;

pub const ITUNES_SEARCH_URL: &str = "https://itunes.apple.com/search";
pub const SLUG_SEARCH_LIMIT: usize = 10;
pub const SONG_SEARCH_LIMIT: usize = 8;
pub const ALBUM_SEARCH_LIMIT: usize = 6;

/// One `entity=song` search result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CatalogSong {
    pub track_name: String,
    pub artist_name: String,
    pub album_name: String,
    pub artwork_url: Option<String>,
    pub track_url: Option<String>,
    pub album_url: Option<String>,
}

/// One `entity=album` search result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CatalogAlbum {
    pub album_name: String,
    pub artist_name: String,
    pub artwork_url: Option<String>,
    pub album_url: Option<String>,
}

fn string_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn optional_url(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        item.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    })
}

fn results_array(value: &Value) -> Result<&Vec<Value>, PresenceError> {
    value
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| PresenceError::Parse("catalog response has no results array".to_string()))
}

/// Extracts song candidates; non-object entries are skipped.
pub fn parse_song_results(value: &Value) -> Result<Vec<CatalogSong>, PresenceError> {
    Ok(results_array(value)?
        .iter()
        .filter(|item| item.is_object())
        .map(|item| CatalogSong {
            track_name: string_field(item, "trackName"),
            artist_name: string_field(item, "artistName"),
            album_name: string_field(item, "collectionName"),
            artwork_url: optional_url(item, &["artworkUrl600", "artworkUrl100", "artworkUrl60"]),
            track_url: optional_url(item, &["trackViewUrl"]),
            album_url: optional_url(item, &["collectionViewUrl"]),
        })
        .collect())
}

/// Extracts album candidates; non-object entries are skipped.
pub fn parse_album_results(value: &Value) -> Result<Vec<CatalogAlbum>, PresenceError> {
    Ok(results_array(value)?
        .iter()
        .filter(|item| item.is_object())
        .map(|item| CatalogAlbum {
            album_name: string_field(item, "collectionName"),
            artist_name: string_field(item, "artistName"),
            artwork_url: optional_url(item, &["artworkUrl100", "artworkUrl60"]),
            album_url: optional_url(item, &["collectionViewUrl"]),
        })
        .collect())
}

/// Thin client over the free-text search endpoint.
pub struct ItunesCatalog<'a> {
    transport: &'a dyn JsonTransport,
    country: &'a str,
}

impl<'a> ItunesCatalog<'a> {
    pub fn new(transport: &'a dyn JsonTransport, country: &'a str) -> Self {
        Self { transport, country }
    }

    fn search(&self, term: &str, entity: &str, limit: usize) -> Result<Value, PresenceError> {
        let limit = limit.to_string();
        self.transport.get_json(
            ITUNES_SEARCH_URL,
            &[
                ("term", term),
                ("media", "music"),
                ("entity", entity),
                ("limit", limit.as_str()),
                ("country", self.country),
            ],
        )
    }

    pub fn search_songs(&self, term: &str, limit: usize) -> Result<Vec<CatalogSong>, PresenceError> {
        let value = self.search(term, "song", limit)?;
        parse_song_results(&value)
    }

    pub fn search_albums(
        &self,
        term: &str,
        limit: usize,
    ) -> Result<Vec<CatalogAlbum>, PresenceError> {
        let value = self.search(term, "album", limit)?;
        parse_album_results(&value)
    }
}

/// Joins non-empty parts with single spaces.
pub fn search_term(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
