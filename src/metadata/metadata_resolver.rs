//! Memoized artwork/link resolver built on a provider fallback chain.
//!
//! Steps, in order, stopping at the first accepted hit:
//! 1. catalog song search restricted to candidates whose page slug matches the title
//! 2. MusicBrainz recording search plus Cover Art Archive
//! 3. catalog album search (only when an album is known)
//! 4. catalog song search over title, artist, and album
//!
//! Network and payload failures degrade a step to "no result"; nothing
//! escapes [`MetadataResolver::resolve_track`].

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::LookupConfig;
use crate::error::PresenceError;
use crate::metadata::catalog_http::JsonTransport;
use crate::metadata::itunes_catalog::{
    search_term, CatalogSong, ItunesCatalog, ALBUM_SEARCH_LIMIT, SLUG_SEARCH_LIMIT,
    SONG_SEARCH_LIMIT,
};
use crate::metadata::musicbrainz_lookup::MusicBrainzLookup;
use crate::metadata::resolution_cache::ResolutionCache;
use crate::metadata::text_match::{
    album_overlaps, pick_best, score_album_candidate, score_candidate, slugify,
    upscale_artwork_url, url_has_path_segment, CandidateText, MatchQuery,
};
use crate::protocol::{ResolvedLinks, TrackKey};

const ALBUM_ACCEPT_SCORE: i32 = 5;

/// Resolution capability used by the coordinator's worker.
pub trait TrackResolver: Send + Sync {
    /// Resolves links for `key`; never fails, misses return all-empty links.
    fn resolve(&self, key: &TrackKey) -> ResolvedLinks;

    /// Returns an already-known result without touching the network.
    fn cached(&self, key: &TrackKey) -> Option<ResolvedLinks>;
}

/// Tunables for the lookup pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    pub musicbrainz_enabled: bool,
    pub courtesy_delay: Duration,
    pub artwork_size_px: u32,
    pub country: String,
    pub cache_capacity: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from(&LookupConfig::default())
    }
}

impl From<&LookupConfig> for ResolverSettings {
    fn from(config: &LookupConfig) -> Self {
        Self {
            musicbrainz_enabled: config.musicbrainz_enabled,
            courtesy_delay: Duration::from_millis(config.courtesy_delay_ms),
            artwork_size_px: config.artwork_size_px,
            country: config.country.clone(),
            cache_capacity: config.cache_capacity,
        }
    }
}

/// Resolver with an injectable transport and a bounded LRU memo.
pub struct MetadataResolver {
    transport: Arc<dyn JsonTransport>,
    settings: ResolverSettings,
    cache: ResolutionCache,
}

impl MetadataResolver {
    pub fn new(transport: Arc<dyn JsonTransport>, settings: ResolverSettings) -> Self {
        let cache = ResolutionCache::new(settings.cache_capacity);
        Self {
            transport,
            settings,
            cache,
        }
    }

    /// Resolves `(title, artist, album)`, memoized on the exact triple.
    pub fn resolve_track(&self, title: &str, artist: &str, album: Option<&str>) -> ResolvedLinks {
        let key = TrackKey::new(title, artist, album.unwrap_or_default());
        if let Some(links) = self.cache.get(&key) {
            return links;
        }

        let links = self.lookup_uncached(&key);
        if links.is_empty() {
            debug!("Resolver[{}]: caching miss", key.label());
        }
        self.cache.insert(key, links.clone());
        debug!("Resolver: {} cached results", self.cache.len());
        links
    }

    fn lookup_uncached(&self, key: &TrackKey) -> ResolvedLinks {
        let title = key.title.trim();
        let artist = key.artist.trim();
        let album = key.album.trim();
        if title.is_empty() {
            return ResolvedLinks::empty();
        }

        let query = MatchQuery::new(title, artist, album);
        let label = key.label();

        let hit = self
            .step("slug search", &label, || self.slug_priority_search(title, artist, &query))
            .or_else(|| {
                if !self.settings.musicbrainz_enabled {
                    return None;
                }
                self.step("musicbrainz", &label, || {
                    MusicBrainzLookup::new(self.transport.as_ref(), self.settings.courtesy_delay)
                        .lookup(title, artist, album, &query)
                })
                .filter(ResolvedLinks::has_artwork)
            })
            .or_else(|| {
                if query.album.is_empty() {
                    return None;
                }
                self.step("album search", &label, || {
                    self.album_scoped_search(artist, album, &query)
                })
            })
            .or_else(|| {
                self.step("song search", &label, || {
                    self.song_search(title, artist, album, &query)
                })
            });

        match hit {
            Some(links) => {
                info!(
                    "Resolver[{}]: resolved artwork={} track={} album={}",
                    label,
                    links.artwork_url.is_some(),
                    links.track_url.is_some(),
                    links.album_url.is_some()
                );
                self.finish(links)
            }
            None => {
                debug!("Resolver[{}]: no confident match", label);
                ResolvedLinks::empty()
            }
        }
    }

    fn step<F>(&self, name: &str, label: &str, run: F) -> Option<ResolvedLinks>
    where
        F: FnOnce() -> Result<Option<ResolvedLinks>, PresenceError>,
    {
        match run() {
            Ok(Some(links)) => {
                debug!("Resolver[{}]: {} matched", label, name);
                Some(links)
            }
            Ok(None) => {
                debug!("Resolver[{}]: {} found nothing", label, name);
                None
            }
            Err(error) => {
                warn!("Resolver[{}]: {} failed: {}", label, name, error);
                None
            }
        }
    }

    fn finish(&self, links: ResolvedLinks) -> ResolvedLinks {
        ResolvedLinks {
            artwork_url: links
                .artwork_url
                .map(|url| upscale_artwork_url(&url, self.settings.artwork_size_px)),
            ..links
        }
    }

    fn catalog(&self) -> ItunesCatalog<'_> {
        ItunesCatalog::new(self.transport.as_ref(), &self.settings.country)
    }

    fn score_songs(songs: Vec<CatalogSong>, query: &MatchQuery) -> Vec<(CatalogSong, i32)> {
        songs
            .into_iter()
            .map(|song| {
                let score = score_candidate(
                    query,
                    &CandidateText {
                        track_name: &song.track_name,
                        artist_name: &song.artist_name,
                        album_name: &song.album_name,
                        has_artwork: song.artwork_url.is_some(),
                    },
                );
                (song, score)
            })
            .collect()
    }

    fn song_links(song: CatalogSong) -> ResolvedLinks {
        ResolvedLinks {
            artwork_url: song.artwork_url,
            track_url: song.track_url,
            album_url: song.album_url,
        }
    }

    fn slug_priority_search(
        &self,
        title: &str,
        artist: &str,
        query: &MatchQuery,
    ) -> Result<Option<ResolvedLinks>, PresenceError> {
        let slug = slugify(title);
        if slug.is_empty() {
            return Ok(None);
        }
        let songs = self
            .catalog()
            .search_songs(&search_term(&[title, artist]), SLUG_SEARCH_LIMIT)?;
        let slug_matches: Vec<CatalogSong> = songs
            .into_iter()
            .filter(|song| {
                song.track_url
                    .as_deref()
                    .is_some_and(|url| url_has_path_segment(url, &slug))
            })
            .collect();
        if slug_matches.is_empty() {
            return Ok(None);
        }
        let best = pick_best(Self::score_songs(slug_matches, query), query.song_threshold());
        Ok(best.map(Self::song_links))
    }

    fn album_scoped_search(
        &self,
        artist: &str,
        album: &str,
        query: &MatchQuery,
    ) -> Result<Option<ResolvedLinks>, PresenceError> {
        let albums = self
            .catalog()
            .search_albums(&search_term(&[album, artist]), ALBUM_SEARCH_LIMIT)?;
        let scored = albums
            .into_iter()
            .map(|candidate| {
                let score = score_album_candidate(
                    query,
                    &CandidateText {
                        track_name: "",
                        artist_name: &candidate.artist_name,
                        album_name: &candidate.album_name,
                        has_artwork: candidate.artwork_url.is_some(),
                    },
                );
                (candidate, score)
            })
            .collect();
        Ok(pick_best(scored, ALBUM_ACCEPT_SCORE).map(|candidate| ResolvedLinks {
            artwork_url: candidate.artwork_url,
            track_url: None,
            album_url: candidate.album_url,
        }))
    }

    fn song_search(
        &self,
        title: &str,
        artist: &str,
        album: &str,
        query: &MatchQuery,
    ) -> Result<Option<ResolvedLinks>, PresenceError> {
        let songs = self
            .catalog()
            .search_songs(&search_term(&[title, artist, album]), SONG_SEARCH_LIMIT)?;
        let songs = if query.album.is_empty() {
            songs
        } else {
            let (overlapping, others): (Vec<_>, Vec<_>) = songs
                .into_iter()
                .partition(|song| album_overlaps(query, &song.album_name));
            // Fall back to every candidate when none shares the album.
            if overlapping.is_empty() {
                others
            } else {
                overlapping
            }
        };
        let best = pick_best(Self::score_songs(songs, query), query.song_threshold());
        Ok(best.map(Self::song_links))
    }
}

impl TrackResolver for MetadataResolver {
    fn resolve(&self, key: &TrackKey) -> ResolvedLinks {
        self.resolve_track(&key.title, &key.artist, Some(key.album.as_str()))
    }

    fn cached(&self, key: &TrackKey) -> Option<ResolvedLinks> {
        self.cache.get(key)
    }
}

/// Resolver used when online lookup is switched off; every key is a miss.
pub struct DisabledResolver;

impl TrackResolver for DisabledResolver {
    fn resolve(&self, _key: &TrackKey) -> ResolvedLinks {
        ResolvedLinks::empty()
    }

    fn cached(&self, _key: &TrackKey) -> Option<ResolvedLinks> {
        Some(ResolvedLinks::empty())
    }
}
