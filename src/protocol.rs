//! Data model and event-bus protocol shared by all runtime components.
//!
//! This module defines the now-playing sample, the identities derived from it
//! (track key and presence signature), resolved catalog links, and every
//! message exchanged over the runtime bus.

/// Immutable snapshot of the local player, produced once per poll.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Track length in seconds.
    pub duration: f64,
    /// Elapsed position in seconds.
    pub position: f64,
    pub playing: bool,
}

impl NowPlaying {
    /// Identity of the track, independent of playback progress.
    pub fn track_key(&self) -> TrackKey {
        TrackKey {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
        }
    }

    /// Comparison tuple deciding whether a new publish is warranted.
    pub fn signature(&self) -> PresenceSignature {
        PresenceSignature {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            playing: self.playing,
            position_secs: whole_seconds(self.position),
        }
    }
}

fn whole_seconds(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.floor() as u64
    } else {
        0
    }
}

/// (title, artist, album) identity used for caching and single-flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TrackKey {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl TrackKey {
    pub fn new(title: &str, artist: &str, album: &str) -> Self {
        Self {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
        }
    }

    /// Short label used in log lines.
    pub fn label(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} — {}", self.title, self.artist)
        }
    }
}

/// Whole-second change key; includes position, so it moves every second
/// while playing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresenceSignature {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub playing: bool,
    pub position_secs: u64,
}

/// Catalog links resolved for one track key. All-empty is a valid (cached)
/// negative result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedLinks {
    pub artwork_url: Option<String>,
    pub track_url: Option<String>,
    pub album_url: Option<String>,
}

impl ResolvedLinks {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_artwork(&self) -> bool {
        self.artwork_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.artwork_url.is_none() && self.track_url.is_none() && self.album_url.is_none()
    }
}

/// Presence-service account reported after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountInfo {
    pub display_name: String,
    pub avatar_url: String,
}

/// Sample enriched with the currently absorbed artwork, for display consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingView {
    pub sample: NowPlaying,
    pub artwork_url: Option<String>,
}

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Playback(PlaybackMessage),
    Presence(PresenceMessage),
    Host(HostMessage),
}

/// Sampled playback state, emitted every tick.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    NowPlaying(NowPlayingView),
    Idle,
    SourceFailed(String),
}

/// Presence-service status notifications.
#[derive(Debug, Clone)]
pub enum PresenceMessage {
    Connecting,
    Connected(AccountInfo),
    ConnectFailed(String),
    Published {
        title: String,
        artist: String,
        playing: bool,
        with_artwork: bool,
    },
    PublishFailed(String),
    Cleared,
}

/// Host-process notifications consumed by the sampling loop.
#[derive(Debug, Clone)]
pub enum HostMessage {
    /// The host window gained (`true`) or lost (`false`) focus.
    ActivityChanged { active: bool },
}

#[cfg(test)]
mod tests {
    use super::{NowPlaying, ResolvedLinks};

    fn sample(position: f64, playing: bool) -> NowPlaying {
        NowPlaying {
            title: "Title".to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            duration: 180.0,
            position,
            playing,
        }
    }

    #[test]
    fn test_signature_uses_whole_second_position() {
        assert_eq!(sample(10.2, true).signature(), sample(10.9, true).signature());
        assert_ne!(sample(10.9, true).signature(), sample(11.0, true).signature());
    }

    #[test]
    fn test_signature_changes_with_play_state() {
        assert_ne!(sample(5.0, true).signature(), sample(5.0, false).signature());
    }

    #[test]
    fn test_track_key_ignores_progress() {
        assert_eq!(sample(1.0, true).track_key(), sample(99.0, false).track_key());
    }

    #[test]
    fn test_negative_position_clamps_to_zero_seconds() {
        assert_eq!(sample(-3.0, true).signature().position_secs, 0);
    }

    #[test]
    fn test_blank_artwork_is_not_artwork() {
        let links = ResolvedLinks {
            artwork_url: Some("  ".to_string()),
            ..ResolvedLinks::default()
        };
        assert!(!links.has_artwork());
        assert!(!links.is_empty());
    }
}
