//! Presence payload construction and the publish/clear seam.

use log::debug;

use crate::config::{PresenceConfig, MAX_BUTTON_LABEL_CHARS};
use crate::error::PresenceError;
use crate::protocol::{AccountInfo, NowPlaying, ResolvedLinks};

/// Maximum characters the presence service shows for `details`/`state`.
pub const MAX_ACTIVITY_TEXT_CHARS: usize = 128;
const MAX_BUTTONS: usize = 2;
const EMPTY_TITLE_DETAILS: &str = "Listening";
const SEARCH_LINK_BASE_URL: &str = "https://music.apple.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceButton {
    pub label: String,
    pub url: String,
}

/// Fields sent to the presence service for one publish.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresenceActivity {
    pub details: String,
    pub state: String,
    pub large_image: String,
    pub large_text: String,
    pub small_image: String,
    pub small_text: String,
    /// Unix seconds at which the track would have started.
    pub start: Option<i64>,
    /// Unix seconds at which the track will end.
    pub end: Option<i64>,
    pub buttons: Vec<PresenceButton>,
}

/// External presence service.
pub trait PresenceClient: Send {
    fn connect(&mut self) -> Result<AccountInfo, PresenceError>;
    fn update(&mut self, activity: &PresenceActivity) -> Result<(), PresenceError>;
    fn clear(&mut self) -> Result<(), PresenceError>;
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn button(label: &str, url: &str) -> PresenceButton {
    PresenceButton {
        label: truncate_chars(label, MAX_BUTTON_LABEL_CHARS),
        url: url.to_string(),
    }
}

/// Storefront search page for the sample, used when no catalog link resolved.
pub fn search_fallback_url(sample: &NowPlaying, country: &str) -> Option<String> {
    let term = [sample.title.trim(), sample.artist.trim()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if term.is_empty() {
        return None;
    }
    Some(format!(
        "{SEARCH_LINK_BASE_URL}/{country}/search?term={}",
        urlencoding::encode(&term)
    ))
}

fn activity_timestamps(sample: &NowPlaying, now: i64) -> (Option<i64>, Option<i64>) {
    if !sample.playing || !sample.duration.is_finite() || sample.duration <= 0.0 {
        return (None, None);
    }
    let elapsed = if sample.position.is_finite() {
        sample.position.max(0.0)
    } else {
        0.0
    };
    let start = now - elapsed.floor() as i64;
    let end = start + sample.duration.trunc() as i64;
    (Some(start), Some(end))
}

/// Builds the activity for a sample and whatever links are absorbed so far.
pub fn build_activity(
    sample: &NowPlaying,
    links: Option<&ResolvedLinks>,
    now: i64,
    settings: &PresenceConfig,
    country: &str,
) -> PresenceActivity {
    let details = if sample.title.trim().is_empty() {
        EMPTY_TITLE_DETAILS.to_string()
    } else {
        truncate_chars(&sample.title, MAX_ACTIVITY_TEXT_CHARS)
    };
    let state = [sample.artist.trim(), sample.album.trim()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" • ");

    let artwork = links.and_then(|links| non_blank(links.artwork_url.as_ref()));
    let large_text = if sample.album.trim().is_empty() {
        settings.fallback_large_text.clone()
    } else {
        sample.album.clone()
    };
    let (small_image, small_text) = if sample.playing {
        (settings.playing_image.clone(), "Playing".to_string())
    } else {
        (settings.paused_image.clone(), "Paused".to_string())
    };

    let mut buttons = Vec::with_capacity(MAX_BUTTONS);
    if let Some(track_url) = links.and_then(|links| non_blank(links.track_url.as_ref())) {
        buttons.push(button(&settings.track_button_label, track_url));
    }
    if let Some(album_url) = links.and_then(|links| non_blank(links.album_url.as_ref())) {
        buttons.push(button(&settings.album_button_label, album_url));
    }
    if buttons.is_empty() {
        if let Some(search_url) = search_fallback_url(sample, country) {
            buttons.push(button(&settings.search_button_label, &search_url));
        }
    }
    buttons.truncate(MAX_BUTTONS);

    let (start, end) = activity_timestamps(sample, now);
    PresenceActivity {
        details,
        state: truncate_chars(&state, MAX_ACTIVITY_TEXT_CHARS),
        large_image: artwork
            .map(ToString::to_string)
            .unwrap_or_else(|| settings.fallback_large_image.clone()),
        large_text: truncate_chars(&large_text, MAX_ACTIVITY_TEXT_CHARS),
        small_image,
        small_text,
        start,
        end,
        buttons,
    }
}

/// Owns the presence client and remembers whether anything is shown.
pub struct PresencePublisher {
    client: Box<dyn PresenceClient>,
    settings: PresenceConfig,
    country: String,
    has_presence: bool,
}

impl PresencePublisher {
    pub fn new(client: Box<dyn PresenceClient>, settings: PresenceConfig, country: String) -> Self {
        Self {
            client,
            settings,
            country,
            has_presence: false,
        }
    }

    pub fn connect(&mut self) -> Result<AccountInfo, PresenceError> {
        self.client.connect()
    }

    /// Sends the activity for `sample`; returns what was sent.
    pub fn publish(
        &mut self,
        sample: &NowPlaying,
        links: Option<&ResolvedLinks>,
        now: i64,
    ) -> Result<PresenceActivity, PresenceError> {
        let activity = build_activity(sample, links, now, &self.settings, &self.country);
        self.client.update(&activity)?;
        self.has_presence = true;
        debug!(
            "PresencePublisher: published '{}' / '{}'",
            activity.details, activity.state
        );
        Ok(activity)
    }

    /// Removes the activity. The publisher forgets it either way, so a failed
    /// clear is not retried every idle tick.
    pub fn clear(&mut self) -> Result<(), PresenceError> {
        self.has_presence = false;
        self.client.clear()
    }

    pub fn has_presence(&self) -> bool {
        self.has_presence
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{PresenceActivity, PresenceClient};
    use crate::error::PresenceError;
    use crate::protocol::AccountInfo;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ClientCall {
        Update(PresenceActivity),
        Clear,
    }

    /// Client that records calls; cloned handles share the same log.
    #[derive(Clone, Default)]
    pub struct RecordingClient {
        calls: Arc<Mutex<Vec<ClientCall>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingClient {
        pub fn calls(&self) -> Vec<ClientCall> {
            self.calls
                .lock()
                .map(|calls| calls.clone())
                .unwrap_or_default()
        }

        pub fn updates(&self) -> Vec<PresenceActivity> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    ClientCall::Update(activity) => Some(activity),
                    ClientCall::Clear => None,
                })
                .collect()
        }

        pub fn clear_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|call| **call == ClientCall::Clear)
                .count()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn record(&self, call: ClientCall) -> Result<(), PresenceError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(PresenceError::PresenceService("rejected".to_string()));
            }
            Ok(())
        }
    }

    impl PresenceClient for RecordingClient {
        fn connect(&mut self) -> Result<AccountInfo, PresenceError> {
            Ok(AccountInfo {
                display_name: "listener".to_string(),
                avatar_url: "https://cdn.test/avatar.png".to_string(),
            })
        }

        fn update(&mut self, activity: &PresenceActivity) -> Result<(), PresenceError> {
            self.record(ClientCall::Update(activity.clone()))
        }

        fn clear(&mut self) -> Result<(), PresenceError> {
            self.record(ClientCall::Clear)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{ClientCall, RecordingClient};
    use super::{build_activity, search_fallback_url, PresencePublisher};
    use crate::config::PresenceConfig;
    use crate::protocol::{NowPlaying, ResolvedLinks};

    const NOW: i64 = 1_700_000_000;

    fn sample(playing: bool) -> NowPlaying {
        NowPlaying {
            title: "A".to_string(),
            artist: "B".to_string(),
            album: "C".to_string(),
            duration: 200.0,
            position: 10.0,
            playing,
        }
    }

    fn full_links() -> ResolvedLinks {
        ResolvedLinks {
            artwork_url: Some("https://art.test/512x512bb.jpg".to_string()),
            track_url: Some("https://music.test/song/a".to_string()),
            album_url: Some("https://music.test/album/c".to_string()),
        }
    }

    #[test]
    fn test_build_activity_with_links() {
        let activity = build_activity(
            &sample(true),
            Some(&full_links()),
            NOW,
            &PresenceConfig::default(),
            "us",
        );
        assert_eq!(activity.details, "A");
        assert_eq!(activity.state, "B • C");
        assert_eq!(activity.large_image, "https://art.test/512x512bb.jpg");
        assert_eq!(activity.large_text, "C");
        assert_eq!(activity.small_text, "Playing");
        assert_eq!(activity.start, Some(NOW - 10));
        assert_eq!(activity.end, Some(NOW + 190));
        let urls: Vec<&str> = activity.buttons.iter().map(|b| b.url.as_str()).collect();
        assert_eq!(urls, vec!["https://music.test/song/a", "https://music.test/album/c"]);
    }

    #[test]
    fn test_build_activity_without_links_uses_fallbacks() {
        let mut paused = sample(false);
        paused.album.clear();
        let settings = PresenceConfig::default();
        let activity = build_activity(&paused, None, NOW, &settings, "gb");

        assert_eq!(activity.state, "B");
        assert_eq!(activity.large_image, settings.fallback_large_image);
        assert_eq!(activity.large_text, settings.fallback_large_text);
        assert_eq!(activity.small_image, settings.paused_image);
        assert_eq!(activity.start, None);
        assert_eq!(activity.end, None);
        assert_eq!(activity.buttons.len(), 1);
        assert_eq!(activity.buttons[0].label, settings.search_button_label);
        assert_eq!(
            activity.buttons[0].url,
            "https://music.apple.com/gb/search?term=A%20B"
        );
    }

    #[test]
    fn test_build_activity_truncates_and_defaults_empty_title() {
        let mut long = sample(true);
        long.title = "t".repeat(200);
        long.artist = "a".repeat(200);
        let activity = build_activity(&long, None, NOW, &PresenceConfig::default(), "us");
        assert_eq!(activity.details.chars().count(), 128);
        assert_eq!(activity.state.chars().count(), 128);

        long.title.clear();
        let activity = build_activity(&long, None, NOW, &PresenceConfig::default(), "us");
        assert_eq!(activity.details, "Listening");
    }

    #[test]
    fn test_fractional_duration_is_truncated() {
        let mut track = sample(true);
        track.duration = 200.9;
        track.position = 10.7;
        let activity = build_activity(&track, None, NOW, &PresenceConfig::default(), "us");
        assert_eq!(activity.start, Some(NOW - 10));
        assert_eq!(activity.end, Some(NOW - 10 + 200));
    }

    #[test]
    fn test_state_skips_blank_artist_or_album() {
        let mut track = sample(true);
        track.artist = "  ".to_string();
        let activity = build_activity(&track, None, NOW, &PresenceConfig::default(), "us");
        assert_eq!(activity.state, "C");

        track.album.clear();
        let activity = build_activity(&track, None, NOW, &PresenceConfig::default(), "us");
        assert_eq!(activity.state, "");
    }

    #[test]
    fn test_zero_duration_has_no_timestamps() {
        let mut stream = sample(true);
        stream.duration = 0.0;
        let activity = build_activity(&stream, None, NOW, &PresenceConfig::default(), "us");
        assert_eq!((activity.start, activity.end), (None, None));
    }

    #[test]
    fn test_search_fallback_needs_some_text() {
        assert!(search_fallback_url(&NowPlaying::default(), "us").is_none());
    }

    #[test]
    fn test_publisher_tracks_presence_and_survives_failures() {
        let client = RecordingClient::default();
        let mut publisher = PresencePublisher::new(
            Box::new(client.clone()),
            PresenceConfig::default(),
            "us".to_string(),
        );
        assert!(!publisher.has_presence());

        client.set_failing(true);
        assert!(publisher.publish(&sample(true), None, NOW).is_err());
        assert!(!publisher.has_presence());

        client.set_failing(false);
        publisher
            .publish(&sample(true), None, NOW)
            .expect("publish succeeds");
        assert!(publisher.has_presence());

        publisher.clear().expect("clear succeeds");
        assert!(!publisher.has_presence());
        assert_eq!(client.calls().last(), Some(&ClientCall::Clear));
    }
}
