//! Bus observer that reports playback and presence status to the log.
//!
//! Stands where a display would: it consumes every `Message` but only logs
//! transitions, so per-tick samples do not flood the output.

use log::{info, warn};
use tokio::sync::broadcast::{error::RecvError, Receiver};

use crate::protocol::{Message, PlaybackMessage, PresenceMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
enum DisplayState {
    Unknown,
    Idle,
    SourceFailed,
    /// Last now-playing line shown.
    Playing(String),
}

/// Logs status transitions seen on the bus.
pub struct StatusReporter {
    bus_consumer: Receiver<Message>,
    display: DisplayState,
}

impl StatusReporter {
    pub fn new(bus_consumer: Receiver<Message>) -> Self {
        Self {
            bus_consumer,
            display: DisplayState::Unknown,
        }
    }

    /// Returns the line to log for `message`, if it changes what is shown.
    fn describe(&mut self, message: &Message) -> Option<String> {
        match message {
            Message::Playback(PlaybackMessage::NowPlaying(view)) => {
                let line = format!(
                    "{} {}{}",
                    if view.sample.playing { "▶" } else { "⏸" },
                    view.sample.track_key().label(),
                    view.artwork_url
                        .as_deref()
                        .map(|url| format!(" [artwork {url}]"))
                        .unwrap_or_default()
                );
                if let DisplayState::Playing(previous) = &self.display {
                    if *previous == line {
                        return None;
                    }
                }
                self.display = DisplayState::Playing(line.clone());
                Some(line)
            }
            Message::Playback(PlaybackMessage::Idle) => {
                if self.display == DisplayState::Idle {
                    return None;
                }
                self.display = DisplayState::Idle;
                Some("nothing playing".to_string())
            }
            Message::Playback(PlaybackMessage::SourceFailed(reason)) => {
                self.display = DisplayState::SourceFailed;
                Some(format!("media source unavailable: {reason}"))
            }
            Message::Presence(PresenceMessage::Connecting) => {
                Some("connecting to presence service".to_string())
            }
            Message::Presence(PresenceMessage::Connected(account)) => Some(format!(
                "connected as {} ({})",
                account.display_name, account.avatar_url
            )),
            Message::Presence(PresenceMessage::ConnectFailed(reason)) => {
                Some(format!("presence connection failed: {reason}"))
            }
            Message::Presence(PresenceMessage::Published {
                title,
                artist,
                playing,
                with_artwork,
            }) => with_artwork.then(|| {
                format!(
                    "presence shows {} {} by {} with artwork",
                    if *playing { "▶" } else { "⏸" },
                    title,
                    artist
                )
            }),
            Message::Presence(PresenceMessage::PublishFailed(reason)) => {
                Some(format!("presence update failed: {reason}"))
            }
            Message::Presence(PresenceMessage::Cleared) => Some("presence cleared".to_string()),
            Message::Host(_) => None,
        }
    }

    pub fn run(&mut self) {
        info!("StatusReporter: started");
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => {
                    if let Some(line) = self.describe(&message) {
                        info!("Status: {}", line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("StatusReporter: bus lagged by {} messages", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;

    use super::StatusReporter;
    use crate::protocol::{Message, NowPlaying, NowPlayingView, PlaybackMessage, PresenceMessage};

    fn now_playing(playing: bool, artwork: Option<&str>) -> Message {
        Message::Playback(PlaybackMessage::NowPlaying(NowPlayingView {
            sample: NowPlaying {
                title: "Song".to_string(),
                artist: "Artist".to_string(),
                album: "Album".to_string(),
                duration: 100.0,
                position: 1.0,
                playing,
            },
            artwork_url: artwork.map(ToString::to_string),
        }))
    }

    fn reporter() -> StatusReporter {
        let (_sender, receiver) = broadcast::channel(4);
        StatusReporter::new(receiver)
    }

    #[test]
    fn test_repeated_samples_are_reported_once() {
        let mut reporter = reporter();
        assert!(reporter.describe(&now_playing(true, None)).is_some());
        assert!(reporter.describe(&now_playing(true, None)).is_none());
        assert!(reporter
            .describe(&now_playing(true, Some("https://art.test/a.jpg")))
            .is_some_and(|line| line.contains("artwork")));
        assert!(reporter.describe(&now_playing(false, Some("https://art.test/a.jpg"))).is_some());
    }

    #[test]
    fn test_idle_is_reported_on_transition_only() {
        let mut reporter = reporter();
        let idle = Message::Playback(PlaybackMessage::Idle);
        assert!(reporter.describe(&idle).is_some());
        assert!(reporter.describe(&idle).is_none());
        assert!(reporter.describe(&now_playing(true, None)).is_some());
        assert!(reporter.describe(&idle).is_some());
    }

    #[test]
    fn test_plain_publishes_are_quiet() {
        let mut reporter = reporter();
        let published = Message::Presence(PresenceMessage::Published {
            title: "Song".to_string(),
            artist: "Artist".to_string(),
            playing: true,
            with_artwork: false,
        });
        assert!(reporter.describe(&published).is_none());
        assert!(reporter
            .describe(&Message::Presence(PresenceMessage::Cleared))
            .is_some());
    }
}
