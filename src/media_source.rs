//! Platform now-playing adapters.
//!
//! Each platform exposes a single [`MediaSource`]. `Ok(None)` means no active
//! media; errors are treated the same way by the sampling loop.

use crate::error::PresenceError;
use crate::protocol::NowPlaying;

const SCRIPT_ACTIVE_PREFIX: &str = "OK=1|";
const SCRIPT_FIELD_COUNT: usize = 6;

/// Produces one now-playing sample per poll tick.
pub trait MediaSource: Send {
    fn sample(&mut self) -> Result<Option<NowPlaying>, PresenceError>;
}

fn parse_seconds(raw: &str) -> f64 {
    // AppleScript formats reals with the user's decimal separator.
    let value = raw.trim().replace(',', ".").parse::<f64>().unwrap_or(0.0);
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Parses the player-state script output.
///
/// Active output is `OK=1|title|artist|album|duration|position|playing`;
/// anything else (including `OK=0`) means idle. Missing fields default to
/// empty or zero. Surplus `|` separators are folded back into the title.
pub fn parse_script_output(output: &str) -> Option<NowPlaying> {
    let body = output.trim().strip_prefix(SCRIPT_ACTIVE_PREFIX)?;
    let parts: Vec<&str> = body.split('|').collect();
    let surplus = parts.len().saturating_sub(SCRIPT_FIELD_COUNT);
    let title = parts[..=surplus].join("|");
    let field = |index: usize| parts.get(surplus + index).copied().unwrap_or_default();

    Some(NowPlaying {
        title: title.trim().to_string(),
        artist: field(1).trim().to_string(),
        album: field(2).trim().to_string(),
        duration: parse_seconds(field(3)),
        position: parse_seconds(field(4)),
        playing: field(5).trim().eq_ignore_ascii_case("true"),
    })
}

/// Playback state reported by a Windows media session.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Playing,
    Paused,
    Stopped,
    /// Opened, changing, closed, or unknown.
    Other,
}

/// Fields read from the current Windows media session.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub app_id: String,
    pub status: SessionStatus,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Timeline end, in 100 ns ticks.
    pub end_ticks: i64,
    /// Timeline position, in 100 ns ticks.
    pub position_ticks: i64,
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
const TICKS_PER_SECOND: f64 = 10_000_000.0;

/// Converts a media timeline span (100 ns ticks) to seconds, clamped at zero.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub fn ticks_to_seconds(ticks: i64) -> f64 {
    (ticks as f64 / TICKS_PER_SECOND).max(0.0)
}

/// Whether a session's app user model id belongs to Apple Music.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub fn is_apple_music_app(app_id: &str) -> bool {
    let app_id = app_id.to_lowercase();
    app_id.contains("applemusic") || app_id.contains("apple music")
}

/// Maps a session to a sample. Other players and stopped sessions are idle.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub fn sample_from_session(snapshot: SessionSnapshot) -> Option<NowPlaying> {
    if !is_apple_music_app(&snapshot.app_id) || snapshot.status == SessionStatus::Stopped {
        return None;
    }
    Some(NowPlaying {
        title: snapshot.title.trim().to_string(),
        artist: snapshot.artist.trim().to_string(),
        album: snapshot.album.trim().to_string(),
        duration: ticks_to_seconds(snapshot.end_ticks),
        position: ticks_to_seconds(snapshot.position_ticks),
        playing: snapshot.status == SessionStatus::Playing,
    })
}

#[cfg(target_os = "windows")]
mod media_session {
    use log::debug;
    use windows::Media::Control::{
        GlobalSystemMediaTransportControlsSession as Session,
        GlobalSystemMediaTransportControlsSessionManager as SessionManager,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus as PlaybackStatus,
    };

    use super::{sample_from_session, MediaSource, SessionSnapshot, SessionStatus};
    use crate::error::PresenceError;
    use crate::protocol::NowPlaying;

    fn win_error(context: &str, err: windows::core::Error) -> PresenceError {
        PresenceError::SourceUnavailable(format!("{context}: {err}"))
    }

    fn session_status(status: PlaybackStatus) -> SessionStatus {
        match status {
            PlaybackStatus::Playing => SessionStatus::Playing,
            PlaybackStatus::Paused => SessionStatus::Paused,
            PlaybackStatus::Stopped => SessionStatus::Stopped,
            _ => SessionStatus::Other,
        }
    }

    fn snapshot(session: &Session) -> Result<SessionSnapshot, PresenceError> {
        let app_id = session
            .SourceAppUserModelId()
            .map(|id| id.to_string_lossy())
            .unwrap_or_default();
        let properties = session
            .TryGetMediaPropertiesAsync()
            .and_then(|operation| operation.get())
            .map_err(|err| win_error("reading media properties", err))?;
        let status = session
            .GetPlaybackInfo()
            .and_then(|info| info.PlaybackStatus())
            .map(session_status)
            .unwrap_or(SessionStatus::Stopped);
        let timeline = session.GetTimelineProperties().ok();
        let end_ticks = timeline
            .as_ref()
            .and_then(|timeline| timeline.EndTime().ok())
            .map(|span| span.Duration)
            .unwrap_or(0);
        let position_ticks = timeline
            .as_ref()
            .and_then(|timeline| timeline.Position().ok())
            .map(|span| span.Duration)
            .unwrap_or(0);
        let text = |value: windows::core::Result<windows::core::HSTRING>| {
            value.map(|value| value.to_string_lossy()).unwrap_or_default()
        };

        Ok(SessionSnapshot {
            app_id,
            status,
            title: text(properties.Title()),
            artist: text(properties.Artist()),
            album: text(properties.AlbumTitle()),
            end_ticks,
            position_ticks,
        })
    }

    /// Reads the current system media session and keeps Apple Music only.
    #[derive(Default)]
    pub struct MediaSessionSource;

    impl MediaSource for MediaSessionSource {
        fn sample(&mut self) -> Result<Option<NowPlaying>, PresenceError> {
            let manager = SessionManager::RequestAsync()
                .and_then(|operation| operation.get())
                .map_err(|err| win_error("requesting media session manager", err))?;
            let session = match manager.GetCurrentSession() {
                Ok(session) => session,
                Err(_) => {
                    debug!("MediaSessionSource: no current media session");
                    return Ok(None);
                }
            };
            Ok(sample_from_session(snapshot(&session)?))
        }
    }
}

#[cfg(target_os = "windows")]
pub use media_session::MediaSessionSource;

#[cfg(target_os = "macos")]
mod apple_music {
    use std::process::Command;

    use log::debug;

    use super::{parse_script_output, MediaSource};
    use crate::error::PresenceError;
    use crate::protocol::NowPlaying;

    const PLAYER_STATE_SCRIPT: &str = r#"
tell application "Music"
    if it is not running then
        return "OK=0"
    end if
    set ps to (player state as string)
    if ps is "stopped" then
        return "OK=0"
    end if
    set tName to (name of current track as string)
    set tArtist to (artist of current track as string)
    set tAlbum to (album of current track as string)
    set tDur to (duration of current track)
    set tPos to (player position)
    set isPlaying to (ps is "playing")
    return "OK=1|" & tName & "|" & tArtist & "|" & tAlbum & "|" & (tDur as string) & "|" & (tPos as string) & "|" & (isPlaying as string)
end tell
"#;

    /// Reads the Music app's player state through `osascript`.
    #[derive(Default)]
    pub struct AppleMusicScriptSource;

    impl MediaSource for AppleMusicScriptSource {
        fn sample(&mut self) -> Result<Option<NowPlaying>, PresenceError> {
            let output = Command::new("osascript")
                .args(["-e", PLAYER_STATE_SCRIPT])
                .output()
                .map_err(|err| {
                    PresenceError::SourceUnavailable(format!("failed to run osascript: {err}"))
                })?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(PresenceError::SourceUnavailable(format!(
                    "osascript exited with {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let sample = parse_script_output(&stdout);
            if sample.is_none() {
                debug!("AppleMusicScriptSource: player idle");
            }
            Ok(sample)
        }
    }
}

#[cfg(target_os = "macos")]
pub use apple_music::AppleMusicScriptSource;

/// Stand-in for platforms without a now-playing adapter.
#[derive(Default)]
pub struct UnsupportedMediaSource;

impl MediaSource for UnsupportedMediaSource {
    fn sample(&mut self) -> Result<Option<NowPlaying>, PresenceError> {
        Err(PresenceError::SourceUnavailable(format!(
            "no now-playing adapter for {}",
            std::env::consts::OS
        )))
    }
}

/// The media source for the current platform.
pub fn platform_media_source() -> Box<dyn MediaSource> {
    #[cfg(target_os = "macos")]
    {
        Box::new(AppleMusicScriptSource)
    }
    #[cfg(target_os = "windows")]
    {
        Box::new(MediaSessionSource)
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        log::warn!(
            "MediaSource: no now-playing adapter for {}, presence will stay idle",
            std::env::consts::OS
        );
        Box::new(UnsupportedMediaSource)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        is_apple_music_app, parse_script_output, sample_from_session, ticks_to_seconds,
        MediaSource, SessionSnapshot, SessionStatus, UnsupportedMediaSource,
    };
    use crate::error::PresenceError;

    fn session(app_id: &str, status: SessionStatus) -> SessionSnapshot {
        SessionSnapshot {
            app_id: app_id.to_string(),
            status,
            title: " Song ".to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            end_ticks: 2_455_000_000,
            position_ticks: 120_000_000,
        }
    }

    #[test]
    fn test_parse_active_output() {
        let sample = parse_script_output("OK=1|Song|Artist|Album|245.5|12.25|true\n")
            .expect("active output parses");
        assert_eq!(sample.title, "Song");
        assert_eq!(sample.artist, "Artist");
        assert_eq!(sample.album, "Album");
        assert_eq!(sample.duration, 245.5);
        assert_eq!(sample.position, 12.25);
        assert!(sample.playing);
    }

    #[test]
    fn test_idle_and_garbage_output_is_none() {
        assert!(parse_script_output("OK=0").is_none());
        assert!(parse_script_output("").is_none());
        assert!(parse_script_output("execution error").is_none());
    }

    #[test]
    fn test_bad_numbers_and_play_state_default() {
        let sample = parse_script_output("OK=1|Song|Artist|Album|missing value|-3|FALSE")
            .expect("active output parses");
        assert_eq!(sample.duration, 0.0);
        assert_eq!(sample.position, 0.0);
        assert!(!sample.playing);

        let paused = parse_script_output("OK=1|Song|Artist|Album|10|1|yes").expect("parses");
        assert!(!paused.playing);
    }

    #[test]
    fn test_comma_decimal_separator() {
        let sample = parse_script_output("OK=1|Song|Artist|Album|245,5|3,75|True")
            .expect("active output parses");
        assert_eq!(sample.duration, 245.5);
        assert_eq!(sample.position, 3.75);
        assert!(sample.playing);
    }

    #[test]
    fn test_pipe_in_title_keeps_numeric_fields() {
        let sample = parse_script_output("OK=1|A|B|Artist|Album|100|5|true")
            .expect("active output parses");
        assert_eq!(sample.title, "A|B");
        assert_eq!(sample.artist, "Artist");
        assert_eq!(sample.duration, 100.0);
        assert_eq!(sample.position, 5.0);
        assert!(sample.playing);
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let sample = parse_script_output("OK=1|Only Title").expect("active output parses");
        assert_eq!(sample.title, "Only Title");
        assert_eq!(sample.artist, "");
        assert_eq!(sample.duration, 0.0);
        assert!(!sample.playing);
    }

    #[test]
    fn test_unsupported_source_reports_unavailable() {
        assert!(matches!(
            UnsupportedMediaSource.sample(),
            Err(PresenceError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn test_ticks_convert_to_seconds() {
        assert_eq!(ticks_to_seconds(2_455_000_000), 245.5);
        assert_eq!(ticks_to_seconds(0), 0.0);
        assert_eq!(ticks_to_seconds(-10_000_000), 0.0);
    }

    #[test]
    fn test_apple_music_app_ids_are_recognized() {
        assert!(is_apple_music_app("AppleInc.AppleMusicWin_nzyj5cx40ttqa!App"));
        assert!(is_apple_music_app("Apple Music"));
        assert!(!is_apple_music_app("Spotify.exe"));
        assert!(!is_apple_music_app(""));
    }

    #[test]
    fn test_session_status_maps_to_play_state() {
        let app = "AppleInc.AppleMusicWin_nzyj5cx40ttqa!App";
        let playing = sample_from_session(session(app, SessionStatus::Playing))
            .expect("playing session is active");
        assert!(playing.playing);
        assert_eq!(playing.title, "Song");
        assert_eq!(playing.duration, 245.5);
        assert_eq!(playing.position, 12.0);

        let paused = sample_from_session(session(app, SessionStatus::Paused))
            .expect("paused session is active");
        assert!(!paused.playing);
        assert!(sample_from_session(session(app, SessionStatus::Other)).is_some_and(|s| !s.playing));
        assert!(sample_from_session(session(app, SessionStatus::Stopped)).is_none());
    }

    #[test]
    fn test_other_players_are_idle() {
        assert!(sample_from_session(session("Spotify.exe", SessionStatus::Playing)).is_none());
    }
}
