//! Error taxonomy shared by the sampling loop, resolver, and presence client.

use thiserror::Error;

/// Failures surfaced by runtime collaborators.
///
/// None of these are fatal: the sampling loop logs them and keeps polling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PresenceError {
    /// No active media session, or the platform adapter failed.
    #[error("media source unavailable: {0}")]
    SourceUnavailable(String),

    /// Network failure, timeout, or non-2xx status during a lookup.
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The presence service rejected or failed a call.
    #[error("presence service error: {0}")]
    PresenceService(String),

    /// Configuration could not be loaded or written.
    #[error("config error: {0}")]
    Config(String),
}

impl From<ureq::Error> for PresenceError {
    fn from(error: ureq::Error) -> Self {
        match error {
            ureq::Error::Status(code, response) => {
                Self::Transport(format!("HTTP {code} from {}", response.get_url()))
            }
            ureq::Error::Transport(transport) => Self::Transport(transport.to_string()),
        }
    }
}

impl From<serde_json::Error> for PresenceError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(error.to_string())
    }
}
