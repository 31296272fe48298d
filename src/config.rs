//! Persistent application configuration model and defaults.

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Sampling cadence.
    pub polling: PollingConfig,
    #[serde(default)]
    /// Online artwork and link resolution.
    pub lookup: LookupConfig,
    #[serde(default)]
    /// Presence-service identity and payload text.
    pub presence: PresenceConfig,
    #[serde(default)]
    /// Log output preferences.
    pub logging: LoggingConfig,
}

/// Poll intervals for the sampling loop.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PollingConfig {
    /// Interval while the host process is foregrounded. The headless binary
    /// has no window, so it always polls at this interval.
    #[serde(default = "default_active_interval_ms")]
    pub active_interval_ms: u64,
    /// Interval while the host process is backgrounded. Only used when an
    /// embedding host posts `HostMessage::ActivityChanged` on the bus.
    #[serde(default = "default_background_interval_ms")]
    pub background_interval_ms: u64,
    /// Upper bound on waiting for the resolver worker at shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Catalog lookup behavior.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LookupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Query the open music database between the catalog steps.
    #[serde(default = "default_true")]
    pub musicbrainz_enabled: bool,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Pause between the recording search and the cover-art fetch.
    #[serde(default = "default_courtesy_delay_ms")]
    pub courtesy_delay_ms: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Edge length substituted into catalog artwork URLs.
    #[serde(default = "default_artwork_size_px")]
    pub artwork_size_px: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Storefront country used for catalog searches and search links.
    #[serde(default = "default_country")]
    pub country: String,
}

/// Presence payload identity and labels.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PresenceConfig {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_fallback_large_image")]
    pub fallback_large_image: String,
    #[serde(default = "default_fallback_large_text")]
    pub fallback_large_text: String,
    #[serde(default = "default_playing_image")]
    pub playing_image: String,
    #[serde(default = "default_paused_image")]
    pub paused_image: String,
    #[serde(default = "default_track_button_label")]
    pub track_button_label: String,
    #[serde(default = "default_album_button_label")]
    pub album_button_label: String,
    #[serde(default = "default_search_button_label")]
    pub search_button_label: String,
}

/// Log output preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_active_interval_ms() -> u64 {
    2_000
}

fn default_background_interval_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

fn default_http_timeout_secs() -> u64 {
    4
}

fn default_courtesy_delay_ms() -> u64 {
    250
}

fn default_cache_capacity() -> usize {
    512
}

fn default_artwork_size_px() -> u32 {
    512
}

fn default_user_agent() -> String {
    "richtune/0.1.0 (https://github.com/richtune/richtune)".to_string()
}

fn default_country() -> String {
    "us".to_string()
}

fn default_client_id() -> String {
    "1465803809761792193".to_string()
}

fn default_fallback_large_image() -> String {
    "am_logo".to_string()
}

fn default_fallback_large_text() -> String {
    "Apple Music".to_string()
}

fn default_playing_image() -> String {
    "play".to_string()
}

fn default_paused_image() -> String {
    "pause".to_string()
}

fn default_track_button_label() -> String {
    "Play on Apple Music".to_string()
}

fn default_album_button_label() -> String {
    "View Album".to_string()
}

fn default_search_button_label() -> String {
    "Search on Apple Music".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            active_interval_ms: default_active_interval_ms(),
            background_interval_ms: default_background_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            musicbrainz_enabled: true,
            http_timeout_secs: default_http_timeout_secs(),
            courtesy_delay_ms: default_courtesy_delay_ms(),
            cache_capacity: default_cache_capacity(),
            artwork_size_px: default_artwork_size_px(),
            user_agent: default_user_agent(),
            country: default_country(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            fallback_large_image: default_fallback_large_image(),
            fallback_large_text: default_fallback_large_text(),
            playing_image: default_playing_image(),
            paused_image: default_paused_image(),
            track_button_label: default_track_button_label(),
            album_button_label: default_album_button_label(),
            search_button_label: default_search_button_label(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Maximum characters accepted by the presence service for a button label.
pub const MAX_BUTTON_LABEL_CHARS: usize = 32;

/// Clamps loaded values into ranges the runtime can operate with.
pub fn sanitize_config(config: Config) -> Config {
    let active_interval_ms = config.polling.active_interval_ms.clamp(250, 60_000);
    let background_interval_ms = config
        .polling
        .background_interval_ms
        .clamp(active_interval_ms, 120_000);
    let country = config.lookup.country.trim().to_ascii_lowercase();

    Config {
        polling: PollingConfig {
            active_interval_ms,
            background_interval_ms,
            shutdown_grace_ms: config.polling.shutdown_grace_ms.clamp(100, 30_000),
        },
        lookup: LookupConfig {
            http_timeout_secs: config.lookup.http_timeout_secs.clamp(1, 10),
            courtesy_delay_ms: config.lookup.courtesy_delay_ms.min(5_000),
            cache_capacity: config.lookup.cache_capacity.max(1),
            artwork_size_px: config.lookup.artwork_size_px.clamp(64, 3_000),
            user_agent: if config.lookup.user_agent.trim().is_empty() {
                default_user_agent()
            } else {
                config.lookup.user_agent
            },
            country: if country.len() == 2 && country.chars().all(|ch| ch.is_ascii_alphabetic())
            {
                country
            } else {
                default_country()
            },
            ..config.lookup
        },
        presence: PresenceConfig {
            track_button_label: clamp_label(config.presence.track_button_label),
            album_button_label: clamp_label(config.presence.album_button_label),
            search_button_label: clamp_label(config.presence.search_button_label),
            ..config.presence
        },
        logging: config.logging,
    }
}

fn clamp_label(label: String) -> String {
    label.chars().take(MAX_BUTTON_LABEL_CHARS).collect()
}

/// Resolves the configured log level, honoring the `RICHTUNE_DEBUG=1` override.
pub fn effective_log_level(config: &LoggingConfig, debug_override: bool) -> log::LevelFilter {
    if debug_override {
        return log::LevelFilter::Debug;
    }
    config
        .level
        .trim()
        .parse::<log::LevelFilter>()
        .unwrap_or(log::LevelFilter::Info)
}
