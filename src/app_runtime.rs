//! Application runtime bootstrap and top-level orchestration.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use log::{info, warn};
use tokio::sync::broadcast;

use crate::{
    app_bootstrap::services::{spawn_background_services, BackgroundServicesConfig},
    config::{effective_log_level, Config, LookupConfig},
    config_persistence::{default_config_path, load_or_create_config},
    error::PresenceError,
    integration::discord_ipc::DiscordIpcClient,
    media_source::platform_media_source,
    metadata::{
        catalog_http::UreqTransport,
        metadata_resolver::{DisabledResolver, MetadataResolver, ResolverSettings, TrackResolver},
    },
    protocol::Message,
};

const BUS_CAPACITY: usize = 1024;
const DEBUG_ENV_VAR: &str = "RICHTUNE_DEBUG";

fn debug_override_requested() -> bool {
    std::env::var(DEBUG_ENV_VAR).is_ok_and(|value| value.trim() == "1")
}

/// Lookup pipeline selected by `[lookup]`.
pub(crate) fn build_resolver(lookup: &LookupConfig) -> Arc<dyn TrackResolver> {
    if !lookup.enabled {
        info!("Online lookup disabled; presence will use fallback assets");
        return Arc::new(DisabledResolver);
    }
    let transport = Arc::new(UreqTransport::new(
        Duration::from_secs(lookup.http_timeout_secs),
        &lookup.user_agent,
    ));
    Arc::new(MetadataResolver::new(
        transport,
        ResolverSettings::from(lookup),
    ))
}

/// Clears `running` on Ctrl-C.
fn spawn_interrupt_watcher(running: Arc<AtomicBool>) -> std::io::Result<()> {
    thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!("Failed to start signal runtime, Ctrl-C will not stop cleanly: {}", err);
                    return;
                }
            };
            runtime.block_on(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Interrupt received, shutting down");
                        running.store(false, Ordering::Release);
                    }
                    Err(err) => warn!("Failed to listen for Ctrl-C: {}", err),
                }
            });
        })?;
    Ok(())
}

/// Owns startup wiring for one process lifetime.
pub(crate) struct AppRuntime {
    config: Config,
    config_file: PathBuf,
    running: Arc<AtomicBool>,
    bus_sender: broadcast::Sender<Message>,
}

impl AppRuntime {
    /// Loads config and applies the configured log level.
    pub(crate) fn build() -> Result<Self, Box<dyn std::error::Error>> {
        let config_file = default_config_path().ok_or_else(|| {
            PresenceError::Config("no per-user config directory on this platform".to_string())
        })?;
        let config = load_or_create_config(&config_file)?;
        log::set_max_level(effective_log_level(
            &config.logging,
            debug_override_requested(),
        ));

        let (bus_sender, _) = broadcast::channel(BUS_CAPACITY);
        Ok(Self {
            config,
            config_file,
            running: Arc::new(AtomicBool::new(true)),
            bus_sender,
        })
    }

    /// Runs until Ctrl-C, then waits for the sampling loop to shut down.
    pub(crate) fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Using config {}", self.config_file.display());
        spawn_interrupt_watcher(Arc::clone(&self.running))?;

        let sync_thread = spawn_background_services(BackgroundServicesConfig {
            bus_sender: self.bus_sender.clone(),
            config: self.config.clone(),
            running: Arc::clone(&self.running),
            media_source: platform_media_source(),
            resolver: build_resolver(&self.config.lookup),
            presence_client: Box::new(DiscordIpcClient::new(
                self.config.presence.client_id.clone(),
            )),
        })?;

        if sync_thread.join().is_err() {
            warn!("Sampling loop thread exited abnormally");
        }
        info!("Goodbye");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::build_resolver;
    use crate::config::LookupConfig;
    use crate::protocol::{ResolvedLinks, TrackKey};

    #[test]
    fn test_disabled_lookup_answers_from_memory() {
        let lookup = LookupConfig {
            enabled: false,
            ..LookupConfig::default()
        };
        let resolver = build_resolver(&lookup);
        let key = TrackKey::new("Song", "Artist", "Album");
        assert_eq!(resolver.cached(&key), Some(ResolvedLinks::empty()));
        assert_eq!(resolver.resolve(&key), ResolvedLinks::empty());
    }
}
