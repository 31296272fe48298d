use std::{
    sync::{atomic::AtomicBool, Arc},
    thread::{self, JoinHandle},
};

use log::{error, warn};
use tokio::sync::broadcast;

use crate::{
    config::Config,
    integration::presence_publisher::{PresenceClient, PresencePublisher},
    media_source::MediaSource,
    metadata::metadata_resolver::TrackResolver,
    protocol::{Message, PresenceMessage},
    runtime::{panic_payload_to_string, presence_sync_manager::PresenceSyncManager},
    status_reporter::StatusReporter,
};

pub struct BackgroundServicesConfig {
    pub bus_sender: broadcast::Sender<Message>,
    pub config: Config,
    pub running: Arc<AtomicBool>,
    pub media_source: Box<dyn MediaSource>,
    pub resolver: Arc<dyn TrackResolver>,
    pub presence_client: Box<dyn PresenceClient>,
}

/// Spawns the status reporter and the sampling loop. The returned handle
/// finishes once the running flag is cleared and shutdown completes.
pub fn spawn_background_services(
    config: BackgroundServicesConfig,
) -> std::io::Result<JoinHandle<()>> {
    let BackgroundServicesConfig {
        bus_sender,
        config,
        running,
        media_source,
        resolver,
        presence_client,
    } = config;

    let reporter_bus_receiver = bus_sender.subscribe();
    let reporter = thread::Builder::new()
        .name("status-reporter".to_string())
        .spawn(move || {
            let mut reporter = StatusReporter::new(reporter_bus_receiver);
            reporter.run();
        });
    if let Err(err) = reporter {
        warn!("failed to spawn status reporter: {}", err);
    }

    let sync_bus_receiver = bus_sender.subscribe();
    let sync_bus_sender = bus_sender.clone();
    thread::Builder::new()
        .name("presence-sync".to_string())
        .spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let mut publisher = PresencePublisher::new(
                    presence_client,
                    config.presence.clone(),
                    config.lookup.country.clone(),
                );
                let _ = sync_bus_sender.send(Message::Presence(PresenceMessage::Connecting));
                match publisher.connect() {
                    Ok(account) => {
                        let _ = sync_bus_sender
                            .send(Message::Presence(PresenceMessage::Connected(account)));
                    }
                    Err(err) => {
                        // Publishing reconnects lazily, so a missing service is not fatal.
                        warn!("presence service not reachable yet: {}", err);
                        let _ = sync_bus_sender.send(Message::Presence(
                            PresenceMessage::ConnectFailed(err.to_string()),
                        ));
                    }
                }

                let mut sync_manager = PresenceSyncManager::new(
                    media_source,
                    resolver,
                    publisher,
                    sync_bus_receiver,
                    sync_bus_sender,
                    config.polling.clone(),
                    running,
                );
                sync_manager.run();
            }));
            if let Err(payload) = run_result {
                error!(
                    "PresenceSyncManager thread terminated due to panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })
}
