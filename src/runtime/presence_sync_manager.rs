//! Sampling loop: change detection, resolution bookkeeping, and publishing.
//!
//! This manager owns every piece of in-flight state. It samples the media
//! source once per tick, forwards the enriched sample to the bus, and
//! decides when the presence service needs an update.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio::sync::broadcast::{error::TryRecvError, Receiver, Sender};

use crate::config::PollingConfig;
use crate::integration::presence_publisher::PresencePublisher;
use crate::media_source::MediaSource;
use crate::metadata::metadata_resolver::TrackResolver;
use crate::protocol::{
    HostMessage, Message, NowPlaying, NowPlayingView, PlaybackMessage, PresenceMessage,
    PresenceSignature, TrackKey,
};
use crate::runtime::resolution_coordinator::ResolutionCoordinator;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublishReason {
    SignatureChanged,
    LateArtwork,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Keeps the presence service in step with the local player.
pub struct PresenceSyncManager {
    source: Box<dyn MediaSource>,
    coordinator: ResolutionCoordinator,
    publisher: PresencePublisher,
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    polling: PollingConfig,
    running: Arc<AtomicBool>,
    last_signature: Option<PresenceSignature>,
    published_key: Option<TrackKey>,
    host_active: bool,
    source_available: bool,
}

impl PresenceSyncManager {
    pub fn new(
        source: Box<dyn MediaSource>,
        resolver: Arc<dyn TrackResolver>,
        publisher: PresencePublisher,
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        polling: PollingConfig,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            coordinator: ResolutionCoordinator::new(resolver),
            publisher,
            bus_consumer,
            bus_producer,
            polling,
            running,
            last_signature: None,
            published_key: None,
            host_active: true,
            source_available: true,
        }
    }

    fn emit(&self, message: Message) {
        // No subscribers is fine; the loop does not depend on observers.
        let _ = self.bus_producer.send(message);
    }

    /// Interval until the next sample, by host focus.
    pub fn current_interval(&self) -> Duration {
        let millis = if self.host_active {
            self.polling.active_interval_ms
        } else {
            self.polling.background_interval_ms
        };
        Duration::from_millis(millis)
    }

    /// One sampling step at wall-clock time `now` (unix seconds).
    pub fn tick(&mut self, now: i64) {
        let sample = match self.source.sample() {
            Ok(sample) => {
                if !self.source_available {
                    info!("PresenceSyncManager: media source available again");
                    self.source_available = true;
                }
                sample
            }
            Err(err) => {
                if self.source_available {
                    warn!("PresenceSyncManager: {}", err);
                    self.source_available = false;
                    self.emit(Message::Playback(PlaybackMessage::SourceFailed(
                        err.to_string(),
                    )));
                }
                None
            }
        };

        match sample {
            Some(sample) => self.handle_active(sample, now),
            None => self.handle_idle(),
        }
    }

    fn handle_idle(&mut self) {
        if self.publisher.has_presence() {
            match self.publisher.clear() {
                Ok(()) => {
                    info!("PresenceSyncManager: playback stopped, presence cleared");
                    self.emit(Message::Presence(PresenceMessage::Cleared));
                }
                Err(err) => {
                    warn!("PresenceSyncManager: failed to clear presence: {}", err);
                    self.emit(Message::Presence(PresenceMessage::PublishFailed(
                        err.to_string(),
                    )));
                }
            }
        }
        if let Some(previous) = self.coordinator.current_key() {
            debug!("PresenceSyncManager: {} no longer playing", previous.label());
        }
        self.last_signature = None;
        self.published_key = None;
        self.coordinator.reset();
        self.emit(Message::Playback(PlaybackMessage::Idle));
    }

    fn handle_active(&mut self, sample: NowPlaying, now: i64) {
        let key = sample.track_key();
        let update = self.coordinator.observe(&key);
        if update.key_changed {
            debug!(
                "PresenceSyncManager: now playing {} (lookup pending={})",
                key.label(),
                self.coordinator.is_pending()
            );
        }
        if update.absorbed {
            debug!(
                "PresenceSyncManager: links ready for {} (artwork={})",
                key.label(),
                self.coordinator.has_artwork()
            );
        }

        let artwork_url = self
            .coordinator
            .current_links()
            .filter(|links| links.has_artwork())
            .and_then(|links| links.artwork_url.clone());
        self.emit(Message::Playback(PlaybackMessage::NowPlaying(
            NowPlayingView {
                sample: sample.clone(),
                artwork_url,
            },
        )));

        let signature = sample.signature();
        if self.last_signature.as_ref() != Some(&signature) {
            self.last_signature = Some(signature);
            self.publish(&sample, now, PublishReason::SignatureChanged);
            self.published_key = Some(key);
        } else if self.published_key.as_ref() == Some(&key)
            && !self.coordinator.is_synced()
            && self.coordinator.has_artwork()
        {
            self.publish(&sample, now, PublishReason::LateArtwork);
        }
    }

    fn publish(&mut self, sample: &NowPlaying, now: i64, reason: PublishReason) {
        let links = self.coordinator.current_links().cloned();
        let with_artwork = links.as_ref().is_some_and(|links| links.has_artwork());
        // Artwork counts as used once attempted; a failed patch is retried by
        // the next signature change, not by the next tick.
        if with_artwork {
            self.coordinator.mark_synced();
        }

        match self.publisher.publish(sample, links.as_ref(), now) {
            Ok(_) => {
                debug!(
                    "PresenceSyncManager: published {} ({:?}, artwork={})",
                    sample.track_key().label(),
                    reason,
                    with_artwork
                );
                self.emit(Message::Presence(PresenceMessage::Published {
                    title: sample.title.clone(),
                    artist: sample.artist.clone(),
                    playing: sample.playing,
                    with_artwork,
                }));
            }
            Err(err) => {
                warn!("PresenceSyncManager: publish failed: {}", err);
                self.emit(Message::Presence(PresenceMessage::PublishFailed(
                    err.to_string(),
                )));
            }
        }
    }

    fn drain_bus(&mut self) {
        loop {
            match self.bus_consumer.try_recv() {
                Ok(Message::Host(HostMessage::ActivityChanged { active })) => {
                    if self.host_active != active {
                        debug!(
                            "PresenceSyncManager: host {}, polling every {:?}",
                            if active { "active" } else { "backgrounded" },
                            if active {
                                Duration::from_millis(self.polling.active_interval_ms)
                            } else {
                                Duration::from_millis(self.polling.background_interval_ms)
                            }
                        );
                    }
                    self.host_active = active;
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!("PresenceSyncManager: bus lagged by {} messages", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn sleep_until_next_tick(&self, started: Instant) {
        let deadline = started + self.current_interval();
        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Clears any visible presence and stops the resolution worker.
    pub fn shutdown(&mut self) {
        if self.publisher.has_presence() {
            if let Err(err) = self.publisher.clear() {
                warn!("PresenceSyncManager: failed to clear presence on exit: {}", err);
            } else {
                self.emit(Message::Presence(PresenceMessage::Cleared));
            }
        }
        self.coordinator
            .shutdown(Duration::from_millis(self.polling.shutdown_grace_ms));
        info!("PresenceSyncManager: stopped");
    }

    /// Samples until the running flag is cleared, then shuts down.
    pub fn run(&mut self) {
        info!(
            "PresenceSyncManager: started (interval {:?})",
            self.current_interval()
        );
        while self.running.load(Ordering::Acquire) {
            let started = Instant::now();
            self.drain_bus();
            self.tick(unix_now());
            self.sleep_until_next_tick(started);
        }
        self.shutdown();
    }
}
