//! Keeps resolver latency off the sampling thread.
//!
//! One background worker thread runs resolver calls from a bounded queue.
//! The coordinator itself is owned by the sampling loop: only the loop
//! mutates the current key, absorbed links, and synced flag. The worker
//! answers through a per-job oneshot handle that the loop polls.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, SyncSender, TrySendError},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::metadata::metadata_resolver::TrackResolver;
use crate::protocol::{ResolvedLinks, TrackKey};
use crate::runtime::panic_payload_to_string;

const RESOLUTION_QUEUE_CAPACITY: usize = 8;
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct ResolutionJob {
    key: TrackKey,
    reply: oneshot::Sender<ResolvedLinks>,
}

struct PendingResolution {
    key: TrackKey,
    receiver: oneshot::Receiver<ResolvedLinks>,
}

/// What changed during one [`ResolutionCoordinator::observe`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorUpdate {
    pub key_changed: bool,
    pub absorbed: bool,
}

fn run_worker(
    resolver: Arc<dyn TrackResolver>,
    jobs: Receiver<ResolutionJob>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("ResolutionCoordinator: worker started");
    while let Ok(job) = jobs.recv() {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        if job.reply.is_closed() {
            debug!(
                "ResolutionCoordinator: skipping superseded lookup for {}",
                job.key.label()
            );
            continue;
        }
        let resolved = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            resolver.resolve(&job.key)
        }));
        match resolved {
            Ok(links) => {
                // A closed reply means the key was superseded mid-flight.
                let _ = job.reply.send(links);
            }
            Err(payload) => error!(
                "ResolutionCoordinator: resolver panicked for {}: {}",
                job.key.label(),
                panic_payload_to_string(payload.as_ref())
            ),
        }
    }
    debug!("ResolutionCoordinator: worker stopped");
}

/// Single-flight resolution bookkeeping for the sampling loop.
pub struct ResolutionCoordinator {
    resolver: Arc<dyn TrackResolver>,
    job_sender: Option<SyncSender<ResolutionJob>>,
    worker: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    current_key: Option<TrackKey>,
    pending: Option<PendingResolution>,
    absorbed: Option<ResolvedLinks>,
    synced: bool,
    submit_deferred: bool,
}

impl ResolutionCoordinator {
    /// Spawns the worker thread.
    pub fn new(resolver: Arc<dyn TrackResolver>) -> Self {
        let (job_sender, job_receiver) = mpsc::sync_channel(RESOLUTION_QUEUE_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_resolver = Arc::clone(&resolver);
        let worker_shutdown = Arc::clone(&shutdown);
        let worker = thread::Builder::new()
            .name("resolution-worker".to_string())
            .spawn(move || run_worker(worker_resolver, job_receiver, worker_shutdown));
        let (job_sender, worker) = match worker {
            Ok(handle) => (Some(job_sender), Some(handle)),
            Err(err) => {
                error!(
                    "ResolutionCoordinator: failed to spawn worker, lookups disabled: {}",
                    err
                );
                (None, None)
            }
        };

        Self {
            resolver,
            job_sender,
            worker,
            shutdown,
            current_key: None,
            pending: None,
            absorbed: None,
            synced: false,
            submit_deferred: false,
        }
    }

    /// Per-tick bookkeeping for the sampled track.
    pub fn observe(&mut self, key: &TrackKey) -> CoordinatorUpdate {
        let mut update = CoordinatorUpdate::default();
        if self.current_key.as_ref() != Some(key) {
            update.key_changed = true;
            update.absorbed = self.begin(key.clone());
        } else if self.submit_deferred {
            self.submit();
        }
        if self.poll_pending() {
            update.absorbed = true;
        }
        update
    }

    /// Forgets the current track; any in-flight result is abandoned.
    pub fn reset(&mut self) {
        self.current_key = None;
        self.pending = None;
        self.absorbed = None;
        self.synced = false;
        self.submit_deferred = false;
    }

    pub fn current_key(&self) -> Option<&TrackKey> {
        self.current_key.as_ref()
    }

    /// Links absorbed for the current key, if resolution has completed.
    pub fn current_links(&self) -> Option<&ResolvedLinks> {
        self.absorbed.as_ref()
    }

    pub fn has_artwork(&self) -> bool {
        self.absorbed.as_ref().is_some_and(ResolvedLinks::has_artwork)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some() || self.submit_deferred
    }

    /// True once the publisher has used this key's artwork.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn mark_synced(&mut self) {
        self.synced = true;
    }

    fn begin(&mut self, key: TrackKey) -> bool {
        if let Some(previous) = self.pending.take() {
            debug!(
                "ResolutionCoordinator: abandoning lookup for {}",
                previous.key.label()
            );
        }
        self.absorbed = None;
        self.synced = false;
        self.submit_deferred = false;

        let cached = self.resolver.cached(&key);
        self.current_key = Some(key);
        if let Some(links) = cached {
            self.absorbed = Some(links);
            return true;
        }
        self.submit();
        false
    }

    fn submit(&mut self) {
        let Some(key) = self.current_key.clone() else {
            self.submit_deferred = false;
            return;
        };
        let Some(job_sender) = self.job_sender.as_ref() else {
            self.submit_deferred = false;
            return;
        };

        let (reply, receiver) = oneshot::channel();
        match job_sender.try_send(ResolutionJob {
            key: key.clone(),
            reply,
        }) {
            Ok(()) => {
                debug!("ResolutionCoordinator: queued lookup for {}", key.label());
                self.pending = Some(PendingResolution { key, receiver });
                self.submit_deferred = false;
            }
            Err(TrySendError::Full(_)) => {
                debug!(
                    "ResolutionCoordinator: queue full, deferring lookup for {}",
                    key.label()
                );
                self.submit_deferred = true;
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("ResolutionCoordinator: worker is gone, lookups disabled");
                self.job_sender = None;
                self.submit_deferred = false;
            }
        }
    }

    fn poll_pending(&mut self) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };
        match pending.receiver.try_recv() {
            Ok(links) => {
                let Some(finished) = self.pending.take() else {
                    return false;
                };
                if self.current_key.as_ref() != Some(&finished.key) {
                    debug!(
                        "ResolutionCoordinator: dropping stale result for {}",
                        finished.key.label()
                    );
                    return false;
                }
                self.absorbed = Some(links);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                warn!(
                    "ResolutionCoordinator: lookup for {} ended without a result",
                    pending.key.label()
                );
                self.pending = None;
                false
            }
        }
    }

    /// Stops the worker: queued jobs are dropped, an in-flight lookup is left
    /// to finish or time out, and the join waits at most `grace`.
    pub fn shutdown(&mut self, grace: Duration) {
        self.shutdown.store(true, Ordering::Release);
        self.reset();
        self.job_sender = None;

        let Some(worker) = self.worker.take() else {
            return;
        };
        let deadline = Instant::now() + grace;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "ResolutionCoordinator: worker still busy after {:?}, detaching",
                    grace
                );
                return;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if worker.join().is_err() {
            warn!("ResolutionCoordinator: worker thread panicked");
        }
    }
}

impl Drop for ResolutionCoordinator {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.job_sender = None;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use crate::metadata::metadata_resolver::TrackResolver;
    use crate::protocol::{ResolvedLinks, TrackKey};

    pub fn artwork_links(title: &str) -> ResolvedLinks {
        ResolvedLinks {
            artwork_url: Some(format!("https://art.test/{title}.jpg")),
            track_url: Some(format!("https://music.test/track/{title}")),
            album_url: Some(format!("https://music.test/album/{title}")),
        }
    }

    /// Resolver whose lookups block until the test opens the key's gate.
    #[derive(Default)]
    pub struct GatedResolver {
        gates: Mutex<HashMap<String, Receiver<()>>>,
        started: Mutex<Vec<String>>,
    }

    impl GatedResolver {
        pub fn gate(&self, title: &str) -> Sender<()> {
            let (sender, receiver) = mpsc::channel();
            if let Ok(mut gates) = self.gates.lock() {
                gates.insert(title.to_string(), receiver);
            }
            sender
        }

        pub fn started(&self) -> Vec<String> {
            self.started
                .lock()
                .map(|started| started.clone())
                .unwrap_or_default()
        }

        pub fn wait_started(&self, title: &str) -> bool {
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                if self.started().iter().any(|started| started == title) {
                    return true;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            false
        }
    }

    impl TrackResolver for GatedResolver {
        fn resolve(&self, key: &TrackKey) -> ResolvedLinks {
            if let Ok(mut started) = self.started.lock() {
                started.push(key.title.clone());
            }
            let gate = self
                .gates
                .lock()
                .ok()
                .and_then(|mut gates| gates.remove(&key.title));
            if let Some(gate) = gate {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            artwork_links(&key.title)
        }

        fn cached(&self, _key: &TrackKey) -> Option<ResolvedLinks> {
            None
        }
    }

    /// Resolver answering synchronously from a fixed table.
    pub struct CachedResolver {
        pub links: ResolvedLinks,
    }

    impl TrackResolver for CachedResolver {
        fn resolve(&self, _key: &TrackKey) -> ResolvedLinks {
            self.links.clone()
        }

        fn cached(&self, _key: &TrackKey) -> Option<ResolvedLinks> {
            Some(self.links.clone())
        }
    }
}
