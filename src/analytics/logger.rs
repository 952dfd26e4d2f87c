//! Background recorder for redirect hits
//!
//! Redirect handlers hand a [`HitEvent`] to the logger and return right away.
//! A dispatcher task owns the receiving end of a bounded channel and runs each
//! event on one of a fixed number of worker slots, so at most `workers` store
//! writes are in flight at once. A full queue sheds load instead of blocking
//! the redirect path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::analytics::models::{AnalyticsStats, HitEvent};
use crate::config::AnalyticsConfig;
use crate::storage::Storage;

const INITIAL_BACKOFF: Duration = Duration::from_millis(25);

enum LoggerMessage {
    Hit(HitEvent),
    /// Everything queued before this message is still processed
    Shutdown,
}

#[derive(Default)]
struct Counters {
    recorded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    /// Hits that made it into the queue
    accepted: AtomicU64,
    /// Accepted hits that reached recorded, failed or dropped
    settled: AtomicU64,
}

impl Counters {
    fn settle(&self, outcome: &AtomicU64) {
        outcome.fetch_add(1, Ordering::Relaxed);
        self.settled.fetch_add(1, Ordering::AcqRel);
    }

    /// Count every accepted hit that never settled as dropped. Returns how many.
    fn abandon_unsettled(&self) -> u64 {
        let accepted = self.accepted.load(Ordering::Acquire);
        let settled = self.settled.load(Ordering::Acquire);
        let lost = accepted.saturating_sub(settled);
        self.dropped.fetch_add(lost, Ordering::Relaxed);
        self.settled.fetch_add(lost, Ordering::AcqRel);
        lost
    }

    fn snapshot(&self) -> AnalyticsStats {
        AnalyticsStats {
            recorded: self.recorded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct Dispatcher {
    receiver: mpsc::Receiver<LoggerMessage>,
    storage: Arc<dyn Storage>,
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
    max_attempts: u32,
}

impl Dispatcher {
    async fn run(mut self) {
        let mut workers = JoinSet::new();

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                LoggerMessage::Hit(event) => {
                    // Waiting for a slot here is the backpressure onto the queue.
                    let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
                        break;
                    };
                    let storage = Arc::clone(&self.storage);
                    let counters = Arc::clone(&self.counters);
                    let max_attempts = self.max_attempts;

                    workers.spawn(async move {
                        let _permit = permit;
                        if write_with_retry(storage.as_ref(), &event, max_attempts).await {
                            counters.settle(&counters.recorded);
                        } else {
                            counters.settle(&counters.failed);
                        }
                    });

                    while workers.try_join_next().is_some() {}
                }
                LoggerMessage::Shutdown => {
                    debug!("Analytics dispatcher received shutdown signal");
                    break;
                }
            }
        }

        // Hits that raced past the closed flag and landed behind the shutdown marker.
        self.receiver.close();
        while let Ok(msg) = self.receiver.try_recv() {
            if let LoggerMessage::Hit(event) = msg {
                self.counters.settle(&self.counters.dropped);
                warn!(short_code = %event.short_code, "Analytics logger closed, dropping hit");
            }
        }

        while workers.join_next().await.is_some() {}
        info!("Analytics dispatcher drained");
    }
}

async fn write_with_retry(storage: &dyn Storage, event: &HitEvent, max_attempts: u32) -> bool {
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=max_attempts {
        match storage
            .record_hit(event.link_id, event.queried_by, event.queried_at)
            .await
        {
            Ok(()) => return true,
            Err(e) if attempt < max_attempts => {
                warn!(
                    short_code = %event.short_code,
                    link_id = event.link_id,
                    attempt,
                    "Failed to record hit, retrying: {}",
                    e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                error!(
                    short_code = %event.short_code,
                    link_id = event.link_id,
                    attempts = max_attempts,
                    "Giving up on recording hit: {}",
                    e
                );
            }
        }
    }

    false
}

enum DispatcherState {
    Running(JoinHandle<()>),
    /// Holds the result of the drain
    Stopped(bool),
}

/// Bounded, best-effort writer of hit counts and query log entries.
pub struct AnalyticsLogger {
    sender: mpsc::Sender<LoggerMessage>,
    counters: Arc<Counters>,
    closed: AtomicBool,
    dispatcher: Mutex<DispatcherState>,
    drain_timeout: Duration,
}

impl AnalyticsLogger {
    /// Spawn the dispatcher. Must be called from within a tokio runtime.
    pub fn new(storage: Arc<dyn Storage>, config: &AnalyticsConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        let dispatcher = Dispatcher {
            receiver,
            storage,
            slots: Arc::new(Semaphore::new(config.workers.max(1))),
            counters: Arc::clone(&counters),
            max_attempts: config.max_attempts.max(1),
        };
        let handle = tokio::spawn(dispatcher.run());

        Self {
            sender,
            counters,
            closed: AtomicBool::new(false),
            dispatcher: Mutex::new(DispatcherState::Running(handle)),
            drain_timeout: config.drain_timeout(),
        }
    }

    /// Queue a hit without waiting. Drops it if the queue is full or closed.
    pub fn record(&self, event: HitEvent) {
        if self.closed.load(Ordering::Acquire) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(short_code = %event.short_code, "Analytics logger closed, dropping hit");
            return;
        }

        match self.sender.try_send(LoggerMessage::Hit(event)) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::AcqRel);
            }
            Err(err) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                match err {
                    mpsc::error::TrySendError::Full(LoggerMessage::Hit(event)) => {
                        warn!(short_code = %event.short_code, "Analytics queue full, dropping hit");
                    }
                    _ => warn!("Analytics dispatcher is gone, dropping hit"),
                }
            }
        }
    }

    pub fn stats(&self) -> AnalyticsStats {
        self.counters.snapshot()
    }

    /// Stop intake and wait for queued and in-flight hits, up to the drain
    /// timeout. Returns false if the timeout cut the drain short; the hits it
    /// abandoned are counted as dropped.
    ///
    /// Concurrent and later calls wait for the first drain to finish and
    /// return its result.
    pub async fn shutdown(&self) -> bool {
        self.closed.store(true, Ordering::Release);

        // Held for the whole drain so other callers see final stats.
        let mut state = self.dispatcher.lock().await;
        let drained = match &mut *state {
            DispatcherState::Stopped(drained) => return *drained,
            DispatcherState::Running(handle) => self.drain(handle).await,
        };
        *state = DispatcherState::Stopped(drained);
        drained
    }

    async fn drain(&self, handle: &mut JoinHandle<()>) -> bool {
        let drain = async {
            // A send error means the dispatcher already stopped.
            let _ = self.sender.send(LoggerMessage::Shutdown).await;
            (&mut *handle).await
        };

        let outcome = tokio::time::timeout(self.drain_timeout, drain).await;
        match outcome {
            Ok(Ok(())) => {
                let stats = self.stats();
                info!(
                    recorded = stats.recorded,
                    failed = stats.failed,
                    dropped = stats.dropped,
                    "Analytics logger shut down"
                );
                true
            }
            Ok(Err(e)) => {
                let lost = self.counters.abandon_unsettled();
                error!(lost, "Analytics dispatcher task failed: {}", e);
                false
            }
            Err(_) => {
                // Dropping the dispatcher cancels its queue and workers.
                handle.abort();
                let _ = (&mut *handle).await;
                let lost = self.counters.abandon_unsettled();
                warn!(
                    timeout_secs = self.drain_timeout.as_secs(),
                    lost,
                    "Analytics drain timed out, counting abandoned hits as dropped"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn storage_with_link() -> (Arc<dyn Storage>, i64) {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        let account = storage.create_account("a@x.com", "hash").await.unwrap();
        let link = storage
            .create_link("abc", "https://example.com", account.id)
            .await
            .unwrap();
        (Arc::new(storage), link.id)
    }

    fn hit(link_id: i64) -> HitEvent {
        HitEvent {
            link_id,
            short_code: "abc".to_string(),
            queried_by: 1,
            queried_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn shutdown_drains_queued_hits() {
        let (storage, link_id) = storage_with_link().await;
        let logger = AnalyticsLogger::new(Arc::clone(&storage), &AnalyticsConfig::default());

        for _ in 0..20 {
            logger.record(hit(link_id));
        }
        assert!(logger.shutdown().await);

        assert_eq!(
            logger.stats(),
            AnalyticsStats {
                recorded: 20,
                failed: 0,
                dropped: 0
            }
        );
        let link = storage.get_link("abc").await.unwrap().unwrap();
        assert_eq!(link.hit_count, 20);
        assert_eq!(storage.list_query_log(link_id).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (storage, link_id) = storage_with_link().await;
        let config = AnalyticsConfig {
            queue_capacity: 1,
            workers: 1,
            ..AnalyticsConfig::default()
        };
        let logger = AnalyticsLogger::new(storage, &config);

        // The current-thread test runtime does not run the dispatcher between
        // these calls, so only the first fits in the queue.
        for _ in 0..5 {
            logger.record(hit(link_id));
        }
        assert_eq!(logger.stats().dropped, 4);

        assert!(logger.shutdown().await);
        assert_eq!(logger.stats().recorded, 1);
    }

    #[tokio::test]
    async fn hits_after_shutdown_are_dropped() {
        let (storage, link_id) = storage_with_link().await;
        let logger = AnalyticsLogger::new(storage, &AnalyticsConfig::default());

        assert!(logger.shutdown().await);
        assert!(logger.shutdown().await);
        logger.record(hit(link_id));

        assert_eq!(logger.stats().dropped, 1);
        assert_eq!(logger.stats().recorded, 0);
    }

    #[tokio::test]
    async fn failing_writes_are_retried_then_counted() {
        let (storage, _) = storage_with_link().await;
        let config = AnalyticsConfig {
            max_attempts: 2,
            ..AnalyticsConfig::default()
        };
        let logger = AnalyticsLogger::new(storage, &config);

        logger.record(hit(9_999));
        assert!(logger.shutdown().await);

        assert_eq!(logger.stats().failed, 1);
        assert_eq!(logger.stats().recorded, 0);
    }

    #[tokio::test]
    async fn drain_timeout_counts_abandoned_hits_as_dropped() {
        let (storage, link_id) = storage_with_link().await;
        let config = AnalyticsConfig {
            workers: 1,
            drain_timeout_secs: 0,
            ..AnalyticsConfig::default()
        };
        let logger = AnalyticsLogger::new(storage, &config);

        for _ in 0..200 {
            logger.record(hit(link_id));
        }
        assert!(!logger.shutdown().await);

        let stats = logger.stats();
        assert!(stats.dropped > 0);
        assert_eq!(stats.recorded + stats.failed + stats.dropped, 200);

        // Later callers see the same outcome
        assert!(!logger.shutdown().await);
    }

    #[tokio::test]
    async fn concurrent_shutdowns_both_wait_for_the_drain() {
        let (storage, link_id) = storage_with_link().await;
        let logger = AnalyticsLogger::new(storage, &AnalyticsConfig::default());

        for _ in 0..20 {
            logger.record(hit(link_id));
        }
        let (first, second) = tokio::join!(logger.shutdown(), logger.shutdown());

        assert!(first);
        assert!(second);
        assert_eq!(logger.stats().recorded, 20);
    }
}
