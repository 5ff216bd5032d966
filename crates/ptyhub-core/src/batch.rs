//! Debounced, request-correlated file-existence checks.
//!
//! Callers ask about one path at a time; the coordinator coalesces misses
//! into batches, sends each batch once under a fresh id and resolves callers
//! when the correlated reply arrives. A batch that gets no reply before its
//! timeout resolves every still-pending path to `false`.
//!
//! This is the client half of `SessionMessage::BatchPathCheck`, for Rust UI
//! clients. The daemon never runs it; it answers batches directly through
//! its path checker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use ptyhub_ipc::PathExists;

use crate::cache::ExistenceCache;
use crate::time::Scheduler;
use crate::time::TimerHandle;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound side of the batch protocol.
pub trait BatchTransport: Send {
    fn send_batch(&self, batch_id: u64, paths: Vec<String>);
}

/// Timer events the coordinator expects back from its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTimer {
    Debounce,
    Timeout(u64),
}

type Waiters = HashMap<String, Vec<oneshot::Sender<bool>>>;

struct PendingBatch {
    waiters: Waiters,
    _timeout: TimerHandle,
}

pub struct BatchCoordinator<T: BatchTransport> {
    transport: T,
    scheduler: Arc<dyn Scheduler<BatchTimer>>,
    cache: ExistenceCache,
    accumulating_order: Vec<String>,
    accumulating: Waiters,
    debounce: Option<TimerHandle>,
    in_flight: HashMap<u64, PendingBatch>,
    next_batch_id: u64,
    debounce_delay: Duration,
    batch_timeout: Duration,
}

impl<T: BatchTransport> BatchCoordinator<T> {
    pub fn new(
        transport: T,
        scheduler: Arc<dyn Scheduler<BatchTimer>>,
        cache: ExistenceCache,
    ) -> Self {
        Self {
            transport,
            scheduler,
            cache,
            accumulating_order: Vec::new(),
            accumulating: HashMap::new(),
            debounce: None,
            in_flight: HashMap::new(),
            next_batch_id: 1,
            debounce_delay: DEFAULT_DEBOUNCE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }

    pub fn with_timing(mut self, debounce: Duration, batch_timeout: Duration) -> Self {
        self.debounce_delay = debounce;
        self.batch_timeout = batch_timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Ask whether `path` exists. Cache hits resolve immediately; misses join
    /// the accumulating batch and push the debounce deadline back.
    pub fn check_exists(&mut self, path: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();

        if let Some(exists) = self.cache.get(path) {
            let _ = tx.send(exists);
            return rx;
        }

        match self.accumulating.get_mut(path) {
            Some(waiters) => waiters.push(tx),
            None => {
                self.accumulating_order.push(path.to_string());
                self.accumulating.insert(path.to_string(), vec![tx]);
            }
        }

        self.debounce = Some(
            self.scheduler
                .schedule(self.debounce_delay, BatchTimer::Debounce),
        );
        rx
    }

    pub fn on_timer(&mut self, timer: BatchTimer) {
        match timer {
            BatchTimer::Debounce => self.flush(),
            BatchTimer::Timeout(batch_id) => self.expire(batch_id),
        }
    }

    /// Seal the accumulating batch and send it. Requests arriving after this
    /// start a new batch.
    pub fn flush(&mut self) {
        self.debounce = None;
        if self.accumulating.is_empty() {
            return;
        }

        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;

        let paths = std::mem::take(&mut self.accumulating_order);
        let waiters = std::mem::take(&mut self.accumulating);
        let timeout = self
            .scheduler
            .schedule(self.batch_timeout, BatchTimer::Timeout(batch_id));
        self.in_flight.insert(
            batch_id,
            PendingBatch {
                waiters,
                _timeout: timeout,
            },
        );

        debug!(batch_id, paths = paths.len(), "Sending path batch");
        self.transport.send_batch(batch_id, paths);
    }

    /// Apply a correlated reply. Replies for unknown or expired batches are
    /// ignored.
    pub fn handle_result(&mut self, batch_id: u64, results: &[PathExists]) {
        let Some(mut batch) = self.in_flight.remove(&batch_id) else {
            debug!(batch_id, "Ignoring reply for settled batch");
            return;
        };

        for result in results {
            if let Some(waiters) = batch.waiters.remove(&result.path) {
                self.cache.insert(result.path.clone(), result.exists);
                for tx in waiters {
                    let _ = tx.send(result.exists);
                }
            }
        }

        // Paths the reply left out are unconfirmed; resolve without caching.
        for tx in batch.waiters.into_values().flatten() {
            let _ = tx.send(false);
        }
    }

    fn expire(&mut self, batch_id: u64) {
        let Some(batch) = self.in_flight.remove(&batch_id) else {
            return;
        };

        debug!(batch_id, paths = batch.waiters.len(), "Path batch timed out");
        for (path, waiters) in batch.waiters {
            self.cache.insert(path, false);
            for tx in waiters {
                let _ = tx.send(false);
            }
        }
    }

    /// Drop every pending request. Waiters observe a closed channel.
    pub fn dispose(&mut self) {
        self.debounce = None;
        self.accumulating_order.clear();
        self.accumulating.clear();
        self.in_flight.clear();
    }
}
