//! Clock and timer ports.
//!
//! Every timed transition (ready timeout, exit grace, debounce, batch
//! timeout) goes through `Scheduler`, so production code runs on tokio timers
//! while tests drive a `ManualScheduler` deterministically.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use tokio::task::AbortHandle;

use ptyhub_common::mutex_lock_or_recover;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn elapsed(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = mutex_lock_or_recover(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *mutex_lock_or_recover(&self.now)
    }
}

/// Handle to an armed timer. Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub trait Scheduler<E>: Send + Sync {
    /// Deliver `event` after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, event: E) -> TimerHandle;
}

type Sink<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Tokio-backed scheduler: each timer is a task that sleeps, then hands the
/// event to `sink` (typically an event-loop channel).
pub struct TokioScheduler<E> {
    runtime: tokio::runtime::Handle,
    sink: Sink<E>,
}

impl<E> TokioScheduler<E> {
    pub fn new(runtime: tokio::runtime::Handle, sink: impl Fn(E) + Send + Sync + 'static) -> Self {
        Self {
            runtime,
            sink: Arc::new(sink),
        }
    }
}

impl<E: Send + 'static> Scheduler<E> for TokioScheduler<E> {
    fn schedule(&self, delay: Duration, event: E) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let sink = Arc::clone(&self.sink);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                sink(event);
            }
        });
        TimerHandle::new(cancelled, Some(task.abort_handle()))
    }
}

struct PendingTimer<E> {
    due: Instant,
    seq: u64,
    event: E,
    cancelled: Arc<AtomicBool>,
}

/// Test scheduler. Timers are recorded against a `ManualClock` and only fire
/// when `advance` moves the clock past their deadline.
pub struct ManualScheduler<E> {
    clock: ManualClock,
    timers: Mutex<Vec<PendingTimer<E>>>,
    next_seq: AtomicU64,
}

impl<E> Default for ManualScheduler<E> {
    fn default() -> Self {
        Self::new(ManualClock::new())
    }
}

impl<E> ManualScheduler<E> {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            timers: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Move time forward and return the events that became due, in deadline order.
    pub fn advance(&self, by: Duration) -> Vec<E> {
        self.clock.advance(by);
        let now = self.clock.now();

        let mut timers = mutex_lock_or_recover(&self.timers);
        timers.retain(|t| !t.cancelled.load(Ordering::SeqCst));
        let (mut due, rest): (Vec<_>, Vec<_>) = timers.drain(..).partition(|t| t.due <= now);
        *timers = rest;
        drop(timers);

        due.sort_by_key(|t| (t.due, t.seq));
        due.into_iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .map(|t| t.event)
            .collect()
    }

    /// Number of armed, uncancelled timers.
    pub fn pending(&self) -> usize {
        mutex_lock_or_recover(&self.timers)
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count()
    }
}

impl<E: Send> Scheduler<E> for ManualScheduler<E> {
    fn schedule(&self, delay: Duration, event: E) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let timer = PendingTimer {
            due: self.clock.now() + delay,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            event,
            cancelled: Arc::clone(&cancelled),
        };
        mutex_lock_or_recover(&self.timers).push(timer);
        TimerHandle::new(cancelled, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_scheduler_fires_in_deadline_order() {
        let scheduler = ManualScheduler::default();
        let _a = scheduler.schedule(Duration::from_millis(30), "late");
        let _b = scheduler.schedule(Duration::from_millis(10), "early");
        assert!(scheduler.advance(Duration::from_millis(5)).is_empty());
        assert_eq!(scheduler.advance(Duration::from_millis(30)), vec!["early", "late"]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let scheduler = ManualScheduler::default();
        let handle = scheduler.schedule(Duration::from_millis(10), 1);
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(scheduler.advance(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_dropping_handle_cancels() {
        let scheduler = ManualScheduler::default();
        drop(scheduler.schedule(Duration::from_millis(10), 1));
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.advance(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.elapsed(start), Duration::from_millis(250));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_tokio_scheduler_delivers_after_delay() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(tokio::runtime::Handle::current(), move |e: u32| {
            let _ = tx.send(e);
        });
        let _handle = scheduler.schedule(Duration::from_millis(50), 7);
        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(rx.recv().await, Some(7));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_tokio_scheduler_cancel() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
        let scheduler = TokioScheduler::new(tokio::runtime::Handle::current(), move |e: u32| {
            let _ = tx.send(e);
        });
        let handle = scheduler.schedule(Duration::from_millis(50), 7);
        handle.cancel();
        drop(scheduler);
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
