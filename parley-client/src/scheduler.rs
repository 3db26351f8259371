//! Timer scheduling.
//!
//! The coordinator never sleeps itself: typing and polling timers are
//! handed to a [`Scheduler`], whose callbacks post commands back into the
//! coordinator's queue. [`TokioScheduler`] uses the runtime clock;
//! [`ManualScheduler`] is a virtual clock for deterministic tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Work to run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Cancels a scheduled timer.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Prevent the callback from running.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`TimerHandle::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Scheduler port.
pub trait Scheduler: Send + Sync {
    /// Current time on this scheduler's clock.
    fn now(&self) -> Instant;

    /// Run `callback` once after `delay`, unless cancelled first.
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Scheduler backed by the tokio timer.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::default();
        let timer = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !timer.is_cancelled() {
                callback();
            }
        });
        handle
    }
}

struct PendingTimer {
    deadline: Duration,
    seq: u64,
    handle: TimerHandle,
    callback: TimerCallback,
}

#[derive(Default)]
struct ManualClock {
    elapsed: Duration,
    next_seq: u64,
    timers: Vec<PendingTimer>,
}

/// Virtual clock for tests.
///
/// Time only moves through [`ManualScheduler::advance`], which fires due
/// timers in deadline order (ties in scheduling order).
#[derive(Clone)]
pub struct ManualScheduler {
    origin: Instant,
    clock: Arc<Mutex<ManualClock>>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            clock: Arc::default(),
        }
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("elapsed", &self.elapsed())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ManualScheduler {
    /// Create a clock at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        self.clock.lock().unwrap().elapsed
    }

    /// Number of timers that are scheduled and not cancelled.
    pub fn pending(&self) -> usize {
        let clock = self.clock.lock().unwrap();
        clock
            .timers
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .count()
    }

    /// Delay until the next live timer fires, if any.
    pub fn next_due(&self) -> Option<Duration> {
        let clock = self.clock.lock().unwrap();
        clock
            .timers
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .map(|t| t.deadline.saturating_sub(clock.elapsed))
            .min()
    }

    /// Move time forward, firing every timer that falls due.
    pub fn advance(&self, by: Duration) {
        let target = self.elapsed() + by;
        loop {
            let due = {
                let mut clock = self.clock.lock().unwrap();
                clock.timers.retain(|t| !t.handle.is_cancelled());
                let next = clock
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.deadline <= target)
                    .min_by_key(|(_, t)| (t.deadline, t.seq))
                    .map(|(i, _)| i);
                match next {
                    Some(index) => {
                        let timer = clock.timers.remove(index);
                        clock.elapsed = clock.elapsed.max(timer.deadline);
                        Some(timer)
                    }
                    None => {
                        clock.elapsed = target;
                        None
                    }
                }
            };
            // Callbacks run without the lock so they may schedule more timers
            match due {
                Some(timer) => (timer.callback)(),
                None => break,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::default();
        let mut clock = self.clock.lock().unwrap();
        let seq = clock.next_seq;
        clock.next_seq += 1;
        let deadline = clock.elapsed + delay;
        clock.timers.push(PendingTimer {
            deadline,
            seq,
            handle: handle.clone(),
            callback,
        });
        handle
    }
}
