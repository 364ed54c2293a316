//! Time and task scheduling capability.
//!
//! Everything in the engine that waits (backoff wake-ups, simulated radio
//! latency) goes through a [`Scheduler`] so that tests can drive it with
//! tokio's paused clock instead of real time.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// A boxed unit of deferred work.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Clock plus task spawning.
pub trait Scheduler: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_millis(&self) -> u64;

    /// Runs `task` as soon as possible.
    fn spawn(&self, task: Task) -> TimerHandle;

    /// Runs `task` once `delay` has elapsed.
    fn after(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Handle to a spawned or delayed task.
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Cancels the task if it has not completed yet.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Returns true once the task has completed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// A scheduler running on a tokio runtime.
///
/// `now_millis` is the wall clock at construction plus the elapsed tokio
/// time, so pausing or advancing the tokio clock moves it as well.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
    epoch_at_start: u64,
    started: Instant,
}

impl TokioScheduler {
    /// Creates a scheduler on the current runtime, anchored at the wall clock.
    pub fn current() -> SyncResult<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self::with_epoch(now)
    }

    /// Creates a scheduler on the current runtime whose clock starts at
    /// `epoch_millis`.
    pub fn with_epoch(epoch_millis: u64) -> SyncResult<Self> {
        let handle = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        Ok(Self {
            handle,
            epoch_at_start: epoch_millis,
            started: Instant::now(),
        })
    }
}

impl Scheduler for TokioScheduler {
    fn now_millis(&self) -> u64 {
        self.epoch_at_start + self.started.elapsed().as_millis() as u64
    }

    fn spawn(&self, task: Task) -> TimerHandle {
        TimerHandle {
            abort: self.handle.spawn(task).abort_handle(),
        }
    }

    fn after(&self, delay: Duration, task: Task) -> TimerHandle {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        TimerHandle {
            abort: join.abort_handle(),
        }
    }
}

/// A set of outstanding timers that can be cancelled together.
#[derive(Debug, Default)]
pub struct TimerSet {
    timers: Mutex<Vec<TimerHandle>>,
}

impl TimerSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a timer, forgetting any that already finished.
    pub fn insert(&self, handle: TimerHandle) {
        let mut timers = self.timers.lock();
        timers.retain(|timer| !timer.is_finished());
        timers.push(handle);
    }

    /// Number of timers that have not fired yet.
    pub fn active(&self) -> usize {
        self.timers.lock().iter().filter(|timer| !timer.is_finished()).count()
    }

    /// Cancels every tracked timer and returns how many were still pending.
    pub fn cancel_all(&self) -> usize {
        let timers: Vec<TimerHandle> = std::mem::take(&mut *self.timers.lock());
        let mut pending = 0;
        for timer in timers {
            if !timer.is_finished() {
                pending += 1;
            }
            timer.cancel();
        }
        pending
    }
}
