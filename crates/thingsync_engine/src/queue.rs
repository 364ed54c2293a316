//! Sync queue with retry and exponential backoff.
//!
//! Items are processed in insertion order by a single drain at a time.
//! A failed item goes to the back of the queue with a `nextRetryTime`
//! computed from [`RetryConfig`], and a wake-up timer re-triggers the drain
//! shortly after it becomes due. Items whose payload does not decode are
//! dropped at once; items that keep failing are dropped after
//! `max_retries` retries.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::scheduler::{Scheduler, TimerSet};
use crate::store::JobSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thingsync_protocol::{DeviceId, QueueItem, SyncJob};
use tracing::{debug, error, trace, warn};

/// Performs the work a queue job describes.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Handles one job. Returns false if it should be retried.
    async fn handle(&self, job: SyncJob) -> bool;
}

/// Counters describing queue activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items accepted by `push`.
    pub pushed: u64,
    /// Items handled successfully.
    pub completed: u64,
    /// Failed attempts that were scheduled for retry.
    pub retried: u64,
    /// Items dropped because their payload did not decode.
    pub rejected: u64,
    /// Items dropped after exhausting their retries.
    pub exhausted: u64,
}

/// Durable-in-memory work queue feeding a [`JobHandler`].
pub struct SyncQueue {
    me: Weak<SyncQueue>,
    config: RetryConfig,
    scheduler: Arc<dyn Scheduler>,
    handler: Arc<dyn JobHandler>,
    items: Mutex<VecDeque<QueueItem>>,
    draining: AtomicBool,
    closed: AtomicBool,
    timers: TimerSet,
    stats: Mutex<QueueStats>,
}

impl SyncQueue {
    /// Creates an empty queue.
    pub fn new(
        config: RetryConfig,
        scheduler: Arc<dyn Scheduler>,
        handler: Arc<dyn JobHandler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            scheduler,
            handler,
            items: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            timers: TimerSet::new(),
            stats: Mutex::new(QueueStats::default()),
        })
    }

    /// Appends an item and triggers a drain. Never blocks on processing.
    pub fn push(&self, item: QueueItem) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::QueueClosed);
        }
        trace!(kind = ?item.kind, retry = item.retry_count, "queued item");
        self.items.lock().push_back(item);
        self.stats.lock().pushed += 1;
        self.request_drain();
        Ok(())
    }

    /// Stops all pending wake-ups and refuses further work.
    ///
    /// Items still in the queue are kept so they can be inspected with
    /// [`pending`](Self::pending), but they will not be processed.
    pub fn cancel(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let cancelled = self.timers.cancel_all();
        debug!(cancelled, pending = self.len(), "sync queue cancelled");
    }

    /// Processes every due item now.
    ///
    /// Returns the number of items taken off the queue, or 0 if another
    /// drain is already running (that drain will pick up new items).
    pub async fn drain(&self) -> usize {
        if !self.try_begin_drain() {
            trace!("drain already active");
            return 0;
        }
        self.drain_claimed().await
    }

    /// Number of queued items, due or not.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Returns a copy of every queued item in processing order.
    pub fn pending(&self) -> Vec<QueueItem> {
        self.items.lock().iter().cloned().collect()
    }

    /// Returns activity counters.
    pub fn stats(&self) -> QueueStats {
        self.stats.lock().clone()
    }

    /// Returns true while a drain is running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of backoff wake-ups that have not fired yet.
    pub fn scheduled_wakeups(&self) -> usize {
        self.timers.active()
    }

    fn try_begin_drain(&self) -> bool {
        !self.is_closed()
            && self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    fn request_drain(&self) {
        if !self.try_begin_drain() {
            return;
        }
        let Some(queue) = self.me.upgrade() else {
            self.draining.store(false, Ordering::Release);
            return;
        };
        self.scheduler.spawn(Box::pin(async move {
            queue.drain_claimed().await;
        }));
    }

    /// Runs a drain whose guard the caller already holds.
    async fn drain_claimed(&self) -> usize {
        let mut processed = 0;
        loop {
            loop {
                if self.is_closed() {
                    break;
                }
                let batch = self.take_due();
                if batch.is_empty() {
                    break;
                }
                for item in batch {
                    self.process(item).await;
                    processed += 1;
                }
            }

            self.draining.store(false, Ordering::Release);
            // A push that raced with the release saw the guard still held.
            if !self.has_due() || !self.try_begin_drain() {
                break;
            }
        }
        processed
    }

    fn take_due(&self) -> Vec<QueueItem> {
        let now = self.scheduler.now_millis();
        let mut items = self.items.lock();
        let (due, waiting): (VecDeque<_>, VecDeque<_>) =
            items.drain(..).partition(|item| item.is_due(now));
        *items = waiting;
        due.into()
    }

    fn has_due(&self) -> bool {
        let now = self.scheduler.now_millis();
        self.items.lock().iter().any(|item| item.is_due(now))
    }

    async fn process(&self, mut item: QueueItem) {
        let job = match item.decode() {
            Ok(job) => job,
            Err(e) => {
                let rejected = SyncError::from(e);
                warn!(kind = ?item.kind, error = %rejected, "dropping invalid queue item");
                self.stats.lock().rejected += 1;
                return;
            }
        };

        let device_id = job.device_id().clone();
        item.last_attempt_time = Some(self.scheduler.now_millis());

        let handler = Arc::clone(&self.handler);
        let succeeded = match tokio::spawn(async move { handler.handle(job).await }).await {
            Ok(succeeded) => succeeded,
            Err(e) => {
                error!(device_id = %device_id, error = %e, "job handler panicked");
                false
            }
        };

        if succeeded {
            debug!(kind = ?item.kind, device_id = %device_id, "queue item completed");
            self.stats.lock().completed += 1;
        } else {
            self.schedule_retry(item, &device_id);
        }
    }

    fn schedule_retry(&self, mut item: QueueItem, device_id: &DeviceId) {
        item.retry_count += 1;
        if item.retry_count > self.config.max_retries {
            let exhausted = SyncError::RetriesExhausted {
                attempts: item.retry_count,
            };
            error!(
                kind = ?item.kind,
                device_id = %device_id,
                error = %exhausted,
                "dropping queue item"
            );
            self.stats.lock().exhausted += 1;
            return;
        }

        let delay = self.config.delay_for_retry(item.retry_count);
        let now = self.scheduler.now_millis();
        item.next_retry_time = Some(now + delay.as_millis() as u64);
        warn!(
            kind = ?item.kind,
            device_id = %device_id,
            retry = item.retry_count,
            delay_ms = delay.as_millis() as u64,
            "queue item failed, will retry"
        );

        self.items.lock().push_back(item);
        self.stats.lock().retried += 1;
        self.schedule_wake(delay + self.config.wake_buffer);
    }

    fn schedule_wake(&self, delay: Duration) {
        if self.is_closed() {
            return;
        }
        let me = self.me.clone();
        let handle = self.scheduler.after(
            delay,
            Box::pin(async move {
                if let Some(queue) = me.upgrade() {
                    queue.request_drain();
                }
            }),
        );
        self.timers.insert(handle);
    }
}

impl JobSink for SyncQueue {
    fn push(&self, item: QueueItem) -> SyncResult<()> {
        SyncQueue::push(self, item)
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("len", &self.len())
            .field("draining", &self.is_draining())
            .field("closed", &self.is_closed())
            .finish()
    }
}
