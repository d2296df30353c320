// ── Notification dispatch ──
//
// Control system callbacks must never wait on gateway work. Each callback
// is turned into a job and queued on one of a fixed set of worker tasks.
// Jobs for the same channel always land on the same worker, so per-channel
// delivery order is preserved; different channels proceed in parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::ChannelName;
use crate::stats::{Statistics, StatisticsCollectable};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct DispatchCounters {
    submitted: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    panicked: AtomicU64,
}

/// Fixed pool of worker queues for control system notifications.
pub struct NotificationDispatcher {
    senders: Vec<mpsc::UnboundedSender<Job>>,
    receivers: Mutex<Option<Vec<mpsc::UnboundedReceiver<Job>>>>,
    counters: Arc<DispatchCounters>,
}

impl NotificationDispatcher {
    /// Create the queues. Nothing runs until [`start()`](Self::start).
    pub fn new(workers: usize) -> Self {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..workers.max(1))
            .map(|_| mpsc::unbounded_channel::<Job>())
            .unzip();
        Self {
            senders,
            receivers: Mutex::new(Some(receivers)),
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Spawn one task per queue. Returns `None` if already started.
    pub fn start(&self, cancel: &CancellationToken) -> Option<Vec<JoinHandle<()>>> {
        let receivers = self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        debug!(workers = receivers.len(), "starting notification workers");
        let handles = receivers
            .into_iter()
            .map(|rx| {
                let counters = Arc::clone(&self.counters);
                let cancel = cancel.clone();
                tokio::spawn(worker_task(rx, counters, cancel))
            })
            .collect();
        Some(handles)
    }

    /// Queue `job` on the worker owning `channel`. Never blocks.
    pub fn submit(&self, channel: &ChannelName, job: impl FnOnce() + Send + 'static) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let Some(sender) = self.senders.get(self.shard(channel)) else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if sender.send(Box::new(job)).is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(channel = %channel, "notification dropped: workers stopped");
        }
    }

    /// Resolves once every job submitted so far has been run or dropped.
    ///
    /// Returns immediately if the workers were never started: queued jobs
    /// only run after [`start()`](Self::start).
    pub async fn drained(&self) {
        if !self.is_started() {
            debug!("drain requested before workers started");
            return;
        }
        loop {
            let submitted = self.counters.submitted.load(Ordering::Acquire);
            let done = self.counters.processed.load(Ordering::Acquire)
                + self.counters.dropped.load(Ordering::Acquire);
            if done >= submitted {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    pub fn is_started(&self) -> bool {
        self.receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn shard(&self, channel: &ChannelName) -> usize {
        let mut hasher = DefaultHasher::new();
        channel.hash(&mut hasher);
        let len = u64::try_from(self.senders.len()).unwrap_or(1);
        usize::try_from(hasher.finish() % len).unwrap_or(0)
    }
}

async fn worker_task(
    mut rx: mpsc::UnboundedReceiver<Job>,
    counters: Arc<DispatchCounters>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            job = rx.recv() => {
                let Some(job) = job else { break };
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    warn!("notification handler panicked");
                }
                counters.processed.fetch_add(1, Ordering::Release);
            }
        }
    }

    // Anything still queued will never run.
    rx.close();
    let mut abandoned = 0u64;
    while rx.try_recv().is_ok() {
        abandoned += 1;
    }
    counters.dropped.fetch_add(abandoned, Ordering::Release);
}

impl StatisticsCollectable for NotificationDispatcher {
    fn statistics(&self) -> Statistics {
        Statistics::new("NOTIFICATION DISPATCHER")
            .with("Workers", self.senders.len())
            .with("Submitted", self.counters.submitted.load(Ordering::Relaxed))
            .with("Processed", self.counters.processed.load(Ordering::Relaxed))
            .with("Dropped", self.counters.dropped.load(Ordering::Relaxed))
            .with("Panicked", self.counters.panicked.load(Ordering::Relaxed))
    }

    fn reset(&self) {
        self.counters.submitted.store(0, Ordering::Relaxed);
        self.counters.processed.store(0, Ordering::Relaxed);
        self.counters.dropped.store(0, Ordering::Relaxed);
        self.counters.panicked.store(0, Ordering::Relaxed);
    }
}
