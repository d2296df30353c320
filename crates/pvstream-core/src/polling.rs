// ── Polling coordinator ──
//
// One background poller per channel with polled interest. Each cycle reads
// the channel once through the control system and appends the result to
// the channel's POLLED buffer. Failed reads are counted and skipped; the
// last good value stays in place.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::ControlSystem;
use crate::error::CoreError;
use crate::model::{ChannelName, StorageKey};
use crate::stats::{Statistics, StatisticsCollectable};
use crate::store::DataStore;

#[derive(Default)]
struct PollCounters {
    start_requests: AtomicU64,
    stop_requests: AtomicU64,
    pollers_started: AtomicU64,
    pollers_cancelled: AtomicU64,
    pollers_completed: AtomicU64,
    cycles: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

struct Poller {
    interval: Duration,
    cancel: CancellationToken,
    live: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Schedules and cancels per-channel pollers.
pub struct PollingCoordinator {
    control: Arc<dyn ControlSystem>,
    store: Arc<DataStore>,
    poll_timeout: Duration,
    pollers: DashMap<ChannelName, Poller>,
    cancel: CancellationToken,
    counters: Arc<PollCounters>,
}

impl PollingCoordinator {
    /// Pollers run as children of `cancel`; cancelling it stops them all.
    pub fn new(
        control: Arc<dyn ControlSystem>,
        store: Arc<DataStore>,
        poll_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            control,
            store,
            poll_timeout,
            pollers: DashMap::new(),
            cancel,
            counters: Arc::new(PollCounters::default()),
        }
    }

    /// Start polling `channel` every `interval` unless a poller already runs.
    ///
    /// The first cycle runs immediately. Must be called within a Tokio runtime.
    pub fn start_polling(&self, channel: &ChannelName, interval: Duration) -> Result<(), CoreError> {
        self.counters.start_requests.fetch_add(1, Ordering::Relaxed);
        if interval.is_zero() {
            return Err(CoreError::invalid(format!(
                "polling interval for {channel} must be greater than zero"
            )));
        }

        match self.pollers.entry(channel.clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    channel = %channel,
                    interval_ms = existing.get().interval.as_millis(),
                    "poller already running"
                );
            }
            Entry::Vacant(slot) => {
                let cancel = self.cancel.child_token();
                let live = Arc::new(AtomicBool::new(true));
                let handle = tokio::spawn(poll_task(PollTask {
                    channel: channel.clone(),
                    interval,
                    timeout: self.poll_timeout,
                    control: Arc::clone(&self.control),
                    store: Arc::clone(&self.store),
                    live: Arc::clone(&live),
                    counters: Arc::clone(&self.counters),
                    cancel: cancel.clone(),
                }));
                self.counters.pollers_started.fetch_add(1, Ordering::Relaxed);
                info!(channel = %channel, interval_ms = interval.as_millis(), "polling started");
                slot.insert(Poller {
                    interval,
                    cancel,
                    live,
                    handle,
                });
            }
        }
        Ok(())
    }

    /// Cancel the poller for `channel`. Fails if none is running.
    ///
    /// Once this returns, no further result from that poller is recorded.
    pub fn stop_polling(&self, channel: &ChannelName) -> Result<(), CoreError> {
        self.counters.stop_requests.fetch_add(1, Ordering::Relaxed);
        let Some((_, poller)) = self.pollers.remove(channel) else {
            warn!(channel = %channel, "stop requested for channel that is not polled");
            return Err(CoreError::NotPolling {
                channel: channel.clone(),
            });
        };
        poller.live.store(false, Ordering::SeqCst);
        poller.cancel.cancel();
        self.counters.pollers_cancelled.fetch_add(1, Ordering::Relaxed);
        info!(channel = %channel, "polling stopped");
        Ok(())
    }

    pub fn is_polling(&self, channel: &ChannelName) -> bool {
        self.pollers.contains_key(channel)
    }

    /// Interval of the running poller, if any.
    pub fn interval(&self, channel: &ChannelName) -> Option<Duration> {
        self.pollers.get(channel).map(|p| p.interval)
    }

    pub fn active_pollers(&self) -> usize {
        self.pollers.len()
    }

    /// Cancel every poller and wait for them to exit.
    pub async fn stop_all(&self) {
        let channels: Vec<ChannelName> = self.pollers.iter().map(|p| p.key().clone()).collect();
        let mut handles = Vec::with_capacity(channels.len());
        for channel in channels {
            if let Some((_, poller)) = self.pollers.remove(&channel) {
                poller.live.store(false, Ordering::SeqCst);
                poller.cancel.cancel();
                self.counters.pollers_cancelled.fetch_add(1, Ordering::Relaxed);
                handles.push(poller.handle);
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

// ── Poll task ────────────────────────────────────────────────────────

struct PollTask {
    channel: ChannelName,
    interval: Duration,
    timeout: Duration,
    control: Arc<dyn ControlSystem>,
    store: Arc<DataStore>,
    live: Arc<AtomicBool>,
    counters: Arc<PollCounters>,
    cancel: CancellationToken,
}

async fn poll_task(task: PollTask) {
    let key = StorageKey::polled(task.channel.clone());
    let mut interval = tokio::time::interval(task.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = task.cancel.cancelled() => break,
            _ = interval.tick() => {
                task.counters.cycles.fetch_add(1, Ordering::Relaxed);
                let read = tokio::time::timeout(
                    task.timeout,
                    task.control.poll_once(&task.channel, task.timeout),
                )
                .await;

                match read {
                    Ok(Ok(value)) => {
                        task.counters.successes.fetch_add(1, Ordering::Relaxed);
                        if task.store.values.record_value_while(&key, value, &task.live).is_none() {
                            debug!(channel = %task.channel, "poll result discarded: poller stopped");
                        }
                    }
                    Ok(Err(e)) => {
                        task.counters.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(channel = %task.channel, error = %e, "poll cycle failed");
                    }
                    Err(_) => {
                        task.counters.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            channel = %task.channel,
                            timeout_ms = task.timeout.as_millis(),
                            "poll cycle timed out"
                        );
                    }
                }
            }
        }
    }

    task.counters.pollers_completed.fetch_add(1, Ordering::Relaxed);
    debug!(channel = %task.channel, "poller exited");
}

impl StatisticsCollectable for PollingCoordinator {
    fn statistics(&self) -> Statistics {
        let c = &self.counters;
        Statistics::new("POLLING COORDINATOR")
            .with("Start requests", c.start_requests.load(Ordering::Relaxed))
            .with("Stop requests", c.stop_requests.load(Ordering::Relaxed))
            .with("Active pollers", self.pollers.len())
            .with("Total pollers", c.pollers_started.load(Ordering::Relaxed))
            .with("Cancelled pollers", c.pollers_cancelled.load(Ordering::Relaxed))
            .with("Completed pollers", c.pollers_completed.load(Ordering::Relaxed))
            .with("Poll cycles", c.cycles.load(Ordering::Relaxed))
            .with("Poll successes", c.successes.load(Ordering::Relaxed))
            .with("Poll failures", c.failures.load(Ordering::Relaxed))
    }

    fn reset(&self) {
        let c = &self.counters;
        for counter in [
            &c.start_requests,
            &c.stop_requests,
            &c.pollers_started,
            &c.pollers_cancelled,
            &c.pollers_completed,
            &c.cycles,
            &c.successes,
            &c.failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::control::SimulatedControlSystem;
    use crate::model::{ChannelValue, ValuePayload};

    fn coordinator(sim: &Arc<SimulatedControlSystem>) -> (PollingCoordinator, Arc<DataStore>) {
        let store = Arc::new(DataStore::new(3, 3));
        let control: Arc<dyn ControlSystem> = sim.clone();
        let coordinator = PollingCoordinator::new(
            control,
            Arc::clone(&store),
            Duration::from_millis(500),
            CancellationToken::new(),
        );
        (coordinator, store)
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_schedule_and_records() {
        let sim = Arc::new(SimulatedControlSystem::new());
        let name = ChannelName::from("abc");
        sim.set_poll_value(&name, ChannelValue::connected(ValuePayload::Integer(1)));
        let (coordinator, store) = coordinator(&sim);

        coordinator.start_polling(&name, Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        // Cycles at t=0, 1s, 2s.
        assert_eq!(sim.poll_count(), 3);
        assert_eq!(store.values.len(&StorageKey::polled("abc")), 3);
        assert_eq!(coordinator.statistics().get("Poll successes"), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted_and_skipped() {
        let sim = Arc::new(SimulatedControlSystem::new());
        let name = ChannelName::from("abc");
        sim.set_poll_value(&name, ChannelValue::connected(ValuePayload::Integer(1)));
        let (coordinator, store) = coordinator(&sim);
        let key = StorageKey::polled("abc");

        coordinator.start_polling(&name, Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.values.len(&key), 1);

        sim.fail_polls(&name);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let stats = coordinator.statistics();
        assert_eq!(stats.get("Poll failures"), Some("2"));
        let latest = store.values.get_latest(std::slice::from_ref(&key));
        assert_eq!(latest[&key].payload(), Some(&ValuePayload::Integer(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_keeps_first_interval() {
        let sim = Arc::new(SimulatedControlSystem::with_synthetic_polls());
        let (coordinator, _store) = coordinator(&sim);
        let name = ChannelName::from("abc");

        coordinator.start_polling(&name, Duration::from_secs(1)).unwrap();
        coordinator.start_polling(&name, Duration::from_secs(5)).unwrap();

        assert_eq!(coordinator.interval(&name), Some(Duration::from_secs(1)));
        assert_eq!(coordinator.active_pollers(), 1);
        assert_eq!(coordinator.statistics().get("Total pollers"), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_unknown_is_state_error() {
        let sim = Arc::new(SimulatedControlSystem::new());
        let (coordinator, _store) = coordinator(&sim);
        let err = coordinator.stop_polling(&"abc".into()).unwrap_err();
        assert!(matches!(err, CoreError::NotPolling { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_recording() {
        let sim = Arc::new(SimulatedControlSystem::with_synthetic_polls());
        let (coordinator, store) = coordinator(&sim);
        let name = ChannelName::from("abc");

        coordinator.start_polling(&name, Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        coordinator.stop_polling(&name).unwrap();
        let recorded = store.values.len(&StorageKey::polled("abc"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.values.len(&StorageKey::polled("abc")), recorded);
        assert!(!coordinator.is_polling(&name));
        assert_eq!(coordinator.statistics().get("Completed pollers"), Some("1"));
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let sim = Arc::new(SimulatedControlSystem::new());
        let (coordinator, _store) = coordinator(&sim);
        assert!(coordinator.start_polling(&"abc".into(), Duration::ZERO).is_err());
    }
}
