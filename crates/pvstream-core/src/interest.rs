// ── Subscription lifecycle ──
//
// Reference-counted interest per storage key. The first interest in a key
// starts the upstream work (a monitor subscription or a poller); dropping
// to zero only marks the key as a release candidate. A periodic sweep tears
// down candidates whose last interest change is older than the release
// interval, so a client that reconnects quickly finds its channels warm.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::control::{ChannelCallbacks, ControlSystem, NotificationDispatcher};
use crate::error::CoreError;
use crate::model::{
    AcquisitionMode, Channel, ChannelMetadata, ChannelName, ChannelValue, StorageKey, Stream,
};
use crate::polling::PollingCoordinator;
use crate::stats::{Statistics, StatisticsCollectable};
use crate::store::DataStore;

struct InterestEntry {
    count: usize,
    last_event: Instant,
    /// Cleared before teardown; callbacks and writers check it under the
    /// store guard.
    live: Arc<AtomicBool>,
}

#[derive(Default)]
struct InterestCounters {
    raise_requests: AtomicU64,
    lower_requests: AtomicU64,
    upstream_subscribes: AtomicU64,
    upstream_unsubscribes: AtomicU64,
    releases: AtomicU64,
}

/// Owns every interest entry and the upstream work behind it.
pub struct SubscriptionManager {
    control: Arc<dyn ControlSystem>,
    store: Arc<DataStore>,
    polling: Arc<PollingCoordinator>,
    dispatcher: Arc<NotificationDispatcher>,
    release_interval: Duration,
    entries: DashMap<StorageKey, InterestEntry>,
    counters: InterestCounters,
}

impl SubscriptionManager {
    pub fn new(
        control: Arc<dyn ControlSystem>,
        store: Arc<DataStore>,
        polling: Arc<PollingCoordinator>,
        dispatcher: Arc<NotificationDispatcher>,
        release_interval: Duration,
    ) -> Self {
        Self {
            control,
            store,
            polling,
            dispatcher,
            release_interval,
            entries: DashMap::new(),
            counters: InterestCounters::default(),
        }
    }

    // ── Interest changes ─────────────────────────────────────────────

    /// Register one more consumer of `channel` in `mode`.
    ///
    /// On first interest the key gets a `Disconnected` value and the channel
    /// an `Unknown` metadata placeholder, then the upstream work starts. A
    /// new monitor always resets the metadata, since the subscription will
    /// deliver it afresh; a new poller keeps whatever a live monitor already
    /// stashed. If startup fails the placeholders are rolled back and no
    /// entry is created.
    pub fn raise_interest(&self, channel: &Channel, mode: AcquisitionMode) -> Result<(), CoreError> {
        self.counters.raise_requests.fetch_add(1, Ordering::Relaxed);
        let key = StorageKey::new(channel.name.clone(), mode);

        let failure = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.count += 1;
                entry.last_event = Instant::now();
                debug!(key = %key, count = entry.count, "interest raised");
                return Ok(());
            }
            Entry::Vacant(slot) => {
                let live = Arc::new(AtomicBool::new(true));
                match mode {
                    AcquisitionMode::Monitored => {
                        self.store.metadata.record(&key.name, ChannelMetadata::Unknown);
                    }
                    AcquisitionMode::Polled => {
                        self.store
                            .metadata
                            .record_if_absent(&key.name, ChannelMetadata::Unknown);
                    }
                }
                self.store.values.record_value(&key, ChannelValue::disconnected());

                match self.start_upstream(channel, &key, &live) {
                    Ok(()) => {
                        slot.insert(InterestEntry {
                            count: 1,
                            last_event: Instant::now(),
                            live,
                        });
                        info!(key = %key, "first interest: upstream started");
                        return Ok(());
                    }
                    Err(e) => {
                        live.store(false, Ordering::SeqCst);
                        self.store.values.discard(&key);
                        e
                    }
                }
            }
        };

        warn!(key = %key, error = %failure, "upstream start failed");
        self.discard_metadata_if_unused(&key.name);
        Err(failure)
    }

    /// Drop one consumer of `channel` in `mode`.
    ///
    /// Reaching zero does not tear anything down; the key becomes a release
    /// candidate. Fails if there is no outstanding interest to release.
    pub fn lower_interest(&self, channel: &ChannelName, mode: AcquisitionMode) -> Result<(), CoreError> {
        self.counters.lower_requests.fetch_add(1, Ordering::Relaxed);
        let key = StorageKey::new(channel.clone(), mode);

        let Some(mut entry) = self.entries.get_mut(&key) else {
            error!(key = %key, "interest released for untracked key");
            return Err(CoreError::UnbalancedRelease { key });
        };
        if entry.count == 0 {
            drop(entry);
            error!(key = %key, "interest released below zero");
            return Err(CoreError::UnbalancedRelease { key });
        }

        entry.count -= 1;
        entry.last_event = Instant::now();
        if entry.count == 0 {
            debug!(key = %key, "interest lowered to zero: release candidate");
        } else {
            debug!(key = %key, count = entry.count, "interest lowered");
        }
        Ok(())
    }

    /// Raise interest in every key a stream references. All or nothing.
    pub fn register_stream(&self, stream: &Stream) -> Result<(), CoreError> {
        let mut raised: Vec<StorageKey> = Vec::new();
        for channel in &stream.channels {
            for mode in channel.properties.daq_mode.modes() {
                if let Err(e) = self.raise_interest(channel, mode) {
                    warn!(
                        stream = %stream.id,
                        channel = %channel.name,
                        error = %e,
                        "rolling back stream registration"
                    );
                    for key in raised.iter().rev() {
                        let _ = self.lower_interest(&key.name, key.mode);
                    }
                    return Err(e);
                }
                raised.push(StorageKey::new(channel.name.clone(), mode));
            }
        }
        Ok(())
    }

    /// Lower interest in every key a stream references.
    ///
    /// Every key is visited even if one fails; the first failure is returned.
    pub fn release_stream(&self, stream: &Stream) -> Result<(), CoreError> {
        let mut first_error = None;
        for key in stream.storage_keys() {
            if let Err(e) = self.lower_interest(&key.name, key.mode) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ── Deferred release ─────────────────────────────────────────────

    /// Tear down every release candidate older than the release interval.
    ///
    /// Returns the keys that were released.
    pub fn release_expired(&self) -> Vec<StorageKey> {
        let now = Instant::now();
        self.release_where(|entry| self.is_expired(entry, now))
    }

    /// Tear down every tracked key regardless of outstanding interest.
    /// Used when the gateway shuts down.
    pub fn release_all(&self) -> Vec<StorageKey> {
        self.release_where(|_| true)
    }

    /// Tear down every key with no outstanding interest, without waiting
    /// for the release interval.
    pub fn release_idle(&self) -> Vec<StorageKey> {
        self.release_where(|entry| entry.count == 0)
    }

    fn release_where(&self, releasable: impl Fn(&InterestEntry) -> bool) -> Vec<StorageKey> {
        let candidates: Vec<StorageKey> = self
            .entries
            .iter()
            .filter(|e| releasable(e.value()))
            .map(|e| e.key().clone())
            .collect();

        let mut released = Vec::with_capacity(candidates.len());
        for key in candidates {
            let Entry::Occupied(slot) = self.entries.entry(key.clone()) else {
                continue;
            };
            // Revived between the scan and now.
            if !releasable(slot.get()) {
                continue;
            }
            self.stop_upstream(&key, slot.get());
            slot.remove();

            self.discard_metadata_if_unused(&key.name);
            self.counters.releases.fetch_add(1, Ordering::Relaxed);
            info!(key = %key, "released unused channel resources");
            released.push(key);
        }
        released
    }

    fn is_expired(&self, entry: &InterestEntry, now: Instant) -> bool {
        entry.count == 0 && now.saturating_duration_since(entry.last_event) >= self.release_interval
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn interest_count(&self, key: &StorageKey) -> Option<usize> {
        self.entries.get(key).map(|e| e.count)
    }

    pub fn last_event(&self, key: &StorageKey) -> Option<Instant> {
        self.entries.get(key).map(|e| e.last_event)
    }

    pub fn is_tracked(&self, key: &StorageKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn tracked_keys(&self) -> Vec<StorageKey> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn release_candidates(&self) -> usize {
        self.entries.iter().filter(|e| e.count == 0).count()
    }

    // ── Upstream plumbing ────────────────────────────────────────────

    fn start_upstream(
        &self,
        channel: &Channel,
        key: &StorageKey,
        live: &Arc<AtomicBool>,
    ) -> Result<(), CoreError> {
        match key.mode {
            AcquisitionMode::Monitored => {
                let callbacks = ChannelCallbacks {
                    on_connection_change: self.dispatched(key, live, handle_connection_change),
                    on_metadata: self.dispatched(key, live, handle_metadata),
                    on_value: self.dispatched(key, live, handle_value),
                };
                self.control.subscribe(&key.name, callbacks)?;
                self.counters.upstream_subscribes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            AcquisitionMode::Polled => self
                .polling
                .start_polling(&key.name, channel.properties.polling_interval),
        }
    }

    fn stop_upstream(&self, key: &StorageKey, entry: &InterestEntry) {
        entry.live.store(false, Ordering::SeqCst);
        match key.mode {
            AcquisitionMode::Monitored => match self.control.unsubscribe(&key.name) {
                Ok(()) => {
                    self.counters.upstream_unsubscribes.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!(key = %key, error = %e, "upstream unsubscribe failed"),
            },
            AcquisitionMode::Polled => {
                if let Err(e) = self.polling.stop_polling(&key.name) {
                    warn!(key = %key, error = %e, "poller stop failed");
                }
            }
        }
        self.store.values.discard(key);
    }

    fn discard_metadata_if_unused(&self, name: &ChannelName) {
        let in_use = [
            StorageKey::monitored(name.clone()),
            StorageKey::polled(name.clone()),
        ]
        .iter()
        .any(|k| self.entries.contains_key(k));
        if !in_use {
            self.store.metadata.discard(name);
        }
    }

    /// Wrap `handler` so each invocation is queued on the dispatcher.
    fn dispatched<T>(
        &self,
        key: &StorageKey,
        live: &Arc<AtomicBool>,
        handler: fn(&DataStore, &StorageKey, &AtomicBool, T),
    ) -> Arc<dyn Fn(T) + Send + Sync>
    where
        T: Send + 'static,
    {
        let dispatcher = Arc::clone(&self.dispatcher);
        let store = Arc::clone(&self.store);
        let key = key.clone();
        let live = Arc::clone(live);
        Arc::new(move |payload: T| {
            let store = Arc::clone(&store);
            let job_key = key.clone();
            let live = Arc::clone(&live);
            dispatcher.submit(&key.name, move || handler(&store, &job_key, &live, payload));
        })
    }
}

// ── Notification handlers (run on dispatcher workers) ────────────────

fn handle_connection_change(store: &DataStore, key: &StorageKey, live: &AtomicBool, connected: bool) {
    debug!(key = %key, connected, "connection state changed");
    if !connected {
        store
            .values
            .record_value_while(key, ChannelValue::disconnected(), live);
    }
}

fn handle_metadata(store: &DataStore, key: &StorageKey, live: &AtomicBool, metadata: ChannelMetadata) {
    if !store.metadata.record_while(&key.name, metadata, live) {
        debug!(key = %key, "late metadata dropped");
    }
}

fn handle_value(store: &DataStore, key: &StorageKey, live: &AtomicBool, value: ChannelValue) {
    if store.values.record_value_while(key, value, live).is_none() {
        debug!(key = %key, "late value dropped");
    }
}

impl StatisticsCollectable for SubscriptionManager {
    fn statistics(&self) -> Statistics {
        let c = &self.counters;
        Statistics::new("SUBSCRIPTION MANAGER")
            .with("Raise requests", c.raise_requests.load(Ordering::Relaxed))
            .with("Lower requests", c.lower_requests.load(Ordering::Relaxed))
            .with("Upstream subscribes", c.upstream_subscribes.load(Ordering::Relaxed))
            .with("Upstream unsubscribes", c.upstream_unsubscribes.load(Ordering::Relaxed))
            .with("Releases", c.releases.load(Ordering::Relaxed))
            .with("Tracked keys", self.entries.len())
            .with("Release candidates", self.release_candidates())
    }

    fn reset(&self) {
        let c = &self.counters;
        for counter in [
            &c.raise_requests,
            &c.lower_requests,
            &c.upstream_subscribes,
            &c.upstream_unsubscribes,
            &c.releases,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
