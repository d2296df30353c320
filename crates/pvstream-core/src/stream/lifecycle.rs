// ── Stream lifecycle ──
//
// Creates and deletes client streams. The registry lock is held only for
// the insert or remove itself; decoding, interest registration and
// publisher shutdown all happen outside it. Once `shutdown_all` has run the
// registry is closed and no further stream can be created.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::decoder::StreamDecoder;
use super::publisher::{EventStream, StreamPublisher};
use crate::error::CoreError;
use crate::interest::SubscriptionManager;
use crate::model::{Stream, StreamId};
use crate::stats::{Statistics, StatisticsCollectable};
use crate::store::DataStore;

#[derive(Default)]
struct LifecycleCounters {
    create_requests: AtomicU64,
    created: AtomicU64,
    rejected: AtomicU64,
    delete_requests: AtomicU64,
    deleted: AtomicU64,
}

/// Registry of live streams and their publishers.
pub struct StreamLifecycle {
    decoder: StreamDecoder,
    store: Arc<DataStore>,
    interest: Arc<SubscriptionManager>,
    registry: Mutex<HashMap<StreamId, Arc<StreamPublisher>>>,
    /// Written and checked only while the registry lock is held.
    closed: AtomicBool,
    counters: LifecycleCounters,
}

impl StreamLifecycle {
    pub fn new(decoder: StreamDecoder, store: Arc<DataStore>, interest: Arc<SubscriptionManager>) -> Self {
        Self {
            decoder,
            store,
            interest,
            registry: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            counters: LifecycleCounters::default(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<StreamId, Arc<StreamPublisher>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode `payload`, raise interest in its channels and register a
    /// publisher. A rejected payload changes no state.
    ///
    /// Fails with [`CoreError::GatewayShutDown`] once
    /// [`shutdown_all()`](Self::shutdown_all) has run.
    pub fn create_stream(&self, payload: &str) -> Result<StreamId, CoreError> {
        self.counters.create_requests.fetch_add(1, Ordering::Relaxed);
        if self.is_closed() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(CoreError::GatewayShutDown);
        }

        let stream = match self.decoder.decode(StreamId::next(), payload) {
            Ok(stream) => stream,
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "stream configuration rejected");
                return Err(e);
            }
        };
        let id = stream.id;

        self.interest.register_stream(&stream)?;
        let channels = stream.channels.len();
        let publisher = Arc::new(StreamPublisher::new(stream, Arc::clone(&self.store)));
        {
            let mut registry = self.registry();
            if self.closed.load(Ordering::SeqCst) {
                drop(registry);
                self.abandon(&publisher);
                return Err(CoreError::GatewayShutDown);
            }
            registry.insert(id, publisher);
        }

        self.counters.created.fetch_add(1, Ordering::Relaxed);
        info!(stream = %id, channels, "stream created");
        Ok(id)
    }

    /// Shut down the stream's publisher and release its channel interest.
    pub fn delete_stream(&self, id: StreamId) -> Result<(), CoreError> {
        self.counters.delete_requests.fetch_add(1, Ordering::Relaxed);

        let Some(publisher) = self.registry().remove(&id) else {
            warn!(stream = %id, "delete requested for unknown stream");
            return Err(CoreError::StreamNotFound { id });
        };
        self.retire(&publisher)?;

        self.counters.deleted.fetch_add(1, Ordering::Relaxed);
        info!(stream = %id, "stream deleted");
        Ok(())
    }

    /// A fresh event sequence for the stream.
    pub fn events(&self, id: StreamId) -> Result<EventStream, CoreError> {
        let publisher = self
            .publisher(id)
            .ok_or(CoreError::StreamNotFound { id })?;
        debug!(stream = %id, "event sequence requested");
        publisher.events()
    }

    pub fn is_known(&self, id: StreamId) -> bool {
        self.registry().contains_key(&id)
    }

    pub fn publisher(&self, id: StreamId) -> Option<Arc<StreamPublisher>> {
        self.registry().get(&id).cloned()
    }

    pub fn stream(&self, id: StreamId) -> Option<Arc<Stream>> {
        self.publisher(id).map(|p| Arc::clone(p.stream()))
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.registry().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn active_streams(&self) -> usize {
        self.registry().len()
    }

    pub fn is_closed(&self) -> bool {
        let _registry = self.registry();
        self.closed.load(Ordering::SeqCst)
    }

    /// Delete every live stream and refuse new ones. Returns how many were
    /// deleted.
    pub fn shutdown_all(&self) -> usize {
        let publishers: Vec<Arc<StreamPublisher>> = {
            let mut registry = self.registry();
            self.closed.store(true, Ordering::SeqCst);
            registry.drain().map(|(_, p)| p).collect()
        };
        let count = publishers.len();
        for publisher in publishers {
            if let Err(e) = self.retire(&publisher) {
                warn!(stream = %publisher.id(), error = %e, "stream teardown incomplete");
            }
            self.counters.deleted.fetch_add(1, Ordering::Relaxed);
        }
        if count > 0 {
            info!(count, "all streams deleted");
        }
        count
    }

    /// Undo a create that lost the race against `shutdown_all`. Nothing
    /// sweeps idle keys after shutdown, so they are torn down here.
    fn abandon(&self, publisher: &StreamPublisher) {
        if let Err(e) = self.retire(publisher) {
            warn!(stream = %publisher.id(), error = %e, "stream rollback incomplete");
        }
        self.interest.release_idle();
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(stream = %publisher.id(), "stream created during shutdown: rolled back");
    }

    fn retire(&self, publisher: &StreamPublisher) -> Result<(), CoreError> {
        if let Err(e) = publisher.shutdown() {
            warn!(stream = %publisher.id(), error = %e, "publisher already shut down");
        }
        self.interest.release_stream(publisher.stream())
    }
}

impl StatisticsCollectable for StreamLifecycle {
    fn statistics(&self) -> Statistics {
        let c = &self.counters;
        Statistics::new("STREAM LIFECYCLE")
            .with("Create requests", c.create_requests.load(Ordering::Relaxed))
            .with("Streams created", c.created.load(Ordering::Relaxed))
            .with("Streams rejected", c.rejected.load(Ordering::Relaxed))
            .with("Delete requests", c.delete_requests.load(Ordering::Relaxed))
            .with("Streams deleted", c.deleted.load(Ordering::Relaxed))
            .with("Active streams", self.active_streams())
    }

    fn reset(&self) {
        let c = &self.counters;
        for counter in [
            &c.create_requests,
            &c.created,
            &c.rejected,
            &c.delete_requests,
            &c.deleted,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::GatewayConfig;
    use crate::control::{ControlSystem, NotificationDispatcher, SimulatedControlSystem};
    use crate::error::ErrorKind;
    use crate::model::{ChannelName, StorageKey};
    use crate::polling::PollingCoordinator;

    struct Fixture {
        sim: Arc<SimulatedControlSystem>,
        interest: Arc<SubscriptionManager>,
        lifecycle: StreamLifecycle,
    }

    fn fixture() -> Fixture {
        let config = GatewayConfig::default();
        let sim = Arc::new(SimulatedControlSystem::new());
        let control: Arc<dyn ControlSystem> = sim.clone();
        let store = Arc::new(DataStore::from_config(&config));
        let polling = Arc::new(PollingCoordinator::new(
            Arc::clone(&control),
            Arc::clone(&store),
            Duration::from_millis(100),
            CancellationToken::new(),
        ));
        let interest = Arc::new(SubscriptionManager::new(
            control,
            Arc::clone(&store),
            polling,
            Arc::new(NotificationDispatcher::new(2)),
            config.release_interval,
        ));
        let lifecycle = StreamLifecycle::new(
            StreamDecoder::from_config(&config),
            store,
            Arc::clone(&interest),
        );
        Fixture {
            sim,
            interest,
            lifecycle,
        }
    }

    const TWO_CHANNELS: &str = r#"{"channels": [{"name": "abc"}, {"name": "def"}]}"#;

    #[test]
    fn create_registers_interest() {
        let f = fixture();
        let id = f.lifecycle.create_stream(TWO_CHANNELS).unwrap();

        assert!(f.lifecycle.is_known(id));
        assert_eq!(f.lifecycle.stream(id).unwrap().channels.len(), 2);
        assert_eq!(f.interest.interest_count(&StorageKey::monitored("abc")), Some(1));
        assert!(f.sim.is_subscribed(&ChannelName::from("def")));
    }

    #[test]
    fn rejected_payloads_change_nothing() {
        let f = fixture();
        for payload in ["", r#"{"channels": []}"#, "not json"] {
            let err = f.lifecycle.create_stream(payload).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest);
        }
        assert_eq!(f.lifecycle.active_streams(), 0);
        assert!(f.interest.tracked_keys().is_empty());

        let stats = f.lifecycle.statistics();
        assert_eq!(stats.get("Streams rejected"), Some("3"));
        assert_eq!(stats.get("Streams created"), Some("0"));
    }

    #[test]
    fn delete_lowers_interest_and_forgets_stream() {
        let f = fixture();
        let id = f.lifecycle.create_stream(TWO_CHANNELS).unwrap();
        f.lifecycle.delete_stream(id).unwrap();

        assert!(!f.lifecycle.is_known(id));
        assert_eq!(f.interest.interest_count(&StorageKey::monitored("abc")), Some(0));
        // Upstream release is deferred to the sweep.
        assert!(f.sim.is_subscribed(&ChannelName::from("abc")));
    }

    #[test]
    fn delete_unknown_is_not_found() {
        let f = fixture();
        let err = f.lifecycle.delete_stream(StreamId::from(u64::MAX)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let id = f.lifecycle.create_stream(TWO_CHANNELS).unwrap();
        f.lifecycle.delete_stream(id).unwrap();
        assert!(matches!(
            f.lifecycle.delete_stream(id),
            Err(CoreError::StreamNotFound { .. })
        ));
    }

    #[test]
    fn shared_channels_are_counted_per_stream() {
        let f = fixture();
        let a = f.lifecycle.create_stream(TWO_CHANNELS).unwrap();
        let b = f.lifecycle.create_stream(r#"{"channels": [{"name": "abc"}]}"#).unwrap();
        assert_ne!(a, b);
        assert_eq!(f.interest.interest_count(&StorageKey::monitored("abc")), Some(2));
        assert_eq!(f.sim.subscribe_count(&ChannelName::from("abc")), 1);

        f.lifecycle.delete_stream(a).unwrap();
        assert_eq!(f.interest.interest_count(&StorageKey::monitored("abc")), Some(1));
        assert_eq!(f.interest.interest_count(&StorageKey::monitored("def")), Some(0));
    }

    #[test]
    fn events_for_deleted_stream_fail() {
        let f = fixture();
        let id = f.lifecycle.create_stream(TWO_CHANNELS).unwrap();
        let publisher = f.lifecycle.publisher(id).unwrap();
        f.lifecycle.delete_stream(id).unwrap();

        assert!(publisher.is_shutdown());
        assert!(f.lifecycle.events(id).is_err());
    }

    #[test]
    fn shutdown_all_deletes_everything() {
        let f = fixture();
        let mut ids = vec![
            f.lifecycle.create_stream(TWO_CHANNELS).unwrap(),
            f.lifecycle.create_stream(TWO_CHANNELS).unwrap(),
        ];
        ids.sort_unstable();
        assert_eq!(f.lifecycle.stream_ids(), ids);

        assert_eq!(f.lifecycle.shutdown_all(), 2);
        assert_eq!(f.lifecycle.active_streams(), 0);
        assert_eq!(f.interest.interest_count(&StorageKey::monitored("def")), Some(0));
        assert_eq!(f.lifecycle.shutdown_all(), 0);
    }

    #[test]
    fn closed_registry_refuses_creates() {
        let f = fixture();
        f.lifecycle.shutdown_all();
        assert!(f.lifecycle.is_closed());

        let err = f.lifecycle.create_stream(TWO_CHANNELS).unwrap_err();
        assert!(matches!(err, CoreError::GatewayShutDown));
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(f.lifecycle.active_streams(), 0);
        assert!(f.interest.tracked_keys().is_empty());
        assert!(!f.sim.is_subscribed(&ChannelName::from("abc")));
    }

    #[test]
    fn abandoned_create_tears_down_upstream() {
        let f = fixture();
        let stream = f.lifecycle.decoder.decode(StreamId::next(), TWO_CHANNELS).unwrap();
        f.interest.register_stream(&stream).unwrap();
        let publisher = StreamPublisher::new(stream, Arc::clone(&f.lifecycle.store));

        f.lifecycle.abandon(&publisher);

        assert!(publisher.is_shutdown());
        assert!(f.interest.tracked_keys().is_empty());
        assert!(!f.sim.is_subscribed(&ChannelName::from("abc")));
        assert!(!f.sim.is_subscribed(&ChannelName::from("def")));
    }

    #[test]
    fn concurrent_deletes_of_one_stream() {
        let f = fixture();
        let id = f.lifecycle.create_stream(TWO_CHANNELS).unwrap();

        let results: Vec<Result<(), CoreError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| scope.spawn(|| f.lifecycle.delete_stream(id)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(CoreError::StreamNotFound { .. })))
                .count(),
            1
        );
        assert_eq!(f.interest.interest_count(&StorageKey::monitored("abc")), Some(0));
    }
}
