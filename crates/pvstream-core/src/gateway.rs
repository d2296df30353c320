// ── Gateway facade ──
//
// Owns the whole object graph: data store, notification dispatcher,
// polling coordinator, subscription manager and stream lifecycle. Handles
// startup of the background workers, the deferred release sweep, and
// orderly shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::control::{ControlSystem, NotificationDispatcher};
use crate::error::CoreError;
use crate::interest::SubscriptionManager;
use crate::model::{Stream, StreamId};
use crate::polling::PollingCoordinator;
use crate::stats::{Statistics, StatisticsCollectable};
use crate::store::DataStore;
use crate::stream::{EventStream, StreamDecoder, StreamLifecycle};

// ── Gateway ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<GatewayInner>`. Construction wires the
/// components together; [`start()`](Self::start) spawns the background
/// tasks and [`shutdown()`](Self::shutdown) stops them.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    store: Arc<DataStore>,
    dispatcher: Arc<NotificationDispatcher>,
    polling: Arc<PollingCoordinator>,
    interest: Arc<SubscriptionManager>,
    lifecycle: StreamLifecycle,
    cancel: CancellationToken,
    started: AtomicBool,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Build a gateway on top of `control`. Does NOT spawn anything.
    pub fn new(config: GatewayConfig, control: Arc<dyn ControlSystem>) -> Self {
        let cancel = CancellationToken::new();
        let store = Arc::new(DataStore::from_config(&config));
        let dispatcher = Arc::new(NotificationDispatcher::new(config.notification_workers.max(1)));
        let polling = Arc::new(PollingCoordinator::new(
            Arc::clone(&control),
            Arc::clone(&store),
            config.poll_timeout,
            cancel.child_token(),
        ));
        let interest = Arc::new(SubscriptionManager::new(
            control,
            Arc::clone(&store),
            Arc::clone(&polling),
            Arc::clone(&dispatcher),
            config.release_interval,
        ));
        let lifecycle = StreamLifecycle::new(
            StreamDecoder::from_config(&config),
            Arc::clone(&store),
            Arc::clone(&interest),
        );

        Self {
            inner: Arc::new(GatewayInner {
                config,
                store,
                dispatcher,
                polling,
                interest,
                lifecycle,
                cancel,
                started: AtomicBool::new(false),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    pub fn interest(&self) -> &Arc<SubscriptionManager> {
        &self.inner.interest
    }

    pub fn polling(&self) -> &Arc<PollingCoordinator> {
        &self.inner.polling
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.inner.dispatcher
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the notification workers and the release sweep.
    ///
    /// A gateway starts once; a second call fails with
    /// [`CoreError::AlreadyStarted`].
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyStarted);
        }

        let mut handles = self.inner.task_handles.lock().await;

        let cancel = self.inner.cancel.child_token();
        if let Some(workers) = self.inner.dispatcher.start(&cancel) {
            handles.extend(workers);
        }

        let period = self.inner.config.release_sweep_period;
        let interest = Arc::clone(&self.inner.interest);
        handles.push(tokio::spawn(release_sweep_task(interest, period, cancel)));

        info!(
            workers = self.inner.dispatcher.worker_count(),
            release_interval_ms = self.inner.config.release_interval.as_millis(),
            "gateway started"
        );
        Ok(())
    }

    /// Shut down every live stream, cancel background work and wait for it.
    ///
    /// Upstream subscriptions still held are torn down immediately rather
    /// than waiting out the release interval.
    pub async fn shutdown(&self) {
        let streams = self.inner.lifecycle.shutdown_all();
        let released = self.inner.interest.release_all();

        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.inner.polling.stop_all().await;

        info!(streams, released = released.len(), "gateway shut down");
    }

    // ── Streams ──────────────────────────────────────────────────────

    /// Create a stream from its JSON definition.
    pub fn create_stream(&self, payload: &str) -> Result<StreamId, CoreError> {
        self.inner.lifecycle.create_stream(payload)
    }

    pub fn delete_stream(&self, id: StreamId) -> Result<(), CoreError> {
        self.inner.lifecycle.delete_stream(id)
    }

    /// The merged event sequence for a stream.
    pub fn events(&self, id: StreamId) -> Result<EventStream, CoreError> {
        self.inner.lifecycle.events(id)
    }

    pub fn is_known(&self, id: StreamId) -> bool {
        self.inner.lifecycle.is_known(id)
    }

    pub fn stream(&self, id: StreamId) -> Option<Arc<Stream>> {
        self.inner.lifecycle.stream(id)
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.inner.lifecycle.stream_ids()
    }

    // ── Statistics ───────────────────────────────────────────────────

    pub fn statistics(&self) -> Vec<Statistics> {
        vec![
            self.inner.lifecycle.statistics(),
            self.inner.interest.statistics(),
            self.inner.polling.statistics(),
            self.inner.dispatcher.statistics(),
        ]
    }

    pub fn reset_statistics(&self) {
        self.inner.lifecycle.reset();
        self.inner.interest.reset();
        self.inner.polling.reset();
        self.inner.dispatcher.reset();
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Periodically tear down keys whose interest expired.
async fn release_sweep_task(
    interest: Arc<SubscriptionManager>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let released = interest.release_expired();
                if !released.is_empty() {
                    debug!(count = released.len(), "release sweep tore down keys");
                }
            }
        }
    }
}
