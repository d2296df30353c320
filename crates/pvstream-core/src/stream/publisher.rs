// ── Stream publisher ──
//
// Merges five producers into one cancellable event sequence per stream:
// heartbeat (periodic), metadata (once), initial values (once), changed
// values (periodic) and polled values (periodic). Every call to
// `events()` builds fresh producers, so each subscriber gets its own
// one-shot snapshots. A producer that fails or panics closes its own
// branch only; the rest of the merge carries on.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use super::event::{EventKind, StreamEvent};
use super::mapper::{ChannelValueMapper, MapperChain};
use crate::error::CoreError;
use crate::model::{
    AcquisitionMode, ChannelMetadata, ChannelName, ChannelValue, StorageKey, Stream, StreamId,
};
use crate::store::{DataStore, Stamp};

/// Merged output of one publisher.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Output of a single producer before isolation.
pub(crate) type Producer = BoxStream<'static, Result<StreamEvent, CoreError>>;

// ── Shared producer context ──────────────────────────────────────────

struct PublisherContext {
    stream: Arc<Stream>,
    store: Arc<DataStore>,
    mappers: HashMap<ChannelName, MapperChain>,
    /// Per channel: monitored key if it monitors, else polled key.
    initial_keys: Vec<StorageKey>,
    monitored_keys: Vec<StorageKey>,
    polled_keys: Vec<StorageKey>,
}

impl PublisherContext {
    fn new(stream: Arc<Stream>, store: Arc<DataStore>) -> Self {
        let mappers = stream
            .channels
            .iter()
            .map(|c| (c.name.clone(), MapperChain::for_channel(&c.properties)))
            .collect();
        let initial_keys = stream
            .channels
            .iter()
            .map(|c| {
                let mode = if c.properties.daq_mode.does_monitoring() {
                    AcquisitionMode::Monitored
                } else {
                    AcquisitionMode::Polled
                };
                StorageKey::new(c.name.clone(), mode)
            })
            .collect();
        let monitored_keys = stream.keys_in_mode(AcquisitionMode::Monitored);
        let polled_keys = stream.keys_in_mode(AcquisitionMode::Polled);

        Self {
            stream,
            store,
            mappers,
            initial_keys,
            monitored_keys,
            polled_keys,
        }
    }

    fn id(&self) -> StreamId {
        self.stream.id
    }

    fn metadata_snapshot(&self) -> BTreeMap<ChannelName, ChannelMetadata> {
        self.stream
            .channels
            .iter()
            .map(|c| {
                let metadata = self.store.metadata.get(&c.name).unwrap_or_default();
                (c.name.clone(), metadata)
            })
            .collect()
    }

    fn publishable(
        &self,
        raw: HashMap<StorageKey, Vec<ChannelValue>>,
    ) -> BTreeMap<ChannelName, Vec<ChannelValue>> {
        raw.into_iter()
            .map(|(key, values)| {
                let values = match self.mappers.get(&key.name) {
                    Some(mapper) => mapper.map(values),
                    None => values,
                };
                (key.name, values)
            })
            .collect()
    }
}

// ── StreamPublisher ──────────────────────────────────────────────────

/// Event source for one stream. `ACTIVE -> SHUTDOWN`, one way.
pub struct StreamPublisher {
    context: Arc<PublisherContext>,
    shutdown: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl StreamPublisher {
    pub fn new(stream: Stream, store: Arc<DataStore>) -> Self {
        Self {
            context: Arc::new(PublisherContext::new(Arc::new(stream), store)),
            shutdown: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.context.id()
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.context.stream
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// A fresh merged event sequence for one subscriber.
    ///
    /// The sequence ends once [`shutdown()`](Self::shutdown) is called.
    pub fn events(&self) -> Result<EventStream, CoreError> {
        if self.is_shutdown() {
            error!(stream = %self.id(), "event sequence requested after shutdown");
            return Err(CoreError::AlreadyShutdown { id: self.id() });
        }

        let ctx = &self.context;
        let id = ctx.id();
        let since = ctx.store.values.mark();
        let producers = vec![
            isolate(id, EventKind::Heartbeat, heartbeat(ctx)),
            isolate(id, EventKind::ChannelMetadata, metadata(ctx)),
            isolate(id, EventKind::ChannelValuesInitial, initial_values(ctx)),
            isolate(id, EventKind::ChannelValuesChanged, changed_values(ctx, since)),
            isolate(id, EventKind::ChannelValuesPolled, polled_values(ctx)),
        ];

        let shutdown = Arc::clone(&self.shutdown);
        let merged = stream::select_all(producers)
            .take_until(self.cancel.clone().cancelled_owned())
            .take_while(move |_| future::ready(!shutdown.load(Ordering::SeqCst)));
        Ok(merged.boxed())
    }

    /// Stop every event sequence of this publisher. Calling twice is an error.
    pub fn shutdown(&self) -> Result<(), CoreError> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            error!(stream = %self.id(), "publisher shut down twice");
            return Err(CoreError::AlreadyShutdown { id: self.id() });
        }
        self.cancel.cancel();
        info!(stream = %self.id(), "publisher shut down");
        Ok(())
    }
}

// ── Producers ────────────────────────────────────────────────────────

/// Ticks every `period`, first one period from now.
fn periodic(period: Duration) -> impl futures_core::Stream<Item = Instant> + Send + Unpin + 'static {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    IntervalStream::new(interval)
}

fn heartbeat(ctx: &Arc<PublisherContext>) -> Producer {
    let id = ctx.id();
    periodic(ctx.stream.properties.heartbeat_interval)
        .map(move |_| {
            trace!(stream = %id, "heartbeat");
            Ok(StreamEvent::heartbeat(id, Utc::now()))
        })
        .boxed()
}

fn metadata(ctx: &Arc<PublisherContext>) -> Producer {
    let ctx = Arc::clone(ctx);
    stream::once(async move {
        trace!(stream = %ctx.id(), "publishing channel metadata");
        Ok(StreamEvent::metadata(ctx.id(), ctx.metadata_snapshot()))
    })
    .boxed()
}

fn initial_values(ctx: &Arc<PublisherContext>) -> Producer {
    let ctx = Arc::clone(ctx);
    stream::once(async move {
        trace!(stream = %ctx.id(), "publishing initial values");
        let raw = ctx.store.values.get_later_than(&ctx.initial_keys, Stamp::MIN);
        Ok(StreamEvent::values(
            ctx.id(),
            EventKind::ChannelValuesInitial,
            ctx.publishable(raw),
        ))
    })
    .boxed()
}

fn changed_values(ctx: &Arc<PublisherContext>, since: Stamp) -> Producer {
    let ctx = Arc::clone(ctx);
    let mut ticks = periodic(ctx.stream.properties.changed_value_interval);
    async_stream::stream! {
        let mut since = since;
        while ticks.next().await.is_some() {
            let mark = ctx.store.values.mark();
            let raw = ctx.store.values.get_later_than(&ctx.monitored_keys, since);
            since = mark;
            trace!(stream = %ctx.id(), channels = raw.len(), "publishing changed values");
            yield Ok::<_, CoreError>(StreamEvent::values(
                ctx.id(),
                EventKind::ChannelValuesChanged,
                ctx.publishable(raw),
            ));
        }
    }
    .boxed()
}

fn polled_values(ctx: &Arc<PublisherContext>) -> Producer {
    let ctx = Arc::clone(ctx);
    periodic(ctx.stream.properties.polled_value_interval)
        .map(move |_| {
            let raw = ctx
                .store
                .values
                .get_latest(&ctx.polled_keys)
                .into_iter()
                .map(|(key, value)| (key, vec![value]))
                .collect();
            Ok(StreamEvent::values(
                ctx.id(),
                EventKind::ChannelValuesPolled,
                ctx.publishable(raw),
            ))
        })
        .boxed()
}

/// Close a producer's branch on its first error or panic instead of
/// propagating into the merge.
pub(crate) fn isolate(id: StreamId, kind: EventKind, producer: Producer) -> EventStream {
    AssertUnwindSafe(producer)
        .catch_unwind()
        .map(move |item| match item {
            Ok(Ok(event)) => Some(event),
            Ok(Err(e)) => {
                warn!(stream = %id, producer = %kind, error = %e, "producer failed, branch closed");
                None
            }
            Err(_) => {
                warn!(stream = %id, producer = %kind, "producer panicked, branch closed");
                None
            }
        })
        .take_while(|item| future::ready(item.is_some()))
        .filter_map(future::ready)
        .boxed()
}
