//! Subscription lifecycle and merged event streams for the pvstream gateway.
//!
//! This crate sits between a control system (process-variable channels
//! with asynchronous monitors and on-demand reads) and web clients that
//! each want one ordered event sequence for a set of channels:
//!
//! - **[`Gateway`]**: Facade owning the whole object graph.
//!   [`start()`](Gateway::start) spawns the notification workers and the
//!   deferred release sweep; [`shutdown()`](Gateway::shutdown) stops every
//!   stream and tears down upstream work.
//!
//! - **[`SubscriptionManager`]**: Reference-counted interest per
//!   [`StorageKey`] (channel name plus acquisition mode). The first raise
//!   subscribes or starts a poller; the last lower only marks the key as a
//!   release candidate, which the sweep tears down after the release
//!   interval unless interest comes back first.
//!
//! - **[`DataStore`]**: Bounded per-key value history ([`ValueBuffer`])
//!   and per-channel metadata ([`MetadataStash`]), both sharded `DashMap`s.
//!   Every insert carries a monotonic [`Stamp`] so publishers can ask for
//!   "everything after my last look" without losing or repeating values.
//!
//! - **[`StreamPublisher`]**: Merges heartbeat, metadata, initial,
//!   changed and polled value producers into one cancellable
//!   [`EventStream`]. A failing producer closes its own branch only.
//!
//! - **[`ControlSystem`]**: The seam to the upstream protocol.
//!   [`SimulatedControlSystem`] implements it in memory for tests and the
//!   CLI demo.

pub mod config;
pub mod control;
pub mod error;
pub mod gateway;
pub mod interest;
pub mod model;
pub mod polling;
pub mod stats;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::GatewayConfig;
pub use control::{
    ChannelCallbacks, ControlSystem, NotificationDispatcher, SimulatedControlSystem,
};
pub use error::{ControlSystemError, CoreError, ErrorKind};
pub use gateway::Gateway;
pub use interest::SubscriptionManager;
pub use polling::PollingCoordinator;
pub use stats::{Statistics, StatisticsCollectable, StatisticsItem};
pub use store::{DataStore, MetadataStash, Stamp, ValueBuffer};
pub use stream::{
    EventKind, EventPayload, EventStream, StreamDecoder, StreamEvent, StreamLifecycle,
    StreamPublisher,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AcquisitionMode, AlarmSeverity, AlarmStatus, Channel, ChannelMetadata, ChannelName,
    ChannelProperties, ChannelType, ChannelValue, ConnectedValue, DataAcquisitionMode,
    IntegerLimits, RealLimits, StorageKey, Stream, StreamId, StreamProperties, ValueFilter,
    ValuePayload,
};
