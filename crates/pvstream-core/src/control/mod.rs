// ── Control system seam ──
//
// The gateway never speaks the control system protocol itself. Anything
// that can subscribe to a channel, deliver callbacks, and answer a single
// read implements `ControlSystem`.

mod dispatch;
pub mod sim;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ControlSystemError;
use crate::model::{ChannelMetadata, ChannelName, ChannelValue};

pub use dispatch::NotificationDispatcher;
pub use sim::SimulatedControlSystem;

pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;
pub type MetadataCallback = Arc<dyn Fn(ChannelMetadata) + Send + Sync>;
pub type ValueCallback = Arc<dyn Fn(ChannelValue) + Send + Sync>;

/// Callbacks registered with one upstream subscription.
///
/// The control system may invoke them from its own delivery thread; the
/// gateway's implementations only enqueue work and return.
#[derive(Clone)]
pub struct ChannelCallbacks {
    pub on_connection_change: ConnectionCallback,
    pub on_metadata: MetadataCallback,
    pub on_value: ValueCallback,
}

impl ChannelCallbacks {
    /// Callbacks that ignore everything.
    pub fn noop() -> Self {
        Self {
            on_connection_change: Arc::new(|_| {}),
            on_metadata: Arc::new(|_| {}),
            on_value: Arc::new(|_| {}),
        }
    }
}

impl std::fmt::Debug for ChannelCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCallbacks").finish_non_exhaustive()
    }
}

/// Client library of the underlying control system.
#[async_trait]
pub trait ControlSystem: Send + Sync {
    /// Start monitoring a channel. At most one subscription per channel is
    /// ever requested by the gateway.
    fn subscribe(
        &self,
        channel: &ChannelName,
        callbacks: ChannelCallbacks,
    ) -> Result<(), ControlSystemError>;

    /// Stop monitoring a channel. Fails if it was never subscribed.
    fn unsubscribe(&self, channel: &ChannelName) -> Result<(), ControlSystemError>;

    /// Read the current value of a channel once.
    async fn poll_once(
        &self,
        channel: &ChannelName,
        timeout: Duration,
    ) -> Result<ChannelValue, ControlSystemError>;
}
