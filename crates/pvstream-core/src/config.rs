// ── Runtime gateway configuration ──
//
// Tuning for buffers, deferred release, notification dispatch, and the
// defaults applied to stream configurations that leave properties out.
// Core never reads config files: pvstream-config builds one of these and
// hands it in.

use std::time::Duration;

use crate::model::{ChannelProperties, StreamProperties};

/// Configuration for one gateway instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// History kept per monitored storage key.
    pub monitored_buffer_capacity: usize,
    /// History kept per polled storage key.
    pub polled_buffer_capacity: usize,
    /// Grace period between interest reaching zero and upstream teardown.
    pub release_interval: Duration,
    /// Period of the deferred release sweep.
    pub release_sweep_period: Duration,
    /// Worker queues that run control system callbacks.
    pub notification_workers: usize,
    /// Upper bound on one poll read.
    pub poll_timeout: Duration,
    /// Stream timing used when a stream configuration omits it.
    pub stream_defaults: StreamProperties,
    /// Channel properties used when a stream configuration omits them.
    pub channel_defaults: ChannelProperties,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            monitored_buffer_capacity: 3,
            polled_buffer_capacity: 3,
            release_interval: Duration::from_secs(30),
            release_sweep_period: Duration::from_millis(1000),
            notification_workers: 100,
            poll_timeout: Duration::from_millis(1000),
            stream_defaults: StreamProperties::default(),
            channel_defaults: ChannelProperties::default(),
        }
    }
}
