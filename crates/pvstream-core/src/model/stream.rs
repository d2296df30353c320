// ── Stream identity and properties ──

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::channel::{AcquisitionMode, Channel, ChannelName, StorageKey};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(0);

// ── StreamId ────────────────────────────────────────────────────────

/// Process-unique identifier of a client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(u64);

impl StreamId {
    /// Mint the next identifier. Never repeats within one process.
    pub fn next() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for StreamId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

// ── StreamProperties ────────────────────────────────────────────────

/// Stream-wide timing of the periodic producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProperties {
    pub heartbeat_interval: Duration,
    pub changed_value_interval: Duration,
    pub polled_value_interval: Duration,
}

impl Default for StreamProperties {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(15_000),
            changed_value_interval: Duration::from_millis(100),
            polled_value_interval: Duration::from_millis(1000),
        }
    }
}

// ── Stream ──────────────────────────────────────────────────────────

/// A decoded client stream: id, timing, and requested channels in
/// request order (duplicates already collapsed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub id: StreamId,
    pub properties: StreamProperties,
    pub channels: Vec<Channel>,
}

impl Stream {
    pub fn new(id: StreamId, properties: StreamProperties, channels: Vec<Channel>) -> Self {
        Self {
            id,
            properties,
            channels,
        }
    }

    pub fn channel(&self, name: &ChannelName) -> Option<&Channel> {
        self.channels.iter().find(|c| &c.name == name)
    }

    /// Every storage key this stream holds interest in.
    pub fn storage_keys(&self) -> Vec<StorageKey> {
        self.channels.iter().flat_map(Channel::storage_keys).collect()
    }

    /// Storage keys in the given acquisition mode only.
    pub fn keys_in_mode(&self, mode: AcquisitionMode) -> Vec<StorageKey> {
        self.storage_keys()
            .into_iter()
            .filter(|k| k.mode == mode)
            .collect()
    }
}
