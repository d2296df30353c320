// ── Channel identity types ──
//
// ChannelName and StorageKey are the keys every shared map in the gateway
// is indexed by. Two streams naming the same channel in the same
// acquisition mode share one StorageKey, and therefore one upstream
// subscription and one value buffer.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ── ChannelName ─────────────────────────────────────────────────────

/// Name of a process-variable channel in the underlying control system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for ChannelName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ChannelName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── AcquisitionMode ─────────────────────────────────────────────────

/// How values for a single storage key reach the gateway.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AcquisitionMode {
    /// Pushed by the control system on every change.
    Monitored,
    /// Read by the gateway on a fixed schedule.
    Polled,
}

// ── StorageKey ──────────────────────────────────────────────────────

/// A (channel, acquisition mode) pair.
///
/// Monitored and polled interest in the same channel are tracked under
/// different keys and never share buffers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey {
    pub name: ChannelName,
    pub mode: AcquisitionMode,
}

impl StorageKey {
    pub fn new(name: ChannelName, mode: AcquisitionMode) -> Self {
        Self { name, mode }
    }

    pub fn monitored(name: impl Into<ChannelName>) -> Self {
        Self::new(name.into(), AcquisitionMode::Monitored)
    }

    pub fn polled(name: impl Into<ChannelName>) -> Self {
        Self::new(name.into(), AcquisitionMode::Polled)
    }

    /// The same channel under the other acquisition mode.
    pub fn sibling(&self) -> Self {
        let mode = match self.mode {
            AcquisitionMode::Monitored => AcquisitionMode::Polled,
            AcquisitionMode::Polled => AcquisitionMode::Monitored,
        };
        Self::new(self.name.clone(), mode)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}##{}", self.name, self.mode)
    }
}

// ── DataAcquisitionMode ─────────────────────────────────────────────

/// Per-channel acquisition request as written in a stream configuration.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DataAcquisitionMode {
    #[default]
    Monitor,
    Poll,
    PollAndMonitor,
}

impl DataAcquisitionMode {
    pub fn does_monitoring(self) -> bool {
        matches!(self, Self::Monitor | Self::PollAndMonitor)
    }

    pub fn does_polling(self) -> bool {
        matches!(self, Self::Poll | Self::PollAndMonitor)
    }

    /// The storage-key modes this request raises interest in.
    pub fn modes(self) -> Vec<AcquisitionMode> {
        let mut modes = Vec::with_capacity(2);
        if self.does_monitoring() {
            modes.push(AcquisitionMode::Monitored);
        }
        if self.does_polling() {
            modes.push(AcquisitionMode::Polled);
        }
        modes
    }
}

// ── ValueFilter ─────────────────────────────────────────────────────

/// Sampling applied to each batch of buffered values before publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "kebab-case")]
pub enum ValueFilter {
    #[default]
    AllValue,
    LastN { n: usize },
}

// ── ChannelProperties ───────────────────────────────────────────────

/// Acquisition and presentation properties of one channel in one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProperties {
    pub daq_mode: DataAcquisitionMode,
    pub polling_interval: Duration,
    /// Decimal digits kept for real-valued payloads.
    pub precision: u32,
    /// Value fields the transport layer should serialize. Empty means all.
    pub fields_of_interest: Vec<String>,
    pub filter: ValueFilter,
}

impl Default for ChannelProperties {
    fn default() -> Self {
        Self {
            daq_mode: DataAcquisitionMode::Monitor,
            polling_interval: Duration::from_millis(1000),
            precision: 6,
            fields_of_interest: Vec::new(),
            filter: ValueFilter::AllValue,
        }
    }
}

// ── Channel ─────────────────────────────────────────────────────────

/// A channel as requested by a stream: its name plus its properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: ChannelName,
    pub properties: ChannelProperties,
}

impl Channel {
    pub fn new(name: impl Into<ChannelName>, properties: ChannelProperties) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    /// A channel with default properties (monitored).
    pub fn with_defaults(name: impl Into<ChannelName>) -> Self {
        Self::new(name, ChannelProperties::default())
    }

    pub fn storage_keys(&self) -> Vec<StorageKey> {
        self.properties
            .daq_mode
            .modes()
            .into_iter()
            .map(|mode| StorageKey::new(self.name.clone(), mode))
            .collect()
    }
}
