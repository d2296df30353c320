// ── Channel values ──
//
// A value is either "we have nothing current" (disconnected) or a
// connected sample carrying timestamps, alarm state, and a typed payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

// ── Alarm state ─────────────────────────────────────────────────────

/// Alarm severity reported alongside every connected sample.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmSeverity {
    #[default]
    NoAlarm,
    Minor,
    Major,
    Invalid,
}

/// Raw alarm status code as delivered by the control system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmStatus(pub u16);

// ── ChannelType ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    String,
    StringArray,
    Integer,
    IntegerArray,
    Real,
    RealArray,
}

// ── ValuePayload ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValuePayload {
    String(String),
    StringArray(Vec<String>),
    Integer(i64),
    IntegerArray(Vec<i64>),
    Real(f64),
    RealArray(Vec<f64>),
}

impl ValuePayload {
    pub fn channel_type(&self) -> ChannelType {
        match self {
            Self::String(_) => ChannelType::String,
            Self::StringArray(_) => ChannelType::StringArray,
            Self::Integer(_) => ChannelType::Integer,
            Self::IntegerArray(_) => ChannelType::IntegerArray,
            Self::Real(_) => ChannelType::Real,
            Self::RealArray(_) => ChannelType::RealArray,
        }
    }
}

// ── ChannelValue ────────────────────────────────────────────────────

/// A connected sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedValue {
    /// When the control system says the data was taken.
    pub data_timestamp: DateTime<Utc>,
    /// When the gateway received it.
    pub server_timestamp: DateTime<Utc>,
    pub severity: AlarmSeverity,
    pub status: AlarmStatus,
    pub payload: ValuePayload,
}

impl ConnectedValue {
    pub fn channel_type(&self) -> ChannelType {
        self.payload.channel_type()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "conn", rename_all = "lowercase")]
pub enum ChannelValue {
    Disconnected { server_timestamp: DateTime<Utc> },
    Connected(ConnectedValue),
}

impl ChannelValue {
    /// A disconnected marker stamped now.
    pub fn disconnected() -> Self {
        Self::Disconnected {
            server_timestamp: Utc::now(),
        }
    }

    /// A connected sample with no alarm, stamped now.
    pub fn connected(payload: ValuePayload) -> Self {
        let now = Utc::now();
        Self::Connected(ConnectedValue {
            data_timestamp: now,
            server_timestamp: now,
            severity: AlarmSeverity::NoAlarm,
            status: AlarmStatus::default(),
            payload,
        })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn server_timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Disconnected { server_timestamp } => *server_timestamp,
            Self::Connected(v) => v.server_timestamp,
        }
    }

    pub fn payload(&self) -> Option<&ValuePayload> {
        match self {
            Self::Disconnected { .. } => None,
            Self::Connected(v) => Some(&v.payload),
        }
    }
}
