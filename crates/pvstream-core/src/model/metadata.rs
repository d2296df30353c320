// ── Channel metadata ──
//
// Static description of a channel (type, units, display/alarm/control
// limits). Stashed once per connection; `Unknown` until the control
// system delivers the real thing.

use serde::{Deserialize, Serialize};

use super::value::ChannelType;

/// Limits shared by integer-typed channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegerLimits {
    pub units: String,
    pub display_low: i64,
    pub display_high: i64,
    pub alarm_low: i64,
    pub alarm_high: i64,
    pub warn_low: i64,
    pub warn_high: i64,
    pub control_low: i64,
    pub control_high: i64,
}

/// Limits shared by real-typed channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealLimits {
    pub units: String,
    pub precision: u32,
    pub display_low: f64,
    pub display_high: f64,
    pub alarm_low: f64,
    pub alarm_high: f64,
    pub warn_low: f64,
    pub warn_high: f64,
    pub control_low: f64,
    pub control_high: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelMetadata {
    #[default]
    Unknown,
    String,
    StringArray,
    Integer(IntegerLimits),
    IntegerArray(IntegerLimits),
    Real(RealLimits),
    RealArray(RealLimits),
}

impl ChannelMetadata {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn channel_type(&self) -> Option<ChannelType> {
        match self {
            Self::Unknown => None,
            Self::String => Some(ChannelType::String),
            Self::StringArray => Some(ChannelType::StringArray),
            Self::Integer(_) => Some(ChannelType::Integer),
            Self::IntegerArray(_) => Some(ChannelType::IntegerArray),
            Self::Real(_) => Some(ChannelType::Real),
            Self::RealArray(_) => Some(ChannelType::RealArray),
        }
    }
}
