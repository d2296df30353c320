// ── Stream events ──
//
// Typed items of a publisher's merged output. Serialization to the wire
// format is left to the transport layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};

use crate::model::{ChannelMetadata, ChannelName, ChannelValue, StreamId};

/// Which producer emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    /// Periodic liveness signal.
    Heartbeat,
    /// Once, on subscription.
    ChannelMetadata,
    /// Once, on subscription: full buffered history.
    ChannelValuesInitial,
    /// Periodic: monitored values received since the previous emission.
    ChannelValuesChanged,
    /// Periodic: latest polled value per polled channel.
    ChannelValuesPolled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Heartbeat(DateTime<Utc>),
    Metadata(BTreeMap<ChannelName, ChannelMetadata>),
    Values(BTreeMap<ChannelName, Vec<ChannelValue>>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEvent {
    pub stream: StreamId,
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl StreamEvent {
    pub fn heartbeat(stream: StreamId, at: DateTime<Utc>) -> Self {
        Self {
            stream,
            kind: EventKind::Heartbeat,
            payload: EventPayload::Heartbeat(at),
        }
    }

    pub fn metadata(stream: StreamId, metadata: BTreeMap<ChannelName, ChannelMetadata>) -> Self {
        Self {
            stream,
            kind: EventKind::ChannelMetadata,
            payload: EventPayload::Metadata(metadata),
        }
    }

    pub fn values(
        stream: StreamId,
        kind: EventKind,
        values: BTreeMap<ChannelName, Vec<ChannelValue>>,
    ) -> Self {
        Self {
            stream,
            kind,
            payload: EventPayload::Values(values),
        }
    }

    /// Channel values carried by this event, if it is a value event.
    pub fn channel_values(&self) -> Option<&BTreeMap<ChannelName, Vec<ChannelValue>>> {
        match &self.payload {
            EventPayload::Values(values) => Some(values),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_kebab_case() {
        assert_eq!(EventKind::ChannelValuesChanged.to_string(), "channel-values-changed");
        let kind: EventKind = "heartbeat".parse().unwrap();
        assert_eq!(kind, EventKind::Heartbeat);
    }

    #[test]
    fn serializes_flat_payload() {
        let mut values = BTreeMap::new();
        values.insert(ChannelName::from("abc"), vec![ChannelValue::disconnected()]);
        let event = StreamEvent::values(StreamId::from(3), EventKind::ChannelValuesPolled, values);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stream"], 3);
        assert_eq!(json["kind"], "channel-values-polled");
        assert_eq!(json["payload"]["abc"][0]["conn"], "disconnected");
        assert!(event.channel_values().is_some());
    }
}
