// ── Stream configuration decoding ──
//
// Turns the client's JSON stream definition into a validated `Stream`.
// Property resolution is layered: channel `props` override stream `props`,
// which override the gateway defaults. Nothing here touches shared state,
// so a rejected payload leaves the gateway untouched.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::config::GatewayConfig;
use crate::error::CoreError;
use crate::model::{
    Channel, ChannelName, ChannelProperties, DataAcquisitionMode, Stream, StreamId,
    StreamProperties, ValueFilter,
};

// ── Wire shape ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawProps {
    hbflux: Option<u64>,
    chflux: Option<u64>,
    pollflux: Option<u64>,
    daqmode: Option<String>,
    pollint: Option<u64>,
    prec: Option<u32>,
    fields: Option<String>,
    filter: Option<String>,
    n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    name: String,
    #[serde(default)]
    props: RawProps,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    #[serde(default)]
    props: RawProps,
    channels: Vec<RawChannel>,
}

// ── Decoder ──────────────────────────────────────────────────────────

/// Decodes stream definitions against a set of defaults.
#[derive(Debug, Clone)]
pub struct StreamDecoder {
    stream_defaults: StreamProperties,
    channel_defaults: ChannelProperties,
}

impl StreamDecoder {
    pub fn new(stream_defaults: StreamProperties, channel_defaults: ChannelProperties) -> Self {
        Self {
            stream_defaults,
            channel_defaults,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.stream_defaults, config.channel_defaults.clone())
    }

    /// Decode `payload` into a stream with the given id.
    pub fn decode(&self, id: StreamId, payload: &str) -> Result<Stream, CoreError> {
        if payload.trim().is_empty() {
            return Err(CoreError::invalid("stream configuration is empty"));
        }
        let raw: RawStream = serde_json::from_str(payload)
            .map_err(|e| CoreError::invalid(format!("malformed stream configuration: {e}")))?;

        if raw.channels.is_empty() {
            return Err(CoreError::NoChannels);
        }

        let properties = self.stream_properties(&raw.props)?;
        let stream_channel_defaults = apply_channel_props(&self.channel_defaults, &raw.props)?;

        let mut seen = HashSet::new();
        let mut channels = Vec::with_capacity(raw.channels.len());
        for raw_channel in &raw.channels {
            let name = raw_channel.name.trim();
            if name.is_empty() {
                return Err(CoreError::invalid("channel name must not be empty"));
            }
            let name = ChannelName::new(name);
            if !seen.insert(name.clone()) {
                continue;
            }
            let props = apply_channel_props(&stream_channel_defaults, &raw_channel.props)?;
            channels.push(Channel::new(name, props));
        }

        Ok(Stream::new(id, properties, channels))
    }

    fn stream_properties(&self, raw: &RawProps) -> Result<StreamProperties, CoreError> {
        let d = &self.stream_defaults;
        Ok(StreamProperties {
            heartbeat_interval: millis_or(raw.hbflux, "hbflux", d.heartbeat_interval)?,
            changed_value_interval: millis_or(raw.chflux, "chflux", d.changed_value_interval)?,
            polled_value_interval: millis_or(raw.pollflux, "pollflux", d.polled_value_interval)?,
        })
    }
}

fn millis_or(raw: Option<u64>, field: &str, default: Duration) -> Result<Duration, CoreError> {
    match raw {
        None => Ok(default),
        Some(0) => Err(CoreError::invalid(format!("{field} must be greater than zero"))),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}

fn apply_channel_props(base: &ChannelProperties, raw: &RawProps) -> Result<ChannelProperties, CoreError> {
    let daq_mode = match raw.daqmode.as_deref() {
        None => base.daq_mode,
        Some(s) => s
            .parse::<DataAcquisitionMode>()
            .map_err(|_| CoreError::invalid(format!("unknown daqmode '{s}'")))?,
    };

    let filter = match raw.filter.as_deref() {
        None => match (base.filter, raw.n) {
            (ValueFilter::LastN { .. }, Some(n)) => last_n(n)?,
            (filter, _) => filter,
        },
        Some("all-value") => ValueFilter::AllValue,
        Some("last-n") => last_n(raw.n.unwrap_or(1))?,
        Some(other) => return Err(CoreError::invalid(format!("unknown filter '{other}'"))),
    };

    let fields_of_interest = match raw.fields.as_deref() {
        None => base.fields_of_interest.clone(),
        Some(s) => s
            .split(';')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect(),
    };

    Ok(ChannelProperties {
        daq_mode,
        polling_interval: millis_or(raw.pollint, "pollint", base.polling_interval)?,
        precision: raw.prec.unwrap_or(base.precision),
        fields_of_interest,
        filter,
    })
}

fn last_n(n: usize) -> Result<ValueFilter, CoreError> {
    if n == 0 {
        return Err(CoreError::invalid("n must be at least 1 for the last-n filter"));
    }
    Ok(ValueFilter::LastN { n })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ErrorKind;

    fn decoder() -> StreamDecoder {
        StreamDecoder::from_config(&GatewayConfig::default())
    }

    fn decode(payload: &str) -> Result<Stream, CoreError> {
        decoder().decode(StreamId::from(1), payload)
    }

    #[test]
    fn empty_payload_is_bad_request() {
        for payload in ["", "   ", "\n"] {
            assert_eq!(decode(payload).unwrap_err().kind(), ErrorKind::BadRequest);
        }
    }

    #[test]
    fn malformed_json_is_bad_request() {
        let err = decode("{\"channels\": [").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration { .. }));
        assert!(decode("{\"props\": {}}").is_err());
    }

    #[test]
    fn zero_channels_is_rejected() {
        let err = decode(r#"{"channels": []}"#).unwrap_err();
        assert!(matches!(err, CoreError::NoChannels));
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn defaults_apply_when_props_absent() {
        let stream = decode(r#"{"channels": [{"name": "abc"}]}"#).unwrap();
        assert_eq!(stream.properties, StreamProperties::default());
        assert_eq!(stream.channels[0].properties, ChannelProperties::default());
    }

    #[test]
    fn channel_props_override_stream_props() {
        let stream = decode(
            r#"{
                "props": {"hbflux": 5000, "chflux": 250, "prec": 3, "daqmode": "poll", "pollint": 2000},
                "channels": [
                    {"name": "a"},
                    {"name": "b", "props": {"prec": 1, "daqmode": "poll-and-monitor", "fields": "val; sevr;"}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(stream.properties.heartbeat_interval, Duration::from_millis(5000));
        assert_eq!(stream.properties.changed_value_interval, Duration::from_millis(250));
        assert_eq!(stream.properties.polled_value_interval, Duration::from_millis(1000));

        let a = &stream.channels[0].properties;
        assert_eq!(a.daq_mode, DataAcquisitionMode::Poll);
        assert_eq!(a.precision, 3);
        assert_eq!(a.polling_interval, Duration::from_millis(2000));

        let b = &stream.channels[1].properties;
        assert_eq!(b.daq_mode, DataAcquisitionMode::PollAndMonitor);
        assert_eq!(b.precision, 1);
        assert_eq!(b.fields_of_interest, vec!["val".to_string(), "sevr".to_string()]);
    }

    #[test]
    fn filters_decode() {
        let stream = decode(
            r#"{"channels": [
                {"name": "a", "props": {"filter": "last-n", "n": 4}},
                {"name": "b", "props": {"filter": "last-n"}},
                {"name": "c", "props": {"filter": "all-value"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(stream.channels[0].properties.filter, ValueFilter::LastN { n: 4 });
        assert_eq!(stream.channels[1].properties.filter, ValueFilter::LastN { n: 1 });
        assert_eq!(stream.channels[2].properties.filter, ValueFilter::AllValue);
    }

    #[test]
    fn bad_property_values_are_rejected() {
        for payload in [
            r#"{"channels": [{"name": "a", "props": {"daqmode": "sometimes"}}]}"#,
            r#"{"channels": [{"name": "a", "props": {"filter": "fancy"}}]}"#,
            r#"{"channels": [{"name": "a", "props": {"filter": "last-n", "n": 0}}]}"#,
            r#"{"channels": [{"name": "a", "props": {"pollint": 0}}]}"#,
            r#"{"props": {"hbflux": 0}, "channels": [{"name": "a"}]}"#,
            r#"{"channels": [{"name": "  "}]}"#,
        ] {
            let err = decode(payload).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest, "payload {payload}");
        }
    }

    #[test]
    fn duplicate_names_keep_first() {
        let stream = decode(
            r#"{"channels": [
                {"name": "a", "props": {"prec": 2}},
                {"name": "b"},
                {"name": "a", "props": {"prec": 9}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(stream.channels.len(), 2);
        assert_eq!(stream.channels[0].properties.precision, 2);
    }
}
