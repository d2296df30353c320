// End-to-end tests for `Gateway` against the simulated control system.
//
// All timing runs on paused Tokio time, so sweeps, pollers and producers
// advance deterministically.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_test::{assert_err, assert_ok};

use pvstream_core::{
    ChannelMetadata, ChannelName, ChannelValue, ControlSystem, CoreError, ErrorKind, EventKind,
    EventStream, Gateway, GatewayConfig, SimulatedControlSystem, StorageKey, StreamEvent,
    StreamId, ValuePayload,
};

// ── Helpers ─────────────────────────────────────────────────────────

const RELEASE: Duration = Duration::from_secs(30);

async fn setup() -> (Gateway, Arc<SimulatedControlSystem>) {
    let config = GatewayConfig {
        notification_workers: 4,
        release_interval: RELEASE,
        ..GatewayConfig::default()
    };
    let sim = Arc::new(SimulatedControlSystem::new());
    let control: Arc<dyn ControlSystem> = sim.clone();
    let gateway = Gateway::new(config, control);
    gateway.start().await.unwrap();
    (gateway, sim)
}

fn abc() -> ChannelName {
    ChannelName::from("abc")
}

fn integer(v: i64) -> ChannelValue {
    ChannelValue::connected(ValuePayload::Integer(v))
}

/// Pull events until one of `kind` carries values for `channel`.
async fn next_with_values(events: &mut EventStream, kind: EventKind, channel: &ChannelName) -> StreamEvent {
    loop {
        let event = events.next().await.unwrap();
        let has_values = event
            .channel_values()
            .and_then(|v| v.get(channel))
            .is_some_and(|v| !v.is_empty());
        if event.kind == kind && has_values {
            return event;
        }
    }
}

// ── Lifecycle errors ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_bad_stream_configurations() {
    let (gateway, _sim) = setup().await;

    let empty = gateway.create_stream("").unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::BadRequest);

    let none = gateway.create_stream(r#"{"channels": []}"#).unwrap_err();
    assert!(matches!(none, CoreError::NoChannels));

    assert!(gateway.stream_ids().is_empty());
    assert!(gateway.interest().tracked_keys().is_empty());
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_delete_unknown_stream() {
    let (gateway, _sim) = setup().await;

    let err = gateway.delete_stream(StreamId::from(987_654_321)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let id = gateway.create_stream(r#"{"channels": [{"name": "abc"}]}"#).unwrap();
    assert_ok!(gateway.delete_stream(id));
    assert_err!(gateway.delete_stream(id));
    assert!(!gateway.is_known(id));
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_fails() {
    let (gateway, _sim) = setup().await;
    assert!(matches!(gateway.start().await, Err(CoreError::AlreadyStarted)));
    gateway.shutdown().await;
}

// ── Buffering ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_buffer_keeps_most_recent_values() {
    let (gateway, sim) = setup().await;
    gateway.create_stream(r#"{"channels": [{"name": "abc"}]}"#).unwrap();

    for v in 1..=5 {
        assert!(sim.inject_value(&abc(), integer(v)));
    }
    gateway.dispatcher().drained().await;

    let history = gateway.store().values.history(&StorageKey::monitored("abc"));
    let payloads: Vec<Option<ValuePayload>> =
        history.iter().map(|b| b.value.payload().cloned()).collect();
    assert_eq!(
        payloads,
        vec![
            Some(ValuePayload::Integer(3)),
            Some(ValuePayload::Integer(4)),
            Some(ValuePayload::Integer(5)),
        ]
    );
    gateway.shutdown().await;
}

// ── Deferred release ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_release_waits_for_release_interval() {
    let (gateway, sim) = setup().await;
    let id = gateway.create_stream(r#"{"channels": [{"name": "abc"}]}"#).unwrap();
    sim.set_metadata(&abc(), ChannelMetadata::String);
    gateway.dispatcher().drained().await;
    gateway.delete_stream(id).unwrap();

    tokio::time::sleep(RELEASE - Duration::from_millis(500)).await;
    assert!(sim.is_subscribed(&abc()));
    assert!(gateway.store().metadata.get(&abc()).is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!sim.is_subscribed(&abc()));
    assert!(!gateway.interest().is_tracked(&StorageKey::monitored("abc")));
    assert!(!gateway.store().values.contains(&StorageKey::monitored("abc")));
    assert!(gateway.store().metadata.get(&abc()).is_none());
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_churn_within_release_interval_keeps_subscription() {
    let (gateway, sim) = setup().await;
    let payload = r#"{"channels": [{"name": "abc"}]}"#;

    let first = gateway.create_stream(payload).unwrap();
    gateway.delete_stream(first).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let second = gateway.create_stream(payload).unwrap();
    gateway.delete_stream(second).unwrap();
    tokio::time::sleep(Duration::from_secs(25)).await;

    // 35s since the first delete, but only 25s since the last one.
    assert!(sim.is_subscribed(&abc()));
    assert_eq!(sim.subscribe_count(&abc()), 1);
    assert_eq!(sim.unsubscribe_count(&abc()), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(sim.unsubscribe_count(&abc()), 1);
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shared_channel_survives_one_delete() {
    let (gateway, sim) = setup().await;
    let a = gateway
        .create_stream(r#"{"channels": [{"name": "abc"}, {"name": "def"}]}"#)
        .unwrap();
    let _b = gateway.create_stream(r#"{"channels": [{"name": "abc"}]}"#).unwrap();
    gateway.delete_stream(a).unwrap();

    tokio::time::sleep(RELEASE + Duration::from_secs(2)).await;
    assert!(sim.is_subscribed(&abc()));
    assert!(!sim.is_subscribed(&ChannelName::from("def")));
    gateway.shutdown().await;
}

// ── Events ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_event_sequence_end_to_end() {
    let (gateway, sim) = setup().await;
    let id = gateway
        .create_stream(r#"{"props": {"chflux": 100, "hbflux": 1000}, "channels": [{"name": "abc"}]}"#)
        .unwrap();
    sim.set_metadata(&abc(), ChannelMetadata::String);
    gateway.dispatcher().drained().await;

    let mut events = gateway.events(id).unwrap();

    let mut one_shots = vec![
        events.next().await.unwrap().kind,
        events.next().await.unwrap().kind,
    ];
    one_shots.sort_by_key(|k| k.to_string());
    assert_eq!(
        one_shots,
        vec![EventKind::ChannelMetadata, EventKind::ChannelValuesInitial]
    );

    sim.inject_value(&abc(), integer(42));
    gateway.dispatcher().drained().await;

    let changed = next_with_values(&mut events, EventKind::ChannelValuesChanged, &abc()).await;
    assert_eq!(changed.stream, id);
    let values = &changed.channel_values().unwrap()[&abc()];
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].payload(), Some(&ValuePayload::Integer(42)));

    let heartbeat = loop {
        let event = events.next().await.unwrap();
        if event.kind == EventKind::Heartbeat {
            break event;
        }
    };
    assert_eq!(heartbeat.stream, id);

    gateway.delete_stream(id).unwrap();
    assert!(events.next().await.is_none());
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_polled_channel_publishes_latest_value() {
    let (gateway, sim) = setup().await;
    sim.set_poll_value(&abc(), integer(7));

    let id = gateway
        .create_stream(
            r#"{"props": {"pollflux": 500}, "channels": [{"name": "abc", "props": {"daqmode": "poll", "pollint": 200}}]}"#,
        )
        .unwrap();
    assert!(gateway.polling().is_polling(&abc()));
    assert!(!sim.is_subscribed(&abc()));

    let mut events = gateway.events(id).unwrap();
    let polled = next_with_values(&mut events, EventKind::ChannelValuesPolled, &abc()).await;
    let values = &polled.channel_values().unwrap()[&abc()];
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].payload(), Some(&ValuePayload::Integer(7)));
    assert!(sim.poll_count() >= 1);

    gateway.delete_stream(id).unwrap();
    tokio::time::sleep(RELEASE + Duration::from_secs(2)).await;
    assert!(!gateway.polling().is_polling(&abc()));
    gateway.shutdown().await;
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_everything() {
    let (gateway, sim) = setup().await;
    let id = gateway
        .create_stream(r#"{"channels": [{"name": "abc"}, {"name": "def", "props": {"daqmode": "poll-and-monitor"}}]}"#)
        .unwrap();
    let mut events = gateway.events(id).unwrap();

    gateway.shutdown().await;

    assert!(!gateway.is_known(id));
    assert!(!sim.is_subscribed(&abc()));
    assert!(!sim.is_subscribed(&ChannelName::from("def")));
    assert!(!gateway.polling().is_polling(&ChannelName::from("def")));
    assert!(gateway.interest().tracked_keys().is_empty());
    assert!(events.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_create_after_shutdown_is_refused() {
    let (gateway, sim) = setup().await;
    gateway.shutdown().await;

    let err = gateway
        .create_stream(r#"{"channels": [{"name": "abc"}]}"#)
        .unwrap_err();
    assert!(matches!(err, CoreError::GatewayShutDown));
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(gateway.stream_ids().is_empty());
    assert!(gateway.interest().tracked_keys().is_empty());
    assert_eq!(sim.subscribe_count(&abc()), 0);

    tokio::time::sleep(RELEASE * 4).await;
    assert!(!sim.is_subscribed(&abc()));
}

#[tokio::test(start_paused = true)]
async fn test_statistics_cover_every_component() {
    let (gateway, _sim) = setup().await;
    let id = gateway.create_stream(r#"{"channels": [{"name": "abc"}]}"#).unwrap();
    gateway.delete_stream(id).unwrap();

    let stats = gateway.statistics();
    let headers: Vec<&str> = stats.iter().map(|s| s.header.as_str()).collect();
    assert_eq!(
        headers,
        vec![
            "STREAM LIFECYCLE",
            "SUBSCRIPTION MANAGER",
            "POLLING COORDINATOR",
            "NOTIFICATION DISPATCHER",
        ]
    );
    assert_eq!(stats[0].get("Streams created"), Some("1"));
    assert_eq!(stats[0].get("Streams deleted"), Some("1"));

    gateway.reset_statistics();
    assert_eq!(gateway.statistics()[0].get("Streams created"), Some("0"));
    gateway.shutdown().await;
}
