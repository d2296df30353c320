// ── In-memory control system ──
//
// A stand-in for a real control system client. Records every subscribe and
// unsubscribe, lets callers push connection changes, metadata and values
// through the registered callbacks, and answers polls from a value table.
// The optional driver task produces synthetic sine-wave data.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{ChannelCallbacks, ControlSystem};
use crate::error::ControlSystemError;
use crate::model::{ChannelMetadata, ChannelName, ChannelValue, RealLimits, ValuePayload};

#[derive(Default)]
struct SimState {
    subscriptions: HashMap<ChannelName, ChannelCallbacks>,
    connected: HashSet<ChannelName>,
    poll_values: HashMap<ChannelName, ChannelValue>,
    failing: HashSet<ChannelName>,
    subscribe_calls: Vec<ChannelName>,
    unsubscribe_calls: Vec<ChannelName>,
    poll_calls: u64,
    phase: u32,
}

/// Simulated control system for tests and the CLI demo.
#[derive(Default)]
pub struct SimulatedControlSystem {
    state: Mutex<SimState>,
    synthetic_polls: bool,
}

impl SimulatedControlSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer polls for channels without a table entry with a synthetic value.
    pub fn with_synthetic_polls() -> Self {
        Self {
            state: Mutex::default(),
            synthetic_polls: true,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self, channel: &ChannelName) -> Option<ChannelCallbacks> {
        self.state().subscriptions.get(channel).cloned()
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// Callbacks currently registered for a channel.
    pub fn registered_callbacks(&self, channel: &ChannelName) -> Option<ChannelCallbacks> {
        self.callbacks(channel)
    }

    pub fn is_subscribed(&self, channel: &ChannelName) -> bool {
        self.state().subscriptions.contains_key(channel)
    }

    /// How many times `subscribe` was called for a channel.
    pub fn subscribe_count(&self, channel: &ChannelName) -> usize {
        self.state()
            .subscribe_calls
            .iter()
            .filter(|c| *c == channel)
            .count()
    }

    /// How many times `unsubscribe` was called for a channel.
    pub fn unsubscribe_count(&self, channel: &ChannelName) -> usize {
        self.state()
            .unsubscribe_calls
            .iter()
            .filter(|c| *c == channel)
            .count()
    }

    pub fn poll_count(&self) -> u64 {
        self.state().poll_calls
    }

    // ── Injection ────────────────────────────────────────────────────

    /// Deliver a connection change. Returns `false` if not subscribed.
    pub fn set_connected(&self, channel: &ChannelName, connected: bool) -> bool {
        let Some(callbacks) = self.callbacks(channel) else {
            return false;
        };
        {
            let mut state = self.state();
            if connected {
                state.connected.insert(channel.clone());
            } else {
                state.connected.remove(channel);
            }
        }
        (callbacks.on_connection_change)(connected);
        true
    }

    /// Deliver metadata. Returns `false` if not subscribed.
    pub fn set_metadata(&self, channel: &ChannelName, metadata: ChannelMetadata) -> bool {
        let Some(callbacks) = self.callbacks(channel) else {
            return false;
        };
        (callbacks.on_metadata)(metadata);
        true
    }

    /// Deliver a monitored value. Returns `false` if not subscribed.
    pub fn inject_value(&self, channel: &ChannelName, value: ChannelValue) -> bool {
        let Some(callbacks) = self.callbacks(channel) else {
            return false;
        };
        (callbacks.on_value)(value);
        true
    }

    /// Value returned by subsequent polls of `channel`.
    pub fn set_poll_value(&self, channel: &ChannelName, value: ChannelValue) {
        let mut state = self.state();
        state.failing.remove(channel);
        state.poll_values.insert(channel.clone(), value);
    }

    /// Make subsequent polls of `channel` fail.
    pub fn fail_polls(&self, channel: &ChannelName) {
        self.state().failing.insert(channel.clone());
    }

    // ── Driver ───────────────────────────────────────────────────────

    /// Emit one round of synthetic data to every subscribed channel.
    pub fn tick(&self) {
        let (phase, targets, fresh) = {
            let mut state = self.state();
            state.phase = state.phase.wrapping_add(1);
            let targets: Vec<_> = state
                .subscriptions
                .iter()
                .map(|(name, cb)| (name.clone(), cb.clone()))
                .collect();
            let fresh: HashSet<ChannelName> = targets
                .iter()
                .map(|(name, _)| name.clone())
                .filter(|name| !state.connected.contains(name))
                .collect();
            state.connected.extend(fresh.iter().cloned());
            (state.phase, targets, fresh)
        };

        for (name, callbacks) in targets {
            if fresh.contains(&name) {
                (callbacks.on_connection_change)(true);
                (callbacks.on_metadata)(sine_metadata());
            }
            trace!(channel = %name, phase, "simulated monitor update");
            (callbacks.on_value)(sine_value(phase));
        }
    }

    /// Run [`tick()`](Self::tick) every `period` until cancelled.
    pub fn spawn_driver(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let sim = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => sim.tick(),
                }
            }
            debug!("simulated control system driver stopped");
        })
    }
}

fn sine_value(phase: u32) -> ChannelValue {
    let x = f64::from(phase) * 0.1;
    ChannelValue::connected(ValuePayload::Real(x.sin() * 10.0))
}

fn sine_metadata() -> ChannelMetadata {
    ChannelMetadata::Real(RealLimits {
        units: "au".into(),
        precision: 3,
        display_low: -10.0,
        display_high: 10.0,
        alarm_low: -9.5,
        alarm_high: 9.5,
        warn_low: -9.0,
        warn_high: 9.0,
        control_low: -10.0,
        control_high: 10.0,
    })
}

#[async_trait]
impl ControlSystem for SimulatedControlSystem {
    fn subscribe(
        &self,
        channel: &ChannelName,
        callbacks: ChannelCallbacks,
    ) -> Result<(), ControlSystemError> {
        let mut state = self.state();
        state.subscribe_calls.push(channel.clone());
        if state.subscriptions.contains_key(channel) {
            return Err(ControlSystemError::AlreadySubscribed {
                channel: channel.clone(),
            });
        }
        state.subscriptions.insert(channel.clone(), callbacks);
        Ok(())
    }

    fn unsubscribe(&self, channel: &ChannelName) -> Result<(), ControlSystemError> {
        let mut state = self.state();
        state.unsubscribe_calls.push(channel.clone());
        state.connected.remove(channel);
        state
            .subscriptions
            .remove(channel)
            .map(|_| ())
            .ok_or_else(|| ControlSystemError::NotSubscribed {
                channel: channel.clone(),
            })
    }

    async fn poll_once(
        &self,
        channel: &ChannelName,
        _timeout: Duration,
    ) -> Result<ChannelValue, ControlSystemError> {
        let mut state = self.state();
        state.poll_calls += 1;
        if state.failing.contains(channel) {
            return Err(ControlSystemError::Unavailable {
                channel: channel.clone(),
                reason: "simulated read failure".into(),
            });
        }
        if let Some(value) = state.poll_values.get(channel) {
            return Ok(value.clone());
        }
        if self.synthetic_polls {
            return Ok(sine_value(state.phase));
        }
        Err(ControlSystemError::Unavailable {
            channel: channel.clone(),
            reason: "no simulated value".into(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_callbacks(values: &Arc<AtomicUsize>) -> ChannelCallbacks {
        let values = values.clone();
        ChannelCallbacks {
            on_value: Arc::new(move |_| {
                values.fetch_add(1, Ordering::Relaxed);
            }),
            ..ChannelCallbacks::noop()
        }
    }

    #[test]
    fn double_subscribe_is_rejected() {
        let sim = SimulatedControlSystem::new();
        let name = ChannelName::from("abc");
        sim.subscribe(&name, ChannelCallbacks::noop()).unwrap();
        assert!(matches!(
            sim.subscribe(&name, ChannelCallbacks::noop()),
            Err(ControlSystemError::AlreadySubscribed { .. })
        ));
        assert_eq!(sim.subscribe_count(&name), 2);
    }

    #[test]
    fn unsubscribe_unknown_fails() {
        let sim = SimulatedControlSystem::new();
        assert!(sim.unsubscribe(&"abc".into()).is_err());
    }

    #[test]
    fn injection_reaches_callbacks() {
        let sim = SimulatedControlSystem::new();
        let name = ChannelName::from("abc");
        let values = Arc::new(AtomicUsize::new(0));
        assert!(!sim.inject_value(&name, ChannelValue::disconnected()));

        sim.subscribe(&name, counting_callbacks(&values)).unwrap();
        assert!(sim.inject_value(&name, ChannelValue::disconnected()));
        sim.tick();
        assert_eq!(values.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn polls_answer_from_table() {
        let sim = SimulatedControlSystem::new();
        let name = ChannelName::from("abc");
        let timeout = Duration::from_millis(100);
        assert!(sim.poll_once(&name, timeout).await.is_err());

        sim.set_poll_value(&name, ChannelValue::connected(ValuePayload::Integer(4)));
        let value = sim.poll_once(&name, timeout).await.unwrap();
        assert_eq!(value.payload(), Some(&ValuePayload::Integer(4)));

        sim.fail_polls(&name);
        assert!(sim.poll_once(&name, timeout).await.is_err());
        assert_eq!(sim.poll_count(), 3);
    }

    #[tokio::test]
    async fn synthetic_polls_always_answer() {
        let sim = SimulatedControlSystem::with_synthetic_polls();
        let value = sim
            .poll_once(&"anything".into(), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(value.is_connected());
    }
}
