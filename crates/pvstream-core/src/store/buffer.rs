// ── Bounded per-key value history ──
//
// Sharded concurrent storage of the most recent values for every storage
// key. Each entry carries an insertion stamp drawn from one process-wide
// counter, so "everything newer than X" has an exact answer even when
// several values land within the same clock tick.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::model::{AcquisitionMode, ChannelValue, StorageKey};

// ── Stamp ───────────────────────────────────────────────────────────

/// Monotonic insertion stamp. Totally ordered across all keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stamp(u64);

impl Stamp {
    /// Precedes every recorded value.
    pub const MIN: Self = Self(0);
}

/// One buffered value with its insertion bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedValue {
    pub stamp: Stamp,
    pub recorded_at: Instant,
    pub value: ChannelValue,
}

// ── ValueBuffer ─────────────────────────────────────────────────────

/// Fixed-capacity FIFO history per storage key.
///
/// Append, eviction, and stamp allocation for a key happen under that
/// key's shard guard. Readers get owned copies, never a live view.
pub struct ValueBuffer {
    monitored_capacity: usize,
    polled_capacity: usize,
    entries: DashMap<StorageKey, VecDeque<BufferedValue>>,
    clock: AtomicU64,
}

impl ValueBuffer {
    pub fn new(monitored_capacity: usize, polled_capacity: usize) -> Self {
        Self {
            monitored_capacity: monitored_capacity.max(1),
            polled_capacity: polled_capacity.max(1),
            entries: DashMap::new(),
            clock: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self, mode: AcquisitionMode) -> usize {
        match mode {
            AcquisitionMode::Monitored => self.monitored_capacity,
            AcquisitionMode::Polled => self.polled_capacity,
        }
    }

    /// Append a value, evicting the oldest entry once capacity is exceeded.
    pub fn record_value(&self, key: &StorageKey, value: ChannelValue) -> Stamp {
        let mut history = self.entries.entry(key.clone()).or_default();
        self.push(&mut history, key.mode, value)
    }

    /// Like [`record_value()`](Self::record_value), but only while `live`
    /// holds. The flag is checked under the key's guard, so a writer racing
    /// a [`discard()`](Self::discard) that first clears the flag can never
    /// resurrect the buffer.
    pub fn record_value_while(
        &self,
        key: &StorageKey,
        value: ChannelValue,
        live: &AtomicBool,
    ) -> Option<Stamp> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if !live.load(Ordering::SeqCst) {
                    return None;
                }
                Some(self.push(slot.get_mut(), key.mode, value))
            }
            Entry::Vacant(slot) => {
                if !live.load(Ordering::SeqCst) {
                    return None;
                }
                let mut history = slot.insert(VecDeque::new());
                Some(self.push(&mut history, key.mode, value))
            }
        }
    }

    fn push(
        &self,
        history: &mut VecDeque<BufferedValue>,
        mode: AcquisitionMode,
        value: ChannelValue,
    ) -> Stamp {
        let stamp = Stamp(self.clock.fetch_add(1, Ordering::SeqCst) + 1);
        history.push_back(BufferedValue {
            stamp,
            recorded_at: Instant::now(),
            value,
        });
        while history.len() > self.capacity(mode) {
            history.pop_front();
        }
        stamp
    }

    /// Stamp of the most recently allocated insertion.
    ///
    /// Take the mark *before* reading: any value recorded after it will
    /// carry a larger stamp.
    pub fn mark(&self) -> Stamp {
        Stamp(self.clock.load(Ordering::SeqCst))
    }

    /// All values newer than `since` for each requested key, oldest first.
    ///
    /// Keys with nothing newer (or nothing buffered at all) are omitted.
    pub fn get_later_than(
        &self,
        keys: &[StorageKey],
        since: Stamp,
    ) -> HashMap<StorageKey, Vec<ChannelValue>> {
        keys.iter()
            .filter_map(|key| {
                let history = self.entries.get(key)?;
                let values: Vec<ChannelValue> = history
                    .iter()
                    .filter(|entry| entry.stamp > since)
                    .map(|entry| entry.value.clone())
                    .collect();
                (!values.is_empty()).then(|| (key.clone(), values))
            })
            .collect()
    }

    /// Most recent value for each requested key that has one.
    pub fn get_latest(&self, keys: &[StorageKey]) -> HashMap<StorageKey, ChannelValue> {
        keys.iter()
            .filter_map(|key| {
                let history = self.entries.get(key)?;
                let latest = history.back()?.value.clone();
                Some((key.clone(), latest))
            })
            .collect()
    }

    /// Full buffered entries for one key, including stamps.
    pub fn history(&self, key: &StorageKey) -> Vec<BufferedValue> {
        self.entries
            .get(key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, key: &StorageKey) -> usize {
        self.entries.get(key).map_or(0, |h| h.len())
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop the whole history of a key.
    pub fn discard(&self, key: &StorageKey) -> bool {
        self.entries.remove(key).is_some()
    }
}
