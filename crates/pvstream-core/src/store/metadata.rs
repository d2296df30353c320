// ── Metadata stash ──
//
// One current metadata entry per channel, last write wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::model::{ChannelMetadata, ChannelName};

#[derive(Default)]
pub struct MetadataStash {
    entries: DashMap<ChannelName, ChannelMetadata>,
}

impl MetadataStash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &ChannelName, metadata: ChannelMetadata) {
        self.entries.insert(name.clone(), metadata);
    }

    /// Store `metadata` only if nothing is stashed yet. Returns `true` if written.
    pub fn record_if_absent(&self, name: &ChannelName, metadata: ChannelMetadata) -> bool {
        let mut inserted = false;
        self.entries.entry(name.clone()).or_insert_with(|| {
            inserted = true;
            metadata
        });
        inserted
    }

    /// Store `metadata` only while `live` holds, checked under the entry guard.
    pub fn record_while(
        &self,
        name: &ChannelName,
        metadata: ChannelMetadata,
        live: &AtomicBool,
    ) -> bool {
        match self.entries.entry(name.clone()) {
            Entry::Occupied(mut slot) if live.load(Ordering::SeqCst) => {
                slot.insert(metadata);
                true
            }
            Entry::Vacant(slot) if live.load(Ordering::SeqCst) => {
                slot.insert(metadata);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &ChannelName) -> Option<ChannelMetadata> {
        self.entries.get(name).map(|m| m.value().clone())
    }

    /// Metadata for each requested channel that has some.
    pub fn get_many(&self, names: &[ChannelName]) -> HashMap<ChannelName, ChannelMetadata> {
        names
            .iter()
            .filter_map(|name| self.get(name).map(|m| (name.clone(), m)))
            .collect()
    }

    pub fn discard(&self, name: &ChannelName) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
