// ── Shared data store ──
//
// Process-wide value history and metadata, shared by every stream that
// references a channel. Mutated by the subscription manager, the polling
// coordinator and control system callbacks. Publishers only read.

mod buffer;
mod metadata;

pub use buffer::{BufferedValue, Stamp, ValueBuffer};
pub use metadata::MetadataStash;

use crate::config::GatewayConfig;

pub struct DataStore {
    pub values: ValueBuffer,
    pub metadata: MetadataStash,
}

impl DataStore {
    pub fn new(monitored_capacity: usize, polled_capacity: usize) -> Self {
        Self {
            values: ValueBuffer::new(monitored_capacity, polled_capacity),
            metadata: MetadataStash::new(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.monitored_buffer_capacity,
            config.polled_buffer_capacity,
        )
    }
}
