// ── Domain model ──

pub mod channel;
pub mod metadata;
pub mod stream;
pub mod value;

pub use channel::{
    AcquisitionMode, Channel, ChannelName, ChannelProperties, DataAcquisitionMode, StorageKey,
    ValueFilter,
};
pub use metadata::{ChannelMetadata, IntegerLimits, RealLimits};
pub use stream::{Stream, StreamId, StreamProperties};
pub use value::{
    AlarmSeverity, AlarmStatus, ChannelType, ChannelValue, ConnectedValue, ValuePayload,
};
