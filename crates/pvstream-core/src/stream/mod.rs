// ── Client streams ──
//
// Decoding of stream definitions, per-channel value mapping, the merged
// event publisher, and the registry that ties streams to channel interest.

pub mod decoder;
pub mod event;
pub mod lifecycle;
pub mod mapper;
pub mod publisher;

pub use decoder::StreamDecoder;
pub use event::{EventKind, EventPayload, StreamEvent};
pub use lifecycle::StreamLifecycle;
pub use mapper::{AllValueSampler, ChannelValueMapper, LatestValueSampler, MapperChain, PrecisionLimiter};
pub use publisher::{EventStream, StreamPublisher};
