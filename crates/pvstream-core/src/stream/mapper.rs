// ── Channel value mappers ──
//
// Per-channel transformation of a batch of buffered values before it is
// published: sampling first, then precision limiting.

use crate::model::{ChannelProperties, ChannelValue, ValueFilter, ValuePayload};

pub trait ChannelValueMapper: Send + Sync {
    fn map(&self, values: Vec<ChannelValue>) -> Vec<ChannelValue>;
}

// ── Samplers ─────────────────────────────────────────────────────────

/// Passes every value through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllValueSampler;

impl ChannelValueMapper for AllValueSampler {
    fn map(&self, values: Vec<ChannelValue>) -> Vec<ChannelValue> {
        values
    }
}

/// Keeps only the `n` most recent values of each batch.
#[derive(Debug, Clone, Copy)]
pub struct LatestValueSampler {
    n: usize,
}

impl LatestValueSampler {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl ChannelValueMapper for LatestValueSampler {
    fn map(&self, mut values: Vec<ChannelValue>) -> Vec<ChannelValue> {
        let skip = values.len().saturating_sub(self.n);
        values.drain(..skip);
        values
    }
}

// ── Precision ────────────────────────────────────────────────────────

/// Rounds real-valued payloads to a fixed number of decimal digits.
#[derive(Debug, Clone, Copy)]
pub struct PrecisionLimiter {
    scale: f64,
}

impl PrecisionLimiter {
    pub fn new(precision: u32) -> Self {
        let digits = i32::try_from(precision.min(17)).unwrap_or(17);
        Self {
            scale: 10f64.powi(digits),
        }
    }

    fn round(&self, v: f64) -> f64 {
        if v.is_finite() {
            (v * self.scale).round() / self.scale
        } else {
            v
        }
    }
}

impl ChannelValueMapper for PrecisionLimiter {
    fn map(&self, values: Vec<ChannelValue>) -> Vec<ChannelValue> {
        values
            .into_iter()
            .map(|value| match value {
                ChannelValue::Connected(mut v) => {
                    match &mut v.payload {
                        ValuePayload::Real(x) => *x = self.round(*x),
                        ValuePayload::RealArray(xs) => {
                            xs.iter_mut().for_each(|x| *x = self.round(*x));
                        }
                        _ => {}
                    }
                    ChannelValue::Connected(v)
                }
                disconnected @ ChannelValue::Disconnected { .. } => disconnected,
            })
            .collect()
    }
}

// ── Chain ────────────────────────────────────────────────────────────

/// Mappers applied in order.
pub struct MapperChain {
    stages: Vec<Box<dyn ChannelValueMapper>>,
}

impl MapperChain {
    /// Sampling per the channel's filter, then precision limiting.
    pub fn for_channel(properties: &ChannelProperties) -> Self {
        let sampler: Box<dyn ChannelValueMapper> = match properties.filter {
            ValueFilter::AllValue => Box::new(AllValueSampler),
            ValueFilter::LastN { n } => Box::new(LatestValueSampler::new(n)),
        };
        Self {
            stages: vec![sampler, Box::new(PrecisionLimiter::new(properties.precision))],
        }
    }
}

impl ChannelValueMapper for MapperChain {
    fn map(&self, values: Vec<ChannelValue>) -> Vec<ChannelValue> {
        self.stages
            .iter()
            .fold(values, |values, stage| stage.map(values))
    }
}
