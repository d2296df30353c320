// ── Service statistics ──
//
// Counters exposed by each gateway service for observability. Values are
// pre-rendered strings so heterogeneous counters share one shape.

use std::fmt::Display;

use serde::Serialize;

/// One named counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsItem {
    pub name: String,
    pub value: String,
}

/// A titled group of counters from one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub header: String,
    pub entries: Vec<StatisticsItem>,
}

impl Statistics {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            entries: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.entries.push(StatisticsItem {
            name: name.into(),
            value: value.to_string(),
        });
        self
    }

    /// Value of the named counter, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.value.as_str())
    }
}

/// Implemented by every service that keeps counters.
pub trait StatisticsCollectable {
    fn statistics(&self) -> Statistics;

    /// Zero the resettable counters. Gauges are unaffected.
    fn reset(&self);
}
