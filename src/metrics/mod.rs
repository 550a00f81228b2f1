// Metrics module - the shapes statsd hands us on every flush
//
// This module provides:
// 1. The closed set of metric types statsd flushes, and where each one is stored
// 2. The snapshot structure delivered once per flush cycle
// 3. The per-reading record that gets persisted (see `record`)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod record;

pub use record::MetricRecord;

/// Errors raised while interpreting a flush snapshot
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Unknown metric type: {0}")]
    UnknownMetricType(String),
}

/// Metric type groups statsd delivers in a flush snapshot.
///
/// Each variant is bound to exactly one storage destination. The group name
/// used by statsd (`counters`, `timer_data`, ...) is parsed with [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Timer,
    Counter,
    CounterRate,
    Gauge,
    Set,
    TimerCounter,
    TimerData,
    StatsdMetrics,
    /// Percentile thresholds configured in statsd. Never persisted.
    PctThreshold,
}

impl MetricType {
    /// All metric types, in the order statsd lists them
    pub const ALL: [MetricType; 9] = [
        MetricType::Timer,
        MetricType::Counter,
        MetricType::CounterRate,
        MetricType::Gauge,
        MetricType::Set,
        MetricType::TimerCounter,
        MetricType::TimerData,
        MetricType::StatsdMetrics,
        MetricType::PctThreshold,
    ];

    /// Group name as it appears in the flush snapshot
    pub fn group_name(self) -> &'static str {
        match self {
            MetricType::Timer => "timers",
            MetricType::Counter => "counters",
            MetricType::CounterRate => "counter_rates",
            MetricType::Gauge => "gauges",
            MetricType::Set => "sets",
            MetricType::TimerCounter => "timer_counters",
            MetricType::TimerData => "timer_data",
            MetricType::StatsdMetrics => "statsd_metrics",
            MetricType::PctThreshold => "pctThreshold",
        }
    }

    /// Logical destination name, used when reporting write failures
    pub fn destination(self) -> &'static str {
        match self {
            MetricType::Timer => "timer",
            MetricType::Counter => "counter",
            MetricType::CounterRate => "counter_rates",
            MetricType::Gauge => "gauge",
            MetricType::Set => "set",
            MetricType::TimerCounter => "timer_counter",
            MetricType::TimerData => "timer_data",
            MetricType::StatsdMetrics => "statsd_metrics",
            MetricType::PctThreshold => "pctThreshold",
        }
    }

    /// Name of the MongoDB collection records of this type are inserted into
    ///
    /// These are the collection names existing statsd databases already use,
    /// so dashboards built on them keep working.
    pub fn collection(self) -> &'static str {
        match self {
            MetricType::Timer => "timers",
            MetricType::Counter => "counters",
            MetricType::CounterRate => "counter_rates",
            MetricType::Gauge => "gauges",
            MetricType::Set => "sets",
            MetricType::TimerCounter => "timer_counters",
            MetricType::TimerData => "timer_data",
            MetricType::StatsdMetrics => "statsd_metrics",
            MetricType::PctThreshold => "pctthresholds",
        }
    }

    /// Whether readings of this type are turned into records at all
    pub fn is_persisted(self) -> bool {
        self != MetricType::PctThreshold
    }

    /// Every metric type that ends up in a collection
    pub fn persisted() -> impl Iterator<Item = MetricType> {
        Self::ALL.into_iter().filter(|t| t.is_persisted())
    }
}

impl FromStr for MetricType {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .into_iter()
            .find(|t| t.group_name() == s)
            .ok_or_else(|| MetricsError::UnknownMetricType(s.to_string()))
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

/// Aggregated metrics for one flush cycle
///
/// Maps a metric type group name to the group's content. For every persisted
/// type the content is an object of dotted metric key to value; values may be
/// numbers or arbitrary JSON (timer data, arrays of timings).
///
/// # Example
/// ```json
/// {
///   "counters": { "app.requests": 42 },
///   "gauges": { "freemem": 512 },
///   "pctThreshold": [90]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSnapshot {
    groups: Map<String, Value>,
}

impl MetricSnapshot {
    /// Iterates over `(group name, group content)` pairs
    pub fn groups(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.groups.iter().map(|(name, content)| (name.as_str(), content))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
