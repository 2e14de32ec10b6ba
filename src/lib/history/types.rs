use serde::Serialize;

use super::error::HistoryError;

/// How many of the most recent samples a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Samples {
    /// Every valid sample in the buffer (still bounded by a checkpoint, if any).
    #[default]
    All,
    /// At most this many of the newest samples.
    Last(u64),
}

impl Samples {
    /// Clamp the request to `valid` samples.
    pub fn window(&self, valid: u64) -> u64 {
        match *self {
            Samples::All => valid,
            Samples::Last(count) => count.min(valid),
        }
    }
}

/// One decoded history response from the user terminal.
///
/// Every per-sample array is optional since firmware versions differ in which
/// of them they report. Present arrays are always `capacity` long and are
/// indexed by ring position, unless `is_contiguous` is set, in which case
/// index 0 holds the oldest sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawHistorySnapshot {
    /// Total samples written since the terminal booted.
    pub write_counter: u64,
    pub capacity: usize,
    pub is_contiguous: bool,
    pub pop_ping_drop_rate: Option<Vec<f64>>,
    pub pop_ping_latency_ms: Option<Vec<f64>>,
    pub downlink_throughput_bps: Option<Vec<f64>>,
    pub uplink_throughput_bps: Option<Vec<f64>>,
    pub snr: Option<Vec<f64>>,
    pub scheduled: Option<Vec<bool>>,
    pub obstructed: Option<Vec<bool>>,
}

impl RawHistorySnapshot {
    pub fn new(write_counter: u64, capacity: usize) -> Self {
        Self {
            write_counter,
            capacity,
            ..Default::default()
        }
    }

    /// Check that every present array matches `capacity`.
    pub fn validate(&self) -> Result<(), HistoryError> {
        fn check<T>(
            field: &'static str,
            values: &Option<Vec<T>>,
            expected: usize,
        ) -> Result<(), HistoryError> {
            match values {
                Some(values) if values.len() != expected => Err(HistoryError::LengthMismatch {
                    field,
                    expected,
                    found: values.len(),
                }),
                _ => Ok(()),
            }
        }

        check("pop_ping_drop_rate", &self.pop_ping_drop_rate, self.capacity)?;
        check("pop_ping_latency_ms", &self.pop_ping_latency_ms, self.capacity)?;
        check(
            "downlink_throughput_bps",
            &self.downlink_throughput_bps,
            self.capacity,
        )?;
        check(
            "uplink_throughput_bps",
            &self.uplink_throughput_bps,
            self.capacity,
        )?;
        check("snr", &self.snr, self.capacity)?;
        check("scheduled", &self.scheduled, self.capacity)?;
        check("obstructed", &self.obstructed, self.capacity)
    }

    /// Number of samples in the buffer that hold real data.
    pub fn valid_samples(&self) -> u64 {
        if self.is_contiguous {
            self.capacity as u64
        } else {
            self.write_counter.min(self.capacity as u64)
        }
    }
}

/// A single reported value. `Missing` stands for "no data", never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(u64),
    Float(f64),
    Bool(bool),
    Text(String),
    Missing,
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Numeric reading of the value. Text has none.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Integer(value) => Some(value as f64),
            Value::Float(value) => Some(value),
            Value::Bool(value) => Some(if value { 1.0 } else { 0.0 }),
            Value::Text(_) | Value::Missing => None,
        }
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Missing)
    }
}

/// A named field of a stats group, either a single value or a sequence whose
/// elements are labelled starting at `start`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Sequence { start: usize, values: Vec<Value> },
}

impl FieldValue {
    pub fn scalar<T: Into<Value>>(value: T) -> Self {
        FieldValue::Scalar(value.into())
    }

    pub fn sequence<T: Into<Value> + Copy>(start: usize, values: &[T]) -> Self {
        FieldValue::Sequence {
            start,
            values: values.iter().map(|&value| value.into()).collect(),
        }
    }
}

/// Common view over every group of computed statistics, used by the sinks to
/// serialize them without knowing their concrete layout.
pub trait StatsGroup {
    /// Short identifier of the group, e.g. `ping_run_length`.
    fn name(&self) -> &'static str;

    /// Category the group reports under, e.g. `ping_stats` or `usage`.
    fn category(&self) -> &'static str;

    /// Ordered field list. The order and sequence lengths never change
    /// between calls, so they can be used as a CSV schema.
    fn fields(&self) -> Vec<(&'static str, FieldValue)>;
}
