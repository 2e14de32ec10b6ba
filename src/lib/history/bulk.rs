use serde::Serialize;
use tracing::*;

use super::{
    error::HistoryError,
    types::{RawHistorySnapshot, Value},
    window::SampleRange,
};

/// Per-sample history, one entry per selected sample in every field, oldest
/// first. Fields the terminal did not report are filled with `None` so every
/// batch has the same layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkHistory {
    pub samples: u64,
    pub end_counter: u64,
    pub pop_ping_drop_rate: Vec<Option<f64>>,
    pub pop_ping_latency_ms: Vec<Option<f64>>,
    pub downlink_throughput_bps: Vec<Option<f64>>,
    pub uplink_throughput_bps: Vec<Option<f64>>,
    pub snr: Vec<Option<f64>>,
    pub scheduled: Vec<Option<bool>>,
    pub obstructed: Vec<Option<bool>>,
}

impl BulkHistory {
    pub const FIELD_NAMES: [&'static str; 7] = [
        "pop_ping_drop_rate",
        "pop_ping_latency_ms",
        "downlink_throughput_bps",
        "uplink_throughput_bps",
        "snr",
        "scheduled",
        "obstructed",
    ];

    pub fn len(&self) -> usize {
        self.pop_ping_drop_rate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values of sample `index`, in [`FIELD_NAMES`](Self::FIELD_NAMES) order.
    pub fn row(&self, index: usize) -> Vec<Value> {
        fn at<T: Copy + Into<Value>>(values: &[Option<T>], index: usize) -> Value {
            values.get(index).copied().flatten().into()
        }

        vec![
            at(&self.pop_ping_drop_rate, index),
            at(&self.pop_ping_latency_ms, index),
            at(&self.downlink_throughput_bps, index),
            at(&self.uplink_throughput_bps, index),
            at(&self.snr, index),
            at(&self.scheduled, index),
            at(&self.obstructed, index),
        ]
    }
}

fn collect<T: Copy>(values: &Option<Vec<T>>, range: &SampleRange) -> Vec<Option<T>> {
    match values {
        Some(values) => range
            .iter()
            .map(|index| values.get(index).copied())
            .collect(),
        None => vec![None; range.len()],
    }
}

/// Copy the samples of `range` out of `snapshot` without reducing them.
///
/// Latency is dropped for samples with full packet loss, as no ping came back
/// to measure it. Fails if a reported field does not match the buffer size.
#[instrument(level = "debug", skip_all, fields(samples = range.parsed_samples, end_counter = range.end_counter))]
pub fn extract(
    snapshot: &RawHistorySnapshot,
    range: &SampleRange,
) -> Result<BulkHistory, HistoryError> {
    snapshot.validate()?;

    let pop_ping_drop_rate = collect(&snapshot.pop_ping_drop_rate, range);
    let pop_ping_latency_ms = collect(&snapshot.pop_ping_latency_ms, range)
        .into_iter()
        .zip(&pop_ping_drop_rate)
        .map(|(latency, drop_rate)| match drop_rate {
            Some(drop_rate) if *drop_rate >= 1.0 => None,
            _ => latency,
        })
        .collect();

    let bulk = BulkHistory {
        samples: range.parsed_samples,
        end_counter: range.end_counter,
        pop_ping_latency_ms,
        downlink_throughput_bps: collect(&snapshot.downlink_throughput_bps, range),
        uplink_throughput_bps: collect(&snapshot.uplink_throughput_bps, range),
        snr: collect(&snapshot.snr, range),
        scheduled: collect(&snapshot.scheduled, range),
        obstructed: collect(&snapshot.obstructed, range),
        pop_ping_drop_rate,
    };

    trace!("Extracted {} samples", bulk.len());

    Ok(bulk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{types::Samples, window::resolve};

    fn ring() -> RawHistorySnapshot {
        let mut snapshot = RawHistorySnapshot::new(6, 4);
        snapshot.pop_ping_drop_rate = Some(vec![1.0, 0.0, 0.5, 1.0]);
        snapshot.pop_ping_latency_ms = Some(vec![99.0, 21.0, 22.0, 99.0]);
        snapshot.downlink_throughput_bps = Some(vec![10.0, 11.0, 12.0, 13.0]);
        snapshot.uplink_throughput_bps = Some(vec![1.0, 2.0, 3.0, 4.0]);
        snapshot
    }

    #[test]
    fn samples_come_out_oldest_first() {
        let snapshot = ring();
        let bulk = extract(&snapshot, &resolve(&snapshot, Samples::All, None)).unwrap();

        assert_eq!(bulk.samples, 4);
        assert_eq!(bulk.end_counter, 6);
        assert_eq!(
            bulk.pop_ping_drop_rate,
            vec![Some(0.5), Some(1.0), Some(1.0), Some(0.0)]
        );
        assert_eq!(
            bulk.downlink_throughput_bps,
            vec![Some(12.0), Some(13.0), Some(10.0), Some(11.0)]
        );
    }

    #[test]
    fn latency_is_dropped_on_full_loss() {
        let snapshot = ring();
        let bulk = extract(&snapshot, &resolve(&snapshot, Samples::All, None)).unwrap();

        assert_eq!(
            bulk.pop_ping_latency_ms,
            vec![Some(22.0), None, None, Some(21.0)]
        );
    }

    #[test]
    fn absent_fields_keep_their_length() {
        let snapshot = ring();
        let bulk = extract(&snapshot, &resolve(&snapshot, Samples::Last(3), None)).unwrap();

        assert_eq!(bulk.snr, vec![None; 3]);
        assert_eq!(bulk.scheduled, vec![None; 3]);
        assert_eq!(bulk.obstructed, vec![None; 3]);
        assert_eq!(
            bulk.row(0),
            vec![
                Value::Float(1.0),
                Value::Missing,
                Value::Float(13.0),
                Value::Float(4.0),
                Value::Missing,
                Value::Missing,
                Value::Missing,
            ]
        );
    }

    #[test]
    fn checkpoint_at_counter_extracts_nothing() {
        let snapshot = ring();
        let bulk = extract(&snapshot, &resolve(&snapshot, Samples::All, Some(6))).unwrap();

        assert!(bulk.is_empty());
        assert_eq!(bulk.samples, 0);
        assert!(bulk.snr.is_empty());
    }

    #[test]
    fn short_field_is_rejected() {
        let mut snapshot = ring();
        snapshot.snr = Some(vec![9.0; 3]);

        assert_eq!(
            extract(&snapshot, &resolve(&snapshot, Samples::All, None)),
            Err(HistoryError::LengthMismatch {
                field: "snr",
                expected: 4,
                found: 3,
            })
        );
    }
}
