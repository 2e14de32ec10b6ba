use tracing::*;

use super::{
    error::HistoryError,
    types::{RawHistorySnapshot, Samples},
    window::{resolve, SampleRange},
};

/// Append the samples of `newer` after the relevant samples of `older`.
///
/// `older` is windowed with `older_samples` and `older_checkpoint` like any
/// other snapshot. From `newer`, only the samples written after `older` was
/// taken are used, or everything since boot if its counter went backwards.
/// The result is contiguous and carries the counter of `newer`.
///
/// This is best effort: if more samples were written than `newer` can hold,
/// the gap is logged and the merge goes on. A field missing on either side is
/// left out of the result. Both snapshots must pass
/// [`validate`](RawHistorySnapshot::validate).
#[instrument(level = "debug", skip(older, newer), fields(older_counter = older.write_counter, newer_counter = newer.write_counter))]
pub fn concatenate(
    older: &RawHistorySnapshot,
    newer: &RawHistorySnapshot,
    older_samples: Samples,
    older_checkpoint: Option<u64>,
) -> Result<RawHistorySnapshot, HistoryError> {
    older.validate()?;
    newer.validate()?;

    let newer_valid = newer.valid_samples();

    let new_samples = if newer.write_counter < older.write_counter {
        info!("Dish reboot detected. Appending anyway.");
        newer_valid
    } else {
        let new_samples = newer.write_counter - older.write_counter;
        if new_samples > newer_valid {
            warn!(
                "Appending discontiguous samples, {} were lost. Polling interval probably too long.",
                new_samples - newer_valid
            );
            newer_valid
        } else {
            new_samples
        }
    };

    let older_range = resolve(older, older_samples, older_checkpoint);
    let newer_range = resolve(newer, Samples::Last(new_samples), None);

    fn join<T: Copy>(
        older: &Option<Vec<T>>,
        older_range: &SampleRange,
        newer: &Option<Vec<T>>,
        newer_range: &SampleRange,
    ) -> Option<Vec<T>> {
        let (older, newer) = (older.as_ref()?, newer.as_ref()?);
        older_range
            .iter()
            .map(|index| older.get(index).copied())
            .chain(newer_range.iter().map(|index| newer.get(index).copied()))
            .collect()
    }

    let merged = RawHistorySnapshot {
        write_counter: newer.write_counter,
        capacity: older_range.len() + newer_range.len(),
        is_contiguous: true,
        pop_ping_drop_rate: join(
            &older.pop_ping_drop_rate,
            &older_range,
            &newer.pop_ping_drop_rate,
            &newer_range,
        ),
        pop_ping_latency_ms: join(
            &older.pop_ping_latency_ms,
            &older_range,
            &newer.pop_ping_latency_ms,
            &newer_range,
        ),
        downlink_throughput_bps: join(
            &older.downlink_throughput_bps,
            &older_range,
            &newer.downlink_throughput_bps,
            &newer_range,
        ),
        uplink_throughput_bps: join(
            &older.uplink_throughput_bps,
            &older_range,
            &newer.uplink_throughput_bps,
            &newer_range,
        ),
        snr: join(&older.snr, &older_range, &newer.snr, &newer_range),
        scheduled: join(
            &older.scheduled,
            &older_range,
            &newer.scheduled,
            &newer_range,
        ),
        obstructed: join(
            &older.obstructed,
            &older_range,
            &newer.obstructed,
            &newer_range,
        ),
    };

    debug!(
        "Concatenated {} + {} samples",
        older_range.len(),
        newer_range.len()
    );

    Ok(merged)
}
