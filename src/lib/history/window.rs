use std::{iter::Chain, ops::Range};

use tracing::*;

use super::types::{RawHistorySnapshot, Samples};

type SampleIndices = Chain<Range<usize>, Range<usize>>;

/// Buffer indices of the samples selected from a snapshot, oldest first.
///
/// A ring buffer window that wraps is kept as two segments, `head` at the end
/// of the storage followed by `tail` at its start, so iterating never needs to
/// know whether the window wrapped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRange {
    head: Range<usize>,
    tail: Range<usize>,
    /// Number of samples selected.
    pub parsed_samples: u64,
    /// Write counter of the snapshot, to be used as the next checkpoint.
    pub end_counter: u64,
    /// Set when the given checkpoint was ahead of the write counter and got
    /// discarded, which means the terminal rebooted since it was taken.
    pub counter_reset: bool,
}

impl SampleRange {
    fn empty(end_counter: u64, counter_reset: bool) -> Self {
        Self {
            end_counter,
            counter_reset,
            ..Default::default()
        }
    }

    pub fn iter(&self) -> SampleIndices {
        self.head.clone().chain(self.tail.clone())
    }

    pub fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IntoIterator for &SampleRange {
    type Item = usize;
    type IntoIter = SampleIndices;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Select the samples of `snapshot` newer than `checkpoint`, limited to the
/// `samples` most recent ones.
///
/// A checkpoint greater than the write counter can only come from before a
/// reboot, so it is ignored and the window is bounded by `samples` alone.
#[instrument(level = "trace", skip(snapshot), fields(current = snapshot.write_counter))]
pub fn resolve(
    snapshot: &RawHistorySnapshot,
    samples: Samples,
    checkpoint: Option<u64>,
) -> SampleRange {
    let current = snapshot.write_counter;
    let valid = snapshot.valid_samples();

    trace!(
        "Buffer has {} samples, {valid} of them valid",
        snapshot.capacity
    );

    let mut counter_reset = false;
    let checkpoint = match checkpoint {
        Some(checkpoint) if checkpoint > current => {
            info!("Counter reset detected (checkpoint {checkpoint} > counter {current}), ignoring checkpoint");
            counter_reset = true;
            None
        }
        checkpoint => checkpoint,
    };

    // Contiguous snapshots may hold more samples than their counter says, so
    // the earliest start can be negative.
    let earliest = current as i128 - samples.window(valid) as i128;
    let start = match checkpoint {
        Some(checkpoint) if checkpoint as i128 > earliest => checkpoint as i128,
        _ => earliest,
    };

    if start >= current as i128 {
        return SampleRange::empty(current, counter_reset);
    }

    let parsed_samples = (current as i128 - start) as u64;
    let valid = valid as usize;

    if snapshot.is_contiguous {
        return SampleRange {
            head: valid - parsed_samples as usize..valid,
            tail: 0..0,
            parsed_samples,
            end_counter: current,
            counter_reset,
        };
    }

    // Both are ring positions: the oldest selected sample and one past the newest.
    let start_offset = start.rem_euclid(valid as i128) as usize;
    let end_offset = (current % valid as u64) as usize;

    let (head, tail) = if start_offset < end_offset {
        (start_offset..end_offset, 0..0)
    } else {
        (start_offset..valid, 0..end_offset)
    };

    SampleRange {
        head,
        tail,
        parsed_samples,
        end_counter: current,
        counter_reset,
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    fn ring(write_counter: u64, capacity: usize) -> RawHistorySnapshot {
        let mut snapshot = RawHistorySnapshot::new(write_counter, capacity);
        snapshot.pop_ping_drop_rate = Some(vec![0.0; capacity]);
        snapshot
    }

    #[test]
    fn wrapped_window_is_ordered_oldest_first() {
        let range = resolve(&ring(25, 10), Samples::Last(8), None);

        assert_eq!(
            range.iter().collect::<Vec<_>>(),
            vec![7, 8, 9, 0, 1, 2, 3, 4]
        );
        assert_eq!(range.parsed_samples, 8);
        assert_eq!(range.end_counter, 25);
    }

    #[test]
    fn unwrapped_window_is_a_single_slice() {
        let range = resolve(&ring(25, 10), Samples::Last(3), None);

        assert_eq!(range.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn full_buffer_covers_every_index_once() {
        let range = resolve(&ring(25, 10), Samples::All, None);

        assert_eq!(
            range.iter().collect::<Vec<_>>(),
            vec![5, 6, 7, 8, 9, 0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn partially_filled_buffer_only_yields_written_samples() {
        let range = resolve(&ring(5, 10), Samples::All, None);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

        let range = resolve(&ring(5, 10), Samples::Last(3), None);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn checkpoint_limits_window_to_newer_samples() {
        let range = resolve(&ring(25, 10), Samples::All, Some(22));

        assert_eq!(range.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(range.parsed_samples, 3);
        assert!(!range.counter_reset);
    }

    #[test]
    fn stale_checkpoint_older_than_buffer_is_bounded_by_buffer() {
        let range = resolve(&ring(25, 10), Samples::All, Some(3));

        assert_eq!(range.parsed_samples, 10);
    }

    #[test]
    fn checkpoint_ahead_of_counter_is_treated_as_reboot() {
        let range = resolve(&ring(50, 100), Samples::Last(20), Some(1000));

        assert!(range.counter_reset);
        assert_eq!(range.parsed_samples, 20);
        assert_eq!(range.iter().collect::<Vec<_>>(), (30..50).collect::<Vec<_>>());
    }

    #[test]
    fn checkpoint_at_counter_is_empty() {
        for samples in [Samples::All, Samples::Last(0), Samples::Last(4), Samples::Last(400)] {
            let range = resolve(&ring(25, 10), samples, Some(25));
            assert_eq!(range.parsed_samples, 0);
            assert!(range.is_empty());
            assert_eq!(range.end_counter, 25);
        }
    }

    #[test]
    fn zero_request_and_empty_buffers_are_empty() {
        assert!(resolve(&ring(25, 10), Samples::Last(0), None).is_empty());
        assert!(resolve(&ring(0, 10), Samples::All, None).is_empty());
        assert!(resolve(&ring(7, 0), Samples::All, None).is_empty());
    }

    #[test]
    fn contiguous_snapshot_is_read_linearly() {
        let mut snapshot = ring(3, 8);
        snapshot.is_contiguous = true;

        let range = resolve(&snapshot, Samples::All, None);
        assert_eq!(range.iter().collect::<Vec<_>>(), (0..8).collect::<Vec<_>>());
        assert_eq!(range.parsed_samples, 8);

        let range = resolve(&snapshot, Samples::Last(5), None);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);

        let range = resolve(&snapshot, Samples::All, Some(1));
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![6, 7]);
    }

    #[test]
    fn random_windows_have_expected_size_and_unique_indices() {
        let mut rng = rand::thread_rng();

        for _ in 0..500 {
            let capacity = rng.gen_range(1..64usize);
            let write_counter = rng.gen_range(0..512u64);
            let requested = rng.gen_range(0..=capacity as u64);

            let range = resolve(&ring(write_counter, capacity), Samples::Last(requested), None);
            let indices = range.iter().collect::<Vec<_>>();
            let expected = requested.min(write_counter.min(capacity as u64));

            assert_eq!(indices.len() as u64, expected);
            assert_eq!(range.parsed_samples, expected);
            assert_eq!(range.end_counter, write_counter);

            let mut unique = indices.clone();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique.len(), indices.len());
            assert!(indices.iter().all(|&index| index < capacity));
        }
    }
}
