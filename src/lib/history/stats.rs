use serde::Serialize;
use tracing::*;

use super::{
    error::HistoryError,
    types::{FieldValue, RawHistorySnapshot, StatsGroup},
    window::SampleRange,
};

/// Total bandwidth, in bits per second, at or under which a sample falls in
/// the first load bucket. Each following bucket doubles it.
pub const LOAD_BUCKET_BASE_BPS: f64 = 500_000.0;
pub const LOAD_BUCKETS: usize = 15;
pub const RUN_BUCKETS: usize = 60;
const DECILES: usize = 10;

type Deciles = [Option<f64>; DECILES + 1];
type LoadBuckets<T> = [T; LOAD_BUCKETS];

/// Optional stat groups. The general group is always reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsKind {
    PingDrop,
    PingRunLength,
    PingLatency,
    PingLoadedLatency,
    Usage,
}

impl StatsKind {
    pub const ALL: [StatsKind; 5] = [
        StatsKind::PingDrop,
        StatsKind::PingRunLength,
        StatsKind::PingLatency,
        StatsKind::PingLoadedLatency,
        StatsKind::Usage,
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeneralStats {
    pub samples: u64,
    pub end_counter: u64,
}

impl StatsGroup for GeneralStats {
    fn name(&self) -> &'static str {
        "general"
    }

    fn category(&self) -> &'static str {
        "ping_stats"
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("samples", FieldValue::scalar(self.samples)),
            ("end_counter", FieldValue::scalar(self.end_counter)),
        ]
    }
}

/// Packet loss counters. The obstructed and unscheduled counters are only
/// available when the terminal reports the matching per-sample flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PingDropStats {
    pub total_ping_drop: f64,
    pub count_full_ping_drop: u64,
    pub count_obstructed: Option<u64>,
    pub total_obstructed_ping_drop: Option<f64>,
    pub count_full_obstructed_ping_drop: Option<u64>,
    pub count_unscheduled: Option<u64>,
    pub total_unscheduled_ping_drop: Option<f64>,
    pub count_full_unscheduled_ping_drop: Option<u64>,
}

impl StatsGroup for PingDropStats {
    fn name(&self) -> &'static str {
        "ping_drop"
    }

    fn category(&self) -> &'static str {
        "ping_stats"
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("total_ping_drop", FieldValue::scalar(self.total_ping_drop)),
            (
                "count_full_ping_drop",
                FieldValue::scalar(self.count_full_ping_drop),
            ),
            ("count_obstructed", FieldValue::scalar(self.count_obstructed)),
            (
                "total_obstructed_ping_drop",
                FieldValue::scalar(self.total_obstructed_ping_drop),
            ),
            (
                "count_full_obstructed_ping_drop",
                FieldValue::scalar(self.count_full_obstructed_ping_drop),
            ),
            (
                "count_unscheduled",
                FieldValue::scalar(self.count_unscheduled),
            ),
            (
                "total_unscheduled_ping_drop",
                FieldValue::scalar(self.total_unscheduled_ping_drop),
            ),
            (
                "count_full_unscheduled_ping_drop",
                FieldValue::scalar(self.count_full_unscheduled_ping_drop),
            ),
        ]
    }
}

/// Histogram of consecutive full packet loss runs.
///
/// `run_seconds[n - 1]` holds the total samples of every run exactly `n`
/// samples long. `run_minutes[m - 1]` does the same for runs of `m` to
/// `m + 1` minutes, with the last bucket taking everything longer. Runs
/// touching the start or end of the window may continue outside of it, so
/// they are reported apart as fragments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunLengthStats {
    pub init_run_fragment: u64,
    pub final_run_fragment: u64,
    pub run_seconds: Vec<u64>,
    pub run_minutes: Vec<u64>,
}

impl Default for RunLengthStats {
    fn default() -> Self {
        Self {
            init_run_fragment: 0,
            final_run_fragment: 0,
            run_seconds: vec![0; RUN_BUCKETS],
            run_minutes: vec![0; RUN_BUCKETS],
        }
    }
}

impl StatsGroup for RunLengthStats {
    fn name(&self) -> &'static str {
        "ping_run_length"
    }

    fn category(&self) -> &'static str {
        "ping_stats"
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            (
                "init_run_fragment",
                FieldValue::scalar(self.init_run_fragment),
            ),
            (
                "final_run_fragment",
                FieldValue::scalar(self.final_run_fragment),
            ),
            ("run_seconds", FieldValue::sequence(1, &self.run_seconds)),
            ("run_minutes", FieldValue::sequence(1, &self.run_minutes)),
        ]
    }
}

/// Latency distribution. "all" covers every sample with at least one ping
/// answered, weighted by the answered fraction; "full" only the samples with
/// no loss at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub mean_all_ping_latency: Option<f64>,
    pub deciles_all_ping_latency: Deciles,
    pub mean_full_ping_latency: Option<f64>,
    pub deciles_full_ping_latency: Deciles,
    pub stdev_full_ping_latency: Option<f64>,
}

impl StatsGroup for LatencyStats {
    fn name(&self) -> &'static str {
        "ping_latency"
    }

    fn category(&self) -> &'static str {
        "ping_stats"
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            (
                "mean_all_ping_latency",
                FieldValue::scalar(self.mean_all_ping_latency),
            ),
            (
                "deciles_all_ping_latency",
                FieldValue::sequence(0, &self.deciles_all_ping_latency),
            ),
            (
                "mean_full_ping_latency",
                FieldValue::scalar(self.mean_full_ping_latency),
            ),
            (
                "deciles_full_ping_latency",
                FieldValue::sequence(0, &self.deciles_full_ping_latency),
            ),
            (
                "stdev_full_ping_latency",
                FieldValue::scalar(self.stdev_full_ping_latency),
            ),
        ]
    }
}

/// Latency of the loss free samples, split by total bandwidth on a log2 scale.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadedLatencyStats {
    pub load_bucket_samples: LoadBuckets<u64>,
    pub load_bucket_min_latency: LoadBuckets<Option<f64>>,
    pub load_bucket_median_latency: LoadBuckets<Option<f64>>,
    pub load_bucket_max_latency: LoadBuckets<Option<f64>>,
}

impl StatsGroup for LoadedLatencyStats {
    fn name(&self) -> &'static str {
        "ping_loaded_latency"
    }

    fn category(&self) -> &'static str {
        "ping_stats"
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            (
                "load_bucket_samples",
                FieldValue::sequence(0, &self.load_bucket_samples),
            ),
            (
                "load_bucket_min_latency",
                FieldValue::sequence(0, &self.load_bucket_min_latency),
            ),
            (
                "load_bucket_median_latency",
                FieldValue::sequence(0, &self.load_bucket_median_latency),
            ),
            (
                "load_bucket_max_latency",
                FieldValue::sequence(0, &self.load_bucket_max_latency),
            ),
        ]
    }
}

/// Bytes transferred over the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub download_usage: u64,
    pub upload_usage: u64,
}

impl StatsGroup for UsageStats {
    fn name(&self) -> &'static str {
        "usage"
    }

    fn category(&self) -> &'static str {
        "usage"
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("download_usage", FieldValue::scalar(self.download_usage)),
            ("upload_usage", FieldValue::scalar(self.upload_usage)),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    pub general: GeneralStats,
    pub ping_drop: PingDropStats,
    pub ping_run_length: RunLengthStats,
    pub ping_latency: LatencyStats,
    pub ping_loaded_latency: LoadedLatencyStats,
    pub usage: UsageStats,
}

impl HistoryStats {
    pub fn group(&self, kind: StatsKind) -> &dyn StatsGroup {
        match kind {
            StatsKind::PingDrop => &self.ping_drop,
            StatsKind::PingRunLength => &self.ping_run_length,
            StatsKind::PingLatency => &self.ping_latency,
            StatsKind::PingLoadedLatency => &self.ping_loaded_latency,
            StatsKind::Usage => &self.usage,
        }
    }

    /// The general group followed by the requested ones, in `kinds` order.
    pub fn groups(&self, kinds: &[StatsKind]) -> Vec<&dyn StatsGroup> {
        std::iter::once(&self.general as &dyn StatsGroup)
            .chain(kinds.iter().map(|&kind| self.group(kind)))
            .collect()
    }
}

#[derive(Debug, Default)]
struct SubCounter {
    count: u64,
    total_drop: f64,
    count_full_drop: u64,
}

impl SubCounter {
    fn add(&mut self, drop_rate: f64) {
        self.count += 1;
        self.total_drop += drop_rate;
        if drop_rate >= 1.0 {
            self.count_full_drop += 1;
        }
    }
}

#[derive(Debug)]
struct RunTracker {
    run_length: u64,
    interrupted: bool,
    init_run_fragment: Option<u64>,
    run_seconds: Vec<u64>,
    run_minutes: Vec<u64>,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            run_length: 0,
            interrupted: false,
            init_run_fragment: None,
            run_seconds: vec![0; RUN_BUCKETS],
            run_minutes: vec![0; RUN_BUCKETS],
        }
    }

    fn full_drop(&mut self) {
        self.run_length += 1;
    }

    fn partial_drop(&mut self) {
        self.interrupted = true;
        if self.run_length == 0 {
            return;
        }

        let run_length = std::mem::take(&mut self.run_length);
        if self.init_run_fragment.is_none() {
            self.init_run_fragment = Some(run_length);
        } else if run_length as usize <= RUN_BUCKETS {
            self.run_seconds[run_length as usize - 1] += run_length;
        } else {
            let minutes = ((run_length as usize - 1) / 60 - 1).min(RUN_BUCKETS - 1);
            self.run_minutes[minutes] += run_length;
        }
    }

    fn finish(mut self) -> RunLengthStats {
        // A window that is one single run is reported as the initial fragment only
        let init_run_fragment = match self.init_run_fragment {
            Some(init_run_fragment) => init_run_fragment,
            None if !self.interrupted => std::mem::take(&mut self.run_length),
            None => 0,
        };

        RunLengthStats {
            init_run_fragment,
            final_run_fragment: self.run_length,
            run_seconds: self.run_seconds,
            run_minutes: self.run_minutes,
        }
    }
}

fn sample<T: Copy>(values: &Option<Vec<T>>, index: usize) -> Option<T> {
    values.as_ref().and_then(|values| values.get(index).copied())
}

fn load_bucket(total_bps: f64) -> usize {
    if total_bps <= LOAD_BUCKET_BASE_BPS {
        return 0;
    }

    ((total_bps / LOAD_BUCKET_BASE_BPS).log2().floor() as usize).min(LOAD_BUCKETS - 1)
}

/// Mean and deciles of `(value, weight)` pairs already sorted by value.
///
/// Decile `k` is the first value whose accumulated weight reaches `k` tenths
/// of the total, and the last one is always the maximum.
fn weighted_mean_and_deciles(sorted: &[(f64, f64)]) -> (Option<f64>, Deciles) {
    let mut deciles = [None; DECILES + 1];

    let Some(&(first, first_weight)) = sorted.first() else {
        return (None, deciles);
    };

    let total_weight: f64 = sorted.iter().map(|(_, weight)| weight).sum();
    let mut index = 0;
    let mut value = first;
    let mut accumulated_weight = first_weight;

    for (k, decile) in deciles.iter_mut().take(DECILES).enumerate() {
        let boundary = total_weight * k as f64 / DECILES as f64;
        while accumulated_weight < boundary && index + 1 < sorted.len() {
            index += 1;
            let (next_value, weight) = sorted[index];
            value = next_value;
            accumulated_weight += weight;
        }
        *decile = Some(value);
    }
    deciles[DECILES] = sorted.last().map(|&(value, _)| value);

    let weighted_sum: f64 = sorted.iter().map(|(value, weight)| value * weight).sum();

    (Some(weighted_sum / total_weight), deciles)
}

fn population_stdev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / count;

    Some(variance.sqrt())
}

fn median(sorted: &[f64]) -> Option<f64> {
    let middle = sorted.len() / 2;
    match sorted.len() {
        0 => None,
        length if length % 2 == 1 => Some(sorted[middle]),
        _ => Some((sorted[middle - 1] + sorted[middle]) / 2.0),
    }
}

fn bytes(bits_per_second_sum: f64) -> u64 {
    (bits_per_second_sum / 8.0).round_ties_even() as u64
}

/// Compute every stat group over the samples of `range`, in one pass.
///
/// `range` must come from [`resolve`](super::window::resolve) over the same
/// snapshot. Only the drop rate is required: any other missing field leaves
/// the stats depending on it empty.
#[instrument(level = "debug", skip_all, fields(samples = range.parsed_samples, end_counter = range.end_counter))]
pub fn reduce(
    snapshot: &RawHistorySnapshot,
    range: &SampleRange,
) -> Result<HistoryStats, HistoryError> {
    snapshot.validate()?;
    let drop_rates = snapshot
        .pop_ping_drop_rate
        .as_deref()
        .ok_or(HistoryError::MissingField("pop_ping_drop_rate"))?;

    let mut total_drop = 0.0;
    let mut count_full_drop = 0;
    let mut unscheduled = snapshot.scheduled.as_ref().map(|_| SubCounter::default());
    let mut obstructed = snapshot.obstructed.as_ref().map(|_| SubCounter::default());
    let mut runs = RunTracker::new();

    let mut usage_down = 0.0;
    let mut usage_up = 0.0;

    let mut latency_full = Vec::with_capacity(range.len());
    let mut latency_all = Vec::with_capacity(range.len());
    let mut latency_buckets: LoadBuckets<Vec<f64>> = Default::default();

    for index in range {
        let drop_rate = drop_rates[index].min(1.0);

        if drop_rate >= 1.0 {
            count_full_drop += 1;
            runs.full_drop();
        } else {
            runs.partial_drop();
        }
        total_drop += drop_rate;

        if sample(&snapshot.scheduled, index) == Some(false) {
            if let Some(unscheduled) = unscheduled.as_mut() {
                unscheduled.add(drop_rate);
            }
        } else if sample(&snapshot.obstructed, index) == Some(true) {
            if let Some(obstructed) = obstructed.as_mut() {
                obstructed.add(drop_rate);
            }
        }

        let down = sample(&snapshot.downlink_throughput_bps, index);
        let up = sample(&snapshot.uplink_throughput_bps, index);
        usage_down += down.unwrap_or_default();
        usage_up += up.unwrap_or_default();

        // Latency is meaningless for samples where every ping was lost
        if drop_rate >= 1.0 {
            continue;
        }
        let Some(latency) = sample(&snapshot.pop_ping_latency_ms, index) else {
            continue;
        };

        latency_all.push((latency, 1.0 - drop_rate));
        if drop_rate == 0.0 {
            latency_full.push(latency);
            if let (Some(down), Some(up)) = (down, up) {
                latency_buckets[load_bucket(down + up)].push(latency);
            }
        }
    }

    let mut loaded = LoadedLatencyStats::default();
    for (bucket, latencies) in latency_buckets.iter_mut().enumerate() {
        latencies.sort_by(f64::total_cmp);
        loaded.load_bucket_samples[bucket] = latencies.len() as u64;
        loaded.load_bucket_min_latency[bucket] = latencies.first().copied();
        loaded.load_bucket_median_latency[bucket] = median(latencies);
        loaded.load_bucket_max_latency[bucket] = latencies.last().copied();
    }

    latency_all.sort_by(|(a, _), (b, _)| a.total_cmp(b));
    let (mean_all, deciles_all) = weighted_mean_and_deciles(&latency_all);

    latency_full.sort_by(f64::total_cmp);
    let full_weighted = latency_full
        .iter()
        .map(|&latency| (latency, 1.0))
        .collect::<Vec<_>>();
    let (mean_full, deciles_full) = weighted_mean_and_deciles(&full_weighted);

    let stats = HistoryStats {
        general: GeneralStats {
            samples: range.parsed_samples,
            end_counter: range.end_counter,
        },
        ping_drop: PingDropStats {
            total_ping_drop: total_drop,
            count_full_ping_drop: count_full_drop,
            count_obstructed: obstructed.as_ref().map(|counter| counter.count),
            total_obstructed_ping_drop: obstructed.as_ref().map(|counter| counter.total_drop),
            count_full_obstructed_ping_drop: obstructed
                .as_ref()
                .map(|counter| counter.count_full_drop),
            count_unscheduled: unscheduled.as_ref().map(|counter| counter.count),
            total_unscheduled_ping_drop: unscheduled.as_ref().map(|counter| counter.total_drop),
            count_full_unscheduled_ping_drop: unscheduled
                .as_ref()
                .map(|counter| counter.count_full_drop),
        },
        ping_run_length: runs.finish(),
        ping_latency: LatencyStats {
            mean_all_ping_latency: mean_all,
            deciles_all_ping_latency: deciles_all,
            mean_full_ping_latency: mean_full,
            deciles_full_ping_latency: deciles_full,
            stdev_full_ping_latency: population_stdev(&latency_full),
        },
        ping_loaded_latency: loaded,
        usage: UsageStats {
            download_usage: bytes(usage_down),
            upload_usage: bytes(usage_up),
        },
    };

    debug!(
        "Reduced {} samples: {} full ping drops, {:.2} total",
        range.parsed_samples, count_full_drop, total_drop
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;
    use crate::history::{types::Samples, window::resolve};

    fn snapshot(drop_rates: &[f64]) -> RawHistorySnapshot {
        let length = drop_rates.len();
        let mut snapshot = RawHistorySnapshot::new(length as u64, length);
        snapshot.pop_ping_drop_rate = Some(drop_rates.to_vec());
        snapshot.pop_ping_latency_ms = Some(vec![30.0; length]);
        snapshot.downlink_throughput_bps = Some(vec![0.0; length]);
        snapshot.uplink_throughput_bps = Some(vec![0.0; length]);
        snapshot
    }

    fn reduce_all(snapshot: &RawHistorySnapshot) -> HistoryStats {
        reduce(snapshot, &resolve(snapshot, Samples::All, None)).unwrap()
    }

    fn run_total(stats: &RunLengthStats) -> u64 {
        stats.init_run_fragment
            + stats.final_run_fragment
            + stats.run_seconds.iter().sum::<u64>()
            + stats.run_minutes.iter().sum::<u64>()
    }

    #[test]
    fn short_window_with_two_runs() {
        let mut history = snapshot(&[0.0, 1.0, 1.0, 0.0, 1.0]);
        history.downlink_throughput_bps = Some(vec![1e6; 5]);
        history.pop_ping_latency_ms = Some(vec![20.0, 0.0, 0.0, 25.0, 0.0]);

        let stats = reduce_all(&history);

        assert_eq!(stats.general.samples, 5);
        assert_eq!(stats.general.end_counter, 5);
        assert_eq!(stats.ping_drop.total_ping_drop, 3.0);
        assert_eq!(stats.ping_drop.count_full_ping_drop, 3);
        assert_eq!(stats.ping_run_length.init_run_fragment, 2);
        assert_eq!(stats.ping_run_length.final_run_fragment, 1);
        assert!(stats.ping_run_length.run_seconds.iter().all(|&n| n == 0));
        assert_eq!(stats.usage.download_usage, 625_000);
        assert_eq!(stats.usage.upload_usage, 0);
        assert_eq!(stats.ping_latency.mean_full_ping_latency, Some(22.5));
        assert_eq!(stats.ping_latency.stdev_full_ping_latency, Some(2.5));
        assert_eq!(stats.ping_latency.deciles_full_ping_latency[0], Some(20.0));
        assert_eq!(stats.ping_latency.deciles_full_ping_latency[10], Some(25.0));
    }

    #[test]
    fn closed_runs_after_the_first_are_bucketed() {
        let mut drop_rates = vec![1.0, 0.0, 1.0, 1.0, 1.0, 0.0];
        drop_rates.extend(std::iter::repeat(1.0).take(150));
        drop_rates.extend([0.0, 1.0, 1.0, 0.5, 1.0]);

        let stats = reduce_all(&snapshot(&drop_rates)).ping_run_length;

        assert_eq!(stats.init_run_fragment, 1);
        assert_eq!(stats.run_seconds[2], 3);
        assert_eq!(stats.run_seconds[1], 2);
        // 150 samples is 2.5 minutes, so the second minute bucket
        assert_eq!(stats.run_minutes[1], 150);
        assert_eq!(stats.final_run_fragment, 1);
    }

    #[test]
    fn very_long_runs_land_in_last_minute_bucket() {
        let mut drop_rates = vec![1.0, 0.0];
        drop_rates.extend(std::iter::repeat(1.0).take(4000));
        drop_rates.push(0.0);

        let stats = reduce_all(&snapshot(&drop_rates)).ping_run_length;

        assert_eq!(stats.run_minutes[RUN_BUCKETS - 1], 4000);
        assert_eq!(stats.final_run_fragment, 0);
    }

    #[test]
    fn window_of_one_run_is_only_an_initial_fragment() {
        let stats = reduce_all(&snapshot(&[1.0; 7]));

        assert_eq!(stats.ping_run_length.init_run_fragment, 7);
        assert_eq!(stats.ping_run_length.final_run_fragment, 0);
        assert_eq!(run_total(&stats.ping_run_length), 7);
        assert_eq!(stats.ping_latency.mean_all_ping_latency, None);
        assert_eq!(stats.ping_latency.deciles_all_ping_latency, [None; 11]);
        assert_eq!(stats.ping_latency.stdev_full_ping_latency, None);
    }

    #[test]
    fn trailing_run_without_closed_runs_is_a_final_fragment() {
        let stats = reduce_all(&snapshot(&[0.0, 0.5, 1.0, 1.0])).ping_run_length;

        assert_eq!(stats.init_run_fragment, 0);
        assert_eq!(stats.final_run_fragment, 2);
    }

    #[test]
    fn drop_rates_over_one_are_clamped() {
        let stats = reduce_all(&snapshot(&[1.5, 0.25, 3.0]));

        assert_eq!(stats.ping_drop.total_ping_drop, 2.25);
        assert_eq!(stats.ping_drop.count_full_ping_drop, 2);
    }

    #[test]
    fn every_full_drop_is_counted_once_in_run_lengths() {
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let length = rng.gen_range(0..400);
            let drop_rates = (0..length)
                .map(|_| match rng.gen_range(0..4) {
                    0 => 0.0,
                    1 => rng.gen_range(0.0..1.0),
                    _ => 1.0,
                })
                .collect::<Vec<f64>>();

            let stats = reduce_all(&snapshot(&drop_rates));

            assert_eq!(
                run_total(&stats.ping_run_length),
                stats.ping_drop.count_full_ping_drop
            );
        }
    }

    #[test]
    fn deciles_are_sorted_and_bounded() {
        let mut rng = rand::thread_rng();

        for _ in 0..100 {
            let length = rng.gen_range(1..200);
            let mut history = snapshot(
                &(0..length)
                    .map(|_| rng.gen_range(0.0..0.9))
                    .collect::<Vec<f64>>(),
            );
            let latencies = (0..length)
                .map(|_| rng.gen_range(15.0..900.0))
                .collect::<Vec<f64>>();
            history.pop_ping_latency_ms = Some(latencies.clone());

            let deciles = reduce_all(&history)
                .ping_latency
                .deciles_all_ping_latency
                .map(|decile| decile.unwrap());

            assert!(deciles.windows(2).all(|pair| pair[0] <= pair[1]));
            assert_eq!(deciles[0], latencies.iter().copied().fold(f64::MAX, f64::min));
            assert_eq!(deciles[10], latencies.iter().copied().fold(f64::MIN, f64::max));
        }
    }

    #[test]
    fn partial_loss_weights_the_mean() {
        let mut history = snapshot(&[0.0, 0.5]);
        history.pop_ping_latency_ms = Some(vec![10.0, 40.0]);

        let latency = reduce_all(&history).ping_latency;

        assert_eq!(latency.mean_all_ping_latency, Some(20.0));
        assert_eq!(latency.mean_full_ping_latency, Some(10.0));
    }

    #[test]
    fn load_buckets_double_from_base_threshold() {
        assert_eq!(load_bucket(0.0), 0);
        assert_eq!(load_bucket(500_000.0), 0);
        assert_eq!(load_bucket(999_999.0), 0);
        assert_eq!(load_bucket(1_000_000.0), 1);
        assert_eq!(load_bucket(2_000_000.0), 2);
        assert_eq!(load_bucket(1e12), LOAD_BUCKETS - 1);
    }

    #[test]
    fn loaded_latency_reports_per_bucket_summary() {
        let mut history = snapshot(&[0.0, 0.0, 0.0, 0.0, 0.5]);
        history.pop_ping_latency_ms = Some(vec![30.0, 20.0, 40.0, 90.0, 100.0]);
        history.downlink_throughput_bps = Some(vec![100.0, 200.0, 300.0, 1.5e6, 0.0]);

        let loaded = reduce_all(&history).ping_loaded_latency;

        assert_eq!(loaded.load_bucket_samples[0], 3);
        assert_eq!(loaded.load_bucket_min_latency[0], Some(20.0));
        assert_eq!(loaded.load_bucket_median_latency[0], Some(30.0));
        assert_eq!(loaded.load_bucket_max_latency[0], Some(40.0));
        assert_eq!(loaded.load_bucket_samples[1], 1);
        assert_eq!(loaded.load_bucket_median_latency[1], Some(90.0));
        assert_eq!(loaded.load_bucket_samples[2], 0);
        assert_eq!(loaded.load_bucket_median_latency[2], None);
    }

    #[test]
    fn even_sized_bucket_median_is_mean_of_middle_values() {
        assert_eq!(median(&[1.0, 2.0, 4.0, 8.0]), Some(3.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn usage_rounds_half_to_even() {
        assert_eq!(bytes(20.0), 2);
        assert_eq!(bytes(28.0), 4);
        assert_eq!(bytes(12.0), 2);
    }

    #[test]
    fn sub_counters_need_flag_arrays() {
        let stats = reduce_all(&snapshot(&[1.0, 0.0]));
        assert_eq!(stats.ping_drop.count_obstructed, None);
        assert_eq!(stats.ping_drop.count_unscheduled, None);

        let mut history = snapshot(&[1.0, 0.5, 1.0, 0.0]);
        history.scheduled = Some(vec![false, true, true, true]);
        history.obstructed = Some(vec![true, true, false, false]);

        let drop = reduce_all(&history).ping_drop;

        assert_eq!(drop.count_unscheduled, Some(1));
        assert_eq!(drop.total_unscheduled_ping_drop, Some(1.0));
        assert_eq!(drop.count_full_unscheduled_ping_drop, Some(1));
        // The unscheduled sample is not also counted as obstructed
        assert_eq!(drop.count_obstructed, Some(1));
        assert_eq!(drop.total_obstructed_ping_drop, Some(0.5));
        assert_eq!(drop.count_full_obstructed_ping_drop, Some(0));
    }

    #[test]
    fn empty_window_is_valid_and_empty() {
        let history = snapshot(&[0.0, 1.0]);
        let stats = reduce(&history, &resolve(&history, Samples::All, Some(2))).unwrap();

        assert_eq!(stats.general.samples, 0);
        assert_eq!(stats.general.end_counter, 2);
        assert_eq!(stats.ping_drop.count_full_ping_drop, 0);
        assert_eq!(stats.ping_latency.mean_full_ping_latency, None);
    }

    #[test]
    fn missing_drop_rate_is_an_error() {
        let mut history = snapshot(&[0.0]);
        history.pop_ping_drop_rate = None;

        let range = resolve(&history, Samples::All, None);
        assert_eq!(
            reduce(&history, &range),
            Err(HistoryError::MissingField("pop_ping_drop_rate"))
        );
    }

    #[test]
    fn missing_latency_and_bandwidth_degrade_to_no_data() {
        let mut history = snapshot(&[0.0, 0.0]);
        history.pop_ping_latency_ms = None;
        history.uplink_throughput_bps = None;
        history.downlink_throughput_bps = Some(vec![8.0, 8.0]);

        let stats = reduce_all(&history);

        assert_eq!(stats.ping_latency.mean_full_ping_latency, None);
        assert_eq!(stats.ping_loaded_latency.load_bucket_samples, [0; LOAD_BUCKETS]);
        assert_eq!(stats.usage.download_usage, 2);
        assert_eq!(stats.usage.upload_usage, 0);
    }

    #[test]
    fn field_schema_is_stable() {
        let empty = HistoryStats::default();
        let reduced = reduce_all(&snapshot(&[0.0, 1.0, 0.25]));

        for kind in StatsKind::ALL {
            let empty_fields = empty.group(kind).fields();
            let reduced_fields = reduced.group(kind).fields();
            assert_eq!(empty_fields.len(), reduced_fields.len());
            for ((empty_name, empty_value), (name, value)) in
                empty_fields.iter().zip(reduced_fields.iter())
            {
                assert_eq!(empty_name, name);
                if let (
                    FieldValue::Sequence { values: a, .. },
                    FieldValue::Sequence { values: b, .. },
                ) = (empty_value, value)
                {
                    assert_eq!(a.len(), b.len());
                }
            }
        }

        let names = reduced
            .groups(&[StatsKind::Usage])
            .iter()
            .map(|group| group.name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["general", "usage"]);
    }
}
