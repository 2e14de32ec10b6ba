pub mod manager;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use tracing::*;

use crate::{
    device::DishSource,
    history::{
        concatenate, extract, reduce, resolve, BulkHistory, HistoryError, HistoryStats,
        RawHistorySnapshot, Samples, StatsKind,
    },
    status::{DishStatus, StatusKind},
};

/// Default sample count when the loop interval gives no better hint.
pub const DEFAULT_SAMPLES: u64 = 3600;

/// Allowed difference, in seconds, between where the bulk time base says the
/// newest sample is and the wall clock, before the base is re-established.
const TIME_SYNC_TOLERANCE: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    /// Samples reduced when no checkpoint is held yet.
    pub samples: Samples,
    /// Samples extracted in bulk mode when no checkpoint is held yet.
    pub bulk_samples: Samples,
    /// Number of polls accumulated into one stats result.
    pub poll_loops: u32,
    /// Seconds between polls, zero for a single poll.
    pub loop_interval: f64,
    /// Do not carry checkpoints over between stats results.
    pub no_counter: bool,
    /// Stat groups to report. History stats are skipped when empty.
    pub stats: Vec<StatsKind>,
    pub bulk: bool,
    /// Status groups to report. Status is not requested when empty.
    pub status: Vec<StatusKind>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            samples: Samples::Last(DEFAULT_SAMPLES),
            bulk_samples: Samples::All,
            poll_loops: 1,
            loop_interval: 0.0,
            no_counter: false,
            stats: StatsKind::ALL.to_vec(),
            bulk: false,
            status: vec![],
        }
    }
}

impl PollOptions {
    pub fn stats_enabled(&self) -> bool {
        !self.stats.is_empty()
    }

    pub fn status_enabled(&self) -> bool {
        !self.status.is_empty()
    }

    fn history_enabled(&self) -> bool {
        self.stats_enabled() || self.bulk
    }
}

/// Stats computed over one or more polls, stamped with the time of the last
/// poll that contributed to them.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub timestamp: DateTime<Utc>,
    pub stats: HistoryStats,
}

/// A status reading, stamped with the time it was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub status: DishStatus,
}

/// Everything due for the sinks after one poll, besides bulk history: the
/// status reading and the stats, when there are any. Both go in the same
/// record.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Time of the status request, or else of the stats.
    pub timestamp: DateTime<Utc>,
    pub status: Option<DishStatus>,
    pub stats: Option<HistoryStats>,
}

impl Report {
    pub fn new(status: Option<StatusReport>, stats: Option<StatsReport>) -> Option<Self> {
        let timestamp = status
            .as_ref()
            .map(|status| status.timestamp)
            .or(stats.as_ref().map(|stats| stats.timestamp))?;

        Some(Self {
            timestamp,
            status: status.map(|status| status.status),
            stats: stats.map(|stats| stats.stats),
        })
    }
}

/// Results of one poll. Each part failed, is not due, or is ready.
#[derive(Debug)]
pub struct PollOutcome {
    pub status: Result<Option<StatusReport>>,
    pub stats: Result<Option<StatsReport>>,
    pub bulk: Result<Option<BulkBatch>>,
}

impl Default for PollOutcome {
    fn default() -> Self {
        Self {
            status: Ok(None),
            stats: Ok(None),
            bulk: Ok(None),
        }
    }
}

/// Samples extracted in bulk mode. Sample `i` was written at
/// `start_timestamp + i + 1` seconds and counted as `start_counter + i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkBatch {
    pub history: BulkHistory,
    pub start_timestamp: i64,
    pub start_counter: u64,
}

impl BulkBatch {
    pub fn sample_time(&self, index: usize) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.start_timestamp + index as i64 + 1, 0)
            .single()
    }
}

/// Everything the poll loop carries from one poll to the next.
#[derive(Debug, Clone)]
pub struct PollState {
    /// Checkpoint of the bulk mode.
    pub counter: Option<u64>,
    /// Checkpoint of the history stats. `Some(0)` means the accumulated
    /// history is already bounded by the previous checkpoint.
    pub counter_stats: Option<u64>,
    /// Time base of the bulk samples: the time at which the sample at
    /// `counter` was written, in seconds since the epoch.
    pub timestamp: Option<i64>,
    pub timestamp_stats: Option<DateTime<Utc>>,
    pub poll_count: u32,
    pub accum_history: Option<RawHistorySnapshot>,
    first_poll: bool,
}

impl Default for PollState {
    fn default() -> Self {
        Self {
            counter: None,
            counter_stats: None,
            timestamp: None,
            timestamp_stats: None,
            poll_count: 0,
            accum_history: None,
            first_poll: true,
        }
    }
}

fn epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

impl PollState {
    /// Start from a stats checkpoint saved by a previous run.
    pub fn resumed(counter_stats: u64) -> Self {
        Self {
            counter_stats: Some(counter_stats),
            ..Default::default()
        }
    }

    /// Poll `source` once and produce whatever is due: a status reading on
    /// every poll, a stats report every `poll_loops` polls, and a bulk batch
    /// on every successful poll.
    ///
    /// A failed history request is logged and handled as a poll without new
    /// data. A failed status request is recorded as an unreachable terminal
    /// when the general status is reported, otherwise the poll stops there.
    #[instrument(level = "debug", skip_all, fields(source = %source.describe()))]
    pub async fn poll(&mut self, source: &dyn DishSource, options: &PollOptions) -> PollOutcome {
        let mut outcome = PollOutcome::default();

        if options.status_enabled() {
            let timestamp = Utc::now();
            let status = match source.get_status().await {
                Ok(status) => status,
                Err(error) if options.status.contains(&StatusKind::Status) => {
                    warn!("Dish unreachable: {error}");
                    DishStatus::unreachable()
                }
                Err(error) => {
                    error!("Failure getting status: {error}");
                    outcome.status = Err(anyhow!("Failed getting status: {error}"));
                    return outcome;
                }
            };
            outcome.status = Ok(Some(StatusReport { timestamp, status }));
        }

        if !options.history_enabled() {
            return outcome;
        }

        let before = Utc::now();
        let history = match source.get_history().await {
            Ok(history) => Some(history),
            Err(error) => {
                error!("Failure getting history: {error}");
                if options.bulk {
                    outcome.bulk = Err(anyhow!("Failed getting bulk history: {error}"));
                }
                None
            }
        };
        let after = Utc::now();

        if let (Some(history), true) = (&history, options.bulk) {
            outcome.bulk = self
                .bulk_history(
                    history,
                    options,
                    epoch_seconds(before),
                    epoch_seconds(after),
                )
                .map(Some)
                .context("Failed extracting bulk history");
        }

        if options.stats_enabled() {
            let fetched = history.is_some();
            outcome.stats = self
                .history_stats(history.map(|history| (before, history)), options, false)
                .map_err(anyhow::Error::from)
                .and_then(|report| match report {
                    None if !fetched && self.accum_history.is_none() => {
                        Err(anyhow!("No history data available"))
                    }
                    report => Ok(report),
                });
        }

        outcome
    }

    /// Report whatever history was accumulated but not reported yet, without
    /// polling again.
    pub fn flush(&mut self, options: &PollOptions) -> Result<Option<StatsReport>> {
        if !options.stats_enabled() {
            return Ok(None);
        }

        self.history_stats(None, options, true)
            .context("Failed to flush accumulated history")
    }

    /// Accumulate one poll into the history stats, and reduce the accumulated
    /// history when `poll_loops` polls were gathered or when `flush` is set.
    pub fn history_stats(
        &mut self,
        history: Option<(DateTime<Utc>, RawHistorySnapshot)>,
        options: &PollOptions,
        flush: bool,
    ) -> Result<Option<StatsReport>, HistoryError> {
        let samples = match self.counter_stats {
            None => options.samples,
            Some(_) => Samples::All,
        };
        let start = self.counter_stats.filter(|&counter| counter != 0);

        if let Some((timestamp, history)) = history {
            self.timestamp_stats = Some(timestamp);
            match self.accum_history.take() {
                Some(accum_history) => {
                    self.accum_history =
                        Some(concatenate(&accum_history, &history, samples, start)?);
                    // From now on the accumulated history starts where the
                    // checkpoint was, which is different from having none
                    if !options.no_counter {
                        self.counter_stats = Some(0);
                    }
                }
                None => self.accum_history = Some(history),
            }
        }

        if self.first_poll {
            let buffered = self
                .accum_history
                .as_ref()
                .map(|accum_history| (accum_history.write_counter, accum_history.capacity));
            if let Some((write_counter, capacity)) = buffered {
                self.catch_up(write_counter, capacity, options);
                self.first_poll = false;
            }
        }

        if self.poll_count + 1 < options.poll_loops && !flush {
            self.poll_count += 1;
            return Ok(None);
        }
        self.poll_count = 0;

        let Some(accum_history) = self.accum_history.take() else {
            return Ok(None);
        };

        let range = resolve(&accum_history, samples, start);
        let stats = reduce(&accum_history, &range)?;
        if !options.no_counter {
            self.counter_stats = Some(stats.general.end_counter);
        }

        Ok(Some(StatsReport {
            timestamp: self.timestamp_stats.unwrap_or_else(Utc::now),
            stats,
        }))
    }

    /// When resuming from a checkpoint, count the polls whose worth of data
    /// is already in the buffer, so the first result is not abnormally large.
    fn catch_up(&mut self, write_counter: u64, capacity: usize, options: &PollOptions) {
        let Some(counter_stats) = self.counter_stats.filter(|&counter| counter != 0) else {
            return;
        };
        if options.poll_loops <= 1 || options.loop_interval <= 0.0 {
            return;
        }

        let new_samples = write_counter
            .checked_sub(counter_stats)
            .unwrap_or(write_counter)
            .min(capacity as u64);
        let caught_up = (new_samples.saturating_sub(1) as f64 / options.loop_interval) as u32;

        debug!("Resuming {new_samples} samples after checkpoint, {caught_up} polls worth");
        self.poll_count = self.poll_count.max(caught_up);
    }

    /// Extract the samples of `history` that are new to the bulk mode, and
    /// date them.
    ///
    /// `before` and `after` bracket the poll, in seconds since the epoch.
    pub fn bulk_history(
        &mut self,
        history: &RawHistorySnapshot,
        options: &PollOptions,
        before: f64,
        after: f64,
    ) -> Result<BulkBatch, HistoryError> {
        let samples = match self.counter {
            None => options.bulk_samples,
            Some(_) => Samples::All,
        };
        let range = resolve(history, samples, self.counter);
        let bulk = extract(history, &range)?;

        let parsed_samples = range.parsed_samples;
        let new_counter = range.end_counter;
        let mut timestamp = self.timestamp;

        // Checked first, so it is not reported as a lost time sync
        if let Some(counter) = self.counter {
            if counter + parsed_samples != new_counter {
                timestamp = None;
            }
        }

        if let Some(base) = timestamp {
            let newest = (base + parsed_samples as i64) as f64;
            if newest < before - TIME_SYNC_TOLERANCE || newest > after + TIME_SYNC_TOLERANCE {
                info!(
                    "Lost sample time sync at: {}",
                    Utc.timestamp_opt(newest as i64, 0)
                        .single()
                        .map(|time| time.to_rfc3339())
                        .unwrap_or_default()
                );
                timestamp = None;
            }
        }

        let timestamp = match timestamp {
            Some(timestamp) => timestamp,
            None => {
                let base = before.floor() as i64;
                debug!("Establishing new time base: {new_counter} -> {base}");
                base - parsed_samples as i64
            }
        };

        self.counter = Some(new_counter);
        self.timestamp = Some(timestamp + parsed_samples as i64);

        Ok(BulkBatch {
            history: bulk,
            start_timestamp: timestamp,
            start_counter: new_counter - parsed_samples,
        })
    }
}
