use std::{
    fs::OpenOptions,
    io::{self, BufRead, BufReader, Write},
    path::Path,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::*;

use super::{flatten_fields, report_groups, SinkInterface, SinkOptions};
use crate::{
    history::{BulkHistory, FieldValue, HistoryStats, StatsGroup, Value},
    poller::{BulkBatch, Report},
    status::DishStatus,
};

const TIMESTAMP_COLUMN: &str = "datetimestamp_utc";
const COUNTER_COLUMN: &str = "end_counter";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn columns(groups: &[&dyn StatsGroup]) -> Vec<String> {
    flatten_fields(groups).iter().map(|field| field.column()).collect()
}

/// Description of a field in the verbose output.
pub fn verbose_label(name: &str) -> &str {
    match name {
        "alerts" => "Alerts bit field",
        "samples" => "Parsed samples",
        "end_counter" => "Sample counter",
        "total_ping_drop" => "Total ping drop",
        "count_full_ping_drop" => "Count of drop == 1",
        "count_obstructed" => "Obstructed",
        "total_obstructed_ping_drop" => "Obstructed ping drop",
        "count_full_obstructed_ping_drop" => "Obstructed drop == 1",
        "count_unscheduled" => "Unscheduled",
        "total_unscheduled_ping_drop" => "Unscheduled ping drop",
        "count_full_unscheduled_ping_drop" => "Unscheduled drop == 1",
        "init_run_fragment" => "Initial drop run fragment",
        "final_run_fragment" => "Final drop run fragment",
        "run_seconds" => "Per-second drop runs",
        "run_minutes" => "Per-minute drop runs",
        "mean_all_ping_latency" => "Mean RTT, drop < 1",
        "deciles_all_ping_latency" => "RTT deciles, drop < 1",
        "mean_full_ping_latency" => "Mean RTT, drop == 0",
        "deciles_full_ping_latency" => "RTT deciles, drop == 0",
        "stdev_full_ping_latency" => "RTT standard deviation, drop == 0",
        "download_usage" => "Bytes downloaded",
        "upload_usage" => "Bytes uploaded",
        name => name,
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

fn format_value(value: &Value, numeric: bool) -> String {
    match value {
        Value::Integer(value) => value.to_string(),
        Value::Float(value) => format!("{value:?}"),
        Value::Bool(value) if numeric => u8::from(*value).to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Text(text) => text.clone(),
        Value::Missing => String::new(),
    }
}

/// Writes CSV rows, or a human readable rendering in verbose mode, to
/// standard output or to the end of a file.
pub struct TextSink {
    writer: Box<dyn Write + Send>,
    options: SinkOptions,
}

impl TextSink {
    pub fn new(writer: Box<dyn Write + Send>, options: SinkOptions) -> Self {
        Self { writer, options }
    }

    pub fn stdout(options: SinkOptions) -> Self {
        Self::new(Box::new(io::stdout()), options)
    }

    #[instrument(level = "debug", skip(options))]
    pub fn append(path: &Path, options: SinkOptions) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed opening output file {path:?}"))?;

        Ok(Self::new(Box::new(file), options))
    }

    /// Read the stats checkpoint from the last row of a CSV file written by a
    /// previous run. The file must start with a header row.
    pub fn prior_counter(path: &Path) -> Option<u64> {
        let file = std::fs::File::open(path).ok()?;
        let mut lines = BufReader::new(file).lines().map_while(|line| line.ok());

        let header = lines.next()?;
        let column = header
            .trim_end()
            .split(',')
            .position(|name| name == COUNTER_COLUMN)?;
        let last_line = lines.filter(|line| !line.trim().is_empty()).last()?;

        let counter = last_line.trim_end().split(',').nth(column)?.parse().ok();
        debug!("Found prior sample counter {counter:?} in {path:?}");
        counter
    }

    fn status_columns(&self) -> Vec<String> {
        let empty = DishStatus::default();
        columns(&empty.groups(&self.options.status))
    }

    fn stats_columns(&self) -> Vec<String> {
        if self.options.stats.is_empty() {
            return vec![];
        }
        let empty = HistoryStats::default();
        columns(&empty.groups(&self.options.stats))
    }

    fn header(&self) -> Vec<String> {
        let mut header = vec![TIMESTAMP_COLUMN.to_string()];

        header.extend(self.status_columns());

        if self.options.bulk {
            header.extend(BulkHistory::FIELD_NAMES.iter().map(|name| name.to_string()));
        }

        header.extend(self.stats_columns());

        header
    }

    /// CSV cells of `groups`, or empty cells for each of `columns` when the
    /// groups are not part of this record.
    fn cells(&self, groups: Option<Vec<&dyn StatsGroup>>, columns: Vec<String>) -> Vec<String> {
        match groups {
            Some(groups) => flatten_fields(&groups)
                .iter()
                .map(|field| format_value(&field.value, self.options.numeric))
                .collect(),
            None => vec![String::new(); columns.len()],
        }
    }

    fn verbose_line(&self, name: &str, values: &[Value]) -> String {
        let label = format!("{}:", verbose_label(name));
        let values = values
            .iter()
            .map(|value| format_value(value, self.options.numeric))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{label:22} {values}")
    }

    fn finish_record(&mut self) -> Result<()> {
        if self.options.verbose && self.options.loop_interval > 0.0 {
            writeln!(self.writer)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

impl SinkInterface for TextSink {
    fn write_header(&mut self) -> Result<()> {
        let header = self.header().join(",");
        writeln!(self.writer, "{header}").context("Failed writing header")?;
        self.writer.flush()?;
        Ok(())
    }

    fn write_report(&mut self, report: &Report) -> Result<()> {
        if self.options.verbose {
            for group in report_groups(report, &self.options) {
                for (name, value) in group.fields() {
                    let line = match value {
                        FieldValue::Scalar(value) => self.verbose_line(name, &[value]),
                        FieldValue::Sequence { values, .. } => self.verbose_line(name, &values),
                    };
                    writeln!(self.writer, "{line}")?;
                }
            }
        } else {
            let status = report
                .status
                .as_ref()
                .map(|status| status.groups(&self.options.status));
            let stats = report
                .stats
                .as_ref()
                .filter(|_| !self.options.stats.is_empty())
                .map(|stats| stats.groups(&self.options.stats));

            let mut row = vec![format_time(report.timestamp)];
            row.extend(self.cells(status, self.status_columns()));
            row.extend(self.cells(stats, self.stats_columns()));
            writeln!(self.writer, "{}", row.join(","))?;
        }

        self.finish_record().context("Failed writing report")
    }

    fn write_bulk(&mut self, batch: &BulkBatch) -> Result<()> {
        let history = &batch.history;

        if self.options.verbose {
            let start = batch.sample_time(0).map(format_time).unwrap_or_default();
            let end = batch
                .sample_time(history.len().saturating_sub(1))
                .map(format_time)
                .unwrap_or_default();
            writeln!(self.writer, "{:22} {start} -> {end}", "Time range (UTC):")?;

            let rows = (0..history.len())
                .map(|index| history.row(index))
                .collect::<Vec<_>>();
            for (column, name) in BulkHistory::FIELD_NAMES.iter().enumerate() {
                let values = rows
                    .iter()
                    .map(|row| row[column].clone())
                    .collect::<Vec<_>>();
                let line = self.verbose_line(name, &values);
                writeln!(self.writer, "{line}")?;
            }
        } else {
            for index in 0..history.len() {
                let time = batch.sample_time(index).map(format_time).unwrap_or_default();
                let row = std::iter::once(time)
                    .chain(
                        history
                            .row(index)
                            .iter()
                            .map(|value| format_value(value, self.options.numeric)),
                    )
                    .collect::<Vec<_>>()
                    .join(",");
                writeln!(self.writer, "{row}")?;
            }
        }

        self.finish_record().context("Failed writing bulk history")
    }
}
