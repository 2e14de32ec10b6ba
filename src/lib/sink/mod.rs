pub mod json_sink;
pub mod prometheus_sink;
pub mod text_sink;

use anyhow::Result;
use enum_dispatch::enum_dispatch;

use crate::{
    history::{FieldValue, StatsGroup, StatsKind, Value},
    poller::{BulkBatch, Report},
    status::StatusKind,
};

use json_sink::JsonSink;
use prometheus_sink::PrometheusSink;
use text_sink::TextSink;

#[enum_dispatch]
pub trait SinkInterface {
    /// Write the description of the upcoming records, if the format has one.
    fn write_header(&mut self) -> Result<()>;

    /// Publish one status reading and/or stats result, in order.
    fn write_report(&mut self, report: &Report) -> Result<()>;

    /// Publish one batch of bulk history samples.
    fn write_bulk(&mut self, batch: &BulkBatch) -> Result<()>;
}

#[enum_dispatch(SinkInterface)]
pub enum Sink {
    Text(TextSink),
    Json(JsonSink),
    Prometheus(PrometheusSink),
}

/// What every sink needs to know about the records it will receive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkOptions {
    pub status: Vec<StatusKind>,
    pub stats: Vec<StatsKind>,
    pub bulk: bool,
    /// Render booleans as 1 and 0.
    pub numeric: bool,
    pub verbose: bool,
    /// Seconds between polls, zero for a single poll.
    pub loop_interval: f64,
}

/// One element of a stats field: a scalar, or an element of a sequence along
/// with its label.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatField {
    pub category: &'static str,
    pub name: &'static str,
    pub label: Option<usize>,
    pub value: Value,
}

impl FlatField {
    /// Name used as a CSV column, e.g. `run_seconds_12`.
    pub fn column(&self) -> String {
        match self.label {
            Some(label) => format!("{}_{label}", self.name),
            None => self.name.to_string(),
        }
    }
}

/// Groups of `report` selected by `options`, status before stats.
pub fn report_groups<'a>(report: &'a Report, options: &SinkOptions) -> Vec<&'a dyn StatsGroup> {
    let mut groups = vec![];
    if let Some(status) = &report.status {
        groups.extend(status.groups(&options.status));
    }
    if let Some(stats) = &report.stats {
        groups.extend(stats.groups(&options.stats));
    }
    groups
}

/// Every field of `groups`, with sequences expanded into one entry per
/// element.
pub fn flatten_fields(groups: &[&dyn StatsGroup]) -> Vec<FlatField> {
    let mut fields = vec![];
    for group in groups {
        let category = group.category();
        for (name, value) in group.fields() {
            match value {
                FieldValue::Scalar(value) => fields.push(FlatField {
                    category,
                    name,
                    label: None,
                    value,
                }),
                FieldValue::Sequence { start, values } => {
                    fields.extend(values.into_iter().enumerate().map(|(index, value)| {
                        FlatField {
                            category,
                            name,
                            label: Some(start + index),
                            value,
                        }
                    }))
                }
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{history::HistoryStats, status::DishStatus};

    #[test]
    fn sequences_are_expanded_with_their_labels() {
        let stats = HistoryStats::default();
        let fields = flatten_fields(&stats.groups(&[StatsKind::PingRunLength]));

        let columns = fields.iter().map(FlatField::column).collect::<Vec<_>>();
        assert_eq!(columns.len(), 2 + 2 + 60 + 60);
        assert_eq!(columns[0], "samples");
        assert_eq!(columns[4], "run_seconds_1");
        assert_eq!(columns[63], "run_seconds_60");
        assert_eq!(columns[64], "run_minutes_1");
        assert!(fields.iter().all(|field| field.category == "ping_stats"));
    }

    #[test]
    fn status_groups_come_before_stats() {
        let report = Report {
            timestamp: Utc::now(),
            status: Some(DishStatus::unreachable()),
            stats: Some(HistoryStats::default()),
        };
        let options = SinkOptions {
            status: vec![StatusKind::Status, StatusKind::AlertDetail],
            stats: vec![StatsKind::Usage],
            ..Default::default()
        };

        let names = report_groups(&report, &options)
            .iter()
            .map(|group| group.name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["status", "alert_detail", "general", "usage"]);

        let fields = flatten_fields(&report_groups(&report, &options));
        assert_eq!(fields[3].value, Value::Text("DISH_UNREACHABLE".to_string()));
        assert_eq!(fields[3].category, "status");
    }
}
