use std::{
    fmt::Write,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::*;

use super::{flatten_fields, text_sink::verbose_label, FlatField, SinkInterface, SinkOptions};
use crate::{
    history::Value,
    poller::{BulkBatch, Report},
    status::{StatusData, StatusKind, STATES},
};

/// Latest rendered metrics, shared with the HTTP server.
#[derive(Debug, Default)]
pub struct Exposition {
    pub text: Option<String>,
    pub end_counter: Option<u64>,
    pub updated: Option<DateTime<Utc>>,
}

pub type SharedExposition = Arc<Mutex<Exposition>>;

/// Renders each report in the Prometheus text format. The latest status and
/// the latest stats replace the previous ones separately, as they are not
/// always due together.
pub struct PrometheusSink {
    exposition: SharedExposition,
    options: SinkOptions,
    status_text: Option<String>,
    stats_text: Option<String>,
}

fn metric_name(field: &FlatField) -> String {
    let unit = match (field.category, field.name) {
        ("usage", _) => "_bytes",
        ("status", "uptime") => "_seconds",
        _ => "",
    };
    format!("starlink_{}_{}{unit}", field.category, field.name)
}

fn metric_kind(field: &FlatField) -> &'static str {
    match (field.category, field.name) {
        ("usage", _) | ("status", "uptime") | (_, "samples") | (_, "end_counter") => "counter",
        _ => "gauge",
    }
}

/// Text values have no sample of their own, see [`render_status_labels`].
fn metric_value(value: &Value) -> Option<String> {
    match value {
        Value::Integer(value) => Some(value.to_string()),
        Value::Float(value) => Some(value.to_string()),
        Value::Bool(value) => Some(u8::from(*value).to_string()),
        Value::Text(_) | Value::Missing => None,
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Render the text fields of the general status: identification as labels
/// of `starlink_info`, and the state as one series per known state.
pub fn render_status_labels(status: &StatusData, timestamp: DateTime<Utc>) -> String {
    let timestamp = timestamp.timestamp_millis();
    let mut text = String::new();

    let info = [
        ("id", &status.id),
        ("hardware_version", &status.hardware_version),
        ("software_version", &status.software_version),
    ]
    .into_iter()
    .filter_map(|(name, value)| {
        value
            .as_deref()
            .map(|value| format!("{name}=\"{}\"", escape_label(value)))
    })
    .collect::<Vec<_>>();
    if !info.is_empty() {
        let _ = writeln!(text, "# HELP starlink_info Terminal identification");
        let _ = writeln!(text, "# TYPE starlink_info gauge");
        let _ = writeln!(text, "starlink_info{{{}}} 1 {timestamp}", info.join(","));
        text.push('\n');
    }

    if let Some(state) = &status.state {
        let _ = writeln!(text, "# HELP starlink_status_state Current state");
        let _ = writeln!(text, "# TYPE starlink_status_state gauge");
        for known in STATES {
            let value = u8::from(known == state.as_str());
            let _ = writeln!(
                text,
                "starlink_status_state{{state=\"{known}\"}} {value} {timestamp}"
            );
        }
        if !STATES.contains(&state.as_str()) {
            debug!("Unknown terminal state {state:?}");
        }
        text.push('\n');
    }

    text
}

/// Render `fields` as one metric family per field name, skipping values that
/// are not available.
pub fn render(fields: &[FlatField], timestamp: DateTime<Utc>) -> String {
    let timestamp = timestamp.timestamp_millis();
    let mut text = String::new();
    let mut current_family = None;

    for field in fields {
        let Some(value) = metric_value(&field.value) else {
            continue;
        };

        let name = metric_name(field);
        if current_family.as_ref() != Some(&name) {
            if current_family.is_some() {
                text.push('\n');
            }
            let _ = writeln!(text, "# HELP {name} {}", verbose_label(field.name));
            let _ = writeln!(text, "# TYPE {name} {}", metric_kind(field));
            current_family = Some(name.clone());
        }

        let labels = field
            .label
            .map(|label| format!("{{index=\"{label}\"}}"))
            .unwrap_or_default();
        let _ = writeln!(text, "{name}{labels} {value} {timestamp}");
    }

    text
}

impl PrometheusSink {
    pub fn new(exposition: SharedExposition, options: SinkOptions) -> Self {
        Self {
            exposition,
            options,
            status_text: None,
            stats_text: None,
        }
    }
}

impl SinkInterface for PrometheusSink {
    fn write_header(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_report(&mut self, report: &Report) -> Result<()> {
        if let Some(status) = &report.status {
            let mut text = String::new();
            if self.options.status.contains(&StatusKind::Status) {
                text.push_str(&render_status_labels(&status.status, report.timestamp));
            }
            let fields = flatten_fields(&status.groups(&self.options.status));
            text.push_str(&render(&fields, report.timestamp));
            self.status_text = Some(text);
        }

        if let Some(stats) = &report.stats {
            let fields = flatten_fields(&stats.groups(&self.options.stats));
            self.stats_text = Some(render(&fields, report.timestamp));
        }

        let text = [&self.status_text, &self.stats_text]
            .into_iter()
            .flatten()
            .map(|text| text.trim_end())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut exposition = self
            .exposition
            .lock()
            .map_err(|error| anyhow!("Metrics buffer is poisoned: {error}"))?;
        exposition.text = Some(text + "\n");
        if let Some(stats) = &report.stats {
            exposition.end_counter = Some(stats.general.end_counter);
            trace!("Metrics updated up to counter {}", stats.general.end_counter);
        }
        exposition.updated = Some(report.timestamp);

        Ok(())
    }

    fn write_bulk(&mut self, _batch: &BulkBatch) -> Result<()> {
        Ok(())
    }
}
