use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Map};

use super::{report_groups, SinkInterface, SinkOptions};
use crate::{
    history::{BulkHistory, FieldValue},
    poller::{BulkBatch, Report},
};

#[derive(Serialize)]
struct BulkRecord<'a> {
    datetimestamp_utc: String,
    start_counter: u64,
    #[serde(flatten)]
    history: &'a BulkHistory,
}

/// Writes one JSON object per line, with the status and stat groups keyed by
/// name.
pub struct JsonSink {
    writer: Box<dyn Write + Send>,
    options: SinkOptions,
}

impl JsonSink {
    pub fn new(writer: Box<dyn Write + Send>, options: SinkOptions) -> Self {
        Self { writer, options }
    }

    pub fn stdout(options: SinkOptions) -> Self {
        Self::new(Box::new(io::stdout()), options)
    }

    fn write_line(&mut self, record: &impl Serialize) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl SinkInterface for JsonSink {
    fn write_header(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_report(&mut self, report: &Report) -> Result<()> {
        let mut record = Map::new();
        record.insert(
            "datetimestamp_utc".to_string(),
            json!(report.timestamp.to_rfc3339()),
        );

        for group in report_groups(report, &self.options) {
            let fields = group
                .fields()
                .into_iter()
                .map(|(name, value)| {
                    let value = match value {
                        FieldValue::Scalar(value) => json!(value),
                        FieldValue::Sequence { values, .. } => json!(values),
                    };
                    (name.to_string(), value)
                })
                .collect::<Map<_, _>>();
            record.insert(group.name().to_string(), fields.into());
        }

        self.write_line(&record).context("Failed writing report")
    }

    fn write_bulk(&mut self, batch: &BulkBatch) -> Result<()> {
        let record = BulkRecord {
            datetimestamp_utc: batch
                .sample_time(0)
                .map(|time| time.to_rfc3339())
                .unwrap_or_default(),
            start_counter: batch.start_counter,
            history: &batch.history,
        };

        self.write_line(&record).context("Failed writing bulk history")
    }
}
