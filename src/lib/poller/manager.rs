use std::{future::Future, time::Duration};

use anyhow::{anyhow, Result};
use tokio::time::MissedTickBehavior;
use tracing::*;

use super::{PollOptions, PollOutcome, PollState, Report};
use crate::{
    device::DishSource,
    sink::{Sink, SinkInterface},
};

/// Poll `source` until ctrl-c or SIGTERM is received, or only once when no
/// loop interval is set.
pub async fn run(
    source: &dyn DishSource,
    sinks: &mut [Sink],
    options: &PollOptions,
    state: PollState,
) -> Result<()> {
    run_until(source, sinks, options, state, termination()).await
}

async fn termination() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(error) => {
                error!("Failed to listen for SIGTERM: {error}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Interrupted, stopping"),
        _ = terminate => info!("Terminated, stopping"),
    }
}

/// Poll `source` every loop interval until `shutdown` resolves, then report
/// whatever history was polled but not reported yet.
///
/// Failures of a single poll are logged and only returned in single pass mode.
pub async fn run_until(
    source: &dyn DishSource,
    sinks: &mut [Sink],
    options: &PollOptions,
    mut state: PollState,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let mut result = Ok(());

    if options.loop_interval > 0.0 {
        let period = Duration::from_secs_f64(options.loop_interval);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("Polling {} every {period:?}", source.describe());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let outcome = state.poll(source, options).await;
                    if let Err(error) = publish(sinks, outcome) {
                        warn!("Poll failed: {error:#}");
                    }
                }
            }
        }
    } else {
        let outcome = state.poll(source, options).await;
        result = publish(sinks, outcome);
    }

    let flushed = PollOutcome {
        stats: state.flush(options),
        ..Default::default()
    };
    if let Err(error) = publish(sinks, flushed) {
        error!("{error:#}");
    }

    result
}

fn ready<T>(part: Result<Option<T>>, errors: &mut Vec<anyhow::Error>) -> Option<T> {
    part.unwrap_or_else(|error| {
        errors.push(error);
        None
    })
}

/// Hand what is ready to every sink, then report the first failure of the
/// poll, if any.
fn publish(sinks: &mut [Sink], outcome: PollOutcome) -> Result<()> {
    let mut errors = vec![];
    let status = ready(outcome.status, &mut errors);
    let stats = ready(outcome.stats, &mut errors);
    let bulk = ready(outcome.bulk, &mut errors);

    let mut failed = false;

    match Report::new(status, stats) {
        Some(report) => {
            for sink in sinks.iter_mut() {
                if let Err(error) = sink.write_report(&report) {
                    error!("Failed writing report: {error:#}");
                    failed = true;
                }
            }
        }
        None => trace!("No report due"),
    }

    if let Some(batch) = &bulk {
        for sink in sinks.iter_mut() {
            if let Err(error) = sink.write_bulk(batch) {
                error!("Failed writing bulk history: {error:#}");
                failed = true;
            }
        }
    }

    let mut errors = errors.into_iter();
    if let Some(error) = errors.next() {
        for other in errors {
            debug!("Also failed: {other:#}");
        }
        return Err(error);
    }
    if failed {
        return Err(anyhow!("Failed to publish poll results"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        io::{self, Write},
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use serde_json::Value as JsonValue;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        device::DeviceError,
        history::{RawHistorySnapshot, Samples, StatsKind},
        sink::{json_sink::JsonSink, SinkOptions},
        status::StatusKind,
    };

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn records(&self) -> Vec<JsonValue> {
            let text = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            text.lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    /// Answers with a growing buffer: 10 new samples on every request, none
    /// dropped.
    struct GrowingSource {
        write_counter: Mutex<u64>,
        failures: Mutex<VecDeque<bool>>,
    }

    impl GrowingSource {
        fn new(failures: Vec<bool>) -> Self {
            Self {
                write_counter: Mutex::new(0),
                failures: Mutex::new(failures.into()),
            }
        }
    }

    #[async_trait]
    impl DishSource for GrowingSource {
        async fn get_history(&self) -> Result<RawHistorySnapshot, DeviceError> {
            if self.failures.lock().unwrap().pop_front().unwrap_or(false) {
                return Err(DeviceError::Timeout(Duration::from_secs(10)));
            }

            let mut write_counter = self.write_counter.lock().unwrap();
            *write_counter += 10;

            let mut snapshot = RawHistorySnapshot::new(*write_counter, 100);
            snapshot.pop_ping_drop_rate = Some(vec![0.0; 100]);
            Ok(snapshot)
        }

        fn describe(&self) -> String {
            "growing".to_string()
        }
    }

    fn json_sink(buffer: &SharedBuffer) -> Vec<Sink> {
        vec![Sink::from(JsonSink::new(
            Box::new(buffer.clone()),
            SinkOptions {
                stats: vec![StatsKind::PingDrop],
                ..Default::default()
            },
        ))]
    }

    #[tokio::test]
    #[traced_test]
    async fn single_pass_reports_once() {
        let buffer = SharedBuffer::default();
        let mut sinks = json_sink(&buffer);
        let options = PollOptions {
            samples: Samples::All,
            stats: vec![StatsKind::PingDrop],
            ..Default::default()
        };

        run_until(
            &GrowingSource::new(vec![]),
            &mut sinks,
            &options,
            PollState::default(),
            std::future::pending(),
        )
        .await
        .unwrap();

        let records = buffer.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["general"]["samples"], 10);
        assert_eq!(records[0]["general"]["end_counter"], 10);
    }

    #[tokio::test]
    #[traced_test]
    async fn single_pass_failure_is_returned() {
        let buffer = SharedBuffer::default();
        let mut sinks = json_sink(&buffer);

        let result = run_until(
            &GrowingSource::new(vec![true]),
            &mut sinks,
            &PollOptions::default(),
            PollState::default(),
            std::future::pending(),
        )
        .await;

        assert!(result.is_err());
        assert!(buffer.records().is_empty());
        assert!(logs_contain("Failure getting history"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn loop_flushes_partial_accumulation_on_shutdown() {
        let buffer = SharedBuffer::default();
        let mut sinks = json_sink(&buffer);
        let options = PollOptions {
            samples: Samples::All,
            poll_loops: 3,
            loop_interval: 1.0,
            stats: vec![StatsKind::PingDrop],
            ..Default::default()
        };

        // Polls at 0, 1, 2, 3 and 4 seconds: one full result of 3 polls and
        // 2 polls left over for the flush
        run_until(
            &GrowingSource::new(vec![]),
            &mut sinks,
            &options,
            PollState::default(),
            tokio::time::sleep(Duration::from_millis(4500)),
        )
        .await
        .unwrap();

        let records = buffer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["general"]["end_counter"], 30);
        assert_eq!(records[0]["general"]["samples"], 30);
        assert_eq!(records[1]["general"]["end_counter"], 50);
        assert_eq!(records[1]["general"]["samples"], 20);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn loop_survives_failed_polls() {
        let buffer = SharedBuffer::default();
        let mut sinks = json_sink(&buffer);
        let options = PollOptions {
            samples: Samples::All,
            loop_interval: 1.0,
            stats: vec![StatsKind::PingDrop],
            ..Default::default()
        };

        run_until(
            &GrowingSource::new(vec![false, true, false]),
            &mut sinks,
            &options,
            PollState::default(),
            tokio::time::sleep(Duration::from_millis(2500)),
        )
        .await
        .unwrap();

        let records = buffer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["general"]["samples"], 10);
        assert!(logs_contain("Poll failed"));
    }

    #[tokio::test]
    #[traced_test]
    async fn single_pass_bulk_failure_is_returned() {
        let buffer = SharedBuffer::default();
        let mut sinks = vec![Sink::from(JsonSink::new(
            Box::new(buffer.clone()),
            SinkOptions {
                stats: vec![],
                bulk: true,
                ..Default::default()
            },
        ))];
        let options = PollOptions {
            stats: vec![],
            bulk: true,
            ..Default::default()
        };

        let result = run_until(
            &GrowingSource::new(vec![true]),
            &mut sinks,
            &options,
            PollState::default(),
            std::future::pending(),
        )
        .await;

        assert!(result.is_err());
        assert!(buffer.records().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn unreachable_status_shares_the_record_with_stats() {
        let buffer = SharedBuffer::default();
        let mut sinks = vec![Sink::from(JsonSink::new(
            Box::new(buffer.clone()),
            SinkOptions {
                stats: vec![StatsKind::PingDrop],
                status: vec![StatusKind::Status],
                ..Default::default()
            },
        ))];
        let options = PollOptions {
            samples: Samples::All,
            stats: vec![StatsKind::PingDrop],
            status: vec![StatusKind::Status],
            ..Default::default()
        };

        // This source can not answer status requests at all
        run_until(
            &GrowingSource::new(vec![]),
            &mut sinks,
            &options,
            PollState::default(),
            std::future::pending(),
        )
        .await
        .unwrap();

        let records = buffer.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["status"]["state"], "DISH_UNREACHABLE");
        assert_eq!(records[0]["status"]["uptime"], JsonValue::Null);
        assert_eq!(records[0]["general"]["samples"], 10);
    }
}
