use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::*;

use dish_telemetry::{
    cli::{self, manager::Output},
    logger,
    poller::{self, PollState},
    server,
    sink::{
        json_sink::JsonSink,
        prometheus_sink::{PrometheusSink, SharedExposition},
        text_sink::TextSink,
        Sink, SinkInterface,
    },
};

fn text_sink() -> Result<TextSink> {
    let args = cli::manager::args();
    match args.out_file() {
        Some(path) => TextSink::append(&path, args.sink_options()),
        None => Ok(TextSink::stdout(args.sink_options())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // CLI should be started before logger to allow control over verbosity
    cli::manager::init();
    // Logger should start before everything else to register any log information
    logger::manager::init()?;

    let args = cli::manager::args();

    if args.print_header {
        return text_sink()?.write_header();
    }

    let mut state = PollState::default();
    if args.resume_from_out_file() {
        if let Some(path) = args.out_file() {
            if let Some(counter) = TextSink::prior_counter(&path) {
                info!("Resuming from sample counter {counter} found in {path:?}");
                state = PollState::resumed(counter);
            }
        }
    }

    let sink = match args.output {
        Output::Text => Sink::from(text_sink()?),
        Output::Json => Sink::from(JsonSink::stdout(args.sink_options())),
        Output::Prometheus => {
            let exposition = SharedExposition::default();
            let server_exposition = Arc::clone(&exposition);
            let address = cli::manager::metrics_address();
            let server = server::manager::run(address, server_exposition)
                .with_context(|| format!("Failed to serve metrics at {address}"))?;
            tokio::spawn(async move {
                if let Err(error) = server.await {
                    error!("Metrics server stopped: {error}");
                }
            });
            Sink::from(PrometheusSink::new(exposition, args.sink_options()))
        }
    };

    let source = args.dish_source();
    info!("Reading answers from {}", source.describe());

    poller::manager::run(
        source.as_ref(),
        &mut [sink],
        &args.poll_options(),
        state,
    )
    .await
    .context("Failed to poll the terminal")
}
