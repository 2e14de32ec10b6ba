use std::{path::PathBuf, sync::Arc};

use clap::{error::ErrorKind, CommandFactory, Parser, ValueEnum};

use crate::{
    device::{command_source::DEFAULT_TARGET, CommandSource, DishSource, JsonFileSource},
    history::{Samples, StatsKind},
    poller::{PollOptions, DEFAULT_SAMPLES},
    sink::SinkOptions,
    status::StatusKind,
};

/// Data groups that can be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Mode {
    Status,
    ObstructionDetail,
    AlertDetail,
    PingDrop,
    PingRunLength,
    PingLatency,
    PingLoadedLatency,
    Usage,
    BulkHistory,
}

impl Mode {
    fn stats_kind(&self) -> Option<StatsKind> {
        match self {
            Mode::PingDrop => Some(StatsKind::PingDrop),
            Mode::PingRunLength => Some(StatsKind::PingRunLength),
            Mode::PingLatency => Some(StatsKind::PingLatency),
            Mode::PingLoadedLatency => Some(StatsKind::PingLoadedLatency),
            Mode::Usage => Some(StatsKind::Usage),
            Mode::Status | Mode::ObstructionDetail | Mode::AlertDetail | Mode::BulkHistory => None,
        }
    }

    fn status_kind(&self) -> Option<StatusKind> {
        match self {
            Mode::Status => Some(StatusKind::Status),
            Mode::ObstructionDetail => Some(StatusKind::ObstructionDetail),
            Mode::AlertDetail => Some(StatusKind::AlertDetail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Output {
    /// CSV rows, or a readable listing with --verbose
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Prometheus metrics served over HTTP
    Prometheus,
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Collect status and/or history data from a Starlink user terminal and output it or derived statistics.",
    long_about = None
)]
pub struct Args {
    /// host:port of the terminal to query
    #[arg(short = 'g', long, env = "DISH_TARGET", default_value = DEFAULT_TARGET)]
    pub target: String,

    /// Read the history from a JSON file saved from grpcurl instead of
    /// querying the terminal, "-" for standard input
    #[arg(long, value_name = "PATH", conflicts_with = "command")]
    pub history_file: Option<PathBuf>,

    /// Read the status from a JSON file saved from grpcurl, "-" for standard
    /// input. Needed by the status modes along with --history-file
    #[arg(long, value_name = "PATH", conflicts_with = "command")]
    pub status_file: Option<PathBuf>,

    /// Command printing the history as JSON, replaces the default grpcurl call
    #[arg(long, value_name = "COMMAND")]
    pub command: Option<String>,

    /// Command printing the status as JSON. Needed by the status modes along
    /// with --command
    #[arg(long, value_name = "COMMAND", requires = "command")]
    pub status_command: Option<String>,

    /// Loop interval in seconds or 0 for no loop
    #[arg(short = 't', long, value_name = "SECONDS", default_value = "0")]
    pub loop_interval: f64,

    /// Poll history for N loops before computing history stats. Samples
    /// written across a terminal reboot are accumulated too
    #[arg(short = 'o', long, value_name = "N", value_parser = clap::value_parser!(u32).range(2..))]
    pub poll_loops: Option<u32>,

    /// Number of data samples to parse; normally applies to the first loop
    /// only. Default: all in bulk mode, loop interval if set, else 3600
    #[arg(short = 's', long, value_name = "N", conflicts_with = "all_samples")]
    pub samples: Option<u64>,

    /// Parse all valid samples
    #[arg(short = 'a', long)]
    pub all_samples: bool,

    /// Don't track the sample counter across loop iterations in non-bulk
    /// modes; keep using the samples option value instead
    #[arg(short = 'j', long)]
    pub no_counter: bool,

    /// Turns all log categories up to Debug and prints readable output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Directory for the log files
    #[arg(long, value_name = "PATH", env = "DISH_TELEMETRY_LOG_PATH")]
    pub log_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    pub output: Output,

    /// Append text output to this file instead of standard output, "-" for
    /// standard output
    #[arg(short = 'O', long, value_name = "PATH", default_value = "-")]
    pub out_file: PathBuf,

    /// Print the CSV header and exit
    #[arg(short = 'H', long)]
    pub print_header: bool,

    /// Record boolean values as 1 and 0 instead of True and False
    #[arg(short = 'N', long)]
    pub numeric: bool,

    /// Skip reading the prior sample counter from the output file
    #[arg(short = 'k', long)]
    pub skip_query: bool,

    /// Address the Prometheus metrics are served at
    #[arg(long, value_name = "ADDRESS", default_value = "0.0.0.0:8080")]
    pub metrics_address: String,

    /// The data groups to record
    #[arg(value_enum, required = true, num_args = 1..)]
    pub mode: Vec<Mode>,
}

impl Args {
    fn check(&self) -> Result<(), (ErrorKind, &'static str)> {
        let stats = !self.stats_kinds().is_empty();
        let status = !self.status_kinds().is_empty();
        let csv = self.output == Output::Text && !self.verbose;

        if self.is_bulk() && (stats || status) && csv {
            return Err((
                ErrorKind::ArgumentConflict,
                "bulk_history cannot be combined with other modes for CSV output",
            ));
        }

        // Status is reported every loop, stats only every N loops
        if stats && status && csv && self.poll_loops() > 1 {
            return Err((
                ErrorKind::ArgumentConflict,
                "--poll-loops with history stats modes cannot be mixed with status modes for CSV output",
            ));
        }

        if self.is_bulk() && self.output == Output::Prometheus {
            return Err((
                ErrorKind::InvalidValue,
                "bulk_history is not available as Prometheus metrics",
            ));
        }

        if self.output == Output::Prometheus && self.loop_interval <= 0.0 {
            return Err((
                ErrorKind::ArgumentConflict,
                "Prometheus metrics require a loop interval",
            ));
        }

        let history = stats || self.is_bulk();
        if status && self.history_file.is_some() && self.status_file.is_none() {
            return Err((
                ErrorKind::MissingRequiredArgument,
                "status modes need --status-file when reading history from a file",
            ));
        }
        if status && self.command.is_some() && self.status_command.is_none() {
            return Err((
                ErrorKind::MissingRequiredArgument,
                "status modes need --status-command along with --command",
            ));
        }
        if history && self.status_file.is_some() && self.history_file.is_none() {
            return Err((
                ErrorKind::MissingRequiredArgument,
                "history modes need --history-file when reading status from a file",
            ));
        }

        Ok(())
    }

    /// Selected status groups, in reporting order.
    pub fn status_kinds(&self) -> Vec<StatusKind> {
        let selected = self
            .mode
            .iter()
            .filter_map(Mode::status_kind)
            .collect::<Vec<_>>();

        StatusKind::ALL
            .into_iter()
            .filter(|kind| selected.contains(kind))
            .collect()
    }

    /// Selected stat groups, in reporting order.
    pub fn stats_kinds(&self) -> Vec<StatsKind> {
        let selected = self
            .mode
            .iter()
            .filter_map(Mode::stats_kind)
            .collect::<Vec<_>>();

        StatsKind::ALL
            .into_iter()
            .filter(|kind| selected.contains(kind))
            .collect()
    }

    pub fn is_bulk(&self) -> bool {
        self.mode.contains(&Mode::BulkHistory)
    }

    pub fn poll_loops(&self) -> u32 {
        match self.poll_loops {
            Some(poll_loops) if self.loop_interval > 0.0 => poll_loops,
            _ => 1,
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        let poll_loops = self.poll_loops();

        let (samples, bulk_samples) = match (self.all_samples, self.samples) {
            (true, _) => (Samples::All, Samples::All),
            (false, Some(samples)) => (Samples::Last(samples), Samples::Last(samples)),
            (false, None) if self.loop_interval >= 1.0 => (
                Samples::Last((self.loop_interval * poll_loops as f64) as u64),
                Samples::All,
            ),
            (false, None) => (Samples::Last(DEFAULT_SAMPLES), Samples::All),
        };

        PollOptions {
            samples,
            bulk_samples,
            poll_loops,
            loop_interval: self.loop_interval.max(0.0),
            no_counter: self.no_counter,
            stats: self.stats_kinds(),
            bulk: self.is_bulk(),
            status: self.status_kinds(),
        }
    }

    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            status: self.status_kinds(),
            stats: self.stats_kinds(),
            bulk: self.is_bulk(),
            numeric: self.numeric,
            verbose: self.verbose,
            loop_interval: self.loop_interval.max(0.0),
        }
    }

    /// Text output file, `None` for standard output.
    pub fn out_file(&self) -> Option<PathBuf> {
        (self.out_file.as_os_str() != "-").then(|| self.out_file.clone())
    }

    /// Whether the stats checkpoint should be read back from the output file.
    pub fn resume_from_out_file(&self) -> bool {
        !(self.skip_query || self.no_counter || self.verbose)
            && self.output == Output::Text
            && self.out_file().is_some()
            && !self.stats_kinds().is_empty()
    }

    /// Where answers come from: saved files, a user command, or the terminal
    /// itself through grpcurl.
    pub fn dish_source(&self) -> Box<dyn DishSource> {
        if self.history_file.is_some() || self.status_file.is_some() {
            let history = self.history_file.clone().unwrap_or_else(|| PathBuf::from("-"));
            let mut source = JsonFileSource::new(history);
            if let Some(path) = &self.status_file {
                source = source.with_status_file(path);
            }
            return Box::new(source);
        }

        if let Some(source) = self.command.as_deref().and_then(CommandSource::from_command_line) {
            return Box::new(match &self.status_command {
                Some(status_command) => source.with_status_command(status_command),
                None => source,
            });
        }

        Box::new(CommandSource::grpcurl(&self.target))
    }
}

#[derive(Debug)]
struct Manager {
    clap_matches: Args,
}

lazy_static! {
    static ref MANAGER: Arc<Manager> = Arc::new(Manager::new());
}

impl Manager {
    fn new() -> Self {
        let args = Args::parse();
        if let Err((kind, message)) = args.check() {
            Args::command().error(kind, message).exit();
        }

        Self { clap_matches: args }
    }
}

// Construct our manager, should be done inside main
pub fn init() {
    MANAGER.as_ref();
}

pub fn args() -> &'static Args {
    &MANAGER.as_ref().clap_matches
}

// Check if the verbosity parameter was used
pub fn is_verbose() -> bool {
    args().verbose
}

pub fn log_path() -> PathBuf {
    args().log_path.clone().unwrap_or_else(|| {
        directories::ProjectDirs::from("", "", env!("CARGO_PKG_NAME"))
            .map(|dirs| dirs.data_local_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    })
}

pub fn metrics_address() -> &'static str {
    &args().metrics_address
}

// Return the command line used to start this application
pub fn command_line_string() -> String {
    std::env::args().collect::<Vec<String>>().join(" ")
}

// Return the parsed command line
pub fn command_line() -> String {
    format!("{:#?}", args())
}
