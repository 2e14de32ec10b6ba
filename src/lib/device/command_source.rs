use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::*;

use super::{
    json::{parse_history, parse_status},
    DeviceError, DishSource, REQUEST_TIMEOUT,
};
use crate::{history::RawHistorySnapshot, status::DishStatus};

pub const DEFAULT_TARGET: &str = "192.168.100.1:9200";

/// One program invocation.
#[derive(Debug, Clone)]
struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    /// Split a whitespace separated command line. Arguments can not contain
    /// spaces.
    fn parse(command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    fn grpcurl(target: &str, request: &str) -> Self {
        Self {
            program: "grpcurl".to_string(),
            args: vec![
                "-plaintext".to_string(),
                "-d".to_string(),
                format!(r#"{{"{request}":{{}}}}"#),
                target.to_string(),
                "SpaceX.API.Device.Device/Handle".to_string(),
            ],
        }
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Queries the terminal by running an external command and parsing the JSON
/// it prints, `grpcurl` by default.
#[derive(Debug, Clone)]
pub struct CommandSource {
    history: Invocation,
    status: Option<Invocation>,
    timeout: Duration,
}

impl CommandSource {
    /// History comes from `program`. Status is only available after
    /// [`with_status_command`](Self::with_status_command).
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            history: Invocation {
                program: program.into(),
                args,
            },
            status: None,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Ask the terminal at `target` through its gRPC reflection service.
    pub fn grpcurl(target: &str) -> Self {
        Self {
            history: Invocation::grpcurl(target, "get_history"),
            status: Some(Invocation::grpcurl(target, "get_status")),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Split a whitespace separated command line. Arguments can not contain
    /// spaces.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let history = Invocation::parse(command_line)?;
        Some(Self::new(history.program, history.args))
    }

    /// Answer status requests with the output of `command_line`.
    pub fn with_status_command(mut self, command_line: &str) -> Self {
        self.status = Invocation::parse(command_line);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[instrument(level = "debug", skip_all, fields(program = %invocation.program))]
    async fn run(&self, invocation: &Invocation) -> Result<String, DeviceError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| DeviceError::Timeout(self.timeout))?
            .map_err(|error| DeviceError::Command {
                command: invocation.describe(),
                reason: error.to_string(),
            })?;

        if !output.status.success() {
            return Err(DeviceError::Command {
                command: invocation.describe(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        trace!("Command answered with {} bytes", output.stdout.len());

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl DishSource for CommandSource {
    async fn get_history(&self) -> Result<RawHistorySnapshot, DeviceError> {
        parse_history(&self.run(&self.history).await?)
    }

    async fn get_status(&self) -> Result<DishStatus, DeviceError> {
        let Some(status) = &self.status else {
            return Err(DeviceError::StatusUnsupported(self.describe()));
        };

        parse_status(&self.run(status).await?)
    }

    fn describe(&self) -> String {
        self.history.describe()
    }
}
