use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::*;

use super::{
    json::{parse_history, parse_status},
    DeviceError, DishSource,
};
use crate::{history::RawHistorySnapshot, status::DishStatus};

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn describe(path: &Path) -> String {
    if is_stdin(path) {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    }
}

async fn read(path: &Path) -> Result<String, DeviceError> {
    let text = if is_stdin(path) {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .map(|_| text)
    } else {
        tokio::fs::read_to_string(path).await
    };

    text.map_err(|source| DeviceError::Io {
        path: describe(path),
        source,
    })
}

/// Reads answers saved by `grpcurl` from files, or from standard input when
/// the path is `-`. The files are read again on every poll.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    status_path: Option<PathBuf>,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            status_path: None,
        }
    }

    /// Answer status requests from `path`, a saved `get_status` response.
    pub fn with_status_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_path = Some(path.into());
        self
    }
}

#[async_trait]
impl DishSource for JsonFileSource {
    #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    async fn get_history(&self) -> Result<RawHistorySnapshot, DeviceError> {
        parse_history(&read(&self.path).await?)
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_status(&self) -> Result<DishStatus, DeviceError> {
        let Some(path) = &self.status_path else {
            return Err(DeviceError::StatusUnsupported(self.describe()));
        };

        parse_status(&read(path).await?)
    }

    fn describe(&self) -> String {
        match &self.status_path {
            Some(status_path) => format!("{} and {}", describe(&self.path), describe(status_path)),
            None => describe(&self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn temporary_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    #[serial]
    async fn file_is_read_on_every_poll() {
        let path = temporary_file(
            "dish-telemetry-file-source.json",
            r#"{"dishGetHistory": {"current": "2", "popPingDropRate": [0, 1]}}"#,
        );
        let source = JsonFileSource::new(&path);

        assert_eq!(source.get_history().await.unwrap().write_counter, 2);

        std::fs::write(
            &path,
            r#"{"dishGetHistory": {"current": "3", "popPingDropRate": [0, 1, 0]}}"#,
        )
        .unwrap();
        let snapshot = source.get_history().await.unwrap();
        assert_eq!(snapshot.write_counter, 3);
        assert_eq!(snapshot.capacity, 3);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn status_comes_from_its_own_file() {
        let history = temporary_file(
            "dish-telemetry-file-source-history.json",
            r#"{"dishGetHistory": {"current": "2", "popPingDropRate": [0, 1]}}"#,
        );
        let status = temporary_file(
            "dish-telemetry-file-source-status.json",
            r#"{"dishGetStatus": {"outage": {"cause": "BOOTING"}}}"#,
        );

        let source = JsonFileSource::new(&history);
        assert!(matches!(
            source.get_status().await,
            Err(DeviceError::StatusUnsupported(_))
        ));

        let source = source.with_status_file(&status);
        let answer = source.get_status().await.unwrap();
        assert_eq!(answer.status.state.as_deref(), Some("BOOTING"));
        assert_eq!(source.get_history().await.unwrap().write_counter, 2);

        std::fs::remove_file(history).unwrap();
        std::fs::remove_file(status).unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let source = JsonFileSource::new("/nonexistent/dish-telemetry/history.json");

        assert!(matches!(
            source.get_history().await,
            Err(DeviceError::Io { .. })
        ));
    }
}
