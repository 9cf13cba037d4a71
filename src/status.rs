/// Status file: the daemon writes `.warden/status` as JSON around every tick.
///
/// Uses atomic write pattern: write to temp file then rename.
use crate::watchdog::TickSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Daemon states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Starting,
    Ticking,
    Idle,
    ShuttingDown,
}

/// The JSON payload written to `.warden/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: DaemonState,
    pub ticks: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_summary: Option<TickSummary>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Read the last written status, if any. Unparseable contents read as None.
    pub fn read(&self) -> Option<StatusData> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Remove the status file (on clean shutdown).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Mutable state tracker that builds StatusData for each update.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    ticks: u64,
    last_tick: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_summary: Option<TickSummary>,
}

impl StatusTracker {
    pub fn new(status_path: PathBuf) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            ticks: 0,
            last_tick: None,
            last_error: None,
            last_summary: None,
        }
    }

    /// Update and write the status file with the given state. Failures are
    /// logged only.
    pub fn update(&self, state: DaemonState) {
        let data = StatusData {
            pid: self.pid,
            state,
            ticks: self.ticks,
            last_tick: self.last_tick,
            last_error: self.last_error.clone(),
            last_summary: self.last_summary.clone(),
            last_update: Utc::now(),
        };

        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    /// Record a completed tick.
    pub fn record_tick(&mut self, summary: TickSummary) {
        self.ticks += 1;
        self.last_tick = Some(Utc::now());
        self.last_error = None;
        self.last_summary = Some(summary);
    }

    /// Record a tick that failed.
    pub fn record_error(&mut self, error: String) {
        self.ticks += 1;
        self.last_tick = Some(Utc::now());
        self.last_error = Some(error);
    }

    pub fn remove(&self) {
        self.file.remove();
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tracker_lifecycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status");
        let mut tracker = StatusTracker::new(path.clone());
        let file = StatusFile::new(path.clone());

        tracker.update(DaemonState::Starting);
        let data = file.read().unwrap();
        assert_eq!(data.state, DaemonState::Starting);
        assert_eq!(data.ticks, 0);
        assert_eq!(data.pid, std::process::id());

        tracker.record_tick(TickSummary {
            evaluated: 3,
            escalated: 1,
            ..Default::default()
        });
        tracker.update(DaemonState::Idle);
        let data = file.read().unwrap();
        assert_eq!(data.state, DaemonState::Idle);
        assert_eq!(data.ticks, 1);
        assert!(data.last_tick.is_some());
        assert_eq!(data.last_summary.unwrap().evaluated, 3);

        tracker.record_error("registry unreadable".to_string());
        tracker.update(DaemonState::Idle);
        let data = file.read().unwrap();
        assert_eq!(data.ticks, 2);
        assert_eq!(data.last_error.as_deref(), Some("registry unreadable"));

        tracker.remove();
        assert!(!path.exists());
        assert!(file.read().is_none());
    }

    #[test]
    fn test_state_wire_names() {
        let states = vec![
            (DaemonState::Starting, "starting"),
            (DaemonState::Ticking, "ticking"),
            (DaemonState::Idle, "idle"),
            (DaemonState::ShuttingDown, "shutting_down"),
        ];
        for (state, expected) in states {
            assert_eq!(serde_json::to_string(&state).unwrap(), format!("\"{expected}\""));
        }
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let tracker = StatusTracker::new(dir.path().join("status"));
        tracker.update(DaemonState::Idle);
        let tmp = dir.path().join(format!(".status.tmp.{}", std::process::id()));
        assert!(!tmp.exists());
    }

    #[test]
    fn test_write_to_nonexistent_dir_fails() {
        let sf = StatusFile::new(PathBuf::from("/nonexistent/dir/status"));
        let data = StatusData {
            pid: 1,
            state: DaemonState::Starting,
            ticks: 0,
            last_tick: None,
            last_error: None,
            last_summary: None,
            last_update: Utc::now(),
        };
        let err = sf.write(&data).unwrap_err();
        assert!(err.to_string().contains("failed to write temp status file"));
    }
}
