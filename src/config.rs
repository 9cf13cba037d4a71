use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from `.warden/config.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WardenConfig {
    pub watchdog: WatchdogConfig,
    pub tmux: TmuxConfig,
    pub nudge: NudgeConfig,
    pub triage: TriageConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Time between daemon ticks.
    pub tick_interval_ms: u64,
    /// Silence after which a live session starts escalating.
    pub stale_threshold_ms: u64,
    /// Silence after which a live session is killed outright.
    pub zombie_threshold_ms: u64,
    /// Stall duration per escalation level.
    pub nudge_interval_ms: u64,
    /// Consult triage at escalation level 2.
    pub tier1_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TmuxConfig {
    pub binary: String,
    /// Server socket name (`tmux -L`); the default server when unset.
    pub socket: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NudgeConfig {
    /// Minimum gap between unforced nudges to the same agent.
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TriageConfig {
    pub command: String,
    /// `{prompt}` is replaced with the triage prompt.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Control directory, relative to the working root unless absolute.
    pub data_dir: PathBuf,
}

// --- Default implementations ---

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 30_000,
            stale_threshold_ms: 300_000,
            zombie_threshold_ms: 600_000,
            nudge_interval_ms: 60_000,
            tier1_enabled: false,
        }
    }
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            binary: "tmux".to_string(),
            socket: None,
        }
    }
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["--print".to_string(), "{prompt}".to_string()],
            timeout_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".warden"),
        }
    }
}

impl WardenConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Reject settings the watchdog cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.watchdog;
        let positive = [
            ("watchdog.tick_interval_ms", w.tick_interval_ms),
            ("watchdog.stale_threshold_ms", w.stale_threshold_ms),
            ("watchdog.zombie_threshold_ms", w.zombie_threshold_ms),
            ("watchdog.nudge_interval_ms", w.nudge_interval_ms),
            ("triage.timeout_secs", self.triage.timeout_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be greater than 0")));
            }
        }
        if w.zombie_threshold_ms <= w.stale_threshold_ms {
            return Err(ConfigError::Invalid(format!(
                "watchdog.zombie_threshold_ms ({}) must exceed watchdog.stale_threshold_ms ({})",
                w.zombie_threshold_ms, w.stale_threshold_ms
            )));
        }
        if self.tmux.binary.trim().is_empty() {
            return Err(ConfigError::Invalid("tmux.binary must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}
