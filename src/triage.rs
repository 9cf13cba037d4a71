/// Higher-tier triage: ask an AI agent whether a stalled session should be
/// retried, given more time, or terminated.
use crate::health::idle_millis;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;

/// Decision returned by triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageVerdict {
    /// Nudge the agent to retry and keep it running.
    Retry,
    /// Kill the session.
    Terminate,
    /// Leave it alone for now.
    Extend,
}

/// Delegate-and-decide call to a higher tier. Implementations absorb their own
/// failures and fall back to [`TriageVerdict::Extend`].
#[async_trait]
pub trait TriageDecider: Send + Sync {
    async fn decide(
        &self,
        agent_name: &str,
        root: &Path,
        last_activity: DateTime<Utc>,
    ) -> TriageVerdict;
}

static TERMINATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bterminate\b").unwrap());
static RETRY_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bretry\b").unwrap());

/// Classify a free-text triage response. Terminate wins over retry; anything
/// else extends.
pub fn classify_response(text: &str) -> TriageVerdict {
    if TERMINATE_PATTERN.is_match(text) {
        TriageVerdict::Terminate
    } else if RETRY_PATTERN.is_match(text) {
        TriageVerdict::Retry
    } else {
        TriageVerdict::Extend
    }
}

/// Production [`TriageDecider`] that shells out to an agent CLI.
#[derive(Debug, Clone)]
pub struct CommandTriage {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTriage {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    fn build_prompt(agent_name: &str, last_activity: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let idle_secs = idle_millis(last_activity, now) / 1000;
        format!(
            "You are triaging a stalled coding agent.\n\
             Agent: {agent_name}\n\
             Last activity: {} ({idle_secs}s ago)\n\
             Inspect the repository state and decide. Reply with exactly one word: \
             retry (nudge it to continue), terminate (it is stuck for good), or \
             extend (it is busy, give it more time).",
            last_activity.to_rfc3339()
        )
    }

    /// Replace `{prompt}` placeholders in the configured args.
    fn build_args(&self, prompt: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{prompt}", prompt))
            .collect()
    }

    async fn run(&self, root: &Path, prompt: &str) -> Result<String, TriageError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(self.build_args(prompt))
            .current_dir(root)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| TriageError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| TriageError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(TriageError::Exit {
                code: output.status.code(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TriageDecider for CommandTriage {
    async fn decide(
        &self,
        agent_name: &str,
        root: &Path,
        last_activity: DateTime<Utc>,
    ) -> TriageVerdict {
        let prompt = Self::build_prompt(agent_name, last_activity, Utc::now());
        match self.run(root, &prompt).await {
            Ok(response) => {
                let verdict = classify_response(&response);
                tracing::info!(agent = agent_name, ?verdict, "triage decided");
                verdict
            }
            Err(e) => {
                tracing::warn!(agent = agent_name, error = %e, "triage failed, extending");
                TriageVerdict::Extend
            }
        }
    }
}

/// Failures of the triage command. Never escape [`CommandTriage::decide`].
#[derive(Debug)]
pub enum TriageError {
    Spawn {
        command: String,
        source: std::io::Error,
    },
    Exit {
        code: Option<i32>,
    },
    Timeout {
        secs: u64,
    },
}

impl std::fmt::Display for TriageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriageError::Spawn { command, source } => {
                write!(f, "failed to spawn triage command {command}: {source}")
            }
            TriageError::Exit { code } => match code {
                Some(code) => write!(f, "triage command exited with status {code}"),
                None => write!(f, "triage command killed by signal"),
            },
            TriageError::Timeout { secs } => write!(f, "triage command timed out after {secs}s"),
        }
    }
}

impl std::error::Error for TriageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TriageError::Spawn { source, .. } => Some(source),
            TriageError::Exit { .. } | TriageError::Timeout { .. } => None,
        }
    }
}
