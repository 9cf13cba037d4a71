/// tmux session backend: liveness checks and forced termination.
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Output;
use tokio::process::Command;

/// Answers whether a session backend is alive and can forcibly end it.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Whether the named session currently exists.
    async fn is_alive(&self, session: &str) -> bool;

    /// Forcibly terminate the named session. Callers treat failure as benign:
    /// the session may already be gone.
    async fn kill(&self, session: &str) -> Result<(), KillError>;
}

/// Target naming exactly `session`. A bare name lets tmux fall back to a prefix
/// match, which would hit `agent-2` when `agent` is gone.
pub fn session_target(session: &str) -> String {
    format!("={session}")
}

/// Active pane of exactly `session`.
pub fn pane_target(session: &str) -> String {
    format!("={session}:")
}

/// Thin wrapper over the tmux binary.
#[derive(Debug, Clone)]
pub struct Tmux {
    binary: String,
    socket: Option<String>,
}

impl Tmux {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            socket: None,
        }
    }

    /// Talk to the server on the named socket (`tmux -L <name>`).
    pub fn with_socket(mut self, socket: Option<String>) -> Self {
        self.socket = socket;
        self
    }

    /// Run `tmux <args>` to completion, capturing output.
    pub async fn run(&self, args: &[&str]) -> std::io::Result<Output> {
        let mut cmd = Command::new(&self.binary);
        if let Some(socket) = &self.socket {
            cmd.arg("-L").arg(socket);
        }
        cmd.args(args).kill_on_drop(true).output().await
    }

    /// Root pid of the session's active pane, if it can be determined.
    async fn pane_pid(&self, session: &str) -> Option<i32> {
        let target = pane_target(session);
        let output = self
            .run(&["display-message", "-p", "-t", target.as_str(), "#{pane_pid}"])
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }
}

/// Production [`LivenessProbe`] backed by tmux.
#[derive(Debug, Clone)]
pub struct TmuxProbe {
    tmux: Tmux,
}

impl TmuxProbe {
    pub fn new(tmux: Tmux) -> Self {
        Self { tmux }
    }
}

#[async_trait]
impl LivenessProbe for TmuxProbe {
    async fn is_alive(&self, session: &str) -> bool {
        let target = session_target(session);
        match self.tmux.run(&["has-session", "-t", target.as_str()]).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                tracing::debug!(session, error = %e, "tmux has-session failed to run");
                false
            }
        }
    }

    async fn kill(&self, session: &str) -> Result<(), KillError> {
        // Signal the pane's process first so the agent can exit cleanly; tmux
        // only hangs up the pty.
        if let Some(pid) = self.tmux.pane_pid(session).await {
            if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::debug!(session, pid, error = %e, "SIGTERM to pane process failed");
            }
        }

        let target = session_target(session);
        let output = self
            .tmux
            .run(&["kill-session", "-t", target.as_str()])
            .await
            .map_err(|e| KillError::Spawn {
                session: session.to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(KillError::Failed {
                session: session.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::info!(session, "tmux session killed");
        Ok(())
    }
}

/// Errors from killing a session.
#[derive(Debug)]
pub enum KillError {
    /// The tmux binary could not be run.
    Spawn {
        session: String,
        source: std::io::Error,
    },
    /// tmux ran but refused, typically because the session no longer exists.
    Failed { session: String, stderr: String },
}

impl std::fmt::Display for KillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillError::Spawn { session, source } => {
                write!(f, "failed to run tmux to kill session {session}: {source}")
            }
            KillError::Failed { session, stderr } => {
                write!(f, "tmux could not kill session {session}: {stderr}")
            }
        }
    }
}

impl std::error::Error for KillError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KillError::Spawn { source, .. } => Some(source),
            KillError::Failed { .. } => None,
        }
    }
}
