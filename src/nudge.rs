/// Nudge delivery: type a short operator notice into an agent's tmux session.
use crate::data_dir::DataDir;
use crate::registry::SessionStore;
use crate::tmux::{pane_target, Tmux};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sent at escalation level 1.
pub const STALL_NUDGE: &str =
    "[WATCHDOG] No progress recorded for a while. Check your current task and report status.";

/// Sent when triage decides the agent can recover.
pub const RECOVERY_NUDGE: &str =
    "[WATCHDOG] Triage thinks recovery is possible. Retry your current step.";

/// Result of a delivery attempt that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NudgeOutcome {
    pub delivered: bool,
    pub reason: Option<String>,
}

impl NudgeOutcome {
    pub fn delivered() -> Self {
        Self {
            delivered: true,
            reason: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            delivered: false,
            reason: Some(reason.into()),
        }
    }
}

/// Best-effort message delivery to a live agent.
#[async_trait]
pub trait NudgeDelivery: Send + Sync {
    /// Deliver `message` to `agent_name`. Business-level non-delivery is an
    /// `Ok` outcome; `Err` is reserved for transport failures. `force` bypasses
    /// any debounce.
    async fn deliver(
        &self,
        root: &Path,
        agent_name: &str,
        message: &str,
        force: bool,
    ) -> Result<NudgeOutcome, NudgeError>;
}

/// Production [`NudgeDelivery`] using `tmux send-keys`.
pub struct TmuxNudger {
    tmux: Tmux,
    data_dir: PathBuf,
    debounce: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl TmuxNudger {
    /// `data_dir` is resolved against the delivery root to find the registry.
    pub fn new(tmux: Tmux, data_dir: PathBuf, debounce: Duration) -> Self {
        Self {
            tmux,
            data_dir,
            debounce,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// tmux session of the live record named `agent_name`, if any.
    fn resolve_session(&self, root: &Path, agent_name: &str) -> Option<String> {
        let store = SessionStore::new(DataDir::for_root(root, &self.data_dir).sessions());
        let sessions = match store.load() {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(agent = agent_name, error = %e, "cannot read registry for nudge");
                return None;
            }
        };
        sessions
            .into_iter()
            .find(|s| s.agent_name == agent_name && !s.state.is_terminal())
            .map(|s| s.tmux_session)
    }

    fn is_debounced(&self, agent_name: &str) -> bool {
        let last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        last_sent
            .get(agent_name)
            .is_some_and(|at| at.elapsed() < self.debounce)
    }

    fn record_sent(&self, agent_name: &str) {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        last_sent.insert(agent_name.to_string(), Instant::now());
    }

    async fn send_keys(&self, session: &str, args: &[&str]) -> Result<(), NudgeError> {
        let target = pane_target(session);
        let mut full = vec!["send-keys", "-t", target.as_str()];
        full.extend_from_slice(args);
        let output = self.tmux.run(&full).await.map_err(|e| NudgeError::Spawn {
            session: session.to_string(),
            source: e,
        })?;
        if !output.status.success() {
            return Err(NudgeError::Rejected {
                session: session.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NudgeDelivery for TmuxNudger {
    async fn deliver(
        &self,
        root: &Path,
        agent_name: &str,
        message: &str,
        force: bool,
    ) -> Result<NudgeOutcome, NudgeError> {
        if !force && self.is_debounced(agent_name) {
            return Ok(NudgeOutcome::skipped("debounced"));
        }

        let Some(session) = self.resolve_session(root, agent_name) else {
            return Ok(NudgeOutcome::skipped("no active session"));
        };

        // Literal text first, then Enter as a separate key so the message is
        // never interpreted as a key name.
        self.send_keys(&session, &["-l", message]).await?;
        self.send_keys(&session, &["Enter"]).await?;
        self.record_sent(agent_name);

        tracing::debug!(agent = agent_name, session = %session, force, "nudge delivered");
        Ok(NudgeOutcome::delivered())
    }
}

/// Transport failures while delivering a nudge.
#[derive(Debug)]
pub enum NudgeError {
    Spawn {
        session: String,
        source: std::io::Error,
    },
    Rejected {
        session: String,
        stderr: String,
    },
}

impl std::fmt::Display for NudgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NudgeError::Spawn { session, source } => {
                write!(f, "failed to run tmux send-keys for {session}: {source}")
            }
            NudgeError::Rejected { session, stderr } => {
                write!(f, "tmux rejected send-keys for {session}: {stderr}")
            }
        }
    }
}

impl std::error::Error for NudgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NudgeError::Spawn { source, .. } => Some(source),
            NudgeError::Rejected { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AgentSession, AgentState};
    use crate::testing::TmuxServer;
    use chrono::Utc;
    use tempfile::tempdir;

    fn write_registry(root: &Path, sessions: &[AgentSession]) {
        let dd = DataDir::for_root(root, Path::new(".warden"));
        dd.init().unwrap();
        SessionStore::new(dd.sessions()).save(sessions).unwrap();
    }

    fn working(name: &str) -> AgentSession {
        let mut s = AgentSession::new(name, format!("warden-{name}"), Utc::now());
        s.state = AgentState::Working;
        s
    }

    fn nudger(binary: &str, debounce_ms: u64) -> TmuxNudger {
        TmuxNudger::new(
            Tmux::new(binary),
            PathBuf::from(".warden"),
            Duration::from_millis(debounce_ms),
        )
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_delivered() {
        let dir = tempdir().unwrap();
        write_registry(dir.path(), &[working("builder")]);

        let outcome = nudger("true", 0)
            .deliver(dir.path(), "scout", STALL_NUDGE, true)
            .await
            .unwrap();
        assert_eq!(outcome, NudgeOutcome::skipped("no active session"));
    }

    #[tokio::test]
    async fn test_terminal_records_are_not_targets() {
        let dir = tempdir().unwrap();
        let mut zombie = working("builder");
        zombie.state = AgentState::Zombie;
        write_registry(dir.path(), &[zombie]);

        let outcome = nudger("true", 0)
            .deliver(dir.path(), "builder", STALL_NUDGE, true)
            .await
            .unwrap();
        assert!(!outcome.delivered);
    }

    #[tokio::test]
    async fn test_debounce_applies_unless_forced() {
        let dir = tempdir().unwrap();
        write_registry(dir.path(), &[working("builder")]);
        let nudger = nudger("true", 60_000);

        let first = nudger
            .deliver(dir.path(), "builder", STALL_NUDGE, false)
            .await
            .unwrap();
        assert!(first.delivered);

        let second = nudger
            .deliver(dir.path(), "builder", STALL_NUDGE, false)
            .await
            .unwrap();
        assert_eq!(second, NudgeOutcome::skipped("debounced"));

        let forced = nudger
            .deliver(dir.path(), "builder", STALL_NUDGE, true)
            .await
            .unwrap();
        assert!(forced.delivered);
    }

    #[tokio::test]
    async fn test_tmux_failure_is_an_error() {
        let dir = tempdir().unwrap();
        write_registry(dir.path(), &[working("builder")]);

        let err = nudger("false", 0)
            .deliver(dir.path(), "builder", STALL_NUDGE, true)
            .await
            .unwrap_err();
        assert!(matches!(err, NudgeError::Rejected { .. }));
        assert!(err.to_string().contains("warden-builder"));
    }

    #[tokio::test]
    async fn test_nudge_never_reaches_session_with_longer_name() {
        let Some(server) = TmuxServer::start(&["warden-builder-2"]) else {
            return;
        };
        let dir = tempdir().unwrap();
        write_registry(dir.path(), &[working("builder"), working("builder-2")]);
        let nudger = TmuxNudger::new(server.tmux(), PathBuf::from(".warden"), Duration::ZERO);

        let err = nudger
            .deliver(dir.path(), "builder", STALL_NUDGE, true)
            .await
            .unwrap_err();
        assert!(matches!(err, NudgeError::Rejected { .. }));

        let outcome = nudger
            .deliver(dir.path(), "builder-2", STALL_NUDGE, true)
            .await
            .unwrap();
        assert!(outcome.delivered);
    }
}
