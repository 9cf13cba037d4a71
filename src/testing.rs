/// Scripted collaborators for deterministic tests.
use crate::nudge::{NudgeDelivery, NudgeError, NudgeOutcome};
use crate::tmux::{KillError, LivenessProbe, Tmux};
use crate::triage::{TriageDecider, TriageVerdict};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Liveness answers from a table; kills are recorded and mark the session dead.
#[derive(Default)]
pub struct FakeProbe {
    alive: Mutex<HashMap<String, bool>>,
    kills: Mutex<Vec<String>>,
    probes: AtomicUsize,
    fail_kills: AtomicBool,
    panic_on_probe: AtomicBool,
}

impl FakeProbe {
    pub fn set_alive(&self, session: &str, alive: bool) {
        self.alive.lock().unwrap().insert(session.to_string(), alive);
    }

    pub fn kills(&self) -> Vec<String> {
        self.kills.lock().unwrap().clone()
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fail_kills(&self) {
        self.fail_kills.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_probe(&self, panic: bool) {
        self.panic_on_probe.store(panic, Ordering::SeqCst);
    }
}

#[async_trait]
impl LivenessProbe for FakeProbe {
    async fn is_alive(&self, session: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_probe.load(Ordering::SeqCst) {
            panic!("probe exploded");
        }
        self.alive.lock().unwrap().get(session).copied().unwrap_or(false)
    }

    async fn kill(&self, session: &str) -> Result<(), KillError> {
        self.kills.lock().unwrap().push(session.to_string());
        if self.fail_kills.load(Ordering::SeqCst) {
            return Err(KillError::Failed {
                session: session.to_string(),
                stderr: "can't find session".to_string(),
            });
        }
        self.set_alive(session, false);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNudge {
    pub root: PathBuf,
    pub agent_name: String,
    pub message: String,
    pub force: bool,
}

/// Records every delivery attempt.
#[derive(Default)]
pub struct FakeNudger {
    sent: Mutex<Vec<SentNudge>>,
    fail: AtomicBool,
}

impl FakeNudger {
    pub fn sent(&self) -> Vec<SentNudge> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_with_error(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NudgeDelivery for FakeNudger {
    async fn deliver(
        &self,
        root: &Path,
        agent_name: &str,
        message: &str,
        force: bool,
    ) -> Result<NudgeOutcome, NudgeError> {
        self.sent.lock().unwrap().push(SentNudge {
            root: root.to_path_buf(),
            agent_name: agent_name.to_string(),
            message: message.to_string(),
            force,
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(NudgeError::Rejected {
                session: agent_name.to_string(),
                stderr: "no server running".to_string(),
            });
        }
        Ok(NudgeOutcome::delivered())
    }
}

/// Always returns the same verdict and records its inputs.
pub struct FakeTriage {
    verdict: TriageVerdict,
    requests: Mutex<Vec<(String, PathBuf, DateTime<Utc>)>>,
}

impl FakeTriage {
    pub fn new(verdict: TriageVerdict) -> Self {
        Self {
            verdict,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<(String, PathBuf, DateTime<Utc>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TriageDecider for FakeTriage {
    async fn decide(
        &self,
        agent_name: &str,
        root: &Path,
        last_activity: DateTime<Utc>,
    ) -> TriageVerdict {
        self.requests
            .lock()
            .unwrap()
            .push((agent_name.to_string(), root.to_path_buf(), last_activity));
        self.verdict
    }
}

static NEXT_SOCKET: AtomicUsize = AtomicUsize::new(0);

/// A tmux server on a private socket, killed on drop. `start` returns `None`
/// when tmux is not installed.
pub struct TmuxServer {
    socket: String,
}

impl TmuxServer {
    pub fn start(sessions: &[&str]) -> Option<Self> {
        let socket = format!(
            "warden-test-{}-{}",
            std::process::id(),
            NEXT_SOCKET.fetch_add(1, Ordering::SeqCst)
        );
        let server = Self { socket };
        for name in sessions {
            // The pane shell ignores SIGTERM so only kill-session ends it.
            let status = std::process::Command::new("tmux")
                .args(["-L", server.socket.as_str(), "new-session", "-d", "-s", *name])
                .arg("trap '' TERM; while :; do sleep 1; done")
                .env_remove("TMUX")
                .status();
            match status {
                Ok(s) if s.success() => {}
                _ => {
                    eprintln!("tmux unavailable, skipping");
                    return None;
                }
            }
        }
        Some(server)
    }

    pub fn tmux(&self) -> Tmux {
        Tmux::new("tmux").with_socket(Some(self.socket.clone()))
    }
}

impl Drop for TmuxServer {
    fn drop(&mut self) {
        let _ = std::process::Command::new("tmux")
            .args(["-L", self.socket.as_str(), "kill-server"])
            .status();
    }
}
