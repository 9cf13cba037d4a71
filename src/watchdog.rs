/// Reconciliation pass over the session registry.
///
/// One tick loads every record, probes each non-completed session, classifies
/// it, applies the lifecycle rule and escalation policy, and writes the
/// registry back only if something changed.
use crate::config::WardenConfig;
use crate::data_dir::DataDir;
use crate::escalation::{kill_quietly, EscalationController, EscalationOutcome};
use crate::health::{evaluate_health, transition_state, HealthAction, HealthCheck, Thresholds};
use crate::nudge::{NudgeDelivery, TmuxNudger};
use crate::registry::{RegistryEntry, RegistryError, SessionStore};
use crate::session::{AgentSession, AgentState};
use crate::tmux::{LivenessProbe, Tmux, TmuxProbe};
use crate::triage::{CommandTriage, TriageDecider};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Receives every health verdict, once per evaluated session per tick.
pub type HealthObserver = Arc<dyn Fn(&HealthCheck) + Send + Sync>;

/// External backends the watchdog drives.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn LivenessProbe>,
    pub nudger: Arc<dyn NudgeDelivery>,
    pub triage: Arc<dyn TriageDecider>,
}

impl Collaborators {
    /// tmux-backed probe and nudger, command-backed triage.
    pub fn production(config: &WardenConfig) -> Self {
        let tmux = Tmux::new(config.tmux.binary.clone()).with_socket(config.tmux.socket.clone());
        Self {
            probe: Arc::new(TmuxProbe::new(tmux.clone())),
            nudger: Arc::new(TmuxNudger::new(
                tmux,
                config.storage.data_dir.clone(),
                Duration::from_millis(config.nudge.debounce_ms),
            )),
            triage: Arc::new(CommandTriage::new(
                config.triage.command.clone(),
                config.triage.args.clone(),
                Duration::from_secs(config.triage.timeout_secs),
            )),
        }
    }
}

/// Counts from one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub evaluated: usize,
    pub healthy: usize,
    pub escalated: usize,
    pub investigate: usize,
    pub terminated: usize,
    pub recovered: usize,
    /// Records whose contents changed.
    pub mutated: usize,
    /// Whether the registry was written.
    pub persisted: bool,
}

/// The tick orchestrator.
pub struct Watchdog {
    root: PathBuf,
    data_dir: DataDir,
    store: SessionStore,
    thresholds: Thresholds,
    probe: Arc<dyn LivenessProbe>,
    escalation: EscalationController,
    observer: Option<HealthObserver>,
    tick_lock: tokio::sync::Mutex<()>,
}

impl Watchdog {
    pub fn new(root: PathBuf, config: &WardenConfig, collaborators: Collaborators) -> Self {
        let data_dir = DataDir::for_root(&root, &config.storage.data_dir);
        let store = SessionStore::new(data_dir.sessions());
        let escalation = EscalationController::new(
            collaborators.probe.clone(),
            collaborators.nudger,
            collaborators.triage,
            root.clone(),
            config.watchdog.nudge_interval_ms,
            config.watchdog.tier1_enabled,
        );
        Self {
            root,
            data_dir,
            store,
            thresholds: Thresholds {
                stale_ms: config.watchdog.stale_threshold_ms,
                zombie_ms: config.watchdog.zombie_threshold_ms,
            },
            probe: collaborators.probe,
            escalation,
            observer: None,
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: HealthObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Run one reconciliation pass at the current time.
    pub async fn run_tick(&self) -> Result<TickSummary, TickError> {
        self.run_tick_at(Utc::now()).await
    }

    /// Run one reconciliation pass as of `now`.
    ///
    /// Ticks are serialized in-process, and across processes by an advisory
    /// lock on `.warden/lock`; a lock held elsewhere yields [`TickError::Busy`].
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary, TickError> {
        let _guard = self.tick_lock.lock().await;
        let _lock = self.acquire_file_lock()?;

        let mut entries = self.store.load_entries()?;
        let mut summary = TickSummary::default();

        for entry in entries.iter_mut() {
            // Unrecognized records are written back as read.
            let RegistryEntry::Session(session) = entry else {
                continue;
            };
            if session.state == AgentState::Completed {
                continue;
            }
            let before = session.clone();
            self.reconcile(session, now, &mut summary).await;
            if *session != before {
                summary.mutated += 1;
            }
        }

        if summary.mutated > 0 {
            self.store.save(&entries)?;
            summary.persisted = true;
        }

        tracing::debug!(?summary, "tick complete");
        Ok(summary)
    }

    async fn reconcile(
        &self,
        session: &mut AgentSession,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        summary.evaluated += 1;

        let alive = self.probe.is_alive(&session.tmux_session).await;
        let check = evaluate_health(session, alive, self.thresholds, now);

        let next = transition_state(session.state, check.action);
        if next != session.state {
            tracing::info!(
                agent = %session.agent_name,
                from = %session.state,
                to = %next,
                "session state changed"
            );
            session.state = next;
        }

        if let Some(observer) = &self.observer {
            observer(&check);
        }

        match check.action {
            HealthAction::Terminate => {
                if alive {
                    kill_quietly(self.probe.as_ref(), &session.tmux_session).await;
                }
                session.mark_zombie();
                summary.terminated += 1;
            }
            HealthAction::Investigate => {
                summary.investigate += 1;
            }
            HealthAction::Escalate => {
                summary.escalated += 1;
                // Termination by the controller overrides the held state.
                if self.escalation.escalate(session, now).await == EscalationOutcome::Terminated {
                    session.mark_zombie();
                    summary.terminated += 1;
                }
            }
            HealthAction::None => {
                summary.healthy += 1;
                if session.is_stalled() {
                    tracing::info!(
                        agent = %session.agent_name,
                        level = session.escalation_level,
                        "session recovered from stall"
                    );
                    session.clear_stall();
                    summary.recovered += 1;
                }
            }
        }
    }

    fn acquire_file_lock(&self) -> Result<File, TickError> {
        let path = self.data_dir.lock();
        let lock_err = |source| TickError::Lock {
            path: path.clone(),
            source,
        };
        self.data_dir.init().map_err(lock_err)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(TickError::Busy { path: path.clone() })
            }
            Err(e) => Err(lock_err(e)),
        }
    }
}

/// Errors that abort a tick. The daemon logs and discards them.
#[derive(Debug)]
pub enum TickError {
    Registry(RegistryError),
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Another process holds the tick lock.
    Busy { path: PathBuf },
}

impl std::fmt::Display for TickError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickError::Registry(e) => write!(f, "{e}"),
            TickError::Lock { path, source } => {
                write!(f, "failed to lock {}: {source}", path.display())
            }
            TickError::Busy { path } => {
                write!(f, "another watchdog holds {}", path.display())
            }
        }
    }
}

impl std::error::Error for TickError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TickError::Registry(e) => Some(e),
            TickError::Lock { source, .. } => Some(source),
            TickError::Busy { .. } => None,
        }
    }
}

impl From<RegistryError> for TickError {
    fn from(e: RegistryError) -> Self {
        TickError::Registry(e)
    }
}
