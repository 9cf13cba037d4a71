/// Progressive escalation for stalled sessions.
///
/// The level is recomputed from wall-clock stall duration on every call, so
/// missed or extra ticks never change where a session ends up:
/// `level = min(elapsed / nudge_interval, 3)`, never decreasing within one
/// stall episode.
use crate::health::idle_millis;
use crate::nudge::{NudgeDelivery, RECOVERY_NUDGE, STALL_NUDGE};
use crate::session::{AgentSession, MAX_ESCALATION_LEVEL};
use crate::tmux::LivenessProbe;
use crate::triage::{TriageDecider, TriageVerdict};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

/// Remedial action bound to an escalation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStage {
    /// Level 0: the health verdict itself is the warning.
    Warn,
    /// Level 1: forced stall notice.
    Nudge,
    /// Level 2: ask triage, when enabled.
    Triage,
    /// Level 3 and beyond: kill.
    Terminate,
}

impl EscalationStage {
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => EscalationStage::Warn,
            1 => EscalationStage::Nudge,
            2 => EscalationStage::Triage,
            _ => EscalationStage::Terminate,
        }
    }
}

/// What happened to the session after one escalation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    Continue,
    /// The session was killed (or found dead) and the record is now a zombie.
    Terminated,
}

/// Level implied by `elapsed_ms` of continuous stall. A zero interval jumps
/// straight to the maximum.
pub fn target_level(elapsed_ms: u64, nudge_interval_ms: u64) -> u8 {
    let steps = elapsed_ms
        .checked_div(nudge_interval_ms)
        .unwrap_or(u64::from(MAX_ESCALATION_LEVEL));
    steps.min(u64::from(MAX_ESCALATION_LEVEL)) as u8
}

/// Kill `session` if the probe still reports it alive. Kill failures are
/// logged and dropped.
pub async fn kill_if_alive(probe: &dyn LivenessProbe, session: &str) {
    if probe.is_alive(session).await {
        kill_quietly(probe, session).await;
    }
}

/// Kill `session`, logging and discarding any failure.
pub async fn kill_quietly(probe: &dyn LivenessProbe, session: &str) {
    if let Err(e) = probe.kill(session).await {
        tracing::debug!(session, error = %e, "kill failed, session may already be gone");
    }
}

/// Drives the escalation policy for one session at a time.
pub struct EscalationController {
    probe: Arc<dyn LivenessProbe>,
    nudger: Arc<dyn NudgeDelivery>,
    triage: Arc<dyn TriageDecider>,
    root: PathBuf,
    nudge_interval_ms: u64,
    tier1_enabled: bool,
}

impl EscalationController {
    pub fn new(
        probe: Arc<dyn LivenessProbe>,
        nudger: Arc<dyn NudgeDelivery>,
        triage: Arc<dyn TriageDecider>,
        root: PathBuf,
        nudge_interval_ms: u64,
        tier1_enabled: bool,
    ) -> Self {
        Self {
            probe,
            nudger,
            triage,
            root,
            nudge_interval_ms,
            tier1_enabled,
        }
    }

    /// Advance the stall episode for `session` and run the action for its
    /// current level. On termination the record is marked zombie and the
    /// episode is cleared.
    pub async fn escalate(
        &self,
        session: &mut AgentSession,
        now: DateTime<Utc>,
    ) -> EscalationOutcome {
        let stalled_since = match session.stalled_since {
            Some(since) => since,
            None => {
                session.stalled_since = Some(now);
                session.escalation_level = 0;
                tracing::info!(agent = %session.agent_name, "stall episode started");
                now
            }
        };

        let target = target_level(idle_millis(stalled_since, now), self.nudge_interval_ms);
        if target > session.escalation_level {
            tracing::info!(
                agent = %session.agent_name,
                from = session.escalation_level,
                to = target,
                "escalation level raised"
            );
            session.escalation_level = target;
        }

        let outcome = self.act(session).await;
        if outcome == EscalationOutcome::Terminated {
            session.mark_zombie();
        }
        outcome
    }

    async fn act(&self, session: &AgentSession) -> EscalationOutcome {
        match EscalationStage::from_level(session.escalation_level) {
            EscalationStage::Warn => EscalationOutcome::Continue,
            EscalationStage::Nudge => {
                self.nudge(&session.agent_name, STALL_NUDGE).await;
                EscalationOutcome::Continue
            }
            EscalationStage::Triage => {
                if !self.tier1_enabled {
                    return EscalationOutcome::Continue;
                }
                let verdict = self
                    .triage
                    .decide(&session.agent_name, &self.root, session.last_activity)
                    .await;
                match verdict {
                    TriageVerdict::Terminate => {
                        tracing::warn!(agent = %session.agent_name, "triage chose termination");
                        kill_if_alive(self.probe.as_ref(), &session.tmux_session).await;
                        EscalationOutcome::Terminated
                    }
                    TriageVerdict::Retry => {
                        self.nudge(&session.agent_name, RECOVERY_NUDGE).await;
                        EscalationOutcome::Continue
                    }
                    TriageVerdict::Extend => EscalationOutcome::Continue,
                }
            }
            EscalationStage::Terminate => {
                tracing::warn!(agent = %session.agent_name, "escalation exhausted, terminating");
                kill_if_alive(self.probe.as_ref(), &session.tmux_session).await;
                EscalationOutcome::Terminated
            }
        }
    }

    /// Forced, best-effort delivery.
    async fn nudge(&self, agent_name: &str, message: &str) {
        match self.nudger.deliver(&self.root, agent_name, message, true).await {
            Ok(outcome) if !outcome.delivered => {
                tracing::debug!(
                    agent = agent_name,
                    reason = ?outcome.reason,
                    "nudge not delivered"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(agent = agent_name, error = %e, "nudge delivery failed");
            }
        }
    }
}
