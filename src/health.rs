/// Health evaluation and the lifecycle transition rule.
///
/// Observed liveness is ground truth: a record that says "working" for a dead
/// tmux session is moved to `zombie`, and a `zombie` whose session is alive is
/// surfaced for investigation but never auto-resolved.
use crate::session::{AgentSession, AgentState};
use chrono::{DateTime, Utc};

/// Recommended action for one session on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// Healthy, or consistently dead.
    None,
    /// Enter or continue the progressive-nudge policy.
    Escalate,
    /// Record and reality disagree in a way that needs a human decision.
    Investigate,
    /// Reconcile the record to `zombie`, killing the session if still alive.
    Terminate,
}

impl HealthAction {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthAction::None => "none",
            HealthAction::Escalate => "escalate",
            HealthAction::Investigate => "investigate",
            HealthAction::Terminate => "terminate",
        }
    }
}

impl std::fmt::Display for HealthAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staleness thresholds, both measured from `last_activity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub stale_ms: u64,
    pub zombie_ms: u64,
}

/// Per-tick verdict for one session, handed to the observer.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheck {
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub tmux_alive: bool,
    pub last_activity: DateTime<Utc>,
    /// Lifecycle state the record was in when evaluated.
    pub state: AgentState,
    pub action: HealthAction,
    /// Present when record and observation conflict.
    pub reconciliation_note: Option<String>,
}

/// Classify one session. Pure: no I/O, `now` is supplied by the caller.
pub fn evaluate_health(
    session: &AgentSession,
    tmux_alive: bool,
    thresholds: Thresholds,
    now: DateTime<Utc>,
) -> HealthCheck {
    let idle_ms = idle_millis(session.last_activity, now);

    let (action, note) = if session.state == AgentState::Zombie {
        if tmux_alive {
            (
                HealthAction::Investigate,
                Some(format!(
                    "recorded as zombie but tmux session {} is alive",
                    session.tmux_session
                )),
            )
        } else {
            (HealthAction::None, None)
        }
    } else if !tmux_alive {
        (
            HealthAction::Terminate,
            Some(format!(
                "recorded as {} but tmux session {} is gone",
                session.state, session.tmux_session
            )),
        )
    } else if idle_ms >= thresholds.zombie_ms {
        (HealthAction::Terminate, None)
    } else if idle_ms >= thresholds.stale_ms {
        (HealthAction::Escalate, None)
    } else {
        (HealthAction::None, None)
    };

    HealthCheck {
        agent_name: session.agent_name.clone(),
        timestamp: now,
        tmux_alive,
        last_activity: session.last_activity,
        state: session.state,
        action,
        reconciliation_note: note,
    }
}

/// Next lifecycle state for a non-completed session.
///
/// Only `Terminate` moves the state; `booting -> working` belongs to upstream
/// instrumentation.
pub fn transition_state(current: AgentState, action: HealthAction) -> AgentState {
    match action {
        HealthAction::Terminate => AgentState::Zombie,
        HealthAction::Investigate | HealthAction::Escalate | HealthAction::None => current,
    }
}

/// Milliseconds since `since`, zero if `since` is in the future.
pub fn idle_millis(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - since).num_milliseconds()).unwrap_or(0)
}
