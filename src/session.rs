/// Agent session records as stored in the registry.
///
/// Only the lifecycle and escalation fields are interpreted by the watchdog;
/// everything else is carried through load/save untouched.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest escalation level. Reaching it terminates the session.
pub const MAX_ESCALATION_LEVEL: u8 = 3;

/// Lifecycle stage of an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Booting,
    Working,
    /// Legacy upstream marker; treated like `Working`.
    Stalled,
    Completed,
    Zombie,
}

impl AgentState {
    /// Terminal states are never advanced by the watchdog.
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Completed | AgentState::Zombie)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Booting => "booting",
            AgentState::Working => "working",
            AgentState::Stalled => "stalled",
            AgentState::Completed => "completed",
            AgentState::Zombie => "zombie",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One monitored agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    pub id: String,
    pub agent_name: String,
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub bead_id: Option<String>,
    pub tmux_session: String,
    pub state: AgentState,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub parent_agent: Option<String>,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    /// Progressive-nudge stage, 0..=3. Zero whenever `stalled_since` is None.
    #[serde(default)]
    pub escalation_level: u8,
    #[serde(default)]
    pub stalled_since: Option<DateTime<Utc>>,
    /// Fields written by newer upstream versions.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentSession {
    /// A fresh record the way upstream creates it: booting, not stalled.
    #[cfg(test)]
    pub fn new(
        agent_name: impl Into<String>,
        tmux_session: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let agent_name = agent_name.into();
        Self {
            id: format!("session-{agent_name}"),
            agent_name,
            capability: None,
            worktree_path: None,
            branch_name: None,
            bead_id: None,
            tmux_session: tmux_session.into(),
            state: AgentState::Booting,
            pid: None,
            parent_agent: None,
            depth: 0,
            started_at: Some(now),
            last_activity: now,
            escalation_level: 0,
            stalled_since: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled_since.is_some()
    }

    /// End the current stall episode.
    pub fn clear_stall(&mut self) {
        self.escalation_level = 0;
        self.stalled_since = None;
    }

    /// Terminal reconciliation: the session is dead as far as we are concerned.
    pub fn mark_zombie(&mut self) {
        self.state = AgentState::Zombie;
        self.clear_stall();
    }

    /// Repair records that violate the escalation invariants, e.g. ones written
    /// by older versions or edited by hand. Completed records are left as they
    /// are; zombies never carry a stall episode.
    pub fn normalize(&mut self) {
        match self.state {
            AgentState::Completed => return,
            AgentState::Zombie => self.clear_stall(),
            _ => {}
        }
        if self.escalation_level > MAX_ESCALATION_LEVEL {
            self.escalation_level = MAX_ESCALATION_LEVEL;
        }
        if self.stalled_since.is_none() {
            self.escalation_level = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_legacy_record_defaults_escalation_fields() {
        let json = r#"{
            "id": "s1",
            "agentName": "builder-1",
            "tmuxSession": "warden-builder-1",
            "state": "working",
            "pid": 4242,
            "lastActivity": "2026-01-01T00:00:00Z"
        }"#;
        let session: AgentSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.escalation_level, 0);
        assert_eq!(session.stalled_since, None);
        assert_eq!(session.state, AgentState::Working);
        assert_eq!(session.pid, Some(4242));
    }

    #[test]
    fn test_serializes_camel_case_and_keeps_unknown_fields() {
        let json = r#"{
            "id": "s1",
            "agentName": "scout",
            "tmuxSession": "t-scout",
            "state": "booting",
            "lastActivity": "2026-01-01T00:00:00Z",
            "runId": "run-7"
        }"#;
        let session: AgentSession = serde_json::from_str(json).unwrap();
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["agentName"], "scout");
        assert_eq!(value["tmuxSession"], "t-scout");
        assert_eq!(value["escalationLevel"], 0);
        assert!(value["stalledSince"].is_null());
        assert_eq!(value["runId"], "run-7");
    }

    #[test]
    fn test_state_wire_names() {
        let states = vec![
            (AgentState::Booting, "booting"),
            (AgentState::Working, "working"),
            (AgentState::Stalled, "stalled"),
            (AgentState::Completed, "completed"),
            (AgentState::Zombie, "zombie"),
        ];
        for (state, expected) in states {
            assert_eq!(serde_json::to_string(&state).unwrap(), format!("\"{expected}\""));
            assert_eq!(state.to_string(), expected);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(AgentState::Completed.is_terminal());
        assert!(AgentState::Zombie.is_terminal());
        assert!(!AgentState::Booting.is_terminal());
        assert!(!AgentState::Working.is_terminal());
        assert!(!AgentState::Stalled.is_terminal());
    }

    #[test]
    fn test_normalize_clamps_and_pairs_fields() {
        let now = ts("2026-01-01T00:00:00Z");
        let mut session = AgentSession::new("a", "t-a", now);
        session.escalation_level = 9;
        session.stalled_since = Some(now);
        session.normalize();
        assert_eq!(session.escalation_level, MAX_ESCALATION_LEVEL);

        session.stalled_since = None;
        session.normalize();
        assert_eq!(session.escalation_level, 0);
    }

    #[test]
    fn test_normalize_clears_stall_on_zombie() {
        let now = ts("2026-01-01T00:00:00Z");
        let mut session = AgentSession::new("a", "t-a", now);
        session.state = AgentState::Zombie;
        session.escalation_level = 2;
        session.stalled_since = Some(now);
        session.normalize();
        assert_eq!(session.escalation_level, 0);
        assert!(!session.is_stalled());
    }

    #[test]
    fn test_normalize_leaves_completed_alone() {
        let now = ts("2026-01-01T00:00:00Z");
        let mut session = AgentSession::new("a", "t-a", now);
        session.state = AgentState::Completed;
        session.escalation_level = 7;
        let before = session.clone();
        session.normalize();
        assert_eq!(session, before);
    }

    #[test]
    fn test_mark_zombie_clears_stall() {
        let now = ts("2026-01-01T00:00:00Z");
        let mut session = AgentSession::new("a", "t-a", now);
        session.state = AgentState::Working;
        session.escalation_level = 2;
        session.stalled_since = Some(now);
        session.mark_zombie();
        assert_eq!(session.state, AgentState::Zombie);
        assert_eq!(session.escalation_level, 0);
        assert!(!session.is_stalled());
    }
}
