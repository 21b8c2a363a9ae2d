//! Session presence and inbox line types.

use {
    chrono::{DateTime, Utc},
    intercom_common::AgentAddr,
    serde::{Deserialize, Serialize},
};

/// What an active session is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Working,
    Idle,
}

/// One active session as announced in a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPresence {
    pub session_id: String,
    pub project: String,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// One line of a session inbox file (`<state_dir>/inbox/<session_id>.jsonl`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    pub thread_id: String,
    pub from_agent: AgentAddr,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub read: bool,
}
