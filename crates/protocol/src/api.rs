//! Request/reply bodies for the hub and daemon HTTP surfaces.

use {
    chrono::{DateTime, Utc},
    intercom_common::AgentAddr,
    serde::{Deserialize, Serialize},
};

use crate::{
    mission::{FeedbackItem, MissionStatus},
    session::{SessionPresence, SessionStatus},
};

/// Reply to `GET /api/discover` (hub) and `GET /discover` (daemon).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverReply {
    pub hub: bool,
    pub version: String,
    pub machine_id: String,
}

/// Standard error body; `label` is the short operator-facing description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            label: None,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

// ── Join ─────────────────────────────────────────────────────────────────────

/// Body of the unauthenticated `POST /api/join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub machine_id: String,
    pub display_name: String,
    pub overlay_ip: String,
}

/// Join lifecycle as seen by the joining daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinState {
    PendingApproval,
    Pending,
    Approved,
    Denied,
}

/// Reply to `POST /api/join` and `GET /api/join/status/{machine_id}`.
///
/// The token is present exactly when the state is `approved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinReply {
    pub status: JoinState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

// ── Heartbeat / register ─────────────────────────────────────────────────────

/// Body of `POST /api/heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub machine_id: String,
    pub overlay_ip: String,
    pub daemon_url: String,
    #[serde(default)]
    pub active_sessions: Vec<SessionPresence>,
}

/// One project in a machine's register manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub project_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub path: String,
}

/// Body of `POST /api/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub machine_id: String,
    #[serde(default)]
    pub projects: Vec<ProjectManifest>,
}

// ── Agents ───────────────────────────────────────────────────────────────────

/// One agent in the `GET /api/agents` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub machine_id: String,
    pub project_id: String,
    /// `online` when the owning machine heartbeat within the window.
    pub status: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionPresence>,
}

/// Reply to `GET /api/agents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsReply {
    pub agents: Vec<AgentInfo>,
}

// ── Missions ─────────────────────────────────────────────────────────────────

/// Hub → daemon: launch a child agent for a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionStartRequest {
    /// Hub-side mission id; the daemon reply carries its local one.
    pub mission_id: String,
    pub from_agent: AgentAddr,
    pub project: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// Daemon reply to `POST /mission/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionStartReply {
    pub mission_id: String,
    pub status: MissionStatus,
}

/// Reply to `GET /api/missions/{id}` and `GET /missions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionPollReply {
    pub mission_id: String,
    pub status: MissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_label: Option<String>,
    /// Raw stdout captured so far, when the mission runs a child agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Feedback items after the requested cursor.
    #[serde(default)]
    pub feedback: Vec<FeedbackItem>,
}

// ── Feedback ─────────────────────────────────────────────────────────────────

/// Category of a `POST /api/feedback` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Bug,
    Improvement,
    Note,
}

/// Body of `POST /api/feedback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub kind: FeedbackKind,
    pub description: String,
    pub from_agent: AgentAddr,
}

// ── Sessions (daemon surface) ────────────────────────────────────────────────

/// Body of `POST /session/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRegisterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub project: String,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Reply to `POST /session/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRegisterReply {
    pub session_id: String,
    pub inbox_path: String,
}

/// Hub → daemon: deposit a chat message into a session inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverRequest {
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub thread_id: String,
    pub from_agent: AgentAddr,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Reply to `GET /session/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusReply {
    pub session_id: String,
    pub project: String,
    pub pid: u32,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub inbox_pending: u64,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_reply_omits_absent_token() {
        let reply = JoinReply {
            status: JoinState::PendingApproval,
            token: None,
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"status":"pending_approval"}"#);
    }

    #[test]
    fn test_feedback_kind_lowercase() {
        let req: FeedbackRequest = serde_json::from_value(serde_json::json!({
            "kind": "bug",
            "description": "router drops thread id",
            "from_agent": "a/home",
        }))
        .unwrap();
        assert_eq!(req.kind, FeedbackKind::Bug);
    }
}
