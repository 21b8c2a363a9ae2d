//! Routable messages and the `/api/route` request/reply pair.

use {intercom_common::AgentAddr, serde::{Deserialize, Serialize}};

use crate::mission::MissionStatus;

/// A routable message, tagged by `type` with its payload under `payload`.
///
/// Router dispatch is exhaustive on this enum; there is no open-dictionary
/// fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    /// Request/reply mission: launch the target agent with a prompt and wait
    /// for its answer via a later `response`.
    Ask { prompt: String },
    /// Fire-and-forget mission: launch the target agent with a message.
    Send { message: String },
    /// Mission answer flowing back from the target agent.
    Response { message: String },
    /// Explicit launch with a prompt and working directory contract.
    StartAgent {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    /// Mission-store status query.
    Status,
    /// Mission-store transcript query.
    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },
    /// Asynchronous chat into the target's session inbox.
    Chat {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },
    /// Follow-up on an existing chat thread.
    Reply { message: String, thread_id: String },
}

impl Message {
    /// Stable name of the variant, as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ask { .. } => "ask",
            Self::Send { .. } => "send",
            Self::Response { .. } => "response",
            Self::StartAgent { .. } => "start_agent",
            Self::Status => "status",
            Self::History { .. } => "history",
            Self::Chat { .. } => "chat",
            Self::Reply { .. } => "reply",
        }
    }

    /// The human-readable text carried by the message, for previews and
    /// policy `message_pattern` matching.
    pub fn text(&self) -> &str {
        match self {
            Self::Ask { prompt } | Self::StartAgent { prompt, .. } => prompt,
            Self::Send { message }
            | Self::Response { message }
            | Self::Chat { message, .. }
            | Self::Reply { message, .. } => message,
            Self::Status | Self::History { .. } => "",
        }
    }
}

/// Body of `POST /api/route`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    pub from_agent: AgentAddr,
    pub to_agent: AgentAddr,
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<String>,
}

/// Outcome of a route, as returned to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Delivered,
    Queued,
    Denied,
    NoActiveSession,
    Unreachable,
    Error,
}

/// Reply to `POST /api/route`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteReply {
    pub status: RouteStatus,
    pub mission_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Mission state, answered for `status` queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_status: Option<MissionStatus>,
    /// Transcript lines, answered for `history` queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RouteReply {
    pub fn new(status: RouteStatus, mission_id: impl Into<String>) -> Self {
        Self {
            status,
            mission_id: mission_id.into(),
            thread_id: None,
            mission_status: None,
            history: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_wire_shape() {
        let req = RouteRequest {
            from_agent: "a/p".parse().unwrap(),
            to_agent: "b/p".parse().unwrap(),
            message: Message::Chat {
                message: "hi".into(),
                thread_id: Some("t-111111".into()),
            },
            mission_id: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["payload"]["message"], "hi");
        assert_eq!(json["payload"]["thread_id"], "t-111111");
        assert_eq!(json["from_agent"], "a/p");
    }

    #[test]
    fn test_kind_names_are_stable() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "type": "start_agent",
            "payload": { "prompt": "list disks" },
        }))
        .unwrap();
        assert_eq!(msg.kind(), "start_agent");
        assert_eq!(msg.text(), "list disks");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = serde_json::json!({ "type": "broadcast", "payload": {} });
        assert!(serde_json::from_value::<Message>(raw).is_err());
    }
}
