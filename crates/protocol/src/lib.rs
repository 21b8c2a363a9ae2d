//! Wire types shared by the hub and daemon HTTP surfaces.
//!
//! All communication is JSON over HTTP/1.1. Signed requests carry the
//! `X-Intercom-Machine`, `X-Intercom-Ts` and `X-Intercom-Sig` headers; the
//! signing scheme itself lives in `intercom-auth`.

use serde::{Deserialize, Serialize};

pub mod api;
pub mod message;
pub mod mission;
pub mod session;

pub use {
    api::{
        AgentInfo, AgentsReply, DeliverRequest, DiscoverReply, ErrorBody, FeedbackKind,
        FeedbackRequest, HeartbeatRequest, JoinReply, JoinRequest, JoinState,
        MissionPollReply, MissionStartReply, MissionStartRequest, ProjectManifest,
        RegisterRequest, SessionRegisterReply, SessionRegisterRequest, SessionStatusReply,
    },
    message::{Message, RouteReply, RouteRequest, RouteStatus},
    mission::{FeedbackEvent, FeedbackItem, MissionStatus},
    session::{InboxEntry, SessionPresence, SessionStatus},
};

// ── Constants ────────────────────────────────────────────────────────────────

/// Default listen port for both hub and daemon.
pub const DEFAULT_PORT: u16 = 7700;

/// Heartbeat cadence (daemon → hub).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Outbound HTTP timeouts.
pub const ROUTE_TIMEOUT_SECS: u64 = 10;
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 5;
pub const DELIVER_TIMEOUT_SECS: u64 = 2;

/// A machine is online if a heartbeat was seen within this window.
pub const ONLINE_WINDOW_SECS: i64 = 90;

/// Operator approval wait before a parked mission is denied.
pub const APPROVAL_TIMEOUT_SECS: u64 = 600;

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const BAD_ENVELOPE: &str = "bad_envelope";
    pub const AUTH_STALE: &str = "auth_stale";
    pub const AUTH_BAD_SIGNATURE: &str = "auth_bad_signature";
    pub const AUTH_UNKNOWN_MACHINE: &str = "auth_unknown_machine";
    pub const NOT_FOUND: &str = "not_found";
    pub const NO_ACTIVE_SESSION: &str = "no_active_session";
    pub const PATH_NOT_ALLOWED: &str = "path_not_allowed";
    pub const UNREACHABLE: &str = "unreachable";
    pub const DENIED_BY_POLICY: &str = "denied_by_policy";
    pub const DENIED_BY_OPERATOR: &str = "denied_by_operator";
    pub const APPROVAL_TIMEOUT: &str = "approval_timeout";
    pub const TIMEOUT: &str = "timeout";
    pub const INTERNAL: &str = "internal";
}

/// Machine lifecycle status in the hub registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Pending,
    Approved,
    Denied,
    Revoked,
}

impl MachineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_status_roundtrip() {
        for s in [
            MachineStatus::Pending,
            MachineStatus::Approved,
            MachineStatus::Denied,
            MachineStatus::Revoked,
        ] {
            assert_eq!(MachineStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MachineStatus::parse("bogus"), None);
    }
}
