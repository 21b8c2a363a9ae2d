//! Registry row types.

use {chrono::Utc, intercom_protocol::MachineStatus};

/// One machine row.
#[derive(Debug, Clone)]
pub struct MachineRecord {
    pub machine_id: String,
    pub display_name: String,
    pub overlay_ip: String,
    pub daemon_url: String,
    pub token: String,
    pub status: MachineStatus,
    pub created_at: i64,
    pub last_seen: Option<i64>,
}

impl MachineRecord {
    /// A machine is online if a heartbeat was seen within the window.
    pub fn is_online_at(&self, now: i64) -> bool {
        self.last_seen
            .is_some_and(|seen| now - seen <= intercom_protocol::ONLINE_WINDOW_SECS)
    }

    pub fn is_online(&self) -> bool {
        self.is_online_at(Utc::now().timestamp())
    }
}

/// One project row.
#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub machine_id: String,
    pub project_id: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub path: String,
}

/// Filter for [`crate::Registry::list_agents`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AgentFilter {
    #[default]
    All,
    Online,
    Machine(String),
}

impl AgentFilter {
    /// Parse the `?filter=` query value: `all`, `online`, or `machine:<id>`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "online" => Some(Self::Online),
            other => other.strip_prefix("machine:").map(|id| Self::Machine(id.to_string())),
        }
    }
}
