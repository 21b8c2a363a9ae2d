//! Config schema types (mode, machine identity, hub, auth, discovery,
//! launcher, operator console).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which roles this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Hub,
    Daemon,
    /// Hub and daemon in one process, for single-machine setups.
    #[default]
    Standalone,
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntercomConfig {
    pub mode: Mode,
    pub machine: MachineConfig,
    pub telegram: TelegramConfig,
    pub hub: HubConfig,
    pub auth: AuthConfig,
    pub discovery: DiscoveryConfig,
    pub agent_launcher: AgentLauncherConfig,
    /// Directory for inbox files and the registry database. Defaults to the
    /// platform data dir (`~/.local/share/intercom` on Linux).
    pub state_dir: Option<PathBuf>,
    /// Approval policy file. Defaults to `policy.yaml` next to the config.
    pub policy_path: Option<PathBuf>,
}

impl IntercomConfig {
    /// Resolve the state directory, falling back to the platform default.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "intercom")
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".intercom"))
    }
}

/// This machine's stable identity on the overlay network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Stable machine id, chosen by the operator.
    pub id: String,
    /// Human-facing name shown in join prompts and listings.
    pub display_name: String,
    /// Address on the overlay network, announced in heartbeats.
    pub overlay_ip: String,
}

impl MachineConfig {
    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

/// Operator console (Telegram bot) settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: Option<String>,
    /// Group where mission threads and approvals are posted.
    pub group_id: Option<i64>,
    /// Operator user id allowed to resolve approvals.
    pub owner_id: Option<i64>,
}

impl TelegramConfig {
    /// The console is enabled when a bot token and group are configured.
    pub fn is_enabled(&self) -> bool {
        self.bot_token.is_some() && self.group_id.is_some()
    }
}

/// Hub location (daemon side) and listen address (hub side).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Base URL of the hub, e.g. `http://10.0.0.1:7700`.
    pub url: Option<String>,
    /// Listen address for the hub or daemon HTTP server.
    pub listen: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: None,
            listen: "0.0.0.0:7700".into(),
        }
    }
}

/// Shared-token authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Per-machine secret issued by the hub on join approval.
    pub token: Option<String>,
}

/// Project auto-discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// Roots scanned for project marker files.
    pub scan_paths: Vec<PathBuf>,
    /// Marker files that identify a directory as a project.
    pub detect_by: Vec<String>,
    /// Directory names skipped during the scan.
    pub exclude: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_paths: Vec::new(),
            detect_by: vec!["CLAUDE.md".into(), ".git".into(), "AGENTS.md".into()],
            exclude: vec!["node_modules".into(), "target".into(), ".cache".into()],
        }
    }
}

/// Child agent launcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLauncherConfig {
    /// Command spawned for each mission; the prompt is appended as the final
    /// argument.
    pub default_command: String,
    pub default_args: Vec<String>,
    /// Mission working directories must fall under one of these.
    pub allowed_paths: Vec<PathBuf>,
    /// Wall-clock cap per mission, after which the child is killed.
    pub max_mission_duration_secs: u64,
}

impl Default for AgentLauncherConfig {
    fn default() -> Self {
        Self {
            default_command: "claude".into(),
            default_args: vec!["-p".into()],
            allowed_paths: Vec::new(),
            max_mission_duration_secs: 1800,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = IntercomConfig::default();
        assert_eq!(cfg.mode, Mode::Standalone);
        assert!(cfg.discovery.enabled);
        assert_eq!(cfg.hub.listen, "0.0.0.0:7700");
        assert_eq!(cfg.agent_launcher.max_mission_duration_secs, 1800);
        assert!(!cfg.telegram.is_enabled());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let cfg: IntercomConfig = serde_yaml::from_str(
            "mode: daemon\nmachine:\n  id: alpha\nhub:\n  url: http://10.0.0.1:7700\n",
        )
        .unwrap();
        assert_eq!(cfg.mode, Mode::Daemon);
        assert_eq!(cfg.machine.id, "alpha");
        assert_eq!(cfg.machine.display_name(), "alpha");
        assert_eq!(cfg.hub.url.as_deref(), Some("http://10.0.0.1:7700"));
        assert_eq!(cfg.discovery.detect_by, ["CLAUDE.md", ".git", "AGENTS.md"]);
    }
}
