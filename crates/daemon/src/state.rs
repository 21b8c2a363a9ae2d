//! Explicit daemon state threaded through every handler.

use std::path::PathBuf;

use crate::{inbox::InboxStore, launcher::MissionRunner, sessions::SessionRegistry};

/// Named collaborators of the daemon HTTP surface and supervisor.
pub struct DaemonState {
    /// This machine's stable identity.
    pub machine_id: String,
    /// Address announced in heartbeats.
    pub overlay_ip: String,
    /// Base URL the hub uses to call back into this daemon.
    pub daemon_url: String,
    /// Per-machine secret verifying inbound hub calls; absent until joined.
    pub token: tokio::sync::RwLock<Option<String>>,
    pub sessions: SessionRegistry,
    pub inbox: InboxStore,
    pub runner: MissionRunner,
}

impl DaemonState {
    pub fn new(
        machine_id: impl Into<String>,
        overlay_ip: impl Into<String>,
        daemon_url: impl Into<String>,
        token: Option<String>,
        state_dir: PathBuf,
        launcher: intercom_config::AgentLauncherConfig,
    ) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            machine_id: machine_id.into(),
            overlay_ip: overlay_ip.into(),
            daemon_url: daemon_url.into(),
            token: tokio::sync::RwLock::new(token),
            sessions: SessionRegistry::default(),
            inbox: InboxStore::new(state_dir.join("inbox")),
            runner: MissionRunner::new(launcher),
        })
    }

    pub async fn set_token(&self, token: String) {
        *self.token.write().await = Some(token);
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }
}
