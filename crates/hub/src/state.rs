//! Explicit hub state threaded through every handler.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use {
    intercom_console::OperatorConsole,
    intercom_policy::PolicyEngine,
    intercom_protocol::SessionPresence,
    intercom_registry::Registry,
    tokio::sync::Mutex,
};

use crate::{daemon_client::DaemonClient, missions::MissionStore, threads::ThreadMap};

/// Named collaborators of the hub. No globals; handlers receive an
/// `Arc<HubState>`.
pub struct HubState {
    /// This hub's own machine id, used to sign outbound daemon calls.
    pub machine_id: String,
    pub registry: Registry,
    pub missions: MissionStore,
    pub threads: ThreadMap,
    pub policy: Mutex<PolicyEngine>,
    pub console: Arc<dyn OperatorConsole>,
    pub daemons: DaemonClient,
    /// Latest heartbeat presence per machine.
    presence: Mutex<HashMap<String, Vec<SessionPresence>>>,
    /// Machines with a join announcement currently in front of the operator.
    joins_in_flight: Mutex<HashSet<String>>,
}

impl HubState {
    pub fn new(
        machine_id: impl Into<String>,
        registry: Registry,
        policy: PolicyEngine,
        console: Arc<dyn OperatorConsole>,
    ) -> Arc<Self> {
        let machine_id = machine_id.into();
        Arc::new(Self {
            daemons: DaemonClient::new(machine_id.clone()),
            machine_id,
            registry,
            missions: MissionStore::default(),
            threads: ThreadMap::default(),
            policy: Mutex::new(policy),
            console,
            presence: Mutex::new(HashMap::new()),
            joins_in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Replace a machine's announced sessions with its latest heartbeat.
    pub async fn update_presence(&self, machine_id: &str, sessions: Vec<SessionPresence>) {
        self.presence
            .lock()
            .await
            .insert(machine_id.to_string(), sessions);
    }

    /// The announced active session for `(machine, project)`. Daemons
    /// announce at most one session per project, the most recently
    /// registered; the daemon stays authoritative at delivery time.
    pub async fn find_session(&self, machine_id: &str, project: &str) -> Option<SessionPresence> {
        self.presence
            .lock()
            .await
            .get(machine_id)?
            .iter()
            .find(|s| s.project == project)
            .cloned()
    }

    pub async fn sessions_for(&self, machine_id: &str) -> Vec<SessionPresence> {
        self.presence
            .lock()
            .await
            .get(machine_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns true when this call claimed the announcement slot.
    pub async fn begin_join_announcement(&self, machine_id: &str) -> bool {
        self.joins_in_flight
            .lock()
            .await
            .insert(machine_id.to_string())
    }

    pub async fn end_join_announcement(&self, machine_id: &str) {
        self.joins_in_flight.lock().await.remove(machine_id);
    }
}
