//! Heartbeat loop: best-effort presence announcements to the hub.

use std::sync::Arc;

use {
    intercom_protocol::{HEARTBEAT_INTERVAL_SECS, HeartbeatRequest},
    tracing::{debug, warn},
};

use crate::{hub_client::HubClient, state::DaemonState};

/// Run the heartbeat loop until the process exits. Failures are logged and
/// retried on the next tick, never surfaced.
pub async fn run_heartbeat_loop(state: Arc<DaemonState>, client: Arc<HubClient>) {
    let mut tick =
        tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        if !client.has_token().await {
            debug!("skipping heartbeat, not joined yet");
            continue;
        }

        let req = HeartbeatRequest {
            machine_id: state.machine_id.clone(),
            overlay_ip: state.overlay_ip.clone(),
            daemon_url: state.daemon_url.clone(),
            active_sessions: state.sessions.presence().await,
        };
        match client.heartbeat(&req).await {
            Ok(()) => debug!(sessions = req.active_sessions.len(), "heartbeat sent"),
            Err(e) => warn!(error = %e, "heartbeat failed, will retry next tick"),
        }
    }
}
