//! The per-node daemon: session presence, inbox delivery, and the child
//! agent supervisor.
//!
//! The daemon authenticates to the hub with its per-machine token, announces
//! active sessions via heartbeats, deposits incoming chat into per-session
//! inbox files, and launches child agents for missions, streaming their
//! structured activity events into a feedback log.

pub mod discovery;
pub mod error;
pub mod feedback;
pub mod heartbeat;
pub mod hub_client;
pub mod inbox;
pub mod launcher;
pub mod server;
pub mod sessions;
pub mod state;

pub use {
    error::DaemonError,
    hub_client::HubClient,
    server::{build_daemon_app, start_daemon},
    state::DaemonState,
};
