//! The hub: agent registry, approval engine, and message router.
//!
//! All state is threaded explicitly through [`state::HubState`] — the
//! registry, mission store, thread map, policy engine, operator console and
//! daemon client are named collaborators, never globals. Handlers live in
//! [`server`]; the routing logic itself in [`router`].

pub mod daemon_client;
pub mod error;
pub mod missions;
pub mod router;
pub mod server;
pub mod state;
pub mod threads;

pub use {
    error::HubError,
    server::{build_hub_app, start_hub},
    state::HubState,
};
