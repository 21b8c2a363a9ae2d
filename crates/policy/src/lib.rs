//! Approval policy engine: ordered glob/regex rules plus runtime grants.
//!
//! Rules decide whether a routed message is auto-approved, auto-denied, or
//! parked on an operator prompt. Grants remember operator choices scoped to a
//! mission or an agent pair for the lifetime of the hub process.
//!
//! [`PolicyEngine::decide`] is pure — no I/O, no clock. Mutation happens only
//! through [`PolicyEngine::record`].

pub mod engine;
pub mod rules;

pub use {
    engine::{Decision, GrantOutcome, GrantScope, PolicyEngine, PolicyRequest},
    rules::{ApprovalMode, PolicyDefaults, PolicyFile, PolicyRule},
};
