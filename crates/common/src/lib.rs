//! Shared types, error definitions, and utilities used across all intercom crates.

pub mod addr;
pub mod error;
pub mod ids;

pub use {
    addr::{AgentAddr, HOME_PROJECT},
    error::{Error, FromMessage, IntercomError, Result},
};
