//! Configuration loading and env substitution.
//!
//! Config files: `intercom.yaml`, `intercom.yml`, or `intercom.json`,
//! searched in `./` then `~/.config/intercom/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values, plus a small set
//! of `INTERCOM_*` overrides applied after parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        AgentLauncherConfig, AuthConfig, DiscoveryConfig, HubConfig, IntercomConfig,
        MachineConfig, Mode, TelegramConfig,
    },
};
