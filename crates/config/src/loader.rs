use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::IntercomConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["intercom.yaml", "intercom.yml", "intercom.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<IntercomConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./intercom.{yaml,yml,json}` (project-local)
/// 2. `~/.config/intercom/intercom.{yaml,yml,json}` (user-global)
///
/// Returns `IntercomConfig::default()` (with env overrides applied) if no
/// config file is found.
pub fn discover_and_load() -> IntercomConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = IntercomConfig::default();
    apply_env_overrides(&mut config);
    config
}

/// Apply `INTERCOM_*` environment overrides onto a parsed config.
///
/// Recognised: `INTERCOM_TELEGRAM_BOT_TOKEN`, `INTERCOM_TELEGRAM_GROUP_ID`,
/// `INTERCOM_TELEGRAM_OWNER_ID`, `INTERCOM_HUB_URL`, `INTERCOM_TOKEN`.
pub fn apply_env_overrides(config: &mut IntercomConfig) {
    if let Ok(token) = std::env::var("INTERCOM_TELEGRAM_BOT_TOKEN") {
        config.telegram.bot_token = Some(token);
    }
    if let Ok(raw) = std::env::var("INTERCOM_TELEGRAM_GROUP_ID") {
        match raw.parse() {
            Ok(id) => config.telegram.group_id = Some(id),
            Err(_) => warn!(%raw, "INTERCOM_TELEGRAM_GROUP_ID is not an integer, ignoring"),
        }
    }
    if let Ok(raw) = std::env::var("INTERCOM_TELEGRAM_OWNER_ID") {
        match raw.parse() {
            Ok(id) => config.telegram.owner_id = Some(id),
            Err(_) => warn!(%raw, "INTERCOM_TELEGRAM_OWNER_ID is not an integer, ignoring"),
        }
    }
    if let Ok(url) = std::env::var("INTERCOM_HUB_URL") {
        config.hub.url = Some(url);
    }
    if let Ok(token) = std::env::var("INTERCOM_TOKEN") {
        config.auth.token = Some(token);
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/intercom/
    if let Some(dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/intercom/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "intercom").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<IntercomConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("yaml");

    match ext {
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intercom.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "mode: hub\nmachine:\n  id: hub-box").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.machine.id, "hub-box");
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intercom.ini");
        std::fs::write(&path, "mode=hub").unwrap();
        assert!(load_config(&path).is_err());
    }
}
