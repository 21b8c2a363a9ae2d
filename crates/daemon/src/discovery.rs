//! Project auto-discovery.
//!
//! Scans configured roots for directories carrying a marker file
//! (`CLAUDE.md`, `.git`, `AGENTS.md` by default), skipping the exclusion
//! list. The result is registered with the hub as this machine's project
//! manifest; the synthetic `home` project is always included.

use std::{fs, path::Path};

use {
    intercom_config::DiscoveryConfig,
    intercom_protocol::ProjectManifest,
    tracing::{debug, warn},
};

/// Scan for projects under the configured roots.
pub fn scan_projects(config: &DiscoveryConfig) -> Vec<ProjectManifest> {
    let mut projects = vec![ProjectManifest {
        project_id: intercom_common::HOME_PROJECT.into(),
        description: "home agent".into(),
        capabilities: Vec::new(),
        path: String::new(),
    }];

    if !config.enabled {
        return projects;
    }

    for root in &config.scan_paths {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "cannot scan project root");
                continue;
            },
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || config.exclude.iter().any(|x| x == name) {
                continue;
            }
            if !has_marker(&path, &config.detect_by) {
                continue;
            }

            debug!(project = name, path = %path.display(), "discovered project");
            projects.push(ProjectManifest {
                project_id: name.to_string(),
                description: describe(&path),
                capabilities: Vec::new(),
                path: path.display().to_string(),
            });
        }
    }

    projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));
    projects.dedup_by(|a, b| a.project_id == b.project_id);
    projects
}

fn has_marker(dir: &Path, markers: &[String]) -> bool {
    markers.iter().any(|m| dir.join(m).exists())
}

/// Short project description, taken from the first heading of `CLAUDE.md`
/// or `AGENTS.md` when present.
fn describe(dir: &Path) -> String {
    for candidate in ["CLAUDE.md", "AGENTS.md"] {
        let Ok(content) = fs::read_to_string(dir.join(candidate)) else {
            continue;
        };
        if let Some(heading) = content
            .lines()
            .find(|l| l.starts_with('#'))
            .map(|l| l.trim_start_matches('#').trim())
            && !heading.is_empty()
        {
            return heading.to_string();
        }
    }
    String::new()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> DiscoveryConfig {
        DiscoveryConfig {
            enabled: true,
            scan_paths: vec![root.to_path_buf()],
            ..DiscoveryConfig::default()
        }
    }

    #[test]
    fn test_scan_finds_marked_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("api")).unwrap();
        fs::write(dir.path().join("api/CLAUDE.md"), "# API service\n").unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/notes.txt"), "no marker").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/CLAUDE.md"), "x").unwrap();

        let projects = scan_projects(&config(dir.path()));
        let ids: Vec<&str> = projects.iter().map(|p| p.project_id.as_str()).collect();
        assert_eq!(ids, ["api", "home"]);
        assert_eq!(projects[0].description, "API service");
    }

    #[test]
    fn test_git_marker_counts() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("svc/.git")).unwrap();

        let projects = scan_projects(&config(dir.path()));
        assert!(projects.iter().any(|p| p.project_id == "svc"));
    }

    #[test]
    fn test_disabled_discovery_still_has_home() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.enabled = false;

        let projects = scan_projects(&cfg);
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].project_id, "home");
    }
}
