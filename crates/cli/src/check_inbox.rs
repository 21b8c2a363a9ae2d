//! The `check-inbox` verb: drain unread inbox messages exactly once.
//!
//! `hook` output is meant to be pasted into an agent's context at a natural
//! break point; `json` is the raw entry list.

use std::path::PathBuf;

use intercom_config::IntercomConfig;

use crate::InboxFormat;

pub fn run(
    config: &IntercomConfig,
    session_id: Option<&str>,
    format: InboxFormat,
) -> anyhow::Result<()> {
    let inbox_dir = config.state_dir().join("inbox");

    let path = match session_id {
        Some(id) => Some(inbox_dir.join(format!("{id}.jsonl"))),
        None => most_recent_inbox(&inbox_dir)?,
    };

    let entries = match path {
        Some(path) if path.exists() => intercom_daemon::inbox::drain_file(&path)?,
        _ => Vec::new(),
    };

    match format {
        InboxFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        InboxFormat::Hook => {
            if entries.is_empty() {
                return Ok(());
            }
            println!("You have {} new intercom message(s):", entries.len());
            for entry in &entries {
                println!(
                    "- [{}] {} at {}: {}",
                    entry.thread_id,
                    entry.from_agent,
                    entry.timestamp.to_rfc3339(),
                    entry.message
                );
            }
            println!("Reply with the `reply` tool, citing the thread id.");
        },
    }
    Ok(())
}

/// The most recently modified inbox file, if any.
fn most_recent_inbox(dir: &std::path::Path) -> anyhow::Result<Option<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
