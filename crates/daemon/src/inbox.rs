//! Per-session inbox files.
//!
//! One JSON object per line, UTF-8, LF-terminated, at
//! `<state_dir>/inbox/<session_id>.jsonl`. The daemon appends; the agent's
//! drain path rewrites the file with `read` flags under the same per-file
//! mutex. No advisory file locks — writer and reader share this process.

use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::Arc,
};

use {
    anyhow::Result,
    intercom_protocol::InboxEntry,
    tokio::sync::Mutex,
    tracing::debug,
};

/// Append-only inbox storage with exactly-once draining.
pub struct InboxStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InboxStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The inbox file path for a session.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", sanitize(session_id)))
    }

    async fn file_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .await
                .entry(session_id.to_string())
                .or_default(),
        )
    }

    /// Append one entry. `fsync` is intentionally skipped.
    pub async fn append(&self, session_id: &str, entry: &InboxEntry) -> Result<()> {
        let lock = self.file_lock(session_id).await;
        let _guard = lock.lock().await;

        let path = self.path_for(session_id);
        let line = serde_json::to_string(entry)?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{line}")?;
            Ok(())
        })
        .await??;

        debug!(session_id, "inbox line appended");
        Ok(())
    }

    /// Drain unread entries exactly once: returns them and rewrites the file
    /// with every entry marked read. A second drain on an unchanged inbox
    /// returns empty.
    pub async fn drain(&self, session_id: &str) -> Result<Vec<InboxEntry>> {
        let lock = self.file_lock(session_id).await;
        let _guard = lock.lock().await;

        let path = self.path_for(session_id);
        tokio::task::spawn_blocking(move || drain_file(&path)).await?
    }

    /// Number of unread entries without consuming them.
    pub async fn pending_count(&self, session_id: &str) -> Result<u64> {
        let lock = self.file_lock(session_id).await;
        let _guard = lock.lock().await;

        let path = self.path_for(session_id);
        tokio::task::spawn_blocking(move || -> Result<u64> {
            Ok(read_entries(&path)?.iter().filter(|e| !e.read).count() as u64)
        })
        .await?
    }
}

/// Synchronous drain used by both the store and the `check-inbox` CLI path.
pub fn drain_file(path: &std::path::Path) -> Result<Vec<InboxEntry>> {
    let mut entries = read_entries(path)?;
    let unread: Vec<InboxEntry> = entries.iter().filter(|e| !e.read).cloned().collect();
    if unread.is_empty() {
        return Ok(unread);
    }

    for entry in &mut entries {
        entry.read = true;
    }

    // Atomic replace so a crash mid-rewrite never loses messages.
    let tmp = path.with_extension("jsonl.tmp");
    let mut out = String::with_capacity(entries.len() * 128);
    for entry in &entries {
        out.push_str(&serde_json::to_string(entry)?);
        out.push('\n');
    }
    fs::write(&tmp, out)?;
    fs::rename(&tmp, path)?;

    Ok(unread)
}

fn read_entries(path: &std::path::Path) -> Result<Vec<InboxEntry>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entries = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(line)?);
    }
    Ok(entries)
}

fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {chrono::Utc, intercom_common::AgentAddr};

    use super::*;

    fn entry(message: &str) -> InboxEntry {
        InboxEntry {
            thread_id: "t-abc123".into(),
            from_agent: "a/p".parse::<AgentAddr>().unwrap(),
            timestamp: Utc::now(),
            message: message.into(),
            read: false,
        }
    }

    #[tokio::test]
    async fn test_append_grows_one_line_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = InboxStore::new(dir.path().to_path_buf());
        store.append("s-1", &entry("one")).await.unwrap();
        store.append("s-1", &entry("two")).await.unwrap();

        let raw = fs::read_to_string(store.path_for("s-1")).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));
        assert_eq!(store.pending_count("s-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_drain_is_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = InboxStore::new(dir.path().to_path_buf());
        store.append("s-1", &entry("one")).await.unwrap();
        store.append("s-1", &entry("two")).await.unwrap();

        let first = store.drain("s-1").await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|e| !e.read));

        // Unchanged inbox drains empty; the file still holds the history.
        let second = store.drain("s-1").await.unwrap();
        assert!(second.is_empty());
        assert_eq!(store.pending_count("s-1").await.unwrap(), 0);
        let raw = fs::read_to_string(store.path_for("s-1")).unwrap();
        assert_eq!(raw.lines().count(), 2);

        // A new message after the drain is picked up alone.
        store.append("s-1", &entry("three")).await.unwrap();
        let third = store.drain("s-1").await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].message, "three");
    }

    #[tokio::test]
    async fn test_drain_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = InboxStore::new(dir.path().to_path_buf());
        assert!(store.drain("s-none").await.unwrap().is_empty());
    }

    #[test]
    fn test_sanitize_keeps_session_ids_path_safe() {
        assert_eq!(sanitize("s-20260801-abc123"), "s-20260801-abc123");
        assert_eq!(sanitize("../etc/passwd"), "___etc_passwd");
    }
}
