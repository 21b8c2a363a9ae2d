//! Active session registry.
//!
//! At most one session per project is authoritative for chat routing: the
//! most recently registered live one. Entries whose pid is gone are removed
//! the moment they are observed dead.

use std::{collections::HashMap, path::PathBuf};

use {
    chrono::{DateTime, Utc},
    intercom_protocol::{SessionPresence, SessionStatus},
    nix::{sys::signal::kill, unistd::Pid},
    tokio::sync::Mutex,
    tracing::{debug, info},
};

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub project: String,
    pub pid: u32,
    pub inbox_path: PathBuf,
    pub registered_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub summary: Option<String>,
}

impl SessionRecord {
    pub fn presence(&self) -> SessionPresence {
        SessionPresence {
            session_id: self.session_id.clone(),
            project: self.project.clone(),
            status: self.status,
            summary: self.summary.clone(),
        }
    }
}

/// Probe a pid with the null signal.
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(raw), None).is_ok()
}

/// In-process map of the sessions this daemon answers for.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub async fn register(&self, record: SessionRecord) {
        info!(
            session_id = %record.session_id,
            project = %record.project,
            pid = record.pid,
            "session registered"
        );
        self.sessions
            .lock()
            .await
            .insert(record.session_id.clone(), record);
    }

    pub async fn unregister(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(session_id).is_some();
        if removed {
            info!(session_id, "session unregistered");
        }
        removed
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn list(&self) -> Vec<SessionRecord> {
        let mut all: Vec<SessionRecord> =
            self.sessions.lock().await.values().cloned().collect();
        all.sort_by_key(|s| s.registered_at);
        all
    }

    /// Resolve the delivery target: an explicit session id, or the most
    /// recently registered live session for the project. Dead entries found
    /// along the way are removed.
    pub async fn resolve_live(
        &self,
        session_id: Option<&str>,
        project: &str,
    ) -> Option<SessionRecord> {
        let mut sessions = self.sessions.lock().await;

        if let Some(id) = session_id {
            let record = sessions.get(id).cloned()?;
            if pid_alive(record.pid) {
                return Some(record);
            }
            sessions.remove(id);
            debug!(session_id = id, "removed dead session");
            return None;
        }

        // Most recent registration wins; older entries for the project are
        // stale.
        let mut candidates: Vec<SessionRecord> = sessions
            .values()
            .filter(|s| s.project == project)
            .cloned()
            .collect();
        candidates.sort_by_key(|s| std::cmp::Reverse(s.registered_at));

        for candidate in candidates {
            if pid_alive(candidate.pid) {
                return Some(candidate);
            }
            sessions.remove(&candidate.session_id);
            debug!(session_id = %candidate.session_id, "removed dead session");
        }
        None
    }

    /// Live sessions as heartbeat presence entries; dead pids are pruned.
    ///
    /// At most one entry per project is announced: the most recently
    /// registered live session, the authoritative one for chat routing.
    /// Older entries are stale and never reach the hub's presence cache.
    pub async fn presence(&self) -> Vec<SessionPresence> {
        let mut sessions = self.sessions.lock().await;
        let dead: Vec<String> = sessions
            .values()
            .filter(|s| !pid_alive(s.pid))
            .map(|s| s.session_id.clone())
            .collect();
        for id in dead {
            sessions.remove(&id);
            debug!(session_id = %id, "removed dead session");
        }

        let mut authoritative: HashMap<&str, &SessionRecord> = HashMap::new();
        for session in sessions.values() {
            match authoritative.get(session.project.as_str()) {
                Some(current) if current.registered_at >= session.registered_at => {},
                _ => {
                    authoritative.insert(session.project.as_str(), session);
                },
            }
        }
        let mut live: Vec<&SessionRecord> = authoritative.into_values().collect();
        live.sort_by_key(|s| s.registered_at);
        live.iter().map(|s| s.presence()).collect()
    }
}
