//! Identifier generation for sessions, threads, and missions.

use chrono::Utc;

/// Generate a session id: `s-<yyyymmdd>-<6hex>`.
pub fn session_id() -> String {
    format!("s-{}-{}", Utc::now().format("%Y%m%d"), short_hex())
}

/// Generate a thread id: `t-<6hex>`.
pub fn thread_id() -> String {
    format!("t-{}", short_hex())
}

/// Generate an opaque mission id.
pub fn mission_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn short_hex() -> String {
    let id = uuid::Uuid::new_v4();
    // Use first 6 hex chars for brevity.
    id.simple().to_string()[..6].to_string()
}
