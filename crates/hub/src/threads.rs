//! Thread map: `thread_id → (mission, participants)`.
//!
//! Threads are process-lifetime state; a hub restart simply starts new
//! threads on the next chat.

use std::collections::HashMap;

use {intercom_common::AgentAddr, tokio::sync::Mutex};

#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub mission_id: String,
    pub participant_a: AgentAddr,
    pub participant_b: AgentAddr,
}

impl ThreadInfo {
    /// The participant opposite `from`, so `reply` resolves its recipient.
    pub fn other(&self, from: &AgentAddr) -> &AgentAddr {
        if *from == self.participant_a {
            &self.participant_b
        } else {
            &self.participant_a
        }
    }
}

/// Owned map of chat threads.
#[derive(Default)]
pub struct ThreadMap {
    threads: Mutex<HashMap<String, ThreadInfo>>,
}

impl ThreadMap {
    pub async fn get(&self, thread_id: &str) -> Option<ThreadInfo> {
        self.threads.lock().await.get(thread_id).cloned()
    }

    pub async fn record(&self, thread_id: &str, info: ThreadInfo) {
        self.threads
            .lock()
            .await
            .entry(thread_id.to_string())
            .or_insert(info);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_keeps_first_registration() {
        let map = ThreadMap::default();
        let a: AgentAddr = "a/p".parse().unwrap();
        let b: AgentAddr = "b/p".parse().unwrap();
        map.record(
            "t-1",
            ThreadInfo {
                mission_id: "m-1".into(),
                participant_a: a.clone(),
                participant_b: b.clone(),
            },
        )
        .await;
        map.record(
            "t-1",
            ThreadInfo {
                mission_id: "m-2".into(),
                participant_a: b.clone(),
                participant_b: a.clone(),
            },
        )
        .await;

        let info = map.get("t-1").await.unwrap();
        assert_eq!(info.mission_id, "m-1");
        assert_eq!(info.other(&a), &b);
        assert_eq!(info.other(&b), &a);
    }
}
