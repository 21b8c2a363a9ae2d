//! In-memory mission store.
//!
//! Missions live for the hub's lifetime. Each mission owns its message log
//! (strict router-arrival order), its feedback log (cursors from 1), and a
//! gate that serialises routing within the mission — including across
//! approval pauses — without blocking unrelated traffic.

use std::{collections::HashMap, sync::Arc};

use {
    chrono::{DateTime, Utc},
    intercom_common::AgentAddr,
    intercom_protocol::{FeedbackEvent, FeedbackItem, MissionPollReply, MissionStatus},
    tokio::sync::Mutex,
};

/// One line of a mission's message log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub from: AgentAddr,
    pub kind: String,
    pub text: String,
}

/// Hub-side record of one routed interaction.
#[derive(Debug, Clone)]
pub struct Mission {
    pub mission_id: String,
    pub from: AgentAddr,
    pub to: AgentAddr,
    pub kind: String,
    pub status: MissionStatus,
    pub status_label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub thread_id: Option<String>,
    /// Mission id local to the executing daemon, once launched.
    pub daemon_mission_id: Option<String>,
    pub output: Option<String>,
    pub messages: Vec<LogEntry>,
    pub feedback: Vec<FeedbackItem>,
}

impl Mission {
    pub fn poll_reply(&self, feedback_since: u64) -> MissionPollReply {
        MissionPollReply {
            mission_id: self.mission_id.clone(),
            status: self.status,
            status_label: self.status_label.clone(),
            output: self.output.clone(),
            feedback: self
                .feedback
                .iter()
                .filter(|f| f.cursor > feedback_since)
                .cloned()
                .collect(),
        }
    }
}

struct Slot {
    mission: Mission,
    gate: Arc<Mutex<()>>,
}

/// Owner of all missions in this hub process.
#[derive(Default)]
pub struct MissionStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MissionStore {
    /// Get or create a mission, returning its id and ordering gate.
    pub async fn create_or_get(
        &self,
        mission_id: Option<String>,
        from: &AgentAddr,
        to: &AgentAddr,
        kind: &str,
    ) -> (String, Arc<Mutex<()>>) {
        let id = mission_id.unwrap_or_else(intercom_common::ids::mission_id);
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(id.clone()).or_insert_with(|| Slot {
            mission: Mission {
                mission_id: id.clone(),
                from: from.clone(),
                to: to.clone(),
                kind: kind.to_string(),
                status: MissionStatus::PendingApproval,
                status_label: None,
                created_at: Utc::now(),
                thread_id: None,
                daemon_mission_id: None,
                output: None,
                messages: Vec::new(),
                feedback: Vec::new(),
            },
            gate: Arc::new(Mutex::new(())),
        });
        (id, Arc::clone(&slot.gate))
    }

    /// The ordering gate of an existing mission.
    pub async fn gate(&self, mission_id: &str) -> Option<Arc<Mutex<()>>> {
        self.slots
            .lock()
            .await
            .get(mission_id)
            .map(|s| Arc::clone(&s.gate))
    }

    pub async fn exists(&self, mission_id: &str) -> bool {
        self.slots.lock().await.contains_key(mission_id)
    }

    pub async fn snapshot(&self, mission_id: &str) -> Option<Mission> {
        self.slots
            .lock()
            .await
            .get(mission_id)
            .map(|s| s.mission.clone())
    }

    pub async fn list(&self) -> Vec<Mission> {
        let slots = self.slots.lock().await;
        let mut missions: Vec<Mission> = slots.values().map(|s| s.mission.clone()).collect();
        missions.sort_by_key(|m| m.created_at);
        missions
    }

    pub async fn set_status(
        &self,
        mission_id: &str,
        status: MissionStatus,
        label: Option<&str>,
    ) {
        if let Some(slot) = self.slots.lock().await.get_mut(mission_id) {
            slot.mission.status = status;
            slot.mission.status_label = label.map(str::to_string);
        }
    }

    pub async fn set_thread(&self, mission_id: &str, thread_id: &str) {
        if let Some(slot) = self.slots.lock().await.get_mut(mission_id) {
            slot.mission.thread_id = Some(thread_id.to_string());
        }
    }

    pub async fn bind_daemon_mission(&self, mission_id: &str, daemon_mission_id: &str) {
        if let Some(slot) = self.slots.lock().await.get_mut(mission_id) {
            slot.mission.daemon_mission_id = Some(daemon_mission_id.to_string());
        }
    }

    /// Append to the message log in arrival order.
    pub async fn append_message(&self, mission_id: &str, entry: LogEntry) {
        if let Some(slot) = self.slots.lock().await.get_mut(mission_id) {
            slot.mission.messages.push(entry);
        }
    }

    /// Append one feedback event, assigning the next cursor.
    pub async fn append_feedback(&self, mission_id: &str, event: FeedbackEvent) -> Option<u64> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(mission_id)?;
        let cursor = slot.mission.feedback.len() as u64 + 1;
        slot.mission.feedback.push(FeedbackItem { cursor, event });
        Some(cursor)
    }

    /// Merge a poll result from the executing daemon: new feedback items get
    /// fresh hub-local cursors, output is replaced, terminal statuses stick.
    pub async fn merge_daemon_poll(&self, mission_id: &str, poll: MissionPollReply) {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.get_mut(mission_id) else {
            return;
        };
        for item in poll.feedback {
            let cursor = slot.mission.feedback.len() as u64 + 1;
            slot.mission.feedback.push(FeedbackItem {
                cursor,
                event: item.event,
            });
        }
        if poll.output.is_some() {
            slot.mission.output = poll.output;
        }
        if poll.status.is_terminal() {
            slot.mission.status = poll.status;
            slot.mission.status_label = poll.status_label;
        }
    }

    /// Highest feedback cursor already known for a mission.
    pub async fn feedback_high_water(&self, mission_id: &str) -> u64 {
        self.slots
            .lock()
            .await
            .get(mission_id)
            .map(|s| s.mission.feedback.len() as u64)
            .unwrap_or(0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> AgentAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_is_idempotent_for_same_id() {
        let store = MissionStore::default();
        let (id1, _) = store
            .create_or_get(Some("m-1".into()), &addr("a/p"), &addr("b/p"), "ask")
            .await;
        let (id2, _) = store
            .create_or_get(Some("m-1".into()), &addr("a/p"), &addr("b/p"), "ask")
            .await;
        assert_eq!(id1, id2);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_cursors_start_at_one_and_increase() {
        let store = MissionStore::default();
        let (id, _) = store
            .create_or_get(None, &addr("a/p"), &addr("b/p"), "ask")
            .await;

        let c1 = store
            .append_feedback(&id, FeedbackEvent::Text { text: "hi".into() })
            .await
            .unwrap();
        let c2 = store
            .append_feedback(&id, FeedbackEvent::Turn { turn: 1 })
            .await
            .unwrap();
        assert_eq!((c1, c2), (1, 2));

        let m = store.snapshot(&id).await.unwrap();
        assert_eq!(m.poll_reply(0).feedback.len(), 2);
        assert_eq!(m.poll_reply(1).feedback.len(), 1);
        assert_eq!(m.poll_reply(1).feedback[0].cursor, 2);
    }

    #[tokio::test]
    async fn test_merge_daemon_poll_renumbers_cursors() {
        let store = MissionStore::default();
        let (id, _) = store
            .create_or_get(None, &addr("a/p"), &addr("b/p"), "ask")
            .await;
        store
            .append_feedback(&id, FeedbackEvent::Turn { turn: 1 })
            .await;

        store
            .merge_daemon_poll(
                &id,
                MissionPollReply {
                    mission_id: "d-local".into(),
                    status: MissionStatus::Completed,
                    status_label: None,
                    output: Some("done".into()),
                    feedback: vec![FeedbackItem {
                        cursor: 1,
                        event: FeedbackEvent::Text { text: "x".into() },
                    }],
                },
            )
            .await;

        let m = store.snapshot(&id).await.unwrap();
        assert_eq!(m.status, MissionStatus::Completed);
        assert_eq!(m.output.as_deref(), Some("done"));
        assert_eq!(m.feedback.len(), 2);
        assert_eq!(m.feedback[1].cursor, 2);
        assert_eq!(store.feedback_high_water(&id).await, 2);
    }

    #[tokio::test]
    async fn test_gate_serialises_same_mission() {
        let store = Arc::new(MissionStore::default());
        let (id, gate) = store
            .create_or_get(None, &addr("a/p"), &addr("b/p"), "chat")
            .await;

        let guard = gate.lock().await;
        // A second router task for the same mission must wait on the gate.
        let gate2 = store.gate(&id).await.unwrap();
        assert!(gate2.try_lock().is_err());
        drop(guard);
        assert!(gate2.try_lock().is_ok());
    }
}
