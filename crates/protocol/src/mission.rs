//! Mission bookkeeping types.

use serde::{Deserialize, Serialize};

/// Lifecycle of a routed mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    PendingApproval,
    Approved,
    Denied,
    Running,
    Completed,
    Failed,
}

impl MissionStatus {
    /// Whether the mission can still change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Completed | Self::Failed)
    }
}

/// One entry in a mission's feedback log.
///
/// Cursors are monotonically increasing per mission, starting at 1, and are
/// the resume point for incremental polling (`?feedback_since=N`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub cursor: u64,
    #[serde(flatten)]
    pub event: FeedbackEvent,
}

/// A structured activity event streamed from a child agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedbackEvent {
    /// Assistant prose.
    Text { text: String },
    /// A tool invocation with a one-line input summary.
    ToolUse { tool: String, summary: String },
    /// Turn boundary.
    Turn { turn: u32 },
}
