//! Operator console adapter.
//!
//! The hub depends on external human-facing chat only through the
//! [`OperatorConsole`] trait: join announcements, approval prompts, mission
//! visibility lines, and one-shot notifications. The Telegram implementation
//! lives in [`telegram`]; tests and headless runs use [`NoopConsole`].

pub mod noop;
pub mod telegram;

use {async_trait::async_trait, intercom_policy::GrantScope};

pub use {noop::NoopConsole, telegram::TelegramConsole};

/// Operator's answer to a join announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDecision {
    Approved,
    Denied,
    /// The operator did not act within the console's window; the join stays
    /// pending and can be resolved later.
    Pending,
}

/// An approval prompt for one routed message.
#[derive(Debug, Clone)]
pub struct ApprovalPrompt {
    pub mission_id: String,
    pub from: String,
    pub to: String,
    pub kind: String,
    /// Short message preview shown to the operator.
    pub preview: String,
    /// Scopes the operator may choose from.
    pub scopes: Vec<GrantScope>,
}

/// Operator's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalChoice {
    Allow(GrantScope),
    Deny,
    Timeout,
}

/// Outbound surface to the human operator.
///
/// Implementations must not block the hub beyond their own bounded waits;
/// `post_to_mission` and `notify_feedback` are fire-and-forget.
#[async_trait]
pub trait OperatorConsole: Send + Sync {
    /// Announce a join request and wait (bounded) for the operator.
    async fn announce_join(
        &self,
        machine_id: &str,
        display_name: &str,
        overlay_ip: &str,
    ) -> JoinDecision;

    /// Ask the operator to approve a message; waits bounded, then times out.
    async fn ask_approval(&self, prompt: ApprovalPrompt) -> ApprovalChoice;

    /// Post a visibility line to the mission's thread, creating it on first
    /// use.
    async fn post_to_mission(&self, mission_id: &str, text: &str);

    /// One-shot notification not tied to a mission.
    async fn notify_feedback(&self, kind: &str, text: &str);
}
