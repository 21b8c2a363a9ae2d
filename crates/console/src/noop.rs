//! No-op console for tests and headless deployments.

use {async_trait::async_trait, tracing::debug};

use crate::{ApprovalChoice, ApprovalPrompt, JoinDecision, OperatorConsole};

/// Console that approves message traffic and leaves joins pending.
///
/// Without a human attached there is nobody to deny a prompt, so routed
/// messages proceed with once-scope; join requests stay pending until an
/// operator approves them out of band.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConsole;

#[async_trait]
impl OperatorConsole for NoopConsole {
    async fn announce_join(
        &self,
        machine_id: &str,
        _display_name: &str,
        _overlay_ip: &str,
    ) -> JoinDecision {
        debug!(machine_id, "join request (no console attached)");
        JoinDecision::Pending
    }

    async fn ask_approval(&self, prompt: ApprovalPrompt) -> ApprovalChoice {
        debug!(
            mission_id = %prompt.mission_id,
            from = %prompt.from,
            to = %prompt.to,
            "auto-approving (no console attached)"
        );
        ApprovalChoice::Allow(intercom_policy::GrantScope::Once)
    }

    async fn post_to_mission(&self, mission_id: &str, text: &str) {
        debug!(mission_id, text, "mission note");
    }

    async fn notify_feedback(&self, kind: &str, text: &str) {
        debug!(kind, text, "feedback note");
    }
}
