//! Rule evaluation and the runtime grant cache.

use std::collections::HashMap;

use tracing::debug;

use crate::rules::{ApprovalMode, CompiledRule, PolicyError, PolicyFile, compile_rules};

/// The message facts the engine decides on.
#[derive(Debug, Clone, Copy)]
pub struct PolicyRequest<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub kind: &'a str,
    pub text: &'a str,
    pub mission_id: Option<&'a str>,
}

/// Scope of a recorded operator choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantScope {
    /// This message only; nothing is remembered.
    Once,
    /// The rest of the mission.
    Mission,
    /// The `(from, to)` pair for this hub lifetime.
    Session,
    /// Like `Session`, chosen when the operator picks "always allow".
    AlwaysAllow,
}

/// What the operator (or a rule) decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Allowed,
    Denied,
}

/// Result of [`PolicyEngine::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    AutoAllow {
        /// Post a console notification even though no prompt is needed.
        notify: bool,
    },
    AutoDeny,
    AskOperator {
        label: String,
        scopes: Vec<GrantScope>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GrantKey {
    Mission(String),
    Pair(String, String),
}

/// Stateless rule matcher plus the runtime grant cache.
///
/// The hub owns one engine behind an async mutex; `decide` reads, `record`
/// writes, and neither performs I/O.
pub struct PolicyEngine {
    rules: Vec<CompiledRule>,
    default_approval: ApprovalMode,
    grants: HashMap<GrantKey, GrantOutcome>,
}

impl PolicyEngine {
    pub fn new(file: PolicyFile) -> Result<Self, PolicyError> {
        Ok(Self {
            rules: compile_rules(&file.rules)?,
            default_approval: file.defaults.require_approval,
            grants: HashMap::new(),
        })
    }

    /// An engine with no rules; everything falls back to ask-once.
    pub fn ask_everything() -> Self {
        Self {
            rules: Vec::new(),
            default_approval: ApprovalMode::Once,
            grants: HashMap::new(),
        }
    }

    /// Decide what to do with a message. Pure: no I/O, no clock, no mutation.
    pub fn decide(&self, req: PolicyRequest<'_>) -> Decision {
        // Runtime grants short-circuit the rule walk, positive or negative.
        if let Some(outcome) = self.lookup_grant(&req) {
            return match outcome {
                GrantOutcome::Allowed => Decision::AutoAllow { notify: false },
                GrantOutcome::Denied => Decision::AutoDeny,
            };
        }

        let (approval, label) = self
            .rules
            .iter()
            .find(|r| r.matches(req.from, req.to, req.kind, req.text))
            .map(|r| (r.approval, r.label.clone()))
            .unwrap_or((self.default_approval, None));

        let label = label.unwrap_or_else(|| format!("{} {} → {}", req.kind, req.from, req.to));

        match approval {
            ApprovalMode::Never => Decision::AutoAllow { notify: false },
            ApprovalMode::AlwaysAllow => Decision::AutoAllow { notify: true },
            ApprovalMode::Once => Decision::AskOperator {
                label,
                scopes: vec![GrantScope::Once, GrantScope::Mission, GrantScope::Session],
            },
            ApprovalMode::Mission => Decision::AskOperator {
                label,
                scopes: vec![GrantScope::Mission],
            },
            ApprovalMode::Session => Decision::AskOperator {
                label,
                scopes: vec![GrantScope::Session],
            },
        }
    }

    /// Record an operator choice at the given scope.
    pub fn record(
        &mut self,
        outcome: GrantOutcome,
        scope: GrantScope,
        from: &str,
        to: &str,
        mission_id: Option<&str>,
    ) {
        let key = match scope {
            GrantScope::Once => return,
            GrantScope::Mission => match mission_id {
                Some(id) => GrantKey::Mission(id.to_string()),
                None => return,
            },
            GrantScope::Session | GrantScope::AlwaysAllow => {
                GrantKey::Pair(from.to_string(), to.to_string())
            },
        };
        debug!(?key, ?outcome, "recording policy grant");
        self.grants.insert(key, outcome);
    }

    fn lookup_grant(&self, req: &PolicyRequest<'_>) -> Option<GrantOutcome> {
        if let Some(id) = req.mission_id
            && let Some(outcome) = self.grants.get(&GrantKey::Mission(id.to_string()))
        {
            return Some(*outcome);
        }
        self.grants
            .get(&GrantKey::Pair(req.from.to_string(), req.to.to_string()))
            .copied()
    }
}
