//! Policy file schema and rule matching.

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// What a matching rule requires before the message may pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Auto-approve without telling the operator.
    Never,
    /// Auto-approve but post a notification.
    AlwaysAllow,
    /// Ask the operator for every message.
    #[default]
    Once,
    /// Ask once per mission, then auto-approve the rest of it.
    Mission,
    /// Ask once per `(from, to)` pair in this hub lifetime.
    Session,
}

/// One ordered rule from the policy file. First match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Glob over the sender address, e.g. `workstation/*`.
    pub from: String,
    /// Glob over the recipient address.
    pub to: String,
    /// Message type this rule applies to; absent means any.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Regex applied to the message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_pattern: Option<String>,
    pub approval: ApprovalMode,
    /// Operator-facing description shown in approval prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDefaults {
    pub require_approval: ApprovalMode,
}

/// The YAML policy document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyFile {
    pub defaults: PolicyDefaults,
    pub rules: Vec<PolicyRule>,
}

impl PolicyFile {
    pub fn load(path: &std::path::Path) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path).map_err(|e| PolicyError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to read policy file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policy file")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid message_pattern in rule {index}: {source}")]
    Pattern {
        index: usize,
        #[source]
        source: regex::Error,
    },
}

/// A rule with its patterns compiled.
#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    pub from: String,
    pub to: String,
    pub kind: Option<String>,
    pub pattern: Option<regex::Regex>,
    pub approval: ApprovalMode,
    pub label: Option<String>,
}

impl CompiledRule {
    pub fn matches(&self, from: &str, to: &str, kind: &str, text: &str) -> bool {
        if !glob_match(&self.from, from) || !glob_match(&self.to, to) {
            return false;
        }
        if let Some(ref k) = self.kind
            && k != "any"
            && k != kind
        {
            return false;
        }
        if let Some(ref re) = self.pattern
            && !re.is_match(text)
        {
            return false;
        }
        true
    }
}

pub(crate) fn compile_rules(rules: &[PolicyRule]) -> Result<Vec<CompiledRule>, PolicyError> {
    rules
        .iter()
        .enumerate()
        .map(|(index, r)| {
            let pattern = r
                .message_pattern
                .as_deref()
                .map(regex::Regex::new)
                .transpose()
                .map_err(|source| PolicyError::Pattern { index, source })?;
            Ok(CompiledRule {
                from: r.from.clone(),
                to: r.to.clone(),
                kind: r.kind.clone(),
                pattern,
                approval: r.approval,
                label: r.label.clone(),
            })
        })
        .collect()
}

/// Match `value` against a glob `pattern` supporting `*` and `?`.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let (mut pi, mut vi) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);

    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = vi;
            pi += 1;
        } else if let Some(s) = star {
            // Backtrack: let the last `*` swallow one more char.
            pi = s + 1;
            mark += 1;
            vi = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything/at-all"));
        assert!(glob_match("workstation/*", "workstation/api"));
        assert!(!glob_match("workstation/*", "laptop/api"));
        assert!(glob_match("*/home", "laptop/home"));
        assert!(glob_match("w?rk*/api", "workstation/api"));
        assert!(!glob_match("workstation", "workstation/api"));
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(!glob_match("a*b*c", "a-x-b-y"));
    }

    #[test]
    fn test_rule_matching() {
        let rules = compile_rules(&[PolicyRule {
            from: "*/home".into(),
            to: "build-box/*".into(),
            kind: Some("ask".into()),
            message_pattern: Some(r"(?i)deploy".into()),
            approval: ApprovalMode::Once,
            label: None,
        }])
        .unwrap();
        let r = &rules[0];
        assert!(r.matches("laptop/home", "build-box/api", "ask", "please DEPLOY this"));
        assert!(!r.matches("laptop/home", "build-box/api", "chat", "please deploy"));
        assert!(!r.matches("laptop/home", "build-box/api", "ask", "just looking"));
        assert!(!r.matches("laptop/api", "build-box/api", "ask", "deploy"));
    }

    #[test]
    fn test_policy_file_parses() {
        let doc = r#"
defaults:
  require_approval: once
rules:
  - from: "*"
    to: "*/home"
    type: chat
    approval: never
  - from: "laptop/*"
    to: "*"
    approval: mission
    label: "laptop outbound"
"#;
        let file: PolicyFile = serde_yaml::from_str(doc).unwrap();
        assert_eq!(file.defaults.require_approval, ApprovalMode::Once);
        assert_eq!(file.rules.len(), 2);
        assert_eq!(file.rules[0].approval, ApprovalMode::Never);
        assert_eq!(file.rules[1].label.as_deref(), Some("laptop outbound"));
    }

    #[test]
    fn test_bad_message_pattern_rejected() {
        let err = compile_rules(&[PolicyRule {
            from: "*".into(),
            to: "*".into(),
            kind: None,
            message_pattern: Some("(unclosed".into()),
            approval: ApprovalMode::Once,
            label: None,
        }]);
        assert!(matches!(err, Err(PolicyError::Pattern { index: 0, .. })));
    }
}
