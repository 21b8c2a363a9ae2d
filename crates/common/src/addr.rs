//! Network-wide agent addressing.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The synthetic project present on every machine.
pub const HOME_PROJECT: &str = "home";

/// An agent address of the form `<machine>/<project>`.
///
/// The address is a stable name; the owning daemon is the authoritative
/// locator for whatever process currently answers to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentAddr {
    pub machine: String,
    pub project: String,
}

impl AgentAddr {
    pub fn new(machine: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            project: project.into(),
        }
    }

    /// The `home` agent on the given machine.
    pub fn home(machine: impl Into<String>) -> Self {
        Self::new(machine, HOME_PROJECT)
    }
}

impl fmt::Display for AgentAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.machine, self.project)
    }
}

impl FromStr for AgentAddr {
    type Err = ParseAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (machine, project) = s.split_once('/').ok_or(ParseAddrError)?;
        if machine.is_empty() || project.is_empty() || project.contains('/') {
            return Err(ParseAddrError);
        }
        Ok(Self::new(machine, project))
    }
}

impl TryFrom<String> for AgentAddr {
    type Error = ParseAddrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AgentAddr> for String {
    fn from(addr: AgentAddr) -> Self {
        addr.to_string()
    }
}

/// Failure to parse a `<machine>/<project>` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAddrError;

impl fmt::Display for ParseAddrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("agent address must be <machine>/<project>")
    }
}

impl std::error::Error for ParseAddrError {}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let addr: AgentAddr = "workstation/api-server".parse().unwrap();
        assert_eq!(addr.machine, "workstation");
        assert_eq!(addr.project, "api-server");
        assert_eq!(addr.to_string(), "workstation/api-server");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("no-slash".parse::<AgentAddr>().is_err());
        assert!("/project".parse::<AgentAddr>().is_err());
        assert!("machine/".parse::<AgentAddr>().is_err());
        assert!("a/b/c".parse::<AgentAddr>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let addr = AgentAddr::home("laptop");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"laptop/home\"");
        let back: AgentAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
