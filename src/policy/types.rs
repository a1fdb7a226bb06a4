use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::audit::AuditRecord;

/// Operating mode of a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Rejections are enforced
    #[default]
    Blocking,
    /// Would-be verdicts are recorded, nothing is blocked
    Profiling,
}

impl Mode {
    pub fn from_profiling(profiling: bool) -> Self {
        if profiling {
            Mode::Profiling
        } else {
            Mode::Blocking
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Blocking => "blocking",
            Mode::Profiling => "profiling",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which rule list a pattern belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Blacklist,
    Whitelist,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Blacklist => "blacklist",
            ListKind::Whitelist => "whitelist",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Admission outcome for a single type name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Allow,
    Block,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Allow => write!(f, "allow"),
            Outcome::Block => write!(f, "block"),
        }
    }
}

/// Why a verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    BlacklistMatch,
    WhitelistMiss,
    WhitelistMatch,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::BlacklistMatch => "blacklist_match",
            Reason::WhitelistMiss => "whitelist_miss",
            Reason::WhitelistMatch => "whitelist_match",
        }
    }
}

impl FromStr for Reason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blacklist_match" => Ok(Reason::BlacklistMatch),
            "whitelist_miss" => Ok(Reason::WhitelistMiss),
            "whitelist_match" => Ok(Reason::WhitelistMatch),
            _ => Err(format!("Invalid reason: {}", s)),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of classifying a type name against a snapshot
#[derive(Debug, Clone)]
pub struct Verdict {
    pub outcome: Outcome,
    pub reason: Reason,
    /// Rule text that decided the verdict (pattern source or exact name)
    pub matched_rule: Option<String>,
    /// Served from the snapshot's safe-name cache
    pub cached: bool,
    /// Audit records produced while evaluating, in emission order
    pub records: Vec<AuditRecord>,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }
}
