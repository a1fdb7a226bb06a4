//! Policy error types
//!
//! Configuration failures are distinct from admission rejections: the former
//! describe a broken policy source, the latter a type name the policy refused.

use std::path::PathBuf;
use thiserror::Error;

use super::types::ListKind;

/// Errors raised while loading or building a policy
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Policy source could not be read
    #[error("Failed to read policy {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Policy source is not a well-formed policy document
    #[error("Malformed policy: {0}")]
    Parse(String),

    /// A rule list was absent (an empty list must be written explicitly)
    #[error("Missing {0} patterns (use an empty list to declare none)")]
    MissingPatterns(ListKind),

    /// A pattern is not a valid matcher expression
    #[error("Invalid {list} pattern #{index} '{pattern}': {source}")]
    PatternSyntax {
        list: ListKind,
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl ConfigError {
    pub fn is_pattern_syntax(&self) -> bool {
        matches!(self, ConfigError::PatternSyntax { .. })
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Which list drove a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// A blacklist rule (pattern or exact name) matched
    Blacklist,
    /// No whitelist rule matched
    Whitelist,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionKind::Blacklist => write!(f, "blacklist"),
            RejectionKind::Whitelist => write!(f, "non-whitelist"),
        }
    }
}

/// A type name was refused admission
#[derive(Debug, Clone, Error)]
#[error("Type '{type_name}' blocked from deserialization ({kind})")]
pub struct RejectedTypeError {
    pub type_name: String,
    pub matched_rule: Option<String>,
    pub kind: RejectionKind,
}

impl RejectedTypeError {
    pub fn is_blacklist(&self) -> bool {
        self.kind == RejectionKind::Blacklist
    }
}
