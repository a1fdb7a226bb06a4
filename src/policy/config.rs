use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::types::ListKind;

/// Default interval between staleness checks of a policy file
pub const DEFAULT_REFRESH_MS: u64 = 6000;

/// On-disk policy document (TOML)
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    pub refresh_ms: Option<u64>,
    #[serde(default)]
    pub mode: ModeSection,
    #[serde(default)]
    pub logging: LoggingSection,
    pub blacklist: Option<BlacklistSection>,
    pub whitelist: Option<WhitelistSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ModeSection {
    #[serde(default)]
    pub profiling: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    #[serde(default)]
    pub enabled: bool,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlacklistSection {
    pub patterns: Option<Vec<String>>,
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhitelistSection {
    pub patterns: Option<Vec<String>>,
}

/// Where audit records of a policy go
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoggingConfig {
    /// `tracing` events only
    #[default]
    Tracing,
    /// JSON lines appended to a file
    File(PathBuf),
}

/// A policy reduced to plain data, ready to be compiled into a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPolicy {
    pub refresh_interval_ms: u64,
    pub profiling: bool,
    pub blacklist_patterns: Vec<String>,
    pub blacklist_names: BTreeSet<String>,
    pub whitelist_patterns: Vec<String>,
    pub logging: LoggingConfig,
}

impl ParsedPolicy {
    /// Policy with no rules at all; blocks everything in blocking mode
    pub fn empty() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_MS,
            profiling: false,
            blacklist_patterns: Vec::new(),
            blacklist_names: BTreeSet::new(),
            whitelist_patterns: Vec::new(),
            logging: LoggingConfig::Tracing,
        }
    }

    /// Parse a TOML policy document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: PolicyFile = toml::from_str(content)?;
        file.into_parsed()
    }

    /// Read and parse a policy file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let policy = Self::from_toml_str(&content)?;
        tracing::debug!(
            "Parsed policy {:?}: {} blacklist patterns, {} exact names, {} whitelist patterns",
            path,
            policy.blacklist_patterns.len(),
            policy.blacklist_names.len(),
            policy.whitelist_patterns.len()
        );
        Ok(policy)
    }
}

impl PolicyFile {
    pub fn into_parsed(self) -> Result<ParsedPolicy, ConfigError> {
        let blacklist = self
            .blacklist
            .ok_or(ConfigError::MissingPatterns(ListKind::Blacklist))?;
        let blacklist_patterns = blacklist
            .patterns
            .ok_or(ConfigError::MissingPatterns(ListKind::Blacklist))?;
        let whitelist_patterns = self
            .whitelist
            .and_then(|w| w.patterns)
            .ok_or(ConfigError::MissingPatterns(ListKind::Whitelist))?;

        let logging = if self.logging.enabled {
            match self.logging.file {
                Some(file) => LoggingConfig::File(file),
                None => {
                    return Err(ConfigError::Parse(
                        "logging.enabled requires logging.file".to_string(),
                    ))
                }
            }
        } else {
            LoggingConfig::Tracing
        };

        Ok(ParsedPolicy {
            refresh_interval_ms: self.refresh_ms.unwrap_or(DEFAULT_REFRESH_MS),
            profiling: self.mode.profiling,
            blacklist_patterns,
            blacklist_names: blacklist.names.into_iter().collect(),
            whitelist_patterns,
            logging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_policy() {
        let toml = r#"
refresh_ms = 250

[mode]
profiling = true

[logging]
enabled = true
file = "/tmp/serialgate.log"

[blacklist]
patterns = ['^evil\.Gadget$', 'org\.hibernate\.']
names = ["com.example.Exact"]

[whitelist]
patterns = ['^com\.app\.']
"#;

        let policy = ParsedPolicy::from_toml_str(toml).unwrap();
        assert_eq!(policy.refresh_interval_ms, 250);
        assert!(policy.profiling);
        assert_eq!(policy.blacklist_patterns.len(), 2);
        assert_eq!(policy.blacklist_patterns[0], "^evil\\.Gadget$");
        assert!(policy.blacklist_names.contains("com.example.Exact"));
        assert_eq!(policy.whitelist_patterns, vec!["^com\\.app\\.".to_string()]);
        assert_eq!(
            policy.logging,
            LoggingConfig::File(PathBuf::from("/tmp/serialgate.log"))
        );
    }

    #[test]
    fn test_defaults() {
        let toml = r#"
[blacklist]
patterns = []

[whitelist]
patterns = ['.*']
"#;

        let policy = ParsedPolicy::from_toml_str(toml).unwrap();
        assert_eq!(policy.refresh_interval_ms, DEFAULT_REFRESH_MS);
        assert!(!policy.profiling);
        assert!(policy.blacklist_names.is_empty());
        assert_eq!(policy.logging, LoggingConfig::Tracing);
    }

    #[test]
    fn test_missing_lists() {
        let err = ParsedPolicy::from_toml_str("[whitelist]\npatterns = []\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingPatterns(ListKind::Blacklist)
        ));

        let err = ParsedPolicy::from_toml_str("[blacklist]\npatterns = []\n[whitelist]\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingPatterns(ListKind::Whitelist)
        ));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(
            ParsedPolicy::from_toml_str("not = [valid").unwrap_err(),
            ConfigError::Parse(_)
        ));
        assert!(matches!(
            ParsedPolicy::from_toml_str("[blacklist]\npatterns = []\nbogus = 1\n").unwrap_err(),
            ConfigError::Parse(_)
        ));
        assert!(matches!(
            ParsedPolicy::from_toml_str(
                "[logging]\nenabled = true\n[blacklist]\npatterns = []\n[whitelist]\npatterns = []\n"
            )
            .unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ParsedPolicy::load(Path::new("/i/am/pretty-sure/this/does-not-exist.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_empty_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let err = ParsedPolicy::load(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPatterns(_)));
    }
}
