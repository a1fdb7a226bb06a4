//! Immutable point-in-time policy
//!
//! A snapshot bundles the compiled rules with the safe-name cache computed
//! against them. Swapping the snapshot therefore swaps the cache too: a name
//! admitted under an older policy is never honored by a newer one.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::config::{LoggingConfig, ParsedPolicy};
use super::error::ConfigError;
use super::pattern::PatternSet;
use super::types::{ListKind, Mode, Reason};
use crate::audit::{AuditSink, FileSink, TracingSink};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Verdict details remembered for an admitted name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAllow {
    pub reason: Reason,
    pub matched_rule: Option<String>,
}

/// Type names already admitted under one snapshot
#[derive(Debug, Default)]
pub struct SafeNameCache {
    entries: DashMap<String, CachedAllow>,
}

impl SafeNameCache {
    pub fn get(&self, type_name: &str) -> Option<CachedAllow> {
        self.entries.get(type_name).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, type_name: &str, allow: CachedAllow) {
        self.entries.insert(type_name.to_string(), allow);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rules in effect right now
pub struct PolicySnapshot {
    generation: u64,
    blacklist: PatternSet,
    whitelist: PatternSet,
    mode: Mode,
    refresh_interval: Duration,
    sink: Arc<dyn AuditSink>,
    safe_names: SafeNameCache,
}

impl PolicySnapshot {
    /// Compile a parsed policy, opening the audit sink it names
    pub fn build(policy: &ParsedPolicy) -> Result<Self, ConfigError> {
        let sink: Arc<dyn AuditSink> = match &policy.logging {
            LoggingConfig::Tracing => Arc::new(TracingSink),
            LoggingConfig::File(path) => Arc::new(FileSink::open(path).map_err(|e| {
                ConfigError::Parse(format!("Cannot open audit log {}: {:#}", path.display(), e))
            })?),
        };
        Self::build_with_sink(policy, sink)
    }

    /// Compile a parsed policy, sending audit records to `sink`
    pub fn build_with_sink(
        policy: &ParsedPolicy,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        let blacklist = PatternSet::new(ListKind::Blacklist, policy.blacklist_patterns.as_slice())?
            .with_names(policy.blacklist_names.iter().cloned());
        let whitelist = PatternSet::new(ListKind::Whitelist, policy.whitelist_patterns.as_slice())?;

        Ok(Self {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            blacklist,
            whitelist,
            mode: Mode::from_profiling(policy.profiling),
            refresh_interval: Duration::from_millis(policy.refresh_interval_ms),
            sink,
            safe_names: SafeNameCache::default(),
        })
    }

    /// Unique, increasing identity of this snapshot within the process
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn blacklist(&self) -> &PatternSet {
        &self.blacklist
    }

    pub fn whitelist(&self) -> &PatternSet {
        &self.whitelist
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_profiling(&self) -> bool {
        self.mode == Mode::Profiling
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }

    pub fn safe_names(&self) -> &SafeNameCache {
        &self.safe_names
    }
}

impl std::fmt::Debug for PolicySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySnapshot")
            .field("generation", &self.generation)
            .field("mode", &self.mode)
            .field("blacklist", &self.blacklist.len())
            .field("blacklist_names", &self.blacklist.names().len())
            .field("whitelist", &self.whitelist.len())
            .field("refresh_interval", &self.refresh_interval)
            .field("safe_names", &self.safe_names.len())
            .finish()
    }
}
