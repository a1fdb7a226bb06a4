//! Integration point for deserializers
//!
//! A deserializer calls [`admit`] (or [`AdmissionHook::admit`]) with each
//! fully-qualified type name right before instantiating it, and aborts the
//! whole stream on `Err`.

use std::sync::Arc;

use super::classifier::classify;
use super::error::{ConfigError, RejectedTypeError, RejectionKind};
use super::snapshot::PolicySnapshot;
use super::store::{PolicyStore, StoreRegistry};
use super::types::{Outcome, Reason, Verdict};

/// Check one type name against the store's current policy
pub fn admit(type_name: &str, store: &PolicyStore) -> Result<(), RejectedTypeError> {
    let snapshot = store.current_snapshot();
    admit_with(type_name, &snapshot).map(|_| ())
}

/// Check one type name against a fixed snapshot, returning the verdict on success
///
/// Audit records are written and the sink flushed before this returns.
pub fn admit_with(type_name: &str, snapshot: &PolicySnapshot) -> Result<Verdict, RejectedTypeError> {
    let verdict = classify(type_name, snapshot);

    if !verdict.records.is_empty() {
        let sink = snapshot.sink();
        for record in &verdict.records {
            sink.record(record);
        }
        sink.flush();
    }

    match verdict.outcome {
        Outcome::Allow => Ok(verdict),
        Outcome::Block => Err(RejectedTypeError {
            type_name: type_name.to_string(),
            matched_rule: verdict.matched_rule,
            kind: match verdict.reason {
                Reason::BlacklistMatch => RejectionKind::Blacklist,
                Reason::WhitelistMiss | Reason::WhitelistMatch => RejectionKind::Whitelist,
            },
        }),
    }
}

/// Admission hook bound to one policy store
#[derive(Debug, Clone)]
pub struct AdmissionHook {
    store: Arc<PolicyStore>,
}

impl AdmissionHook {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// Hook for the policy at `path`, shared through the global registry
    pub fn for_policy(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        StoreRegistry::global().get_or_create(path).map(Self::new)
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn admit(&self, type_name: &str) -> Result<(), RejectedTypeError> {
        admit(type_name, &self.store)
    }

    /// Admit a sequence of names, stopping at the first rejection
    pub fn admit_all<'a, I>(&self, type_names: I) -> Result<(), RejectedTypeError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        type_names.into_iter().try_for_each(|name| self.admit(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditKind, MemorySink};
    use crate::policy::config::ParsedPolicy;

    fn snapshot(
        blacklist: &[&str],
        whitelist: &[&str],
        profiling: bool,
        sink: Arc<MemorySink>,
    ) -> PolicySnapshot {
        let policy = ParsedPolicy {
            profiling,
            blacklist_patterns: blacklist.iter().map(|s| s.to_string()).collect(),
            whitelist_patterns: whitelist.iter().map(|s| s.to_string()).collect(),
            ..ParsedPolicy::empty()
        };
        PolicySnapshot::build_with_sink(&policy, sink).unwrap()
    }

    #[test]
    fn test_blacklist_rejection_is_typed() {
        let sink = Arc::new(MemorySink::new());
        let snap = snapshot(&["^evil\\.Gadget$"], &[".*"], false, sink.clone());

        let err = admit_with("evil.Gadget", &snap).unwrap_err();
        assert_eq!(err.kind, RejectionKind::Blacklist);
        assert_eq!(err.type_name, "evil.Gadget");
        assert_eq!(err.matched_rule.as_deref(), Some("^evil\\.Gadget$"));

        // Records reach the sink and are flushed before the error returns
        assert_eq!(sink.count(AuditKind::BlacklistMatch), 1);
        assert_eq!(sink.flush_count(), 1);
    }

    #[test]
    fn test_whitelist_rejection_is_typed() {
        let sink = Arc::new(MemorySink::new());
        let snap = snapshot(&[], &["^com\\.app\\."], false, sink.clone());

        let err = admit_with("java.sql.Date", &snap).unwrap_err();
        assert_eq!(err.kind, RejectionKind::Whitelist);
        assert!(err.matched_rule.is_none());
        assert_eq!(sink.count(AuditKind::WhitelistMiss), 1);
    }

    #[test]
    fn test_profiling_admits_and_audits() {
        let sink = Arc::new(MemorySink::new());
        let snap = snapshot(&[], &["^com\\.app\\."], true, sink.clone());

        let verdict = admit_with("java.sql.Date", &snap).unwrap();
        assert_eq!(verdict.reason, Reason::WhitelistMiss);
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.count(AuditKind::WhitelistMiss), 1);
    }

    #[test]
    fn test_quiet_allow_does_not_flush() {
        let sink = Arc::new(MemorySink::new());
        let snap = snapshot(&[], &[".*"], false, sink.clone());

        admit_with("com.app.Order", &snap).unwrap();
        assert!(sink.records().is_empty());
        assert_eq!(sink.flush_count(), 0);
    }
}
