use crate::audit::{AuditKind, AuditLevel, AuditRecord};
use crate::policy::snapshot::{CachedAllow, PolicySnapshot};
use crate::policy::types::{Mode, Outcome, Reason, Verdict};

/// Decide whether `type_name` may be instantiated under `snapshot`
///
/// Blacklist first (exact names, then patterns in declared order), whitelist
/// second. In blocking mode the first blacklist hit ends evaluation; in
/// profiling mode every blacklist rule is scanned so all hits get recorded,
/// and nothing is ever blocked. Admitted names are remembered in the
/// snapshot's safe-name cache and answered from it afterwards.
pub fn classify(type_name: &str, snapshot: &PolicySnapshot) -> Verdict {
    if let Some(cached) = snapshot.safe_names().get(type_name) {
        return Verdict {
            outcome: Outcome::Allow,
            reason: cached.reason,
            matched_rule: cached.matched_rule,
            cached: true,
            records: Vec::new(),
        };
    }

    let mode = snapshot.mode();
    let mut records = Vec::new();
    let mut first_blacklist_hit: Option<String> = None;

    let blacklist = snapshot.blacklist();
    let exact_hit = blacklist
        .contains_name(type_name)
        .then(|| type_name.to_string());
    let pattern_hits = blacklist
        .iter()
        .filter(|m| m.is_match(type_name))
        .map(|m| m.source().to_string());

    for rule in exact_hit.into_iter().chain(pattern_hits) {
        match mode {
            Mode::Blocking => {
                records.push(
                    AuditRecord::new(AuditLevel::Error, AuditKind::BlacklistMatch, mode, type_name)
                        .with_rule(rule.clone()),
                );
                return Verdict {
                    outcome: Outcome::Block,
                    reason: Reason::BlacklistMatch,
                    matched_rule: Some(rule),
                    cached: false,
                    records,
                };
            }
            Mode::Profiling => {
                records.push(
                    AuditRecord::new(AuditLevel::Info, AuditKind::BlacklistMatch, mode, type_name)
                        .with_rule(rule.clone()),
                );
                first_blacklist_hit.get_or_insert(rule);
            }
        }
    }

    let whitelist_hit = snapshot
        .whitelist()
        .first_match(type_name)
        .map(|m| m.source().to_string());

    let (reason, matched_rule) = match whitelist_hit {
        Some(rule) => {
            if mode == Mode::Profiling {
                records.push(
                    AuditRecord::new(AuditLevel::Info, AuditKind::WhitelistMatch, mode, type_name)
                        .with_rule(rule.clone()),
                );
            }
            (Reason::WhitelistMatch, Some(rule))
        }
        None => match mode {
            Mode::Blocking => {
                records.push(AuditRecord::new(
                    AuditLevel::Error,
                    AuditKind::WhitelistMiss,
                    mode,
                    type_name,
                ));
                return Verdict {
                    outcome: Outcome::Block,
                    reason: Reason::WhitelistMiss,
                    matched_rule: None,
                    cached: false,
                    records,
                };
            }
            Mode::Profiling => {
                records.push(AuditRecord::new(
                    AuditLevel::Info,
                    AuditKind::WhitelistMiss,
                    mode,
                    type_name,
                ));
                (Reason::WhitelistMiss, None)
            }
        },
    };

    // Profiling reports the would-be reason: a blacklist hit outranks the whitelist
    let (reason, matched_rule) = match first_blacklist_hit {
        Some(rule) => (Reason::BlacklistMatch, Some(rule)),
        None => (reason, matched_rule),
    };

    snapshot.safe_names().insert(
        type_name,
        CachedAllow {
            reason,
            matched_rule: matched_rule.clone(),
        },
    );

    Verdict {
        outcome: Outcome::Allow,
        reason,
        matched_rule,
        cached: false,
        records,
    }
}
