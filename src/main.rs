use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use serialgate::audit::{AuditKind, MemorySink, TracingSink};
use serialgate::policy::{admit_with, ParsedPolicy, PolicySnapshot, Reason, StoreRegistry};

#[derive(Parser)]
#[command(name = "serialgate")]
#[command(author, version, about = "serialgate - type-name admission filter for untrusted deserialization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check type names against a policy, exiting non-zero if any is blocked
    Check {
        /// Policy file (TOML)
        #[arg(short, long)]
        policy: PathBuf,

        /// Fully-qualified type names
        #[arg(required = true)]
        types: Vec<String>,
    },

    /// Read type names from stdin and report would-be verdicts without blocking
    Profile {
        /// Policy file (TOML)
        #[arg(short, long)]
        policy: PathBuf,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Load a policy and print a summary of its rules
    Validate {
        /// Policy file (TOML)
        #[arg(short, long)]
        policy: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct ProfileRow {
    type_name: String,
    would_block: bool,
    reason: Reason,
    matched_rule: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProfileReport {
    types: Vec<ProfileRow>,
    audit_counts: BTreeMap<String, usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "serialgate=debug"
    } else {
        "serialgate=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Check { policy, types } => {
            run_check(&policy, &types)?;
        }
        Commands::Profile { policy, format } => {
            run_profile(&policy, &format)?;
        }
        Commands::Validate { policy } => {
            run_validate(&policy)?;
        }
    }

    Ok(())
}

fn run_check(policy: &Path, types: &[String]) -> Result<()> {
    let store = StoreRegistry::global()
        .get_or_create(policy)
        .with_context(|| format!("Failed to load policy {}", policy.display()))?;

    let mut blocked = 0;
    for type_name in types {
        let snapshot = store.current_snapshot();
        match admit_with(type_name, &snapshot) {
            Ok(verdict) => println!(
                "ALLOW {} ({}{})",
                type_name,
                verdict.reason,
                rule_suffix(verdict.matched_rule.as_deref())
            ),
            Err(rejected) => {
                blocked += 1;
                println!(
                    "BLOCK {} ({}{})",
                    type_name,
                    rejected.kind,
                    rule_suffix(rejected.matched_rule.as_deref())
                );
            }
        }
    }

    if blocked > 0 {
        anyhow::bail!("{} of {} type(s) blocked", blocked, types.len());
    }
    Ok(())
}

fn run_profile(policy: &Path, format: &str) -> Result<()> {
    let mut parsed = ParsedPolicy::load(policy)
        .with_context(|| format!("Failed to load policy {}", policy.display()))?;
    parsed.profiling = true;

    let sink = Arc::new(MemorySink::new());
    let snapshot = PolicySnapshot::build_with_sink(&parsed, sink.clone())?;

    let mut rows = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read type names from stdin")?;
        let type_name = line.trim();
        if type_name.is_empty() {
            continue;
        }
        let verdict = admit_with(type_name, &snapshot)?;
        rows.push(ProfileRow {
            type_name: type_name.to_string(),
            would_block: verdict.reason != Reason::WhitelistMatch,
            reason: verdict.reason,
            matched_rule: verdict.matched_rule,
        });
    }

    let audit_counts: BTreeMap<String, usize> = [
        AuditKind::BlacklistMatch,
        AuditKind::WhitelistMatch,
        AuditKind::WhitelistMiss,
    ]
    .into_iter()
    .map(|kind| (kind.to_string(), sink.count(kind)))
    .collect();

    let report = ProfileReport {
        types: rows,
        audit_counts,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            println!("SERIALGATE PROFILE");
            println!("{:<8} {:<16} {:<48} RULE", "VERDICT", "REASON", "TYPE");
            for row in &report.types {
                println!(
                    "{:<8} {:<16} {:<48} {}",
                    if row.would_block { "block" } else { "allow" },
                    row.reason.as_str(),
                    row.type_name,
                    row.matched_rule.as_deref().unwrap_or("-")
                );
            }
            println!();
            for (kind, count) in &report.audit_counts {
                println!("{:<16} {}", kind, count);
            }
        }
    }

    Ok(())
}

fn run_validate(policy: &Path) -> Result<()> {
    let parsed = ParsedPolicy::load(policy)
        .with_context(|| format!("Failed to load policy {}", policy.display()))?;
    let snapshot = PolicySnapshot::build_with_sink(&parsed, Arc::new(TracingSink))
        .with_context(|| format!("Invalid policy {}", policy.display()))?;

    println!("Policy OK: {}", policy.display());
    println!("  mode:               {}", snapshot.mode());
    println!("  refresh interval:   {} ms", parsed.refresh_interval_ms);
    println!("  blacklist patterns: {}", snapshot.blacklist().len());
    println!("  blacklist names:    {}", snapshot.blacklist().names().len());
    println!("  whitelist patterns: {}", snapshot.whitelist().len());
    Ok(())
}

fn rule_suffix(rule: Option<&str>) -> String {
    rule.map(|r| format!(", rule '{}'", r)).unwrap_or_default()
}
