//! Ordered type-name matchers
//!
//! A [`PatternSet`] is built once per policy snapshot. Every pattern is
//! compiled up front so readers on any thread only ever see finished
//! matchers, and iteration order is the declared order.

use regex::Regex;
use std::collections::BTreeSet;

use super::error::ConfigError;
use super::types::ListKind;

/// A compiled rule together with its source text
#[derive(Debug, Clone)]
pub struct Matcher {
    source: String,
    regex: Regex,
}

impl Matcher {
    /// Rule text as written in the policy
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the pattern is found anywhere in `type_name`
    pub fn is_match(&self, type_name: &str) -> bool {
        self.regex.is_match(type_name)
    }
}

/// Ordered list of compiled matchers plus a set of exact names
#[derive(Debug, Clone)]
pub struct PatternSet {
    kind: ListKind,
    matchers: Vec<Matcher>,
    names: BTreeSet<String>,
}

impl PatternSet {
    /// Compile `patterns` in order; the first invalid one fails the whole set
    pub fn new<S: AsRef<str>>(kind: ListKind, patterns: &[S]) -> Result<Self, ConfigError> {
        let matchers = patterns
            .iter()
            .enumerate()
            .map(|(index, pattern)| {
                let pattern = pattern.as_ref();
                Regex::new(pattern)
                    .map(|regex| Matcher {
                        source: pattern.to_string(),
                        regex,
                    })
                    .map_err(|source| ConfigError::PatternSyntax {
                        list: kind,
                        index,
                        pattern: pattern.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            kind,
            matchers,
            names: BTreeSet::new(),
        })
    }

    /// Attach exact type names, checked before any pattern
    pub fn with_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.names.extend(names);
        self
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Compiled matchers in declared order
    pub fn iter(&self) -> std::slice::Iter<'_, Matcher> {
        self.matchers.iter()
    }

    /// Pattern sources in declared order
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.matchers.iter().map(Matcher::source)
    }

    pub fn contains_name(&self, type_name: &str) -> bool {
        self.names.contains(type_name)
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty() && self.names.is_empty()
    }

    /// First matcher that matches `type_name`, in declared order
    pub fn first_match(&self, type_name: &str) -> Option<&Matcher> {
        self.matchers.iter().find(|m| m.is_match(type_name))
    }
}

impl<'a> IntoIterator for &'a PatternSet {
    type Item = &'a Matcher;
    type IntoIter = std::slice::Iter<'a, Matcher>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
