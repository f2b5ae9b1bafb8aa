//! Full-table scan with a tenant predicate.
//!
//! Used for tables that have no tenant-scoped index. Every row of the table
//! is streamed and matched as it arrives; rows that do not belong to the
//! tenant are dropped immediately so memory is bounded by the matches.

use std::collections::HashSet;

use tracing::debug;

use super::ReadResult;
use crate::error::Result;
use crate::registry::{KeyRegistry, RegistryKey};
use crate::store::{Row, Store};

/// Row predicate selecting the tenant's rows from a shared table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `column` equals the tenant alias.
    TenantEquals { column: &'static str },

    /// Segment `position` of the `delimiter`-separated `column` equals the
    /// tenant alias.
    KeySegment {
        column: &'static str,
        delimiter: char,
        position: usize,
    },

    /// `column` is in a previously registered key set.
    MemberOf {
        column: &'static str,
        key: RegistryKey,
    },

    /// `column` is present and not in a previously registered key set.
    NotMemberOf {
        column: &'static str,
        key: RegistryKey,
    },

    /// Every inner predicate holds.
    All(Vec<Predicate>),
}

impl Predicate {
    /// Registry keys this predicate reads.
    pub fn consumes(&self) -> Vec<RegistryKey> {
        match self {
            Predicate::TenantEquals { .. } | Predicate::KeySegment { .. } => Vec::new(),
            Predicate::MemberOf { key, .. } | Predicate::NotMemberOf { key, .. } => vec![*key],
            Predicate::All(inner) => inner.iter().flat_map(Predicate::consumes).collect(),
        }
    }

    /// Columns this predicate inspects.
    pub fn columns(&self) -> Vec<&'static str> {
        match self {
            Predicate::TenantEquals { column }
            | Predicate::KeySegment { column, .. }
            | Predicate::MemberOf { column, .. }
            | Predicate::NotMemberOf { column, .. } => vec![*column],
            Predicate::All(inner) => inner.iter().flat_map(Predicate::columns).collect(),
        }
    }

    /// Resolve the tenant alias and registry sets into a matcher.
    pub fn compile(&self, tenant_alias: &str, registry: &KeyRegistry) -> Matcher {
        match self {
            Predicate::TenantEquals { column } => Matcher::Equals {
                column,
                value: tenant_alias.to_string(),
            },
            Predicate::KeySegment {
                column,
                delimiter,
                position,
            } => Matcher::Segment {
                column,
                delimiter: *delimiter,
                position: *position,
                value: tenant_alias.to_string(),
            },
            Predicate::MemberOf { column, key } => Matcher::In {
                column,
                set: registry.get(*key).iter().cloned().collect(),
            },
            Predicate::NotMemberOf { column, key } => Matcher::NotIn {
                column,
                set: registry.get(*key).iter().cloned().collect(),
            },
            Predicate::All(inner) => Matcher::All(
                inner
                    .iter()
                    .map(|p| p.compile(tenant_alias, registry))
                    .collect(),
            ),
        }
    }
}

/// A predicate bound to concrete values for one run.
#[derive(Debug, Clone)]
pub enum Matcher {
    Equals {
        column: &'static str,
        value: String,
    },
    Segment {
        column: &'static str,
        delimiter: char,
        position: usize,
        value: String,
    },
    In {
        column: &'static str,
        set: HashSet<String>,
    },
    NotIn {
        column: &'static str,
        set: HashSet<String>,
    },
    All(Vec<Matcher>),
}

impl Matcher {
    /// Whether the row belongs to the tenant.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Matcher::Equals { column, value } => row.text(column) == Some(value.as_str()),
            Matcher::Segment {
                column,
                delimiter,
                position,
                value,
            } => row
                .text(column)
                .and_then(|key| key.split(*delimiter).nth(*position))
                .is_some_and(|segment| segment == value),
            Matcher::In { column, set } => row.text(column).is_some_and(|v| set.contains(v)),
            Matcher::NotIn { column, set } => row.text(column).is_some_and(|v| !set.contains(v)),
            Matcher::All(inner) => inner.iter().all(|m| m.matches(row)),
        }
    }

    /// Whether no row can possibly match, so the scan can be skipped.
    pub fn is_unsatisfiable(&self) -> bool {
        match self {
            Matcher::In { set, .. } => set.is_empty(),
            Matcher::All(inner) => inner.iter().any(Matcher::is_unsatisfiable),
            _ => false,
        }
    }
}

/// Stream `table` from `store`, keeping only rows accepted by `matcher`.
///
/// Returns once the stream has ended normally; the first stream error is
/// returned instead and no partial result escapes.
pub async fn scan_filter(store: &dyn Store, table: &str, matcher: &Matcher) -> Result<ReadResult> {
    let mut result = ReadResult::default();

    if matcher.is_unsatisfiable() {
        debug!("{}: predicate cannot match, skipping scan", table);
        return Ok(result);
    }

    let mut rx = store.scan(table);
    while let Some(item) = rx.recv().await {
        let row = item?;
        result.scanned += 1;
        if matcher.matches(&row) {
            result.rows.push(row);
        }
    }

    debug!(
        "{}: scanned {} rows, {} matched",
        table,
        result.scanned,
        result.rows.len()
    );
    Ok(result)
}
