//! Data models shared by the fetch pipeline.
//!
//! - [`RawRecord`]: an untyped JSON object exactly as the remote delivered it
//! - [`NormalizedRecord`]: a record reduced to a source's allow-listed fields
//! - [`IdentifierSet`]: deduplicated item identifiers discovered on listing pages
//! - [`RunReport`] / [`SourceOutcome`] / [`RunSummary`]: per-source and per-run results

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

/// A remote record as delivered: field name to arbitrary JSON value.
pub type RawRecord = Map<String, Value>;

/// A record holding only fields present in both the raw record and the
/// allow-list it was normalized against. Values are never altered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord(pub Map<String, Value>);

#[cfg(test)]
impl NormalizedRecord {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Borrow the record as a raw record, e.g. to normalize it again.
    pub fn as_raw(&self) -> &RawRecord {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Deduplicated identifiers in first-seen order.
///
/// Equality ignores order: two sets holding the same identifiers are equal.
#[derive(Debug, Clone, Default)]
pub struct IdentifierSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl IdentifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identifier. Returns `false` if it was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.seen.contains(&id) {
            return false;
        }
        self.seen.insert(id.clone());
        self.order.push(id);
        true
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl PartialEq for IdentifierSet {
    fn eq(&self, other: &Self) -> bool {
        self.seen == other.seen
    }
}

impl Eq for IdentifierSet {}

impl Extend<String> for IdentifierSet {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        for id in iter {
            self.insert(id);
        }
    }
}

impl FromIterator<String> for IdentifierSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = IdentifierSet::new();
        set.extend(iter);
        set
    }
}

/// Summary of one completed source run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Configured source name.
    pub source: String,
    /// Listing pages requested.
    pub pages_attempted: usize,
    /// Listing pages that produced a usable body.
    pub pages_succeeded: usize,
    /// Items the source tried to process.
    pub items_attempted: usize,
    /// Items that were processed and emitted.
    pub items_succeeded: usize,
    /// Wall-clock time spent on the source.
    pub elapsed: Duration,
    /// The run stopped early because of an operator interrupt.
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            pages_attempted: 0,
            pages_succeeded: 0,
            items_attempted: 0,
            items_succeeded: 0,
            elapsed: Duration::ZERO,
            cancelled: false,
        }
    }

    pub fn items_skipped(&self) -> usize {
        self.items_attempted.saturating_sub(self.items_succeeded)
    }
}

/// How one source's run ended.
#[derive(Debug)]
pub enum SourceOutcome {
    Completed(RunReport),
    Aborted {
        source: String,
        kind: &'static str,
        reason: String,
    },
}

impl SourceOutcome {
    pub fn source(&self) -> &str {
        match self {
            SourceOutcome::Completed(report) => &report.source,
            SourceOutcome::Aborted { source, .. } => source,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, SourceOutcome::Aborted { .. })
    }
}

/// Everything one invocation of the pipeline produced.
#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<SourceOutcome>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn aborted(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.outcomes.iter().filter(|o| o.is_aborted())
    }

    pub fn reports(&self) -> impl Iterator<Item = &RunReport> {
        self.outcomes.iter().filter_map(|o| match o {
            SourceOutcome::Completed(report) => Some(report),
            SourceOutcome::Aborted { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_set_preserves_first_seen_order() {
        let mut set = IdentifierSet::new();
        assert!(set.insert("3"));
        assert!(set.insert("1"));
        assert!(!set.insert("3"));
        assert!(set.insert("2"));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["3", "1", "2"]);
    }

    #[test]
    fn test_identifier_set_equality_ignores_order() {
        let a: IdentifierSet = ["a", "b"].into_iter().map(String::from).collect();
        let b: IdentifierSet = ["b", "a", "b"].into_iter().map(String::from).collect();
        assert_eq!(a, b);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_report_skipped_count() {
        let mut report = RunReport::new("pnd");
        report.items_attempted = 5;
        report.items_succeeded = 3;
        assert_eq!(report.items_skipped(), 2);
    }

    #[test]
    fn test_normalized_record_serializes_as_plain_object() {
        let mut map = Map::new();
        map.insert("no".into(), Value::from(1));
        let rec = NormalizedRecord(map);
        assert_eq!(serde_json::to_string(&rec).unwrap(), r#"{"no":1}"#);
    }
}
