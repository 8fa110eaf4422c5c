#![forbid(unsafe_code)]

//! Grouped-count summary views.
//!
//! The collector publishes running totals per tag, priority and host. Each
//! poll returns a full [`Snapshot`]; [`SummaryViews::merge`] folds it into
//! three views keyed by [`KeyDigest`]. Rows are upserted, never removed: a
//! key missing from a later snapshot keeps its last value.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Deserialize;

use crate::digest::KeyDigest;

/// Which summary a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Tags,
    Priorities,
    Hosts,
}

impl Group {
    pub const ALL: [Group; 3] = [Group::Tags, Group::Priorities, Group::Hosts];

    /// Field name in the snapshot document.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tags => "tags",
            Self::Priorities => "pri",
            Self::Hosts => "hosts",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tags" | "tag" => Some(Self::Tags),
            "pri" | "priority" | "priorities" => Some(Self::Priorities),
            "hosts" | "host" => Some(Self::Hosts),
            _ => None,
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A summary cell. Counters are integers; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SummaryValue {
    Count(u64),
    Number(f64),
    Text(String),
}

impl SummaryValue {
    /// Ordering weight used by [`SummaryView::sorted`].
    #[must_use]
    pub fn weight(&self) -> f64 {
        match self {
            Self::Count(n) => *n as f64,
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(0.0),
        }
    }
}

impl From<u64> for SummaryValue {
    fn from(n: u64) -> Self {
        Self::Count(n)
    }
}

impl From<&str> for SummaryValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl fmt::Display for SummaryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// One row of a summary view.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub key: String,
    pub digest: KeyDigest,
    pub value: SummaryValue,
}

/// Result of [`SummaryView::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Rows of one group, unique by digest, in first-seen order.
#[derive(Debug, Clone)]
pub struct SummaryView {
    group: Group,
    rows: Vec<SummaryRow>,
    index: HashMap<KeyDigest, usize>,
}

impl SummaryView {
    #[must_use]
    pub fn new(group: Group) -> Self {
        Self {
            group,
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    #[must_use]
    pub fn group(&self) -> Group {
        self.group
    }

    /// Replace the value of an existing row in place, or append a new row.
    pub fn upsert(&mut self, key: &str, value: SummaryValue) -> Upsert {
        let digest = KeyDigest::of(key);
        if let Some(&slot) = self.index.get(&digest) {
            self.rows[slot].value = value;
            return Upsert::Updated;
        }
        self.index.insert(digest.clone(), self.rows.len());
        self.rows.push(SummaryRow {
            key: key.to_owned(),
            digest,
            value,
        });
        Upsert::Inserted
    }

    #[must_use]
    pub fn get(&self, digest: &KeyDigest) -> Option<&SummaryRow> {
        self.index.get(digest).map(|&slot| &self.rows[slot])
    }

    #[must_use]
    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows by value descending, ties by key. Does not change stored order.
    #[must_use]
    pub fn sorted(&self) -> Vec<&SummaryRow> {
        let mut rows: Vec<&SummaryRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| {
            b.value
                .weight()
                .total_cmp(&a.value.weight())
                .then_with(|| a.key.cmp(&b.key))
        });
        rows
    }
}

/// A full point-in-time response of the snapshot endpoint.
///
/// The endpoint serves the collector's exported variables, so unrelated
/// top-level fields are ignored and missing groups are empty.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub tags: BTreeMap<String, SummaryValue>,
    #[serde(default)]
    pub pri: BTreeMap<String, SummaryValue>,
    #[serde(default)]
    pub hosts: BTreeMap<String, SummaryValue>,
}

impl Snapshot {
    /// Parse a response body. An empty body or JSON `null` is no data.
    pub fn parse(body: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice::<Option<Self>>(body)
    }

    #[must_use]
    pub fn group(&self, group: Group) -> &BTreeMap<String, SummaryValue> {
        match group {
            Group::Tags => &self.tags,
            Group::Priorities => &self.pri,
            Group::Hosts => &self.hosts,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.pri.is_empty() && self.hosts.is_empty()
    }
}

/// Counts from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
}

/// The three summary views.
#[derive(Debug, Clone)]
pub struct SummaryViews {
    tags: SummaryView,
    priorities: SummaryView,
    hosts: SummaryView,
}

impl Default for SummaryViews {
    fn default() -> Self {
        Self {
            tags: SummaryView::new(Group::Tags),
            priorities: SummaryView::new(Group::Priorities),
            hosts: SummaryView::new(Group::Hosts),
        }
    }
}

impl SummaryViews {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn view(&self, group: Group) -> &SummaryView {
        match group {
            Group::Tags => &self.tags,
            Group::Priorities => &self.priorities,
            Group::Hosts => &self.hosts,
        }
    }

    fn view_mut(&mut self, group: Group) -> &mut SummaryView {
        match group {
            Group::Tags => &mut self.tags,
            Group::Priorities => &mut self.priorities,
            Group::Hosts => &mut self.hosts,
        }
    }

    /// Upsert every `(key, value)` of every group.
    pub fn merge(&mut self, snapshot: &Snapshot) -> MergeStats {
        let mut stats = MergeStats::default();
        for group in Group::ALL {
            let view = self.view_mut(group);
            for (key, value) in snapshot.group(group) {
                match view.upsert(key, value.clone()) {
                    Upsert::Inserted => stats.inserted += 1,
                    Upsert::Updated => stats.updated += 1,
                }
            }
        }
        stats
    }

    /// Total rows across the three views.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        Group::ALL.iter().map(|&g| self.view(g).len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(json: &str) -> Snapshot {
        Snapshot::parse(json.as_bytes()).unwrap().unwrap()
    }

    #[test]
    fn upsert_existing_digest_keeps_row_count() {
        let mut view = SummaryView::new(Group::Tags);
        assert_eq!(view.upsert("sshd", SummaryValue::Count(1)), Upsert::Inserted);
        assert_eq!(view.upsert("sshd", SummaryValue::Count(5)), Upsert::Updated);
        assert_eq!(view.len(), 1);
        assert_eq!(view.rows()[0].value, SummaryValue::Count(5));
    }

    #[test]
    fn upsert_new_digest_grows_by_one() {
        let mut view = SummaryView::new(Group::Hosts);
        view.upsert("a", SummaryValue::Count(1));
        let before = view.len();
        view.upsert("b", SummaryValue::Count(1));
        assert_eq!(view.len(), before + 1);
    }

    #[test]
    fn update_preserves_position() {
        let mut view = SummaryView::new(Group::Tags);
        view.upsert("a", SummaryValue::Count(1));
        view.upsert("b", SummaryValue::Count(2));
        view.upsert("a", SummaryValue::Count(9));
        let keys: Vec<&str> = view.rows().iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn get_by_digest() {
        let mut view = SummaryView::new(Group::Tags);
        view.upsert("cron", SummaryValue::Count(3));
        let row = view.get(&KeyDigest::of("cron")).unwrap();
        assert_eq!(row.key, "cron");
        assert!(view.get(&KeyDigest::of("sshd")).is_none());
    }

    #[test]
    fn merge_never_removes_rows() {
        let mut views = SummaryViews::new();
        views.merge(&snapshot(r#"{"tags":{"a":1,"b":2}}"#));
        let stats = views.merge(&snapshot(r#"{"tags":{"b":7}}"#));
        assert_eq!(stats, MergeStats { inserted: 0, updated: 1 });
        let tags = views.view(Group::Tags);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get(&KeyDigest::of("a")).unwrap().value, SummaryValue::Count(1));
        assert_eq!(tags.get(&KeyDigest::of("b")).unwrap().value, SummaryValue::Count(7));
    }

    #[test]
    fn merge_routes_groups() {
        let mut views = SummaryViews::new();
        let stats = views.merge(&snapshot(
            r#"{"tags":{"cron":4},"pri":{"kern.err":2,"mail.info":"n/a"},"hosts":{"mx1":10}}"#,
        ));
        assert_eq!(stats.inserted, 4);
        assert_eq!(views.view(Group::Priorities).len(), 2);
        assert_eq!(views.view(Group::Hosts).rows()[0].key, "mx1");
        assert_eq!(views.total_rows(), 4);
    }

    #[test]
    fn parse_empty_and_null_are_no_data() {
        assert_eq!(Snapshot::parse(b"").unwrap(), None);
        assert_eq!(Snapshot::parse(b"  \n").unwrap(), None);
        assert_eq!(Snapshot::parse(b"null").unwrap(), None);
        assert!(Snapshot::parse(b"{oops").is_err());
    }

    #[test]
    fn parse_ignores_foreign_variables() {
        let snap = snapshot(r#"{"cmdline":["x"],"memstats":{"Alloc":1},"hosts":{"h":1}}"#);
        assert!(snap.tags.is_empty());
        assert_eq!(snap.hosts.len(), 1);
        assert!(!snap.is_empty());
    }

    #[test]
    fn value_variants_parse() {
        let snap = snapshot(r#"{"tags":{"a":3,"b":1.5,"c":"many"}}"#);
        assert_eq!(snap.tags["a"], SummaryValue::Count(3));
        assert_eq!(snap.tags["b"], SummaryValue::Number(1.5));
        assert_eq!(snap.tags["c"], SummaryValue::Text("many".into()));
        assert_eq!(snap.tags["c"].to_string(), "many");
    }

    #[test]
    fn sorted_is_count_descending_then_key() {
        let mut view = SummaryView::new(Group::Tags);
        view.upsert("low", SummaryValue::Count(1));
        view.upsert("high", SummaryValue::Count(9));
        view.upsert("also-high", SummaryValue::Count(9));
        let keys: Vec<&str> = view.sorted().iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["also-high", "high", "low"]);
        assert_eq!(view.rows()[0].key, "low");
    }

    #[test]
    fn group_parse_and_names() {
        assert_eq!(Group::parse("Hosts"), Some(Group::Hosts));
        assert_eq!(Group::parse("pri"), Some(Group::Priorities));
        assert_eq!(Group::parse("nope"), None);
        assert_eq!(Group::Priorities.to_string(), "pri");
    }
}
