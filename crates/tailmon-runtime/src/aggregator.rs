#![forbid(unsafe_code)]

//! Summary aggregation.
//!
//! Every poll fetches a full snapshot and upserts it into the three views.
//! Rows are never removed: a key missing from a later snapshot keeps its last
//! value. A poll with no data or a failed fetch leaves the views untouched.

use tailmon_core::{Group, KeyDigest, MergeStats, SummaryRow, SummaryViews};

use crate::source::SnapshotSource;

/// Result of one [`SummaryAggregator::fetch_and_merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Merged(MergeStats),
    /// The source had no data; nothing changed.
    Empty,
    /// The fetch failed; nothing changed.
    Failed,
}

/// Counters since the aggregator was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub polls: u64,
    pub merged: u64,
    pub empty: u64,
    pub failed: u64,
}

/// Owns the summary views.
#[derive(Debug, Default)]
pub struct SummaryAggregator {
    views: SummaryViews,
    stats: AggregatorStats,
}

impl SummaryAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch one snapshot and merge it.
    pub fn fetch_and_merge(&mut self, source: &mut dyn SnapshotSource) -> PollOutcome {
        self.stats.polls += 1;
        match source.fetch() {
            Ok(Some(snapshot)) => {
                let merge = self.views.merge(&snapshot);
                self.stats.merged += 1;
                tracing::debug!(
                    inserted = merge.inserted,
                    updated = merge.updated,
                    rows = self.views.total_rows(),
                    "summary merged"
                );
                PollOutcome::Merged(merge)
            }
            Ok(None) => {
                self.stats.empty += 1;
                tracing::debug!("summary poll returned no data");
                PollOutcome::Empty
            }
            Err(err) => {
                self.stats.failed += 1;
                tracing::warn!(error = %err, "summary poll failed");
                PollOutcome::Failed
            }
        }
    }

    /// The filter digest for an activated row, if `group` has it.
    #[must_use]
    pub fn activate(&self, group: Group, digest: &KeyDigest) -> Option<KeyDigest> {
        self.views
            .view(group)
            .get(digest)
            .map(|row| row.digest.clone())
    }

    /// Rows of `group` by value descending, ties by key.
    #[must_use]
    pub fn sorted_rows(&self, group: Group) -> Vec<&SummaryRow> {
        self.views.view(group).sorted()
    }

    #[must_use]
    pub fn views(&self) -> &SummaryViews {
        &self.views
    }

    #[must_use]
    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }
}
