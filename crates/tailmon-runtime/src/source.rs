#![forbid(unsafe_code)]

//! Pull-style data sources: summary snapshots and tail backfill.
//!
//! Both report "no data" as `Ok(None)`. The caller skips that round and keeps
//! its current state; only `Err` is logged as a failure.

use std::collections::VecDeque;

use tailmon_core::{FetchError, KeyDigest, LogLine, Snapshot};

/// Produces full summary snapshots.
pub trait SnapshotSource {
    fn fetch(&mut self) -> Result<Option<Snapshot>, FetchError>;
}

/// Produces the most recent records for a filter, newest first.
pub trait BackfillSource {
    fn fetch(&mut self, filter: &KeyDigest, max: usize)
    -> Result<Option<Vec<LogLine>>, FetchError>;
}

/// A snapshot source that never has data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshots;

impl SnapshotSource for NoSnapshots {
    fn fetch(&mut self) -> Result<Option<Snapshot>, FetchError> {
        Ok(None)
    }
}

/// A backfill source that never has data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackfill;

impl BackfillSource for NoBackfill {
    fn fetch(
        &mut self,
        _filter: &KeyDigest,
        _max: usize,
    ) -> Result<Option<Vec<LogLine>>, FetchError> {
        Ok(None)
    }
}

/// Replays queued snapshot responses, then reports no data.
#[derive(Debug, Default)]
pub struct ScriptedSnapshots {
    responses: VecDeque<Result<Option<Snapshot>, FetchError>>,
}

impl ScriptedSnapshots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then(mut self, response: Result<Option<Snapshot>, FetchError>) -> Self {
        self.responses.push_back(response);
        self
    }

    /// Queue a snapshot parsed from JSON. Unparseable JSON queues a
    /// [`FetchError::Parse`].
    #[must_use]
    pub fn then_json(self, json: &str) -> Self {
        let response = Snapshot::parse(json.as_bytes()).map_err(FetchError::from);
        self.then(response)
    }
}

impl SnapshotSource for ScriptedSnapshots {
    fn fetch(&mut self) -> Result<Option<Snapshot>, FetchError> {
        self.responses.pop_front().unwrap_or(Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sources_have_no_data() {
        assert!(matches!(NoSnapshots.fetch(), Ok(None)));
        assert!(matches!(
            NoBackfill.fetch(&KeyDigest::unfiltered(), 20),
            Ok(None)
        ));
    }

    #[test]
    fn scripted_snapshots_replay_in_order() {
        let mut source = ScriptedSnapshots::new()
            .then_json(r#"{"tags":{"sshd":1}}"#)
            .then_json("")
            .then_json("{oops");
        assert!(matches!(source.fetch(), Ok(Some(_))));
        assert!(matches!(source.fetch(), Ok(None)));
        assert!(matches!(source.fetch(), Err(FetchError::Parse(_))));
        assert!(matches!(source.fetch(), Ok(None)));
    }
}
