#![forbid(unsafe_code)]

//! Render sinks: where the monitor pushes what a viewer should see.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use tailmon_core::{Group, KeyDigest, SummaryRow, SummaryValue, SummaryViews, TailEntry};

use crate::subscription::HandleId;

/// Subscription state shown next to the tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub filter: KeyDigest,
    pub handle: Option<HandleId>,
    pub open: bool,
    pub paused: bool,
}

/// Receives frames from the monitor. Called on the event-loop thread only.
pub trait RenderSink {
    fn render_tail(&mut self, entries: &[TailEntry]);
    fn render_summary(&mut self, views: &SummaryViews);
    fn render_status(&mut self, status: &Status);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn render_tail(&mut self, _entries: &[TailEntry]) {}
    fn render_summary(&mut self, _views: &SummaryViews) {}
    fn render_status(&mut self, _status: &Status) {}
}

/// One tail row as it was rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRow {
    pub text: String,
    pub count: u64,
    pub highlighted: bool,
}

impl From<&TailEntry> for TailRow {
    fn from(entry: &TailEntry) -> Self {
        Self {
            text: entry.display_text().to_owned(),
            count: entry.count(),
            highlighted: entry.is_highlighted(),
        }
    }
}

/// One summary row as it was rendered, in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryLine {
    pub key: String,
    pub value: SummaryValue,
}

impl From<&SummaryRow> for SummaryLine {
    fn from(row: &SummaryRow) -> Self {
        Self {
            key: row.key.clone(),
            value: row.value.clone(),
        }
    }
}

/// Everything a [`RecordingSink`] has been given.
#[derive(Debug, Default)]
pub struct Recording {
    pub tails: Vec<Vec<TailRow>>,
    pub summaries: Vec<[Vec<SummaryLine>; 3]>,
    pub statuses: Vec<Status>,
}

impl Recording {
    #[must_use]
    pub fn last_tail(&self) -> Option<&[TailRow]> {
        self.tails.last().map(Vec::as_slice)
    }

    /// Last rendered rows of `group`.
    #[must_use]
    pub fn last_summary(&self, group: Group) -> Option<&[SummaryLine]> {
        let slot = Group::ALL.iter().position(|&g| g == group)?;
        self.summaries.last().map(|views| views[slot].as_slice())
    }

    #[must_use]
    pub fn last_status(&self) -> Option<&Status> {
        self.statuses.last()
    }
}

/// Keeps every frame, for tests. Clones share the recording.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    recording: Rc<RefCell<Recording>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn recording(&self) -> Ref<'_, Recording> {
        self.recording.borrow()
    }
}

impl RenderSink for RecordingSink {
    fn render_tail(&mut self, entries: &[TailEntry]) {
        let rows = entries.iter().map(TailRow::from).collect();
        self.recording.borrow_mut().tails.push(rows);
    }

    fn render_summary(&mut self, views: &SummaryViews) {
        let frame = Group::ALL.map(|group| {
            views
                .view(group)
                .sorted()
                .into_iter()
                .map(SummaryLine::from)
                .collect::<Vec<_>>()
        });
        self.recording.borrow_mut().summaries.push(frame);
    }

    fn render_status(&mut self, status: &Status) {
        self.recording.borrow_mut().statuses.push(status.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tailmon_core::{Snapshot, TailConfig, TailEngine};

    #[test]
    fn recording_sink_keeps_frames() {
        let mut sink = RecordingSink::new();
        let view = sink.clone();

        let mut tail = TailEngine::new(TailConfig::default());
        tail.ingest(Instant::now(), "boot 1");
        sink.render_tail(tail.entries());

        let mut views = SummaryViews::new();
        let snapshot = Snapshot::parse(br#"{"hosts":{"a":1,"b":5}}"#).unwrap().unwrap();
        views.merge(&snapshot);
        sink.render_summary(&views);

        let recording = view.recording();
        assert_eq!(
            recording.last_tail(),
            Some(
                &[TailRow {
                    text: "boot 1".into(),
                    count: 1,
                    highlighted: true
                }][..]
            )
        );
        let hosts: Vec<&str> = recording
            .last_summary(Group::Hosts)
            .unwrap()
            .iter()
            .map(|l| l.key.as_str())
            .collect();
        assert_eq!(hosts, vec!["b", "a"]);
        assert!(recording.last_summary(Group::Tags).unwrap().is_empty());
        assert!(recording.last_status().is_none());
    }
}
