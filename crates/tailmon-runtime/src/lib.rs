#![forbid(unsafe_code)]

//! Tailmon Runtime
//!
//! The moving parts around `tailmon-core`: the live stream subscription, the
//! periodic jobs, the summary poll and the event loop that ties them to a
//! render sink.
//!
//! # Key Components
//!
//! - [`Monitor`] - Single-threaded event loop owning all state
//! - [`SubscriptionManager`] - One live stream at a time, stale events dropped by handle
//! - [`SummaryAggregator`] - Snapshot polling into upsert-only views
//! - [`Scheduler`] - Fixed-rate jobs ([`ThreadScheduler`], [`ManualScheduler`])
//! - [`RenderSink`] - Where frames go ([`RecordingSink`] for tests)
//! - [`file_source`] - Adapters over newline-delimited JSON and snapshot files
//!
//! # Threads
//! Stream threads and scheduler jobs never touch monitor state. They post
//! [`MonitorEvent`]s to a channel drained by [`Monitor::run`], so every
//! handler runs on one thread and no lock guards the tail or the views.

pub mod aggregator;
pub mod file_source;
pub mod monitor;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod subscription;

pub use aggregator::{AggregatorStats, PollOutcome, SummaryAggregator};
pub use file_source::{FileBackfill, FollowTransport, StatsFile};
pub use monitor::{
    Command, Flow, Monitor, MonitorEvent, MonitorHandle, MonitorParts, MonitorStats,
};
pub use scheduler::{
    Job, JobId, ManualScheduler, Scheduler, StopSignal, StopTrigger, ThreadScheduler,
};
pub use sink::{NullSink, Recording, RecordingSink, RenderSink, Status, SummaryLine, TailRow};
pub use source::{BackfillSource, NoBackfill, NoSnapshots, ScriptedSnapshots, SnapshotSource};
pub use subscription::{
    ChannelTransport, Dispatch, HandleId, LinkEvent, Stream, StreamEvent, StreamEventKind,
    StreamSender, SubscriptionManager, SubscriptionStats, Transport,
};
