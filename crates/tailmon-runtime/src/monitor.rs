#![forbid(unsafe_code)]

//! The monitor event loop.
//!
//! [`Monitor`] owns the subscription, the tail, the summary aggregator, the
//! scheduler and the render sink, and applies every change on the thread
//! that calls [`Monitor::step`]. Everything else (stream threads, scheduler
//! jobs, the signal handler, the UI) only posts [`MonitorEvent`]s.
//!
//! # Event handling
//!
//! | Event | Effect | Rendered |
//! |---|---|---|
//! | `Stream` | decoded record ingested into the tail | tail |
//! | `Tick` | expired highlights cleared | tail, if anything changed |
//! | `Poll` | snapshot fetched and merged | summary, if merged |
//! | `Command` | see [`Command`] | tail and/or status |
//! | `Shutdown` | jobs stopped, subscription closed | nothing |

use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tailmon_core::{
    Clock, Group, KeyDigest, MonitorConfig, SummaryViews, SystemClock, TailEngine,
};

use crate::aggregator::{AggregatorStats, PollOutcome, SummaryAggregator};
use crate::scheduler::{JobId, Scheduler, ThreadScheduler};
use crate::sink::{NullSink, RenderSink, Status};
use crate::source::{BackfillSource, NoBackfill, NoSnapshots, SnapshotSource};
use crate::subscription::{
    Dispatch, HandleId, LinkEvent, StreamEvent, SubscriptionManager, SubscriptionStats, Transport,
};

/// User actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A summary row was activated; follow its key if the row exists.
    Activate { group: Group, digest: KeyDigest },
    /// Follow an explicit filter.
    SetFilter(KeyDigest),
    /// Close the stream and freeze the tail.
    Pause,
    /// Backfill and reopen the stream.
    Resume,
    /// Empty the tail.
    Clear,
    /// Backfill and reopen with the current filter.
    Reconnect,
    /// Render status, summary and tail again without changing state.
    Redraw,
}

/// Input of [`Monitor::step`].
#[derive(Debug)]
pub enum MonitorEvent {
    Stream(StreamEvent),
    Tick,
    Poll,
    Command(Command),
    Shutdown,
}

/// Whether the loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub events: u64,
    pub ticks: u64,
    pub backfills: u64,
    pub backfill_failures: u64,
    pub filter_changes: u64,
    pub subscription: SubscriptionStats,
    pub aggregator: AggregatorStats,
}

/// Collaborators of a [`Monitor`].
pub struct MonitorParts {
    pub config: MonitorConfig,
    pub transport: Box<dyn Transport>,
    pub snapshots: Box<dyn SnapshotSource>,
    pub backfill: Box<dyn BackfillSource>,
    pub scheduler: Box<dyn Scheduler>,
    pub sink: Box<dyn RenderSink>,
    pub clock: Arc<dyn Clock>,
}

impl MonitorParts {
    /// Parts with no data sources, a thread scheduler, no rendering and the
    /// system clock.
    pub fn new(config: MonitorConfig, transport: impl Transport + 'static) -> Self {
        Self {
            config,
            transport: Box::new(transport),
            snapshots: Box::new(NoSnapshots),
            backfill: Box::new(NoBackfill),
            scheduler: Box::new(ThreadScheduler::new()),
            sink: Box::new(NullSink),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn snapshots(mut self, source: impl SnapshotSource + 'static) -> Self {
        self.snapshots = Box::new(source);
        self
    }

    #[must_use]
    pub fn backfill(mut self, source: impl BackfillSource + 'static) -> Self {
        self.backfill = Box::new(source);
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: impl RenderSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

/// Posts events to a running [`Monitor`] from any thread.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorEvent>,
}

impl MonitorHandle {
    /// Returns `false` once the monitor is gone.
    pub fn send(&self, event: MonitorEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn command(&self, command: Command) -> bool {
        self.send(MonitorEvent::Command(command))
    }

    pub fn shutdown(&self) -> bool {
        self.send(MonitorEvent::Shutdown)
    }
}

/// The single-threaded monitor.
pub struct Monitor {
    config: MonitorConfig,
    tail: Rc<RefCell<TailEngine>>,
    aggregator: SummaryAggregator,
    subscription: SubscriptionManager,
    snapshots: Box<dyn SnapshotSource>,
    backfill: Box<dyn BackfillSource>,
    scheduler: Box<dyn Scheduler>,
    sink: Box<dyn RenderSink>,
    clock: Arc<dyn Clock>,
    sender: mpsc::Sender<MonitorEvent>,
    receiver: mpsc::Receiver<MonitorEvent>,
    jobs: Vec<JobId>,
    paused: bool,
    stopped: bool,
    stats: MonitorStats,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("filter", &self.filter())
            .field("paused", &self.paused)
            .field("subscription", &self.subscription)
            .field("tail", &self.tail.borrow().len())
            .finish()
    }
}

impl Monitor {
    pub fn new(parts: MonitorParts) -> Self {
        let MonitorParts {
            config,
            transport,
            snapshots,
            backfill,
            scheduler,
            sink,
            clock,
        } = parts;

        let (sender, receiver) = mpsc::channel();
        let tail = Rc::new(RefCell::new(TailEngine::new(config.tail)));

        let mut subscription =
            SubscriptionManager::with_channel(transport, sender.clone(), MonitorEvent::Stream);
        let ingest_tail = tail.clone();
        let ingest_clock = clock.clone();
        subscription.on_record(move |line| {
            let now = ingest_clock.now();
            ingest_tail.borrow_mut().ingest_line(now, &line);
        });
        subscription.on_link(|event| match event {
            LinkEvent::Failed { filter, reason, .. } => {
                tracing::debug!(filter = %filter, reason = %reason, "link failed");
            }
            other => tracing::trace!(event = ?other, "link event"),
        });

        Self {
            config,
            tail,
            aggregator: SummaryAggregator::new(),
            subscription,
            snapshots,
            backfill,
            scheduler,
            sink,
            clock,
            sender,
            receiver,
            jobs: Vec::new(),
            paused: false,
            stopped: false,
            stats: MonitorStats::default(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            sender: self.sender.clone(),
        }
    }

    /// Backfill, open the initial subscription, start the tick and poll
    /// jobs and run one poll right away.
    pub fn start(&mut self) {
        tracing::info!(config = %self.config.summary_short(), "monitor starting");
        let filter = self.config.initial_filter.clone();
        self.refill(&filter);
        self.subscription.open(filter);
        self.render_status();

        let tick = self.sender.clone();
        let tick_job = self.scheduler.start(
            "tick",
            self.config.tick_interval,
            Box::new(move || tick.send(MonitorEvent::Tick).is_ok()),
        );
        let poll = self.sender.clone();
        let poll_job = self.scheduler.start(
            "poll",
            self.config.poll_interval,
            Box::new(move || poll.send(MonitorEvent::Poll).is_ok()),
        );
        self.jobs = vec![tick_job, poll_job];

        self.poll();
    }

    /// Handle one event.
    pub fn step(&mut self, event: MonitorEvent) -> Flow {
        if self.stopped {
            return Flow::Stop;
        }
        self.stats.events += 1;
        match event {
            MonitorEvent::Stream(event) => match self.subscription.dispatch(event) {
                Dispatch::Delivered => self.render_tail(),
                Dispatch::Ended => self.render_status(),
                Dispatch::Malformed | Dispatch::Stale => {}
            },
            MonitorEvent::Tick => {
                self.stats.ticks += 1;
                let now = self.clock.now();
                let changed = self.tail.borrow_mut().tick(now);
                if changed > 0 {
                    self.render_tail();
                }
            }
            MonitorEvent::Poll => self.poll(),
            MonitorEvent::Command(command) => self.command(command),
            MonitorEvent::Shutdown => {
                self.shutdown();
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Handle every event already queued, without blocking.
    pub fn pump(&mut self) -> Flow {
        while let Ok(event) = self.receiver.try_recv() {
            if self.step(event) == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Handle events as they arrive for `wait`, then return.
    pub fn pump_for(&mut self, wait: Duration) -> Flow {
        let deadline = Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(left) {
                Ok(event) => {
                    if self.step(event) == Flow::Stop {
                        return Flow::Stop;
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => return Flow::Continue,
                // Unreachable while `self.sender` lives.
                Err(mpsc::RecvTimeoutError::Disconnected) => return Flow::Stop,
            }
        }
    }

    /// Block handling events until [`MonitorEvent::Shutdown`].
    pub fn run(&mut self) {
        while let Ok(event) = self.receiver.recv() {
            if self.step(event) == Flow::Stop {
                break;
            }
        }
        self.shutdown();
    }

    /// Stop jobs and close the subscription. Idempotent.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for id in self.jobs.drain(..) {
            self.scheduler.stop(id);
        }
        self.subscription.close();
        tracing::info!(stats = ?self.stats(), "monitor stopped");
    }

    #[must_use]
    pub fn tail(&self) -> Ref<'_, TailEngine> {
        self.tail.borrow()
    }

    #[must_use]
    pub fn views(&self) -> &SummaryViews {
        self.aggregator.views()
    }

    #[must_use]
    pub fn filter(&self) -> KeyDigest {
        self.subscription
            .filter()
            .cloned()
            .unwrap_or_else(|| self.config.initial_filter.clone())
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.subscription.is_open()
    }

    #[must_use]
    pub fn current_handle(&self) -> Option<HandleId> {
        self.subscription.current_handle()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        Status {
            filter: self.filter(),
            handle: self.subscription.current_handle(),
            open: self.subscription.is_open(),
            paused: self.paused,
        }
    }

    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            subscription: self.subscription.stats(),
            aggregator: self.aggregator.stats(),
            ..self.stats
        }
    }

    fn command(&mut self, command: Command) {
        tracing::debug!(?command, "command");
        match command {
            Command::Activate { group, digest } => {
                match self.aggregator.activate(group, &digest) {
                    Some(filter) => self.retarget(filter),
                    None => {
                        tracing::debug!(group = %group, digest = %digest, "activated row not found");
                    }
                }
            }
            Command::SetFilter(filter) => self.retarget(filter),
            Command::Pause => {
                if !self.paused {
                    self.paused = true;
                    self.subscription.close();
                    self.render_status();
                }
            }
            Command::Resume => {
                if self.paused {
                    self.paused = false;
                    self.restart();
                }
            }
            Command::Clear => {
                self.tail.borrow_mut().clear();
                self.render_tail();
            }
            Command::Reconnect => {
                self.paused = false;
                self.restart();
            }
            Command::Redraw => {
                self.render_status();
                self.sink.render_summary(self.aggregator.views());
                self.render_tail();
            }
        }
    }

    /// Follow `filter`: close, backfill for it, reopen. Nothing happens when
    /// `filter` is already followed by an open subscription.
    fn retarget(&mut self, filter: KeyDigest) {
        self.paused = false;
        if self.subscription.is_open() && self.subscription.filter() == Some(&filter) {
            tracing::debug!(filter = %filter, "already following filter");
            return;
        }
        self.stats.filter_changes += 1;
        tracing::info!(filter = %filter, "filter changed");
        self.subscription.close();
        self.refill(&filter);
        self.subscription.reset_filter(filter);
        self.render_status();
    }

    /// Backfill and reopen with the current filter.
    fn restart(&mut self) {
        let filter = self.filter();
        self.subscription.close();
        self.refill(&filter);
        self.subscription.open(filter);
        self.render_status();
    }

    fn refill(&mut self, filter: &KeyDigest) {
        match self.backfill.fetch(filter, self.config.backfill_max) {
            Ok(Some(lines)) => {
                self.stats.backfills += 1;
                let now = self.clock.now();
                self.tail.borrow_mut().backfill_lines(now, &lines);
                self.render_tail();
            }
            Ok(None) => tracing::debug!(filter = %filter, "backfill returned no data"),
            Err(err) => {
                self.stats.backfill_failures += 1;
                tracing::warn!(filter = %filter, error = %err, "backfill failed");
            }
        }
    }

    fn poll(&mut self) {
        if let PollOutcome::Merged(_) = self.aggregator.fetch_and_merge(self.snapshots.as_mut()) {
            self.sink.render_summary(self.aggregator.views());
        }
    }

    fn render_tail(&mut self) {
        let tail = self.tail.borrow();
        self.sink.render_tail(tail.entries());
    }

    fn render_status(&mut self) {
        let status = self.status();
        self.sink.render_status(&status);
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
