#![forbid(unsafe_code)]

//! The live stream subscription.
//!
//! Exactly one subscription is live at a time, keyed by a filter digest.
//! Changing the filter is destructive: the old stream is signalled to stop
//! and forgotten, then a new one is opened under a fresh [`HandleId`].
//!
//! # How it works
//!
//! 1. [`SubscriptionManager::open`] asks the [`Transport`] for a [`Stream`] and
//!    runs it on a named background thread.
//! 2. The stream pushes [`StreamEvent`]s through its [`StreamSender`]; the
//!    sender routes them to the event loop (normally a channel).
//! 3. The event loop hands each event back to [`SubscriptionManager::dispatch`],
//!    which drops anything whose handle is not the current one, decodes
//!    payloads and invokes the registered observers.
//!
//! Because staleness is decided by handle identity on the event-loop thread,
//! no record of a closed handle ever reaches `on_record`, even if its thread
//! is still draining.

use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tailmon_core::{KeyDigest, LogLine, Record, TransportError};

use crate::scheduler::{StopSignal, StopTrigger};

/// Identity of one opened stream. Never reused within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Wrap a raw id, e.g. one read back from a rendered status.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a stream thread reports.
#[derive(Debug)]
pub enum StreamEventKind {
    /// One raw stream unit.
    Payload(Vec<u8>),
    /// The peer ended the stream.
    Closed,
    /// The stream broke.
    Failed(TransportError),
}

/// A stream event tagged with the handle that produced it.
#[derive(Debug)]
pub struct StreamEvent {
    pub handle: HandleId,
    pub kind: StreamEventKind,
}

/// Lifecycle notifications, for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected { handle: HandleId, filter: KeyDigest },
    Closed { handle: HandleId, filter: KeyDigest },
    Failed {
        handle: HandleId,
        filter: KeyDigest,
        reason: String,
    },
}

type Route = Arc<dyn Fn(StreamEvent) -> bool + Send + Sync>;

/// Write side given to a running [`Stream`].
#[derive(Clone)]
pub struct StreamSender {
    handle: HandleId,
    route: Route,
}

impl fmt::Debug for StreamSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSender")
            .field("handle", &self.handle)
            .finish()
    }
}

impl StreamSender {
    #[must_use]
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// Forward one unit. Returns `false` once nobody is listening; the
    /// stream should exit then.
    pub fn payload(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.send(StreamEventKind::Payload(bytes.into()))
    }

    /// Report that the peer ended the stream.
    pub fn closed(&self) -> bool {
        self.send(StreamEventKind::Closed)
    }

    /// Report a broken stream.
    pub fn failed(&self, error: TransportError) -> bool {
        self.send(StreamEventKind::Failed(error))
    }

    fn send(&self, kind: StreamEventKind) -> bool {
        (self.route)(StreamEvent {
            handle: self.handle,
            kind,
        })
    }
}

/// An opened stream, run to completion on its own thread.
pub trait Stream: Send {
    /// Pump units into `sender` until `stop` fires, the peer ends, or the
    /// sender reports that nobody is listening.
    fn run(self: Box<Self>, sender: StreamSender, stop: StopSignal);
}

/// Opens filtered streams.
pub trait Transport {
    fn open(&mut self, filter: &KeyDigest) -> Result<Box<dyn Stream>, TransportError>;
}

/// Result of [`SubscriptionManager::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A decoded record went to `on_record`.
    Delivered,
    /// The payload did not decode and was dropped.
    Malformed,
    /// The event belongs to a closed handle and was ignored.
    Stale,
    /// The current stream ended; the subscription is no longer open.
    Ended,
}

/// Counters since the manager was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub opened: u64,
    pub open_failures: u64,
    pub delivered: u64,
    pub malformed: u64,
    pub stale: u64,
}

struct Active {
    handle: HandleId,
    trigger: StopTrigger,
    next_seq: u64,
}

/// Owns the single live subscription.
pub struct SubscriptionManager {
    transport: Box<dyn Transport>,
    route: Route,
    filter: Option<KeyDigest>,
    current: Option<Active>,
    next_handle: u64,
    on_record: Option<Box<dyn FnMut(LogLine)>>,
    on_link: Option<Box<dyn FnMut(&LinkEvent)>>,
    stats: SubscriptionStats,
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("filter", &self.filter)
            .field("handle", &self.current_handle())
            .field("stats", &self.stats)
            .finish()
    }
}

impl SubscriptionManager {
    /// `route` receives every event of every stream, from stream threads.
    pub fn new(
        transport: Box<dyn Transport>,
        route: impl Fn(StreamEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            transport,
            route: Arc::new(route),
            filter: None,
            current: None,
            next_handle: 0,
            on_record: None,
            on_link: None,
            stats: SubscriptionStats::default(),
        }
    }

    /// Manager whose events are sent to `sender`, wrapped by `wrap`.
    pub fn with_channel<M: Send + 'static>(
        transport: Box<dyn Transport>,
        sender: mpsc::Sender<M>,
        wrap: fn(StreamEvent) -> M,
    ) -> Self {
        Self::new(transport, move |event| sender.send(wrap(event)).is_ok())
    }

    /// Register the consumer of decoded records. Replaces any previous one.
    pub fn on_record(&mut self, callback: impl FnMut(LogLine) + 'static) {
        self.on_record = Some(Box::new(callback));
    }

    /// Register the lifecycle observer. Replaces any previous one.
    pub fn on_link(&mut self, callback: impl FnMut(&LinkEvent) + 'static) {
        self.on_link = Some(Box::new(callback));
    }

    /// Open a subscription for `filter`, closing the current one first.
    ///
    /// Never fails: an unreachable transport is logged and reported as
    /// [`LinkEvent::Failed`], leaving the manager closed with `filter`
    /// recorded so [`reopen`](Self::reopen) can retry.
    pub fn open(&mut self, filter: KeyDigest) {
        self.close();
        self.next_handle += 1;
        let handle = HandleId(self.next_handle);
        self.filter = Some(filter.clone());

        let stream = match self.transport.open(&filter) {
            Ok(stream) => stream,
            Err(err) => {
                self.stats.open_failures += 1;
                tracing::warn!(
                    handle = %handle,
                    filter = %filter,
                    error = %err,
                    "subscription open failed"
                );
                self.emit(&LinkEvent::Failed {
                    handle,
                    filter,
                    reason: err.to_string(),
                });
                return;
            }
        };

        let (signal, trigger) = StopSignal::new();
        let sender = StreamSender {
            handle,
            route: self.route.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("tailmon-stream-{}", handle.get()))
            .spawn(move || stream.run(sender, signal));
        // Detached: close() signals the thread but never joins it.
        if let Err(err) = spawned {
            self.stats.open_failures += 1;
            tracing::warn!(
                handle = %handle,
                filter = %filter,
                error = %err,
                "stream thread spawn failed"
            );
            self.emit(&LinkEvent::Failed {
                handle,
                filter,
                reason: err.to_string(),
            });
            return;
        }

        self.stats.opened += 1;
        self.current = Some(Active {
            handle,
            trigger,
            next_seq: 0,
        });
        tracing::info!(handle = %handle, filter = %filter, "subscription opened");
        self.emit(&LinkEvent::Connected { handle, filter });
    }

    /// Switch to `filter`. Returns `false` (and does nothing) when `filter`
    /// is already the filter of an open subscription.
    pub fn reset_filter(&mut self, filter: KeyDigest) -> bool {
        if self.is_open() && self.filter.as_ref() == Some(&filter) {
            tracing::debug!(filter = %filter, "filter unchanged");
            return false;
        }
        self.open(filter);
        true
    }

    /// Open again with the last filter. Returns `false` if no filter was
    /// ever set.
    pub fn reopen(&mut self) -> bool {
        match self.filter.clone() {
            Some(filter) => {
                self.open(filter);
                true
            }
            None => false,
        }
    }

    /// Cancel the current subscription. Idempotent.
    ///
    /// After this returns, no event of the closed handle reaches an
    /// observer. The stream thread is signalled and left to exit on its own.
    pub fn close(&mut self) {
        let Some(active) = self.current.take() else {
            return;
        };
        active.trigger.stop();
        tracing::debug!(handle = %active.handle, "subscription closed");
        if let Some(filter) = self.filter.clone() {
            self.emit(&LinkEvent::Closed {
                handle: active.handle,
                filter,
            });
        }
    }

    /// Handle one event from a stream thread. Call on the event-loop thread.
    pub fn dispatch(&mut self, event: StreamEvent) -> Dispatch {
        let Some(active) = self.current.as_mut().filter(|a| a.handle == event.handle) else {
            self.stats.stale += 1;
            tracing::trace!(handle = %event.handle, "stale stream event dropped");
            return Dispatch::Stale;
        };

        match event.kind {
            StreamEventKind::Payload(bytes) => {
                let record = Record::new(active.next_seq, bytes);
                active.next_seq += 1;
                match record.decode() {
                    Ok(line) => {
                        self.stats.delivered += 1;
                        if let Some(callback) = self.on_record.as_mut() {
                            callback(line);
                        }
                        Dispatch::Delivered
                    }
                    Err(err) => {
                        self.stats.malformed += 1;
                        tracing::warn!(
                            handle = %event.handle,
                            seq = record.seq,
                            error = %err,
                            "dropping malformed record"
                        );
                        Dispatch::Malformed
                    }
                }
            }
            StreamEventKind::Closed => {
                self.current = None;
                tracing::info!(handle = %event.handle, "stream closed by peer");
                if let Some(filter) = self.filter.clone() {
                    self.emit(&LinkEvent::Closed {
                        handle: event.handle,
                        filter,
                    });
                }
                Dispatch::Ended
            }
            StreamEventKind::Failed(err) => {
                self.current = None;
                tracing::warn!(handle = %event.handle, error = %err, "stream failed");
                if let Some(filter) = self.filter.clone() {
                    self.emit(&LinkEvent::Failed {
                        handle: event.handle,
                        filter,
                        reason: err.to_string(),
                    });
                }
                Dispatch::Ended
            }
        }
    }

    /// Filter of the current or last attempted subscription.
    #[must_use]
    pub fn filter(&self) -> Option<&KeyDigest> {
        self.filter.as_ref()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    #[must_use]
    pub fn current_handle(&self) -> Option<HandleId> {
        self.current.as_ref().map(|a| a.handle)
    }

    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.stats
    }

    fn emit(&mut self, event: &LinkEvent) {
        if let Some(callback) = self.on_link.as_mut() {
            callback(event);
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if let Some(active) = self.current.take() {
            active.trigger.stop();
        }
    }
}

// --- In-memory transport ---

#[derive(Default)]
struct ChannelState {
    reachable: bool,
    opened: Vec<KeyDigest>,
    link: Option<mpsc::Sender<Vec<u8>>>,
}

/// In-memory [`Transport`] for tests and embedding.
///
/// Each `open` creates a fresh link and makes it the target of
/// [`push`](Self::push); earlier links are dropped, which ends their streams.
/// Clones share state.
#[derive(Clone)]
pub struct ChannelTransport {
    state: Arc<Mutex<ChannelState>>,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ChannelTransport")
            .field("reachable", &state.reachable)
            .field("opened", &state.opened.len())
            .finish()
    }
}

impl ChannelTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                reachable: true,
                ..ChannelState::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// When unreachable, `open` fails with [`TransportError::Unreachable`].
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Send one unit on the most recent link. Returns `false` if there is
    /// none or its stream has exited.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> bool {
        let state = self.lock();
        state
            .link
            .as_ref()
            .is_some_and(|link| link.send(payload.into()).is_ok())
    }

    /// Drop the most recent link; its stream reports `Closed`.
    pub fn hang_up(&self) {
        self.lock().link = None;
    }

    /// Filters passed to successful `open` calls, oldest first.
    #[must_use]
    pub fn opened(&self) -> Vec<KeyDigest> {
        self.lock().opened.clone()
    }
}

impl Transport for ChannelTransport {
    fn open(&mut self, filter: &KeyDigest) -> Result<Box<dyn Stream>, TransportError> {
        let mut state = self.lock();
        if !state.reachable {
            return Err(TransportError::Unreachable("channel transport offline".into()));
        }
        let (tx, rx) = mpsc::channel();
        state.link = Some(tx);
        state.opened.push(filter.clone());
        Ok(Box::new(ChannelStream { rx }))
    }
}

struct ChannelStream {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Stream for ChannelStream {
    fn run(self: Box<Self>, sender: StreamSender, stop: StopSignal) {
        loop {
            if stop.is_stopped() {
                return;
            }
            match self.rx.recv_timeout(Duration::from_millis(10)) {
                Ok(bytes) => {
                    if stop.is_stopped() || !sender.payload(bytes) {
                        return;
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    if !stop.is_stopped() {
                        sender.closed();
                    }
                    return;
                }
            }
        }
    }
}
