#![forbid(unsafe_code)]

//! File-backed adapters.
//!
//! The collector can export its stream as newline-delimited JSON (one stream
//! unit per line) and its counters as a JSON snapshot. These adapters let the
//! monitor run against such files:
//!
//! - [`FollowTransport`] follows the stream file like `tail -f`. A `notify`
//!   watcher wakes it on writes; the metadata poll stays as a fallback.
//! - [`FileBackfill`] reads its most recent matching lines, scanning the file
//!   backwards in fixed-size chunks.
//! - [`StatsFile`] re-reads the snapshot file on every poll.
//!
//! Filtering happens on the client: a unit passes when its tag, hostname or
//! priority name digests to the filter. The unfiltered digest passes all.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tailmon_core::{FetchError, KeyDigest, LogLine, Snapshot, TransportError};

use crate::scheduler::StopSignal;
use crate::source::{BackfillSource, SnapshotSource};
use crate::subscription::{Stream, StreamSender, Transport};

/// How often a followed file is checked for growth when no watcher event
/// arrives.
pub const DEFAULT_FOLLOW_POLL: Duration = Duration::from_millis(250);

/// Bytes read per step when scanning a file from its end.
pub const BACKFILL_CHUNK: usize = 8 * 1024;

fn passes(line: &[u8], filter: &KeyDigest) -> bool {
    if filter.is_unfiltered() {
        return true;
    }
    // Undecodable lines are forwarded; the subscription counts them.
    match LogLine::from_json(line) {
        Ok(decoded) => decoded.matches(filter),
        Err(_) => true,
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    line.trim_ascii()
}

/// Follows a newline-delimited JSON file from its current end.
#[derive(Debug, Clone)]
pub struct FollowTransport {
    path: PathBuf,
    poll: Duration,
}

impl FollowTransport {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll: DEFAULT_FOLLOW_POLL,
        }
    }

    #[must_use]
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for FollowTransport {
    fn open(&mut self, filter: &KeyDigest) -> Result<Box<dyn Stream>, TransportError> {
        let mut file = File::open(&self.path).map_err(|e| {
            TransportError::Unreachable(format!("{}: {e}", self.path.display()))
        })?;
        let offset = file.seek(SeekFrom::End(0))?;
        let wake = match FileWake::watch(&self.path) {
            Ok(wake) => Some(wake),
            Err(err) => {
                tracing::debug!(
                    path = %self.path.display(),
                    error = %err,
                    "file watcher unavailable, polling only"
                );
                None
            }
        };
        Ok(Box::new(FollowStream {
            file,
            offset,
            filter: filter.clone(),
            poll: self.poll,
            pending: Vec::new(),
            wake,
        }))
    }
}

/// Write notifications for one file.
///
/// The parent directory is watched and events are filtered by file name, as
/// some backends cannot watch single files.
struct FileWake {
    _watcher: RecommendedWatcher,
    events: mpsc::Receiver<()>,
}

impl FileWake {
    fn watch(path: &Path) -> notify::Result<Self> {
        let (tx, events) = mpsc::channel();
        let name = path.file_name().map(ToOwned::to_owned);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            if event.paths.iter().any(|p| p.file_name() == name.as_deref()) {
                let _ = tx.send(());
            }
        })?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(Self {
            _watcher: watcher,
            events,
        })
    }
}

struct FollowStream {
    file: File,
    offset: u64,
    filter: KeyDigest,
    poll: Duration,
    pending: Vec<u8>,
    wake: Option<FileWake>,
}

impl FollowStream {
    /// Read whatever was appended since the last call.
    fn read_new(&mut self) -> io::Result<usize> {
        let len = self.file.metadata()?.len();
        if len < self.offset {
            tracing::info!(offset = self.offset, len, "followed file truncated, rewinding");
            self.file.seek(SeekFrom::Start(0))?;
            self.offset = 0;
            self.pending.clear();
        }
        let read = self.file.read_to_end(&mut self.pending)?;
        self.offset += read as u64;
        Ok(read)
    }

    /// Block until the watcher reports a write or one poll interval passes.
    /// Returns `true` once stopped.
    fn wait_for_growth(&mut self, stop: &StopSignal) -> bool {
        let Some(wake) = &self.wake else {
            return stop.wait_timeout(self.poll);
        };
        match wake.events.recv_timeout(self.poll) {
            Ok(()) => while wake.events.try_recv().is_ok() {},
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::debug!("file watcher stopped, polling only");
                self.wake = None;
            }
        }
        stop.is_stopped()
    }

    /// Forward complete lines. Returns `false` once the receiver is gone.
    fn flush_lines(&mut self, sender: &StreamSender, stop: &StopSignal) -> bool {
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return true;
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        for line in complete.split(|&b| b == b'\n') {
            let line = trim_line(line);
            if line.is_empty() || !passes(line, &self.filter) {
                continue;
            }
            if stop.is_stopped() || !sender.payload(line) {
                return false;
            }
        }
        true
    }
}

impl Stream for FollowStream {
    fn run(mut self: Box<Self>, sender: StreamSender, stop: StopSignal) {
        tracing::debug!(handle = %sender.handle(), filter = %self.filter, "following file");
        loop {
            if stop.is_stopped() {
                return;
            }
            match self.read_new() {
                Ok(0) => {
                    if self.wait_for_growth(&stop) {
                        return;
                    }
                }
                Ok(_) => {
                    if !self.flush_lines(&sender, &stop) {
                        return;
                    }
                }
                Err(err) => {
                    if !stop.is_stopped() {
                        sender.failed(TransportError::Io(err));
                    }
                    return;
                }
            }
        }
    }
}

/// Backfill from the tail of a newline-delimited JSON file.
#[derive(Debug, Clone)]
pub struct FileBackfill {
    path: PathBuf,
}

impl FileBackfill {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BackfillSource for FileBackfill {
    /// The last `max` decodable lines matching `filter`, newest first. A
    /// missing or blank file has no data.
    fn fetch(
        &mut self,
        filter: &KeyDigest,
        max: usize,
    ) -> Result<Option<Vec<LogLine>>, FetchError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut lines = Vec::new();
        let mut seen = false;
        let mut skipped = 0usize;
        scan_lines_backwards(&mut file, BACKFILL_CHUNK, |raw| {
            let raw = trim_line(raw);
            if raw.is_empty() {
                return true;
            }
            seen = true;
            if lines.len() >= max {
                return false;
            }
            match LogLine::from_json(raw) {
                Ok(line) if line.matches(filter) => lines.push(line),
                Ok(_) => {}
                Err(_) => skipped += 1,
            }
            lines.len() < max
        })?;

        if skipped > 0 {
            tracing::debug!(
                skipped,
                path = %self.path.display(),
                "undecodable backfill lines skipped"
            );
        }
        Ok(seen.then_some(lines))
    }
}

/// Feed the lines of `reader` to `visit`, last line first, reading `chunk`
/// bytes at a time from the end. Stops early when `visit` returns `false`.
///
/// A line that spans chunks is carried over until its start is read. Lines
/// are passed without their `\n`; a trailing newline yields one empty line.
fn scan_lines_backwards<R, F>(reader: &mut R, chunk: usize, mut visit: F) -> io::Result<()>
where
    R: Read + Seek,
    F: FnMut(&[u8]) -> bool,
{
    let chunk = chunk.max(1);
    let mut pos = reader.seek(SeekFrom::End(0))?;
    let mut buf = vec![0u8; chunk];
    // Head of the earliest line seen so far; its start is not read yet.
    let mut carry: Vec<u8> = Vec::new();

    while pos > 0 {
        let step = usize::try_from(pos).map_or(chunk, |left| left.min(chunk));
        pos -= step as u64;
        reader.seek(SeekFrom::Start(pos))?;
        reader.read_exact(&mut buf[..step])?;

        let mut block = Vec::with_capacity(step + carry.len());
        block.extend_from_slice(&buf[..step]);
        block.append(&mut carry);

        match block.iter().position(|&b| b == b'\n') {
            Some(first) => {
                for line in block[first + 1..].rsplit(|&b| b == b'\n') {
                    if !visit(line) {
                        return Ok(());
                    }
                }
                block.truncate(first);
                carry = block;
            }
            None => carry = block,
        }
    }

    if !carry.is_empty() {
        visit(&carry);
    }
    Ok(())
}

/// Snapshot source re-reading a JSON file on every fetch.
#[derive(Debug, Clone)]
pub struct StatsFile {
    path: PathBuf,
}

impl StatsFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotSource for StatsFile {
    fn fetch(&mut self) -> Result<Option<Snapshot>, FetchError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Snapshot::parse(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
