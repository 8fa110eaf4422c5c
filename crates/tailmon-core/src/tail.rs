#![forbid(unsafe_code)]

//! Deduplicating tail of recent messages.
//!
//! The tail is a short list of entries, most recently touched first. A new
//! message whose [`Signature`] matches an existing entry bumps that entry's
//! count and moves it to the front; otherwise it becomes a fresh entry and the
//! oldest entry falls off once the list is full.
//!
//! Two timers per entry shape what a viewer sees:
//!
//! - **text freeze**: while frozen, merges update the count but keep the
//!   displayed text, so a burst of similar lines does not flicker.
//! - **highlight**: set on every touch, cleared by [`TailEngine::tick`] once
//!   expired. Expiry is driven by the clock, not by message arrival.
//!
//! # Invariants
//!
//! 1. `len() <= config.cap` after every operation.
//! 2. An entry's count never decreases.
//! 3. `tick` never reorders entries and never touches count or text.
//!
//! Every operation takes `now` explicitly so behavior is deterministic under
//! test.

use std::time::{Duration, Instant};

use crate::normalize::{Normalize, Signature, SignaturePolicy};
use crate::record::LogLine;

/// Maximum number of entries in the tail.
pub const DEFAULT_CAP: usize = 20;

/// Timing and size parameters of the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailConfig {
    /// Maximum number of entries (at least 1).
    pub cap: usize,
    /// Text freeze armed when an entry is created.
    pub create_freeze: Duration,
    /// Text freeze armed when a merge replaces the text.
    pub merge_freeze: Duration,
    /// Highlight window of a new entry.
    pub create_highlight: Duration,
    /// Highlight window after a merge.
    pub merge_highlight: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            cap: DEFAULT_CAP,
            create_freeze: Duration::from_millis(1000),
            merge_freeze: Duration::from_millis(200),
            create_highlight: Duration::from_millis(500),
            merge_highlight: Duration::from_millis(1000),
        }
    }
}

/// One row of the tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailEntry {
    signature: Signature,
    display_text: String,
    count: u64,
    last_seen_at: Instant,
    text_freeze_until: Instant,
    highlight_until: Instant,
    highlighted: bool,
}

impl TailEntry {
    fn fresh(signature: Signature, text: &str, now: Instant, config: &TailConfig) -> Self {
        Self {
            signature,
            display_text: text.to_owned(),
            count: 1,
            last_seen_at: now,
            text_freeze_until: now + config.create_freeze,
            highlight_until: now + config.create_highlight,
            highlighted: true,
        }
    }

    /// Backfilled entries are history: not highlighted and not frozen.
    fn settled(signature: Signature, text: String, now: Instant) -> Self {
        Self {
            signature,
            display_text: text,
            count: 1,
            last_seen_at: now,
            text_freeze_until: now,
            highlight_until: now,
            highlighted: false,
        }
    }

    fn merge(&mut self, text: &str, now: Instant, config: &TailConfig) {
        self.count = self.count.saturating_add(1);
        if now >= self.text_freeze_until {
            text.clone_into(&mut self.display_text);
            self.text_freeze_until = now + config.merge_freeze;
        }
        self.last_seen_at = now;
        self.highlight_until = now + config.merge_highlight;
        self.highlighted = true;
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[must_use]
    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn last_seen_at(&self) -> Instant {
        self.last_seen_at
    }

    #[must_use]
    pub fn text_freeze_until(&self) -> Instant {
        self.text_freeze_until
    }

    #[must_use]
    pub fn highlight_until(&self) -> Instant {
        self.highlight_until
    }

    #[must_use]
    pub fn is_highlighted(&self) -> bool {
        self.highlighted
    }
}

/// What [`TailEngine::ingest`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Merged into an existing entry, which now has `count`.
    Merged { count: u64 },
    /// Created a new entry; `evicted` is true when the oldest one fell off.
    Inserted { evicted: bool },
}

/// The dedup tail state machine.
pub struct TailEngine {
    config: TailConfig,
    normalizer: Box<dyn Normalize + Send>,
    entries: Vec<TailEntry>,
}

impl std::fmt::Debug for TailEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailEngine")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Default for TailEngine {
    fn default() -> Self {
        Self::new(TailConfig::default())
    }
}

impl TailEngine {
    /// Engine with the default signature policy.
    #[must_use]
    pub fn new(config: TailConfig) -> Self {
        Self::with_normalizer(config, SignaturePolicy::default())
    }

    /// Engine with a custom signature policy.
    #[must_use]
    pub fn with_normalizer(config: TailConfig, normalizer: impl Normalize + Send + 'static) -> Self {
        let config = TailConfig {
            cap: config.cap.max(1),
            ..config
        };
        Self {
            config,
            normalizer: Box::new(normalizer),
            entries: Vec::with_capacity(config.cap),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    /// Replace the whole list with one entry per text, without merging.
    ///
    /// `texts` is ordered newest first; anything past the cap is dropped.
    pub fn backfill<I, S>(&mut self, now: Instant, texts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.clear();
        for text in texts.into_iter().take(self.config.cap) {
            let text = text.into();
            let signature = self.normalizer.normalize(&text);
            self.entries.push(TailEntry::settled(signature, text, now));
        }
        tracing::debug!(entries = self.entries.len(), "tail backfilled");
    }

    /// [`backfill`](Self::backfill) from decoded lines.
    pub fn backfill_lines<'a, I>(&mut self, now: Instant, lines: I)
    where
        I: IntoIterator<Item = &'a LogLine>,
    {
        self.backfill(now, lines.into_iter().map(|line| line.text.as_str()));
    }

    /// Merge one message into the tail.
    pub fn ingest(&mut self, now: Instant, text: &str) -> IngestOutcome {
        let signature = self.normalizer.normalize(text);
        let matched = self.entries.iter().position(|e| e.signature == signature);

        let outcome = match matched {
            Some(slot) => {
                let mut entry = self.entries.remove(slot);
                entry.merge(text, now, &self.config);
                let count = entry.count;
                self.entries.insert(0, entry);
                IngestOutcome::Merged { count }
            }
            None => {
                let evicted = self.entries.len() >= self.config.cap;
                self.entries
                    .insert(0, TailEntry::fresh(signature, text, now, &self.config));
                self.entries.truncate(self.config.cap);
                IngestOutcome::Inserted { evicted }
            }
        };
        tracing::trace!(?outcome, entries = self.entries.len(), "tail ingest");
        outcome
    }

    /// [`ingest`](Self::ingest) a decoded line.
    pub fn ingest_line(&mut self, now: Instant, line: &LogLine) -> IngestOutcome {
        self.ingest(now, &line.text)
    }

    /// Clear expired highlights. Returns how many entries changed.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            if entry.highlighted && now >= entry.highlight_until {
                entry.highlighted = false;
                changed += 1;
            }
        }
        changed
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn entries(&self) -> &[TailEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of highlighted entries.
    #[must_use]
    pub fn highlighted(&self) -> usize {
        self.entries.iter().filter(|e| e.highlighted).count()
    }
}
