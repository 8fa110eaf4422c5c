#![forbid(unsafe_code)]

//! Tailmon Core
//!
//! Pure aggregation logic for the log monitor. Nothing here spawns threads,
//! touches the network or reads the clock on its own; callers pass `now`.
//!
//! # Key Components
//!
//! - [`TailEngine`] - Deduplicating tail with text freeze and highlight timers
//! - [`SignaturePolicy`] - Variable-token stripping that defines "same message"
//! - [`SummaryViews`] - Keyed summary tables merged from snapshots
//! - [`LogLine`] - Decoded stream record
//! - [`KeyDigest`] - Stable digest of a summary key, used as a stream filter
//! - [`MonitorConfig`] - Defaults, JSON file and environment overlays
//!
//! # Role in Tailmon
//! `tailmon-runtime` owns the event loop and adapters and drives these types;
//! the `tailmon` binary renders their state.

pub mod clock;
pub mod config;
pub mod digest;
pub mod error;
pub mod normalize;
pub mod record;
pub mod summary;
pub mod tail;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConfigParse, MonitorConfig};
pub use digest::KeyDigest;
pub use error::{DecodeError, FetchError, TransportError};
pub use normalize::{FnNormalizer, Normalize, Signature, SignaturePolicy, StripRule, StripScope};
pub use record::{LogLine, Record};
pub use summary::{
    Group, MergeStats, Snapshot, SummaryRow, SummaryValue, SummaryView, SummaryViews, Upsert,
};
pub use tail::{IngestOutcome, TailConfig, TailEngine, TailEntry};
