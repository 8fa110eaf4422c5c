#![forbid(unsafe_code)]

//! Monitor configuration.
//!
//! Values come from three layers, later layers winning:
//!
//! 1. built-in defaults,
//! 2. a JSON file (first hit of [`CONFIG_SEARCH_PATHS`], or an explicit path),
//! 3. environment variables:
//!    - `TAILMON_POLL_MS` (u64, summary poll period)
//!    - `TAILMON_TICK_MS` (u64, highlight expiry period)
//!    - `TAILMON_TAIL_CAP` (usize)
//!    - `TAILMON_CREATE_FREEZE_MS` / `TAILMON_MERGE_FREEZE_MS` (u64)
//!    - `TAILMON_CREATE_HIGHLIGHT_MS` / `TAILMON_MERGE_HIGHLIGHT_MS` (u64)
//!    - `TAILMON_BACKFILL_MAX` (usize)
//!    - `TAILMON_FILTER` (key or 32-hex digest)
//!    - `TAILMON_STREAM` / `TAILMON_STATS` (paths)
//!
//! Parsing never fails outright: bad values are skipped and reported as
//! [`ConfigError`] diagnostics next to the resulting config.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::digest::KeyDigest;
use crate::tail::TailConfig;

pub const ENV_POLL_MS: &str = "TAILMON_POLL_MS";
pub const ENV_TICK_MS: &str = "TAILMON_TICK_MS";
pub const ENV_TAIL_CAP: &str = "TAILMON_TAIL_CAP";
pub const ENV_CREATE_FREEZE_MS: &str = "TAILMON_CREATE_FREEZE_MS";
pub const ENV_MERGE_FREEZE_MS: &str = "TAILMON_MERGE_FREEZE_MS";
pub const ENV_CREATE_HIGHLIGHT_MS: &str = "TAILMON_CREATE_HIGHLIGHT_MS";
pub const ENV_MERGE_HIGHLIGHT_MS: &str = "TAILMON_MERGE_HIGHLIGHT_MS";
pub const ENV_BACKFILL_MAX: &str = "TAILMON_BACKFILL_MAX";
pub const ENV_FILTER: &str = "TAILMON_FILTER";
pub const ENV_STREAM: &str = "TAILMON_STREAM";
pub const ENV_STATS: &str = "TAILMON_STATS";

/// Config files tried by [`MonitorConfig::discover`], first found wins.
pub const CONFIG_SEARCH_PATHS: [&str; 4] = [
    "./tailmon.json",
    "./etc/tailmon.json",
    "/usr/local/etc/tailmon.json",
    "/etc/tailmon.json",
];

/// Everything the monitor needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Period of the summary snapshot poll.
    pub poll_interval: Duration,
    /// Period of the tail highlight tick.
    pub tick_interval: Duration,
    pub tail: TailConfig,
    /// Number of records requested when backfilling the tail.
    pub backfill_max: usize,
    /// Filter of the first subscription.
    pub initial_filter: KeyDigest,
    /// Newline-delimited JSON file followed as the live stream.
    pub stream_path: Option<PathBuf>,
    /// File holding the latest summary snapshot.
    pub stats_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            tick_interval: Duration::from_millis(100),
            tail: TailConfig::default(),
            backfill_max: 20,
            initial_filter: KeyDigest::unfiltered(),
            stream_path: None,
            stats_path: None,
        }
    }
}

/// A config value that was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub value: String,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.field, self.value, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Config plus the diagnostics collected while building it.
#[derive(Debug, Clone)]
pub struct ConfigParse {
    pub config: MonitorConfig,
    pub errors: Vec<ConfigError>,
}

/// On-disk shape. Every field is optional and overlays the current value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    poll_ms: Option<u64>,
    tick_ms: Option<u64>,
    tail_cap: Option<usize>,
    create_freeze_ms: Option<u64>,
    merge_freeze_ms: Option<u64>,
    create_highlight_ms: Option<u64>,
    merge_highlight_ms: Option<u64>,
    backfill_max: Option<usize>,
    filter: Option<String>,
    stream: Option<PathBuf>,
    stats: Option<PathBuf>,
}

impl MonitorConfig {
    /// Defaults overlaid with the process environment.
    #[must_use]
    pub fn from_env() -> ConfigParse {
        Self::default().overlay_env_with(|key| env::var(key).ok())
    }

    /// Defaults overlaid with a custom environment lookup (for tests).
    #[must_use]
    pub fn from_env_with<F>(get: F) -> ConfigParse
    where
        F: FnMut(&str) -> Option<String>,
    {
        Self::default().overlay_env_with(get)
    }

    /// Overlay environment values on this config.
    #[must_use]
    pub fn overlay_env_with<F>(self, mut get: F) -> ConfigParse
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = self;
        let mut errors = Vec::new();

        env_millis(&mut get, ENV_POLL_MS, "poll_interval", &mut config.poll_interval, &mut errors);
        env_millis(&mut get, ENV_TICK_MS, "tick_interval", &mut config.tick_interval, &mut errors);
        env_millis(
            &mut get,
            ENV_CREATE_FREEZE_MS,
            "tail.create_freeze",
            &mut config.tail.create_freeze,
            &mut errors,
        );
        env_millis(
            &mut get,
            ENV_MERGE_FREEZE_MS,
            "tail.merge_freeze",
            &mut config.tail.merge_freeze,
            &mut errors,
        );
        env_millis(
            &mut get,
            ENV_CREATE_HIGHLIGHT_MS,
            "tail.create_highlight",
            &mut config.tail.create_highlight,
            &mut errors,
        );
        env_millis(
            &mut get,
            ENV_MERGE_HIGHLIGHT_MS,
            "tail.merge_highlight",
            &mut config.tail.merge_highlight,
            &mut errors,
        );
        env_usize(&mut get, ENV_TAIL_CAP, "tail.cap", &mut config.tail.cap, &mut errors);
        env_usize(
            &mut get,
            ENV_BACKFILL_MAX,
            "backfill_max",
            &mut config.backfill_max,
            &mut errors,
        );

        if let Some(value) = get(ENV_FILTER) {
            if value.trim().is_empty() {
                errors.push(ConfigError::new("initial_filter", value, "expected key or digest"));
            } else {
                config.initial_filter = KeyDigest::from_key_or_digest(value.trim());
            }
        }
        if let Some(value) = get(ENV_STREAM)
            && !value.trim().is_empty()
        {
            config.stream_path = Some(PathBuf::from(value.trim()));
        }
        if let Some(value) = get(ENV_STATS)
            && !value.trim().is_empty()
        {
            config.stats_path = Some(PathBuf::from(value.trim()));
        }

        ConfigParse { config, errors }
    }

    /// Overlay the fields present in a JSON document.
    pub fn overlay_json(self, text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = serde_json::from_str(text)
            .map_err(|e| ConfigError::new("file", "<json>", e.to_string()))?;
        let mut config = self;
        if let Some(ms) = file.poll_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.tick_ms {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(cap) = file.tail_cap {
            config.tail.cap = cap;
        }
        if let Some(ms) = file.create_freeze_ms {
            config.tail.create_freeze = Duration::from_millis(ms);
        }
        if let Some(ms) = file.merge_freeze_ms {
            config.tail.merge_freeze = Duration::from_millis(ms);
        }
        if let Some(ms) = file.create_highlight_ms {
            config.tail.create_highlight = Duration::from_millis(ms);
        }
        if let Some(ms) = file.merge_highlight_ms {
            config.tail.merge_highlight = Duration::from_millis(ms);
        }
        if let Some(max) = file.backfill_max {
            config.backfill_max = max;
        }
        if let Some(filter) = file.filter {
            config.initial_filter = KeyDigest::from_key_or_digest(&filter);
        }
        if file.stream.is_some() {
            config.stream_path = file.stream;
        }
        if file.stats.is_some() {
            config.stats_path = file.stats;
        }
        Ok(config)
    }

    /// Overlay a JSON config file.
    pub fn overlay_file(self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::new("file", path.display().to_string(), e.to_string()))?;
        self.overlay_json(&text)
    }

    /// Overlay the first config file found in [`CONFIG_SEARCH_PATHS`].
    ///
    /// Returns the path that was used, if any.
    pub fn discover(self) -> Result<(Self, Option<PathBuf>), ConfigError> {
        for candidate in CONFIG_SEARCH_PATHS {
            let path = Path::new(candidate);
            if path.is_file() {
                let config = self.overlay_file(path)?;
                return Ok((config, Some(path.to_path_buf())));
            }
        }
        Ok((self, None))
    }

    /// Check constraints and return every violation.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        validate_nonzero("poll_interval", self.poll_interval, &mut errors);
        validate_nonzero("tick_interval", self.tick_interval, &mut errors);
        if self.tail.cap == 0 {
            errors.push(ConfigError::new("tail.cap", "0", "must be >= 1"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// One-line description for the startup log.
    #[must_use]
    pub fn summary_short(&self) -> String {
        format!(
            "poll={}ms tick={}ms cap={} backfill={} filter={}",
            self.poll_interval.as_millis(),
            self.tick_interval.as_millis(),
            self.tail.cap,
            self.backfill_max,
            self.initial_filter
        )
    }
}

fn env_millis<F>(
    get: &mut F,
    key: &str,
    field: &'static str,
    slot: &mut Duration,
    errors: &mut Vec<ConfigError>,
) where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(value) = get(key) {
        match value.trim().parse::<u64>() {
            Ok(ms) => *slot = Duration::from_millis(ms),
            Err(_) => errors.push(ConfigError::new(field, value, "expected milliseconds")),
        }
    }
}

fn env_usize<F>(
    get: &mut F,
    key: &str,
    field: &'static str,
    slot: &mut usize,
    errors: &mut Vec<ConfigError>,
) where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(value) = get(key) {
        match value.trim().parse::<usize>() {
            Ok(n) => *slot = n,
            Err(_) => errors.push(ConfigError::new(field, value, "expected non-negative integer")),
        }
    }
}

fn validate_nonzero(field: &'static str, value: Duration, errors: &mut Vec<ConfigError>) {
    if value.is_zero() {
        errors.push(ConfigError::new(field, "0", "must be > 0ms"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_timings() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(5000));
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.tail.cap, 20);
        assert_eq!(config.backfill_max, 20);
        assert!(config.initial_filter.is_unfiltered());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let parse = MonitorConfig::from_env_with(env_of(&[
            (ENV_POLL_MS, "1000"),
            (ENV_TICK_MS, " 50 "),
            (ENV_TAIL_CAP, "5"),
            (ENV_MERGE_FREEZE_MS, "300"),
            (ENV_FILTER, "sshd"),
            (ENV_STREAM, "/var/log/stream.ndjson"),
        ]));
        assert!(parse.errors.is_empty());
        let config = parse.config;
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert_eq!(config.tail.cap, 5);
        assert_eq!(config.tail.merge_freeze, Duration::from_millis(300));
        assert_eq!(config.initial_filter, KeyDigest::of("sshd"));
        assert_eq!(
            config.stream_path.as_deref(),
            Some(Path::new("/var/log/stream.ndjson"))
        );
        assert!(config.stats_path.is_none());
    }

    #[test]
    fn bad_env_values_are_reported_and_skipped() {
        let parse = MonitorConfig::from_env_with(env_of(&[
            (ENV_POLL_MS, "soon"),
            (ENV_TAIL_CAP, "-1"),
            (ENV_FILTER, "  "),
        ]));
        assert_eq!(parse.errors.len(), 3);
        assert_eq!(parse.config.poll_interval, Duration::from_millis(5000));
        assert_eq!(parse.config.tail.cap, 20);
        assert_eq!(parse.errors[0].field, "poll_interval");
        assert_eq!(parse.errors[0].to_string(), "poll_interval=soon (expected milliseconds)");
    }

    #[test]
    fn json_overlay_sets_present_fields_only() {
        let config = MonitorConfig::default()
            .overlay_json(r#"{"tick_ms":250,"filter":"cron","stats":"/tmp/stats.json"}"#)
            .unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.poll_interval, Duration::from_millis(5000));
        assert_eq!(config.initial_filter, KeyDigest::of("cron"));
        assert_eq!(config.stats_path.as_deref(), Some(Path::new("/tmp/stats.json")));
    }

    #[test]
    fn json_overlay_rejects_unknown_fields() {
        let err = MonitorConfig::default()
            .overlay_json(r#"{"tick":1}"#)
            .unwrap_err();
        assert_eq!(err.field, "file");
    }

    #[test]
    fn env_wins_over_file() {
        let from_file = MonitorConfig::default()
            .overlay_json(r#"{"poll_ms":2000,"tail_cap":7}"#)
            .unwrap();
        let parse = from_file.overlay_env_with(env_of(&[(ENV_POLL_MS, "3000")]));
        assert_eq!(parse.config.poll_interval, Duration::from_millis(3000));
        assert_eq!(parse.config.tail.cap, 7);
    }

    #[test]
    fn validate_reports_every_violation() {
        let mut config = MonitorConfig::default();
        config.poll_interval = Duration::ZERO;
        config.tick_interval = Duration::ZERO;
        config.tail.cap = 0;
        let errors = config.validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["poll_interval", "tick_interval", "tail.cap"]);
    }

    #[test]
    fn summary_mentions_filter() {
        let summary = MonitorConfig::default().summary_short();
        assert!(summary.contains("cap=20"));
        assert!(summary.contains("00000000000000000000000000000000"));
    }
}
