#![forbid(unsafe_code)]

//! Stream records and their decoded form.
//!
//! Every unit on the live stream and every backfill item is a JSON object
//! whose `Raw` field carries the base64-encoded message text. The collector
//! also sends the parsed syslog fields next to it; those are optional here
//! and only used for client-side filtering.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::digest::KeyDigest;
use crate::error::DecodeError;

const SEVERITIES: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

const FACILITIES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron", "authpriv",
    "ftp", "unknown", "unknown", "unknown", "unknown", "local0", "local1", "local2", "local3",
    "local4", "local5", "local6", "local7",
];

/// An undecoded stream unit, numbered in arrival order within its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl Record {
    #[must_use]
    pub fn new(seq: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    pub fn decode(&self) -> Result<LogLine, DecodeError> {
        LogLine::from_json(&self.payload)
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireLine {
    raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    received: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pid: Option<i64>,
}

/// A decoded log message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogLine {
    /// Message text. Invalid UTF-8 is replaced, never rejected.
    pub text: String,
    pub received: Option<String>,
    /// Raw syslog priority (`facility << 3 | severity`).
    pub priority: Option<u16>,
    pub hostname: Option<String>,
    pub tag: Option<String>,
    pub pid: Option<i64>,
}

impl LogLine {
    /// A line carrying only text.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Decode one JSON stream unit.
    pub fn from_json(bytes: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireLine = serde_json::from_slice(bytes)?;
        let raw = STANDARD.decode(wire.raw.trim())?;
        Ok(Self {
            text: String::from_utf8_lossy(&raw).into_owned(),
            received: wire.received,
            priority: wire.priority,
            hostname: wire.hostname,
            tag: wire.tag,
            pid: wire.pid,
        })
    }

    /// Encode as a JSON stream unit (the inverse of [`LogLine::from_json`]).
    #[must_use]
    pub fn to_json(&self) -> String {
        let wire = WireLine {
            raw: STANDARD.encode(self.text.as_bytes()),
            received: self.received.clone(),
            priority: self.priority,
            hostname: self.hostname.clone(),
            tag: self.tag.clone(),
            pid: self.pid,
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = Some(priority);
        self
    }

    /// `facility.severity`, the key the collector counts priorities under.
    #[must_use]
    pub fn priority_name(&self) -> Option<String> {
        let priority = usize::from(self.priority?);
        let facility = FACILITIES.get(priority >> 3).copied().unwrap_or("unknown");
        let severity = SEVERITIES[priority & 7];
        Some(format!("{facility}.{severity}"))
    }

    /// Whether this line belongs to the bucket named by `filter`.
    ///
    /// The collector files every message under its tag, hostname and priority
    /// name; the unfiltered digest accepts everything.
    #[must_use]
    pub fn matches(&self, filter: &KeyDigest) -> bool {
        if filter.is_unfiltered() {
            return true;
        }
        let by_tag = self.tag.as_deref().is_some_and(|t| KeyDigest::of(t) == *filter);
        let by_host = self
            .hostname
            .as_deref()
            .is_some_and(|h| KeyDigest::of(h) == *filter);
        by_tag
            || by_host
            || self
                .priority_name()
                .is_some_and(|p| KeyDigest::of(&p) == *filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_raw_only_unit() {
        let line = LogLine::from_json(br#"{"Raw":"aGVsbG8gd29ybGQ="}"#).unwrap();
        assert_eq!(line, LogLine::from_text("hello world"));
    }

    #[test]
    fn decodes_full_collector_message() {
        let json = br#"{"Received":"2016-03-01T10:00:00Z","Priority":86,"Hostname":"mx1","Tag":"sshd","Pid":311,"Raw":"YWNjZXB0ZWQ="}"#;
        let line = LogLine::from_json(json).unwrap();
        assert_eq!(line.text, "accepted");
        assert_eq!(line.tag.as_deref(), Some("sshd"));
        assert_eq!(line.hostname.as_deref(), Some("mx1"));
        assert_eq!(line.pid, Some(311));
        assert_eq!(line.priority_name().as_deref(), Some("authpriv.info"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let line = LogLine::from_json(br#"{"Raw":"eA==","Extra":[1,2]}"#).unwrap();
        assert_eq!(line.text, "x");
    }

    #[test]
    fn malformed_json_is_decode_error() {
        assert!(matches!(
            LogLine::from_json(b"not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            LogLine::from_json(br#"{"NoRaw":1}"#),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn bad_base64_is_decode_error() {
        assert!(matches!(
            LogLine::from_json(br#"{"Raw":"***"}"#),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let encoded = STANDARD.encode([0x66, 0xff, 0x6f]);
        let json = format!(r#"{{"Raw":"{encoded}"}}"#);
        let line = LogLine::from_json(json.as_bytes()).unwrap();
        assert_eq!(line.text, "f\u{fffd}o");
    }

    #[test]
    fn json_encoding_decodes_back() {
        let line = LogLine::from_text("disk <a@b> 0x10").with_tag("kernel").with_priority(3);
        let back = LogLine::from_json(line.to_json().as_bytes()).unwrap();
        assert_eq!(back, line);
    }

    #[test]
    fn record_decode_delegates() {
        let record = Record::new(7, r#"{"Raw":"eQ=="}"#);
        assert_eq!(record.seq, 7);
        assert_eq!(record.decode().unwrap().text, "y");
    }

    #[test]
    fn priority_name_handles_out_of_table_facility() {
        assert_eq!(
            LogLine::from_text("x").with_priority(999).priority_name().as_deref(),
            Some("unknown.debug")
        );
        assert_eq!(LogLine::from_text("x").priority_name(), None);
    }

    #[test]
    fn matches_by_tag_host_or_priority() {
        let line = LogLine::from_text("x")
            .with_tag("cron")
            .with_hostname("web3")
            .with_priority(78);
        assert!(line.matches(&KeyDigest::unfiltered()));
        assert!(line.matches(&KeyDigest::of("cron")));
        assert!(line.matches(&KeyDigest::of("web3")));
        assert!(line.matches(&KeyDigest::of("cron.info")));
        assert!(!line.matches(&KeyDigest::of("sshd")));
        assert!(!LogLine::from_text("bare").matches(&KeyDigest::of("cron")));
    }
}
