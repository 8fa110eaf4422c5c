#![forbid(unsafe_code)]

//! Key digests.
//!
//! A digest identifies a summary row and doubles as the filter value of the
//! live stream. It is the MD5 of the key rendered as 32 lowercase hex digits,
//! which is how the collector names its per-key ring buffers. The all-zero
//! digest names the default (unfiltered) bucket.

use std::fmt;
use std::fmt::Write as _;

use md5::{Digest, Md5};

const UNFILTERED: &str = "00000000000000000000000000000000";

/// Deterministic identity of a summary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyDigest(String);

impl KeyDigest {
    /// Number of hex digits in a digest.
    pub const HEX_LEN: usize = 32;

    /// Hash a key.
    #[must_use]
    pub fn of(key: &str) -> Self {
        let sum = Md5::digest(key.as_bytes());
        let mut hex = String::with_capacity(Self::HEX_LEN);
        for byte in sum.iter() {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// The default bucket.
    #[must_use]
    pub fn unfiltered() -> Self {
        Self(UNFILTERED.to_owned())
    }

    /// Parse an already-computed digest (32 hex digits, any case).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() == Self::HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(value.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Use `value` as a digest when it looks like one, otherwise hash it.
    #[must_use]
    pub fn from_key_or_digest(value: &str) -> Self {
        Self::parse(value).unwrap_or_else(|| Self::of(value))
    }

    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        self.0 == UNFILTERED
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for KeyDigest {
    fn default() -> Self {
        Self::unfiltered()
    }
}

impl fmt::Display for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
