#![forbid(unsafe_code)]

//! Error types shared by the aggregation core and its adapters.
//!
//! None of these are fatal. Decode failures drop one record, transport
//! failures surface as lifecycle events and fetch failures skip one poll.

use std::fmt;
use std::io;

/// A stream unit that could not be turned into a [`LogLine`](crate::record::LogLine).
#[derive(Debug)]
pub enum DecodeError {
    /// The payload is not the expected JSON object.
    Json(serde_json::Error),
    /// The `Raw` field is not valid base64.
    Base64(base64::DecodeError),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Json(e) => write!(f, "malformed stream unit: {e}"),
            DecodeError::Base64(e) => write!(f, "undecodable Raw payload: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Json(e) => Some(e),
            DecodeError::Base64(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json(e)
    }
}

impl From<base64::DecodeError> for DecodeError {
    fn from(e: base64::DecodeError) -> Self {
        DecodeError::Base64(e)
    }
}

/// The live stream could not be opened or dropped while running.
#[derive(Debug)]
pub enum TransportError {
    /// The endpoint does not exist or refused the subscription.
    Unreachable(String),
    /// I/O failure on an established stream.
    Io(io::Error),
    /// The peer went away.
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unreachable(msg) => write!(f, "transport unreachable: {msg}"),
            TransportError::Io(e) => write!(f, "transport I/O error: {e}"),
            TransportError::Closed => f.write_str("transport closed by peer"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::Unreachable(_) | TransportError::Closed => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

/// A snapshot or backfill request failed.
///
/// An empty response is not an error; sources report it as `Ok(None)`.
#[derive(Debug)]
pub enum FetchError {
    /// I/O error while reading the source.
    Io(io::Error),
    /// The response body could not be parsed.
    Parse(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Io(e) => write!(f, "fetch I/O error: {e}"),
            FetchError::Parse(msg) => write!(f, "fetch parse error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Io(e) => Some(e),
            FetchError::Parse(_) => None,
        }
    }
}

impl From<io::Error> for FetchError {
    fn from(e: io::Error) -> Self {
        FetchError::Io(e)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Parse(e.to_string())
    }
}
