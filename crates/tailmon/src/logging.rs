#![forbid(unsafe_code)]

//! Diagnostic logging on stderr.
//!
//! stdout belongs to the terminal frame, so every `tracing` event goes to
//! stderr through a `tracing-subscriber` formatter. The filter comes from
//! `RUST_LOG` and falls back to [`DEFAULT_DIRECTIVES`].

use std::fmt;

use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

/// Filter used when `RUST_LOG` is unset or empty.
pub const DEFAULT_DIRECTIVES: &str = "tailmon=info";

/// Installing the global subscriber failed.
#[derive(Debug)]
pub enum LoggingError {
    /// A subscriber was already installed for this process.
    AlreadySet(String),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadySet(reason) => write!(f, "log subscriber already set: {reason}"),
        }
    }
}

impl std::error::Error for LoggingError {}

/// Pick the filter directives from a `RUST_LOG` value.
#[must_use]
pub fn directives(rust_log: Option<&str>) -> &str {
    match rust_log.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => DEFAULT_DIRECTIVES,
    }
}

/// Build the filter, falling back to the default on a bad `RUST_LOG`.
#[must_use]
pub fn env_filter(rust_log: Option<&str>) -> EnvFilter {
    EnvFilter::try_new(directives(rust_log))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the process-wide subscriber.
pub fn init(format: LogFormat) -> Result<(), LoggingError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .with_thread_names(true);

    let installed = match format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| LoggingError::AlreadySet(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_or_blank_rust_log_uses_default() {
        assert_eq!(directives(None), DEFAULT_DIRECTIVES);
        assert_eq!(directives(Some("   ")), DEFAULT_DIRECTIVES);
    }

    #[test]
    fn rust_log_is_used_verbatim() {
        assert_eq!(
            directives(Some("tailmon_runtime=debug")),
            "tailmon_runtime=debug"
        );
    }

    #[test]
    fn bad_directives_fall_back() {
        let filter = env_filter(Some("tailmon=notalevel"));
        assert_eq!(filter.to_string(), EnvFilter::new(DEFAULT_DIRECTIVES).to_string());
    }

    #[test]
    fn second_init_reports_already_set() {
        let _ = init(LogFormat::Plain);
        assert!(matches!(
            init(LogFormat::Json),
            Err(LoggingError::AlreadySet(_))
        ));
    }
}
