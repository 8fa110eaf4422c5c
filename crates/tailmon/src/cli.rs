#![forbid(unsafe_code)]

//! Command-line argument parsing.
//!
//! Parses args manually to keep the binary lean. Monitor settings come from
//! the config file and `TAILMON_*` variables first; flags given here override
//! both (see [`Opts::apply`]).

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use tailmon_core::{KeyDigest, MonitorConfig};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment override for `--log-format`.
pub const ENV_LOG_FORMAT: &str = "TAILMON_LOG_FORMAT";

pub const HELP_TEXT: &str = "\
tailmon - live deduplicated log tail with top tags, priorities and hosts

USAGE:
    tailmon [OPTIONS]

OPTIONS:
    --stream=PATH        Follow this newline-delimited JSON file as the live stream
    --stats=PATH         Poll this JSON file for tag/priority/host snapshots
    --filter=VALUE       Initial filter: a 32-hex digest, or a tag/host/priority name
    --poll-ms=N          Snapshot poll period in milliseconds (default: 5000)
    --tick-ms=N          Highlight tick period in milliseconds (default: 100)
    --config=PATH        Read settings from this JSON file instead of searching
    --log-format=FORMAT  Diagnostics on stderr: 'plain' (default) or 'json'
    --help, -h           Show this help message
    --version, -V        Show version

KEYS:
    Up/Down, k/j         Move the cursor within a summary column
    Left/Right, h/l, Tab Move the cursor between columns
    Enter                Follow the selected tag, priority or host
    a                    Follow everything
    p                    Pause or resume the tail
    c                    Clear the tail
    r                    Reconnect the stream
    q, Esc, Ctrl+C       Quit

CONFIG FILES (first found wins unless --config is given):
    ./tailmon.json  ./etc/tailmon.json  /usr/local/etc/tailmon.json  /etc/tailmon.json

ENVIRONMENT VARIABLES:
    TAILMON_STREAM, TAILMON_STATS, TAILMON_FILTER
    TAILMON_POLL_MS, TAILMON_TICK_MS, TAILMON_TAIL_CAP, TAILMON_BACKFILL_MAX
    TAILMON_CREATE_FREEZE_MS, TAILMON_MERGE_FREEZE_MS
    TAILMON_CREATE_HIGHLIGHT_MS, TAILMON_MERGE_HIGHLIGHT_MS
    TAILMON_LOG_FORMAT        Override --log-format default (plain|json)
    RUST_LOG                  Log filter (default: tailmon=info)";

/// Format of the diagnostic log on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Some(Self::Plain),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parsed command-line options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Opts {
    pub stream: Option<PathBuf>,
    pub stats: Option<PathBuf>,
    /// Initial filter as typed; resolved by [`KeyDigest::from_key_or_digest`].
    pub filter: Option<String>,
    pub poll_ms: Option<u64>,
    pub tick_ms: Option<u64>,
    /// Explicit config file; disables the search.
    pub config: Option<PathBuf>,
    pub log_format: LogFormat,
}

/// What the command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run(Opts),
    Help,
    Version,
}

/// A rejected argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliError {
    Invalid { flag: &'static str, value: String },
    Unknown(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { flag, value } => write!(f, "Invalid {flag} value: {value}"),
            Self::Unknown(arg) => write!(f, "Unknown argument: {arg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl Opts {
    /// Parse the process arguments, printing help/version or an error and
    /// exiting when the command line does not ask for a run.
    pub fn parse() -> Self {
        let args: Vec<String> = env::args().skip(1).collect();
        match Self::parse_from(args, |key| env::var(key).ok()) {
            Ok(Action::Run(opts)) => opts,
            Ok(Action::Help) => {
                println!("{HELP_TEXT}");
                process::exit(0);
            }
            Ok(Action::Version) => {
                println!("tailmon {VERSION}");
                process::exit(0);
            }
            Err(err) => {
                eprintln!("{err}");
                eprintln!("Run with --help for usage information.");
                process::exit(1);
            }
        }
    }

    /// Parse `args` (without the program name) with a custom environment.
    pub fn parse_from<I, F>(args: I, mut get_env: F) -> Result<Action, CliError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        F: FnMut(&str) -> Option<String>,
    {
        let mut opts = Self::default();

        if let Some(val) = get_env(ENV_LOG_FORMAT)
            && let Some(format) = LogFormat::parse(&val)
        {
            opts.log_format = format;
        }

        for arg in args {
            let arg = arg.as_ref();
            match arg {
                "--help" | "-h" => return Ok(Action::Help),
                "--version" | "-V" => return Ok(Action::Version),
                other => {
                    if let Some(val) = other.strip_prefix("--stream=") {
                        opts.stream = Some(non_empty_path("--stream", val)?);
                    } else if let Some(val) = other.strip_prefix("--stats=") {
                        opts.stats = Some(non_empty_path("--stats", val)?);
                    } else if let Some(val) = other.strip_prefix("--config=") {
                        opts.config = Some(non_empty_path("--config", val)?);
                    } else if let Some(val) = other.strip_prefix("--filter=") {
                        opts.filter = Some(val.to_string());
                    } else if let Some(val) = other.strip_prefix("--poll-ms=") {
                        opts.poll_ms = Some(millis("--poll-ms", val)?);
                    } else if let Some(val) = other.strip_prefix("--tick-ms=") {
                        opts.tick_ms = Some(millis("--tick-ms", val)?);
                    } else if let Some(val) = other.strip_prefix("--log-format=") {
                        opts.log_format =
                            LogFormat::parse(val).ok_or_else(|| CliError::Invalid {
                                flag: "--log-format",
                                value: val.to_string(),
                            })?;
                    } else {
                        return Err(CliError::Unknown(other.to_string()));
                    }
                }
            }
        }

        Ok(Action::Run(opts))
    }

    /// Overlay the flags that were given on `config`.
    #[must_use]
    pub fn apply(&self, mut config: MonitorConfig) -> MonitorConfig {
        if let Some(path) = &self.stream {
            config.stream_path = Some(path.clone());
        }
        if let Some(path) = &self.stats {
            config.stats_path = Some(path.clone());
        }
        if let Some(filter) = &self.filter {
            config.initial_filter = if filter.is_empty() {
                KeyDigest::unfiltered()
            } else {
                KeyDigest::from_key_or_digest(filter)
            };
        }
        if let Some(ms) = self.poll_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.tick_ms {
            config.tick_interval = Duration::from_millis(ms);
        }
        config
    }
}

fn non_empty_path(flag: &'static str, value: &str) -> Result<PathBuf, CliError> {
    if value.is_empty() {
        Err(CliError::Invalid {
            flag,
            value: String::new(),
        })
    } else {
        Ok(PathBuf::from(value))
    }
}

fn millis(flag: &'static str, value: &str) -> Result<u64, CliError> {
    value.parse().map_err(|_| CliError::Invalid {
        flag,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn run(args: &[&str]) -> Opts {
        match Opts::parse_from(args, no_env) {
            Ok(Action::Run(opts)) => opts,
            other => panic!("expected a run, got {other:?}"),
        }
    }

    #[test]
    fn default_opts() {
        let opts = run(&[]);
        assert_eq!(opts, Opts::default());
        assert_eq!(opts.log_format, LogFormat::Plain);
    }

    #[test]
    fn version_string_nonempty() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn help_text_mentions_every_flag() {
        for flag in [
            "--stream=", "--stats=", "--filter=", "--poll-ms=", "--tick-ms=", "--config=",
            "--log-format=", "--help", "--version",
        ] {
            assert!(HELP_TEXT.contains(flag), "{flag} missing from help");
        }
    }

    #[test]
    fn help_and_version_win_over_other_args() {
        assert_eq!(
            Opts::parse_from(["--poll-ms=5", "--help"], no_env),
            Ok(Action::Help)
        );
        assert_eq!(Opts::parse_from(["-V"], no_env), Ok(Action::Version));
    }

    #[test]
    fn value_flags_are_parsed() {
        let opts = run(&[
            "--stream=/var/log/stream.ndjson",
            "--stats=/tmp/stats.json",
            "--filter=sshd",
            "--poll-ms=250",
            "--tick-ms=50",
            "--config=./x.json",
            "--log-format=json",
        ]);
        assert_eq!(opts.stream, Some(PathBuf::from("/var/log/stream.ndjson")));
        assert_eq!(opts.stats, Some(PathBuf::from("/tmp/stats.json")));
        assert_eq!(opts.filter.as_deref(), Some("sshd"));
        assert_eq!(opts.poll_ms, Some(250));
        assert_eq!(opts.tick_ms, Some(50));
        assert_eq!(opts.config, Some(PathBuf::from("./x.json")));
        assert_eq!(opts.log_format, LogFormat::Json);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert_eq!(
            Opts::parse_from(["--poll-ms=soon"], no_env),
            Err(CliError::Invalid {
                flag: "--poll-ms",
                value: "soon".into()
            })
        );
        assert!(Opts::parse_from(["--log-format=xml"], no_env).is_err());
        assert!(Opts::parse_from(["--stream="], no_env).is_err());
        assert_eq!(
            Opts::parse_from(["--verbose"], no_env),
            Err(CliError::Unknown("--verbose".into()))
        );
    }

    #[test]
    fn log_format_env_is_overridden_by_flag() {
        let env = |key: &str| (key == ENV_LOG_FORMAT).then(|| "JSON".to_string());
        let Ok(Action::Run(opts)) = Opts::parse_from(Vec::<String>::new(), env) else {
            panic!("expected a run");
        };
        assert_eq!(opts.log_format, LogFormat::Json);

        let Ok(Action::Run(opts)) = Opts::parse_from(["--log-format=plain"], env) else {
            panic!("expected a run");
        };
        assert_eq!(opts.log_format, LogFormat::Plain);
    }

    #[test]
    fn apply_overrides_only_given_flags() {
        let base = MonitorConfig {
            backfill_max: 7,
            ..MonitorConfig::default()
        };
        let untouched = Opts::default().apply(base.clone());
        assert_eq!(untouched, base);

        let opts = run(&["--filter=sshd", "--poll-ms=1000", "--stream=s.ndjson"]);
        let config = opts.apply(base);
        assert_eq!(config.initial_filter, KeyDigest::of("sshd"));
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.stream_path, Some(PathBuf::from("s.ndjson")));
        assert_eq!(config.backfill_max, 7);
    }

    #[test]
    fn filter_accepts_a_digest_verbatim() {
        let digest = KeyDigest::of("cron");
        let arg = format!("--filter={}", digest.as_str().to_uppercase());
        let opts = run(&[arg.as_str()]);
        assert_eq!(opts.apply(MonitorConfig::default()).initial_filter, digest);

        let opts = run(&["--filter="]);
        assert!(
            opts.apply(MonitorConfig::default())
                .initial_filter
                .is_unfiltered()
        );
    }
}
