#![forbid(unsafe_code)]

//! Tailmon
//!
//! Terminal front end for the tailmon monitor: command-line parsing,
//! configuration layering, stderr logging and a crossterm render sink.
//!
//! # Key Components
//!
//! - [`cli::Opts`] - Flags with environment overrides
//! - [`app::load_config`] - Defaults, config file, environment and flags, layered
//! - [`app::build_monitor`] - File-backed [`tailmon_runtime::Monitor`] assembly
//! - [`terminal_sink::TerminalSink`] - Full-screen frame, highlights in red
//! - [`input::InputGuard`] - Raw-mode keyboard thread posting monitor commands
//! - [`logging::init`] - `tracing-subscriber` on stderr, plain or JSON

pub mod app;
pub mod cli;
pub mod input;
pub mod logging;
pub mod terminal_sink;

pub use app::{LoadedConfig, SignalGuard, StartupError, build_monitor, load_config};
pub use cli::{Action, CliError, LogFormat, Opts};
pub use input::{InputGuard, Selection, SharedSelection, map_event, map_key};
pub use terminal_sink::TerminalSink;
