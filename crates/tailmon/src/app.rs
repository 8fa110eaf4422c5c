#![forbid(unsafe_code)]

//! Startup wiring: configuration layering, monitor assembly and shutdown on
//! termination signals.

use std::fmt;
use std::path::PathBuf;

use tailmon_core::{ConfigError, MonitorConfig};
use tailmon_runtime::{
    ChannelTransport, FileBackfill, FollowTransport, Monitor, MonitorHandle, MonitorParts,
    RenderSink, StatsFile,
};

use crate::cli::Opts;

/// The effective configuration and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: MonitorConfig,
    /// Config file that was overlaid, if any.
    pub file: Option<PathBuf>,
    /// Environment values that were ignored.
    pub warnings: Vec<ConfigError>,
}

/// Configuration could not be loaded.
#[derive(Debug)]
pub enum StartupError {
    /// The config file was unreadable or invalid.
    File(ConfigError),
    /// The layered config violates a constraint.
    Invalid(Vec<ConfigError>),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(err) => write!(f, "config file: {err}"),
            Self::Invalid(errors) => {
                f.write_str("invalid configuration:")?;
                for err in errors {
                    write!(f, " {err};")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Layer defaults, config file, environment and flags, in that order.
///
/// `--config` names the file; otherwise the search paths are tried. Bad
/// environment values are reported as warnings and keep the previous value.
pub fn load_config<F>(opts: &Opts, get_env: F) -> Result<LoadedConfig, StartupError>
where
    F: FnMut(&str) -> Option<String>,
{
    let base = MonitorConfig::default();
    let (config, file) = match &opts.config {
        Some(path) => (
            base.overlay_file(path).map_err(StartupError::File)?,
            Some(path.clone()),
        ),
        None => base.discover().map_err(StartupError::File)?,
    };

    let parsed = config.overlay_env_with(get_env);
    let config = opts.apply(parsed.config);
    config.validate().map_err(StartupError::Invalid)?;

    Ok(LoadedConfig {
        config,
        file,
        warnings: parsed.errors,
    })
}

/// Assemble the monitor for `config`.
///
/// With a stream file the tail follows it and backfills from it; without one
/// the monitor runs on an idle in-memory transport. Summary snapshots come
/// from the stats file when one is configured.
pub fn build_monitor(config: MonitorConfig, sink: impl RenderSink + 'static) -> Monitor {
    let stream = config.stream_path.clone();
    let stats = config.stats_path.clone();

    let mut parts = match stream {
        Some(path) => {
            tracing::info!(path = %path.display(), "following stream file");
            MonitorParts::new(config, FollowTransport::new(&path))
                .backfill(FileBackfill::new(&path))
        }
        None => {
            tracing::warn!("no stream file configured; the tail stays empty");
            MonitorParts::new(config, ChannelTransport::new())
        }
    };
    if let Some(path) = stats {
        tracing::info!(path = %path.display(), "polling stats file");
        parts = parts.snapshots(StatsFile::new(&path));
    }
    Monitor::new(parts.sink(sink))
}

/// Posts `Shutdown` to the monitor on SIGINT/SIGTERM.
#[cfg(unix)]
#[derive(Debug)]
pub struct SignalGuard {
    handle: signal_hook::iterator::Handle,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[cfg(unix)]
impl SignalGuard {
    pub fn install(monitor: MonitorHandle) -> std::io::Result<Self> {
        use signal_hook::consts::signal::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(std::io::Error::other)?;
        let handle = signals.handle();
        let thread = std::thread::Builder::new()
            .name("tailmon-signals".into())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    tracing::info!(signal, "termination signal received, shutting down");
                    monitor.shutdown();
                }
            })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

#[cfg(unix)]
impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Signals are not wired up on this platform; the monitor ends when its
/// senders drop.
#[cfg(not(unix))]
#[derive(Debug)]
pub struct SignalGuard;

#[cfg(not(unix))]
impl SignalGuard {
    pub fn install(_monitor: MonitorHandle) -> std::io::Result<Self> {
        Ok(Self)
    }
}
