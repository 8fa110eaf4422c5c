#![forbid(unsafe_code)]

use std::process::ExitCode;

use tailmon::{
    InputGuard, Opts, Selection, SignalGuard, TerminalSink, build_monitor, load_config, logging,
};

fn main() -> ExitCode {
    let opts = Opts::parse();

    if let Err(err) = logging::init(opts.log_format) {
        eprintln!("tailmon: {err}");
    }

    let loaded = match load_config(&opts, |key| std::env::var(key).ok()) {
        Ok(loaded) => loaded,
        Err(err) => {
            tracing::error!(error = %err, "cannot start");
            eprintln!("tailmon: {err}");
            return ExitCode::FAILURE;
        }
    };
    for warning in &loaded.warnings {
        tracing::warn!(%warning, "ignoring environment value");
    }
    if let Some(file) = &loaded.file {
        tracing::info!(path = %file.display(), "loaded config file");
    }

    let selection = Selection::shared();
    let sink = match TerminalSink::stdout() {
        Ok(sink) => sink.with_selection(selection.clone()),
        Err(err) => {
            eprintln!("tailmon: cannot open terminal: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut monitor = build_monitor(loaded.config, sink);
    let signals = match SignalGuard::install(monitor.handle()) {
        Ok(guard) => Some(guard),
        Err(err) => {
            tracing::warn!(error = %err, "signal handler not installed");
            None
        }
    };
    let input = match InputGuard::install(monitor.handle(), selection) {
        Ok(guard) => Some(guard),
        Err(err) => {
            tracing::warn!(error = %err, "keyboard input unavailable");
            None
        }
    };

    monitor.start();
    monitor.run();
    monitor.shutdown();
    tracing::info!(stats = ?monitor.stats(), "monitor stopped");

    drop(input);
    drop(signals);
    drop(monitor);
    ExitCode::SUCCESS
}
