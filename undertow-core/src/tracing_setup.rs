//! Tracing setup for Undertow
//!
//! Console logs at a user-chosen level plus a full engine trace on disk, so a
//! failed transfer can be diagnosed per peer after the fact. Every per-peer
//! record carries a `peer` field, so `grep 'peer=1.2.3.4:6881'` on the trace
//! file isolates one connection.

use std::fs::{File, create_dir_all};
use std::path::Path;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the trace file inside the logs directory, rewritten on every run
pub const TRACE_FILE_NAME: &str = "undertow-last-run.log";

/// Modules that log once per frame or block
const WIRE_MODULES: [&str; 2] = [
    "undertow_core::torrent::protocol",
    "undertow_core::torrent::worker",
];

/// Filter directives for the console.
///
/// Undertow crates log at `level`. The wire modules are capped at `info`
/// unless `trace` is asked for, and dependencies only surface warnings.
pub fn console_directives(level: Level) -> String {
    let wire = if level == Level::TRACE {
        Level::TRACE
    } else {
        level.min(Level::INFO)
    };
    let mut directives = vec![
        LevelFilter::WARN.to_string(),
        format!("undertow_core={level}"),
        format!("undertow={level}"),
    ];
    directives.extend(WIRE_MODULES.iter().map(|module| format!("{module}={wire}")));
    directives.join(",").to_lowercase()
}

/// Filter directives for the trace file: the whole engine, dependencies at `info`.
pub fn trace_file_directives() -> String {
    "info,undertow_core=trace,undertow=trace".to_string()
}

/// Initialize console and trace-file output.
///
/// `RUST_LOG`, when set, replaces the console directives. The trace file
/// always records the full engine trace to `<logs_dir>/undertow-last-run.log`
/// (`./logs` by default), overwriting the previous run.
///
/// # Errors
///
/// - `std::io::Error` - If logs directory cannot be created or log file cannot be opened for writing
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<(), std::io::Error> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new("logs"));
    create_dir_all(logs_path)?;

    let log_file_path = logs_path.join(TRACE_FILE_NAME);
    let log_file = File::create(&log_file_path)?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(console_level)));

    let console_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new(trace_file_directives()));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::debug!(
        console = %console_level,
        trace_file = %log_file_path.display(),
        "Tracing initialized"
    );

    Ok(())
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Per-piece progress, peer connects and disconnects
    Info,
    /// Piece transfers, choke changes and dropped requests
    Debug,
    /// All messages including per-frame tracing
    Trace,
}

impl CliLogLevel {
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(CliLogLevel::Warn.as_tracing_level(), Level::WARN);
        assert_eq!(CliLogLevel::Trace.as_tracing_level(), Level::TRACE);
    }

    #[test]
    fn test_console_directives_cap_wire_modules() {
        assert_eq!(
            console_directives(Level::INFO),
            "warn,undertow_core=info,undertow=info,\
             undertow_core::torrent::protocol=info,undertow_core::torrent::worker=info"
        );
        let debug = console_directives(Level::DEBUG);
        assert!(debug.contains("undertow_core=debug"));
        assert!(debug.contains("undertow_core::torrent::worker=info"));
        assert!(console_directives(Level::WARN).contains("undertow_core::torrent::worker=warn"));

        let trace = console_directives(Level::TRACE);
        assert!(trace.contains("undertow_core::torrent::protocol=trace"));
        assert!(trace.starts_with("warn,"));
    }

    #[test]
    fn test_directives_parse() {
        for level in [Level::ERROR, Level::INFO, Level::TRACE] {
            assert!(EnvFilter::try_new(console_directives(level)).is_ok());
        }
        assert!(EnvFilter::try_new(trace_file_directives()).is_ok());
    }
}
