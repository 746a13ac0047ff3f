//! Structured Logger
//!
//! Console output (plain or JSON), an optional rolling NDJSON file, and
//! `RUST_LOG` based level control.

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter used when `RUST_LOG` is unset or invalid, e.g. `info` or
    /// `conflux_config=debug`.
    pub level: String,
    /// Emit console lines as JSON objects.
    pub json: bool,
    /// Also write NDJSON to `<dir>/conflux.log.YYYY-MM-DD`.
    pub log_dir: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber with console output only.
///
/// Returns false when a global subscriber was already installed; the
/// existing one is kept.
pub fn init_logger(level: &str, json: bool) -> bool {
    init_with(LogOptions {
        level: level.to_string(),
        json,
        log_dir: None,
    })
}

pub fn init_with(options: LogOptions) -> bool {
    let console_layer = if options.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_current_span(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_ansi(true)
            .boxed()
    };

    // Rolling file appender: NDJSON, rotated daily.
    let file_layer = options.log_dir.map(|dir| {
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, "conflux.log");
        fmt::layer()
            .json()
            .with_writer(appender)
            .with_ansi(false)
            .boxed()
    });

    tracing_subscriber::registry()
        .with(env_filter(&options.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_when_level_is_invalid() {
        let filter = env_filter("not a [valid filter");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn installs_once_and_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let installed = init_with(LogOptions {
            level: "debug".to_string(),
            json: true,
            log_dir: Some(dir.path().to_path_buf()),
        });
        assert!(installed);
        tracing::info!(component = "logger-test", "hello");
        assert!(!init_logger("info", false), "second install is refused");

        let written = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("conflux.log"));
        assert!(written);
    }
}
