use crate::errors::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The initial log level
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span open/close
    pub log_spans: bool,
    /// Lines buffered for the drain worker before new lines are dropped
    pub queue_lines: usize,
    /// Application name printed in the welcome line
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            queue_lines: 128_000,
            app_name: "rvoip-switch".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// Bound the drain queue
    pub fn with_queue_lines(mut self, lines: usize) -> Self {
        self.queue_lines = lines;
        self
    }
}

/// Handle to the installed subscriber.
///
/// Changes the process-wide level at runtime and keeps the background drain
/// worker alive; dropping the last clone flushes and stops the worker.
#[derive(Clone)]
pub struct LogHandle {
    reload: reload::Handle<EnvFilter, Registry>,
    level: Arc<RwLock<Level>>,
    _worker: Arc<WorkerGuard>,
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle")
            .field("level", &*self.level.read())
            .finish()
    }
}

impl LogHandle {
    /// Current process-wide level
    pub fn level(&self) -> Level {
        *self.level.read()
    }

    /// Replace the process-wide level filter
    pub fn set_level(&self, level: Level) -> Result<()> {
        self.reload
            .reload(build_filter(level, false))
            .map_err(|e| Error::Logging(e.to_string()))?;
        *self.level.write() = level;
        tracing::info!("Log level changed to {}", level);
        Ok(())
    }
}

fn build_filter(level: Level, from_env: bool) -> EnvFilter {
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::from_level(level).into());
    if from_env {
        builder.from_env_lossy()
    } else {
        builder.parse_lossy("")
    }
}

/// Set up the logging system with the provided configuration.
///
/// Log lines are handed to a bounded non-blocking writer drained by a
/// background worker; when the queue is full lines are dropped rather than
/// blocking the caller.
pub fn setup_logging(config: LoggingConfig) -> Result<LogHandle> {
    let (filter, reload_handle) = reload::Layer::new(build_filter(config.level, true));

    let (writer, worker) = NonBlockingBuilder::default()
        .buffered_lines_limit(config.queue_lines)
        .lossy(true)
        .finish(std::io::stdout());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let (json_layer, text_layer) = if config.json {
        let layer = fmt::layer()
            .json()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_file(config.file_info)
            .with_line_number(config.file_info);
        (Some(layer), None)
    } else {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_file(config.file_info)
            .with_line_number(config.file_info);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    Ok(LogHandle {
        reload: reload_handle,
        level: Arc::new(RwLock::new(config.level)),
        _worker: Arc::new(worker),
    })
}

/// Parse a log level from a string.
///
/// Accepts tracing names, the classic switch names (`console`, `alert`,
/// `crit`, `err`, `warning`, `notice`) and their numeric forms 0-7.
pub fn parse_log_level(level: &str) -> Result<Level> {
    let level = match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" | "7" => Level::DEBUG,
        "info" | "notice" | "6" | "5" => Level::INFO,
        "warn" | "warning" | "4" => Level::WARN,
        "error" | "err" | "crit" | "alert" | "console" | "3" | "2" | "1" | "0" => Level::ERROR,
        other => return Err(Error::config(format!("Invalid log level: {}", other))),
    };
    Ok(level)
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_switch_level_names() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("notice").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("crit").unwrap(), Level::ERROR);
        assert_eq!(parse_log_level("7").unwrap(), Level::DEBUG);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_config_builders() {
        let config = LoggingConfig::new(Level::DEBUG, "switchd")
            .with_json()
            .with_file_info()
            .with_queue_lines(64);
        assert!(config.json);
        assert!(config.file_info);
        assert!(!config.log_spans);
        assert_eq!(config.queue_lines, 64);
        assert_eq!(config.app_name, "switchd");
    }
}
