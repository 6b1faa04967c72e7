use serde::Deserialize;
use std::str::FromStr;
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::ConfigError;

/// Logging environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingEnvironment {
    Development,
    Testing,
    Production,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub environment: LoggingEnvironment,
    pub level: Level,
    pub format: LogFormat,
    /// Show the target module
    pub show_target: bool,
    pub show_thread_ids: bool,
}

/// Partial logging section of the settings file
#[derive(Deserialize, Debug, Default, Clone)]
pub struct PartialLoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
    pub show_target: Option<bool>,
    pub show_thread_ids: Option<bool>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            environment: LoggingEnvironment::Development,
            level: Level::INFO,
            format: LogFormat::Pretty,
            show_target: true,
            show_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn development() -> Self {
        Self {
            environment: LoggingEnvironment::Development,
            level: Level::DEBUG,
            format: LogFormat::Pretty,
            show_target: true,
            show_thread_ids: true,
        }
    }

    pub fn production() -> Self {
        Self {
            environment: LoggingEnvironment::Production,
            level: Level::INFO,
            format: LogFormat::Json,
            show_target: false,
            show_thread_ids: false,
        }
    }

    pub fn testing() -> Self {
        Self {
            environment: LoggingEnvironment::Testing,
            level: Level::ERROR,
            format: LogFormat::Compact,
            show_target: false,
            show_thread_ids: false,
        }
    }

    pub fn from_partial(partial: Option<PartialLoggingConfig>) -> Result<Self, ConfigError> {
        let partial = partial.unwrap_or_default();
        let defaults = LoggingConfig::default();

        let level = match partial.level {
            Some(level) => Level::from_str(&level).map_err(|_| ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                value: level.clone(),
            })?,
            None => defaults.level,
        };

        Ok(LoggingConfig {
            environment: defaults.environment,
            level,
            format: partial.format.unwrap_or(defaults.format),
            show_target: partial.show_target.unwrap_or(defaults.show_target),
            show_thread_ids: partial.show_thread_ids.unwrap_or(defaults.show_thread_ids),
        })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ansi = config.environment != LoggingEnvironment::Production;

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_ansi(ansi);

            tracing_subscriber::registry()
                .with(config.filter())
                .with(fmt_layer)
                .try_init()?;
        }
        // Fall back to the compact format
        LogFormat::Json | LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_ansi(ansi);

            tracing_subscriber::registry()
                .with(config.filter())
                .with(fmt_layer)
                .try_init()?;
        }
    }

    tracing::info!(
        environment = ?config.environment,
        level = ?config.level,
        format = ?config.format,
        "Logging system initialized"
    );

    Ok(())
}

/// Times an operation and logs its duration
pub struct OperationTimer {
    start: Instant,
    operation: String,
    metadata: Vec<(String, String)>,
    finished: bool,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
            metadata: Vec::new(),
            finished: false,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }

    /// Stop the timer and log the elapsed time
    pub fn finish(mut self) {
        self.finished = true;
        let duration = self.start.elapsed();

        tracing::debug!(
            operation = %self.operation,
            duration_us = duration.as_micros() as u64,
            metadata = ?self.metadata,
            "Operation completed"
        );
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::debug!(
            operation = %self.operation,
            duration_us = self.start.elapsed().as_micros() as u64,
            metadata = ?self.metadata,
            "Operation abandoned"
        );
    }
}
