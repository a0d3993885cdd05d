//! Structured logging setup.
//!
//! Workers log through `tracing`. This module installs the subscriber once per
//! process: an `EnvFilter` built from `LARK_LOG_LEVEL` / `RUST_LOG` plus
//! optional per-target directives, and a JSON or pretty fmt layer. With
//! `LARK_LOG_ASYNC=true` output goes through a `tracing-appender` non-blocking
//! writer so a slow stdout never stalls the event loop.

use anyhow::{Context, Result};
use std::env;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::DispatchSettings;

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    /// Write through a background thread instead of directly to stdout
    pub async_logging: bool,
    /// Extra comma-separated `target=level` directives
    pub target_filter: Option<String>,
    /// Include file:line in each event
    pub include_location: bool,
}

impl LogConfig {
    /// Read `LARK_LOG_*` variables over JSON at `info`.
    pub fn from_env() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            async_logging: false,
            target_filter: None,
            include_location: false,
        }
        .with_env_overrides()
    }

    /// The dev or prod preset picked by `settings.debug`, then `LARK_LOG_*`
    /// variables on top.
    pub fn for_settings(settings: &DispatchSettings) -> Self {
        Self::preset(settings).with_env_overrides()
    }

    fn preset(settings: &DispatchSettings) -> Self {
        if settings.debug {
            Self::default_dev()
        } else {
            Self::default_prod()
        }
    }

    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            async_logging: false,
            target_filter: None,
            include_location: true,
        }
    }

    pub fn default_prod() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            async_logging: true,
            target_filter: None,
            include_location: false,
        }
    }

    /// Replace each field whose `LARK_LOG_*` variable is set. Unparsable
    /// booleans are ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| env::var(name).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(level) = var("LARK_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(format) = var("LARK_LOG_FORMAT") {
            self.format = LogFormat::parse(&format);
        }
        if let Some(on) = var("LARK_LOG_ASYNC").and_then(|s| s.parse().ok()) {
            self.async_logging = on;
        }
        if let Some(targets) = var("LARK_LOG_TARGET_FILTER") {
            self.target_filter = Some(targets);
        }
        if let Some(on) = var("LARK_LOG_INCLUDE_LOCATION").and_then(|s| s.parse().ok()) {
            self.include_location = on;
        }
        self
    }

    fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// `RUST_LOG` wins over `log_level`; `target_filter` directives are added on top.
    pub fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level().as_str()));

        if let Some(targets) = &self.target_filter {
            for directive in targets.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(_) => eprintln!("Warning: invalid log filter directive: {directive}"),
                }
            }
        }
        filter
    }
}

/// Install the global subscriber.
///
/// Returns the appender guard when async logging is on; keep it alive for the
/// life of the worker or buffered lines are lost on exit.
///
/// # Example
///
/// ```no_run
/// use lark::logging::{init_logging_with_config, LogConfig};
/// use lark::{Config, DispatchSettings};
///
/// let settings = DispatchSettings::load(&Config::empty());
/// let _guard = init_logging_with_config(&LogConfig::for_settings(&settings))
///     .expect("failed to initialise logging");
/// ```
pub fn init_logging_with_config(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    let (writer, guard) = if config.async_logging {
        let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
        (Some(non_blocking), Some(guard))
    } else {
        (None, None)
    };

    let fmt_layer = match (config.format, writer) {
        (LogFormat::Json, Some(w)) => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(w)
            .boxed(),
        (LogFormat::Json, None) => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
        (LogFormat::Pretty, Some(w)) => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(w)
            .boxed(),
        (LogFormat::Pretty, None) => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
    };

    registry
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
