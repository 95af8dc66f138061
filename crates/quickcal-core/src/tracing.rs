//! Tracing setup for quickcal
//!
//! Interactive invocations are re-run by the launcher on every keystroke, so
//! they only log warnings to stderr. Background refresh jobs have nobody
//! watching their stderr and append to a private log file instead.
//!
//! ```ignore
//! use quickcal_core::tracing::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::interactive(false))?;
//! init_tracing(TracingConfig::background("/home/me/.cache/quickcal/logs/quickcal.log"))?;
//! ```

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Errors that can occur during tracing initialization
#[derive(Debug, Error)]
pub enum TracingError {
    /// Failed to set global subscriber
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    /// Failed to parse env filter directive
    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),

    /// Failed to open the log file
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where log lines are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TracingOutput {
    #[default]
    Stderr,
    /// Append to the file, creating it and its parent directory.
    File(PathBuf),
}

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// The default log level when RUST_LOG is not set
    pub default_level: Level,
    pub output: TracingOutput,
    /// Whether to include file/line information in logs
    pub include_location: bool,
    /// Whether to include timestamps
    pub include_timestamp: bool,
    /// Custom env filter directive (overrides default_level if set)
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: Level::WARN,
            output: TracingOutput::Stderr,
            include_location: false,
            include_timestamp: false,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    /// Config for a launcher-driven invocation: quiet unless `debug`.
    #[must_use]
    pub fn interactive(debug: bool) -> Self {
        if debug {
            Self {
                default_level: Level::DEBUG,
                include_location: true,
                ..Self::default()
            }
        } else {
            Self::default()
        }
    }

    /// Config for a detached refresh job writing to `log_file`.
    #[must_use]
    pub fn background(log_file: impl Into<PathBuf>) -> Self {
        Self {
            default_level: Level::INFO,
            output: TracingOutput::File(log_file.into()),
            include_location: false,
            include_timestamp: true,
            env_filter: None,
        }
    }

    /// Set the default log level
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set a custom env filter directive
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn filter(&self) -> Result<EnvFilter, TracingError> {
        match self.env_filter {
            Some(ref filter) => Ok(EnvFilter::try_new(filter)?),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("quickcal={}", self.default_level)))),
        }
    }
}

fn open_log_file(path: &Path) -> Result<std::fs::File, TracingError> {
    let wrap = |source| TracingError::LogFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(wrap)
}

/// Initialize tracing with the given configuration.
///
/// Call once at process start. `RUST_LOG` overrides the default level.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set, if the
/// env filter directive is invalid, or if the log file cannot be opened.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let env_filter = config.filter()?;

    let writer = match config.output {
        TracingOutput::Stderr => fmt::writer::BoxMakeWriter::new(std::io::stderr),
        TracingOutput::File(ref path) => {
            fmt::writer::BoxMakeWriter::new(Mutex::new(open_log_file(path)?))
        }
    };
    let ansi = matches!(config.output, TracingOutput::Stderr);

    let layer = fmt::layer()
        .compact()
        .with_ansi(ansi)
        .with_writer(writer)
        .with_file(config.include_location)
        .with_line_number(config.include_location);
    let layer = if config.include_timestamp {
        layer.boxed()
    } else {
        layer.without_time().boxed()
    };

    let subscriber = tracing_subscriber::registry().with(env_filter).with(layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
