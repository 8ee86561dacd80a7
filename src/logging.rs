/// Structured logging for the pollen monitoring service
///
/// Events go through `tracing` with the location and data source attached
/// as fields. `init_logger` installs the subscriber once for the daemon:
/// console output on stderr, and optionally an append-only log file.
/// `RUST_LOG` overrides the configured minimum level.
///
/// The API credential never appears in any event emitted from here.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::model::PollError;
use crate::reconcile::CycleSummary;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    PollenApi,
    Replay,
    Tables,
    System,
}

impl DataSource {
    /// Maps a `SnapshotSource::name()` onto a log source.
    pub fn from_source_name(name: &str) -> Self {
        match name {
            "pollen-api" => DataSource::PollenApi,
            "replay" => DataSource::Replay,
            _ => DataSource::System,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::PollenApi => write!(f, "POLLEN"),
            DataSource::Replay => write!(f, "REPLAY"),
            DataSource::Tables => write!(f, "TABLES"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the location was torn down mid-poll
    Expected,
    /// Unexpected failure - upstream changed its payload or is misbehaving
    Unexpected,
    /// The operator has to act, e.g. replace a rejected API key
    ActionRequired,
    /// Unknown - often transient network trouble
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::ActionRequired => write!(f, "ACTION_REQUIRED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// A second call is a no-op, so tests and the binary can both call it.
/// Fails only when the log file cannot be opened.
pub fn init_logger(min_level: LogLevel, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(min_level.as_directive()));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("logger already initialised");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Classify a poll failure for logging and operator attention.
pub fn classify_poll_failure(err: &PollError) -> FailureType {
    match err {
        PollError::Transport(_) => FailureType::Unknown,
        PollError::Content(_) => FailureType::Unexpected,
        PollError::Auth { .. } => FailureType::ActionRequired,
        PollError::Cancelled => FailureType::Expected,
    }
}

/// Log a poll failure with automatic classification.
pub fn log_poll_failure(source: DataSource, location: &str, operation: &str, err: &PollError) {
    let failure_type = classify_poll_failure(err);
    match failure_type {
        FailureType::Expected => tracing::debug!(
            source = %source, location, failure = %failure_type,
            "{} failed: {}", operation, err
        ),
        FailureType::Unknown => tracing::warn!(
            source = %source, location, failure = %failure_type,
            "{} failed: {}", operation, err
        ),
        FailureType::Unexpected | FailureType::ActionRequired => tracing::error!(
            source = %source, location, failure = %failure_type,
            "{} failed: {}", operation, err
        ),
    }
}

// ---------------------------------------------------------------------------
// Cycle Summary Logging
// ---------------------------------------------------------------------------

/// Log what one reconciliation cycle did.
pub fn log_cycle_summary(location: &str, summary: &CycleSummary) {
    if summary.carried > 0 {
        tracing::warn!(
            location,
            carried = summary.carried,
            "cycle kept previous quantities after failed poll"
        );
    } else if summary.stale > 0 {
        tracing::warn!(
            location,
            stale = summary.stale,
            "upstream returned no data, quantities marked stale"
        );
    } else {
        tracing::info!(
            location,
            created = summary.created,
            updated = summary.updated,
            dropped = summary.dropped,
            collisions = summary.collisions,
            "cycle complete"
        );
    }
}
