//! Election lifecycle and vote-casting transaction engine
//!
//! Governs an election's phases and records each delegate's single ballot
//! atomically, with a hash-chained audit trail and live tally notifications.

pub mod config;
pub mod engine;
pub mod errors;
pub mod types;

// Re-export commonly used types
pub use engine::{
    CastRequest, CastResult, Coordinator, ElectionEngine, ElectionRegistry, Rejection,
    ReprintResult,
};
pub use errors::{Error, ErrorKind, Precondition, Result};

use config::LoggingConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default filter
pub fn init() -> Result<()> {
    install_subscriber(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "election_engine=info".into()),
        LogFormat::Full,
    )
}

/// Initialize logging from [`LoggingConfig`]; `RUST_LOG` still wins when set
pub fn init_with(logging: &LoggingConfig) -> Result<()> {
    let format = logging.format.parse()?;
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&logging.level)?,
    };
    install_subscriber(filter, format)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Full,
    Compact,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "full" => Ok(LogFormat::Full),
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(Error::config(format!("unknown LOG_FORMAT {other:?}"))),
        }
    }
}

fn level_filter(level: &str) -> Result<tracing_subscriber::EnvFilter> {
    tracing_subscriber::EnvFilter::try_new(level)
        .map_err(|e| Error::config(format!("invalid LOG_LEVEL {level:?}: {e}")))
}

fn install_subscriber(filter: tracing_subscriber::EnvFilter, format: LogFormat) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Full => builder.try_init(),
    };
    installed.map_err(|e| Error::internal(format!("logging already initialized: {e}")))?;

    tracing::info!("Election engine v{} initialized", VERSION);
    Ok(())
}
