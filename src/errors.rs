//! Error handling for the election engine

use crate::engine::validation::Rejection;
use crate::types::Phase;
use chrono::NaiveDate;
use std::time::Duration;

/// Result type alias for the election engine
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of every error the engine can return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PreconditionFailed,
    InvalidState,
    InvalidInput,
    LimitExceeded,
    MutationLocked,
    WriteFailed,
    Conflict,
    Timeout,
    Config,
    Internal,
}

/// A lifecycle or reprint prerequisite that is not met
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Precondition {
    #[error("no delegates are registered")]
    NoDelegates,

    #[error("no districts are configured")]
    NoDistricts,

    #[error("no positions are configured")]
    NoPositions,

    #[error("no candidates are registered")]
    NoCandidates,

    #[error("the election is scheduled for {scheduled}, today is {today}")]
    NotElectionDay { scheduled: NaiveDate, today: NaiveDate },

    #[error("the election is already {0}")]
    NotScheduled(Phase),

    #[error("the election is archived")]
    ElectionArchived,

    #[error("the election is in progress")]
    ElectionStarted,

    #[error("delegate {control_number} has not voted yet")]
    DelegateHasNotVoted { control_number: String },
}

/// Main error type for the election engine
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A record the operation depends on does not exist
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Lifecycle prerequisites unmet
    #[error("Precondition failed: {0}")]
    PreconditionFailed(Precondition),

    /// The vote validation policy refused the cast
    #[error("{0}")]
    Rejected(#[from] Rejection),

    /// Transition not legal from the current phase
    #[error("Cannot {action} an election that is {phase}")]
    InvalidTransition { phase: Phase, action: &'static str },

    /// Configuration edit attempted outside `Scheduled`
    #[error("Election configuration is locked while the election is {phase}")]
    MutationLocked { phase: Phase },

    /// Malformed input data
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Storage-level failure during a transactional write
    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    /// Concurrent write detected at commit
    #[error("Concurrent write conflict: {message}")]
    Conflict { message: String },

    /// The operation did not commit before its deadline
    #[error("Operation timed out after {after:?}")]
    Timeout { after: Duration },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new not-found error
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Create a new invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a new write-failed error
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Create a new conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map this error onto the engine's error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Error::Rejected(rejection) => rejection.kind(),
            Error::InvalidTransition { .. } => ErrorKind::InvalidState,
            Error::MutationLocked { .. } => ErrorKind::MutationLocked,
            Error::InvalidInput { .. } => ErrorKind::InvalidInput,
            Error::WriteFailed { .. } => ErrorKind::WriteFailed,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Config { .. } => ErrorKind::Config,
            Error::Serialization(_) | Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// The validation rejection carried by this error, if any
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Error::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

impl From<Precondition> for Error {
    fn from(precondition: Precondition) -> Self {
        Error::PreconditionFailed(precondition)
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! invalid_input {
    ($msg:expr) => {
        $crate::Error::invalid_input($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::invalid_input(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::Error::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::internal(format!($fmt, $($arg)*))
    };
}
