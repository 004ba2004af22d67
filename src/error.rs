// ⚠️ Error taxonomy
// Store failures are infrastructure, everything else is a request outcome.

use thiserror::Error;

// ============================================================================
// STORE ERROR (infrastructure failure)
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored timestamp could not be decoded
    #[error("invalid timestamp '{value}' in column {column}")]
    Timestamp { column: &'static str, value: String },

    /// A previous writer panicked while holding the connection
    #[error("database connection lock poisoned")]
    LockPoisoned,

    #[error("blocking store task failed: {0}")]
    Task(String),
}

// ============================================================================
// CAR ERROR (request-scoped outcome)
// ============================================================================

#[derive(Debug, Error)]
pub enum CarError {
    #[error("Car was not found: {0}")]
    NotFound(String),

    #[error("Car already exists: {0}")]
    Conflict(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    BadRequest(String),

    /// Propagated as-is so callers can tell it apart from the domain outcomes
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CarError {
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, CarError::Store(_))
    }
}

// ============================================================================
// SCHEDULER ERROR (lifecycle misuse)
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("discount scheduler already started")]
    AlreadyStarted,

    #[error("tick interval must be greater than zero")]
    ZeroInterval,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type CarResult<T> = std::result::Result<T, CarError>;
