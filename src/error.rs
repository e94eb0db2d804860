use thiserror::Error;
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    InvalidAmount(String),
    #[error("{0}")]
    InvalidDate(String),
    #[error("{0}")]
    InvalidStatus(String),
    #[error("{0}")]
    InvalidStay(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("Property {property_id} has no assigned manager.")]
    UnassignedProperty { property_id: Uuid },
    #[error("{0}")]
    TransientStore(String),
    #[error("{0}")]
    Dependency(String),
}

impl EngineError {
    /// Malformed input, rejected before any KPI mutation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::InvalidDate(_)
                | Self::InvalidStatus(_)
                | Self::InvalidStay(_)
                | Self::InvalidInput(_)
        )
    }

    /// The caller may retry the whole operation; nothing was written.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}

const TRANSIENT_SQLSTATES: &[&str] = &[
    "55P03", // lock_not_available
    "57014", // query_canceled (statement_timeout)
    "40001", // serialization_failure
    "40P01", // deadlock_detected
];

const RETRYABLE_SQLSTATES: &[&str] = &["40001", "40P01"];

pub(crate) fn sqlstate(error: &sqlx::Error) -> Option<String> {
    error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .map(|code| code.into_owned())
}

/// Serialization failures and deadlocks are worth another attempt inside the
/// store; lock timeouts are surfaced to the caller instead.
pub(crate) fn is_retryable(error: &sqlx::Error) -> bool {
    sqlstate(error).is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code.as_str()))
}

pub(crate) fn map_db_error(error: sqlx::Error) -> EngineError {
    let message = error.to_string();
    let code = sqlstate(&error);
    tracing::error!(db_error = %message, sqlstate = ?code, "KPI database query failed");

    if matches!(error, sqlx::Error::PoolTimedOut) {
        return EngineError::TransientStore("Timed out acquiring a database connection.".to_string());
    }
    if code
        .as_deref()
        .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code))
    {
        return EngineError::TransientStore(
            "KPI row is busy; retry the operation.".to_string(),
        );
    }
    EngineError::Dependency("Database operation failed.".to_string())
}
