//! Crate-wide error types.

use std::fmt;

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Step of a single cache-to-durable transfer that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    /// Loading the cache row.
    Read,
    /// Copying the row into the durable table.
    Copy,
    /// Looking up the durable identifier by natural key.
    Resolve,
    /// Deleting the cache row after the copy.
    Delete,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Copy => "copy",
            Self::Resolve => "resolve",
            Self::Delete => "delete",
        })
    }
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A connection or transaction could not be opened.
    #[error("Database backend unavailable: {0}")]
    BackendUnavailable(#[source] sqlx::Error),

    #[error("Transaction is not open")]
    TransactionClosed,

    #[error("Transaction already committed or rolled back")]
    AlreadyCompleted,

    #[error("Transfer of cache row {cache_id} failed during {stage}: {source}")]
    TransferFailed {
        cache_id: i64,
        stage: TransferStage,
        #[source]
        source: Box<Error>,
    },

    #[error("Persisting {context} failed: {source}")]
    PersistenceFailed {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transfer(cache_id: i64, stage: TransferStage, source: Error) -> Self {
        Self::TransferFailed {
            cache_id,
            stage,
            source: Box::new(source),
        }
    }

    pub fn persistence(context: impl Into<String>, source: Error) -> Self {
        Self::PersistenceFailed {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Stage of a failed transfer, if this is one.
    pub fn transfer_stage(&self) -> Option<TransferStage> {
        match self {
            Self::TransferFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether the error carries a SQLite constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::DatabaseSqlx(sqlx::Error::Database(db)) => {
                db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation()
            }
            Self::PersistenceFailed { source, .. } | Self::TransferFailed { source, .. } => {
                source.is_constraint_violation()
            }
            _ => false,
        }
    }
}
