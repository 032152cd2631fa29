//! Errors surfaced by the persistence engine.
//!
//! Nothing below the router catches or downgrades these; callers decide
//! whether to retry, drop or escalate using [`SinkError::is_retriable`].

use thiserror::Error;

use crate::naming::NamingError;

/// Failure persisting a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// An identifier violates the naming rules. Raised before any network
    /// access; retrying with the same input cannot succeed.
    #[error("bad configuration: {0}")]
    Configuration(#[from] NamingError),

    /// A connection could not be opened, validated or kept.
    #[error("connection to database '{db_name}' failed: {message}")]
    Connection { db_name: String, message: String },

    /// A statement timed out. Safe to retry.
    #[error("transient persistence error: {0}")]
    TransientPersistence(String),

    /// The store rejected the data (type mismatch, constraint violation...).
    #[error("bad context data: {0}")]
    DataRejection(String),

    /// A DDL statement failed for a reason other than the object existing.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl SinkError {
    /// Whether resubmitting the same batch later may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::TransientPersistence(_)
        )
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Connection { .. } => "connection",
            Self::TransientPersistence(_) => "transient",
            Self::DataRejection(_) => "data_rejection",
            Self::Runtime(_) => "runtime",
        }
    }
}
