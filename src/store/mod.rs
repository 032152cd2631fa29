//! Store capability: open connections and execute statements.
//!
//! Provides:
//! - [`StoreConnector`] / [`StoreConnection`] traits the gateway talks to
//! - Structured error kinds, classified by each backend
//! - A PostgreSQL backend and an in-process backend

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::{PostgresConfig, PostgresConnector};

use std::fmt;
use thiserror::Error;

/// Broad class of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The database, schema or table being created already exists.
    AlreadyExists,
    /// The statement or connection attempt timed out.
    Timeout,
    /// The connection could not be opened or was lost.
    Connection,
    /// The store refused the statement.
    Rejected,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AlreadyExists => "already_exists",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Error returned by store backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::AlreadyExists, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Connection, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Rejected, message)
    }
}

/// A value bound to an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    BigInt(i64),
    Text(String),
}

impl SqlValue {
    /// Render as a single-quoted literal, verbatim.
    ///
    /// Quote characters inside the value are not escaped. This is the legacy
    /// text format; use parameters when values are untrusted.
    pub fn to_literal(&self) -> String {
        match self {
            Self::BigInt(n) => format!("'{n}'"),
            Self::Text(s) => format!("'{s}'"),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::BigInt(value)
    }
}

/// A live connection to one database.
pub trait StoreConnection: Send {
    /// Check that the connection is still usable.
    fn is_valid(&mut self) -> bool;

    /// Execute a statement, returning the number of affected rows.
    fn execute(&mut self, statement: &str) -> Result<u64, StoreError>;

    /// Execute a statement with `$n` placeholders bound to `params`.
    fn execute_with_params(
        &mut self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<u64, StoreError>;

    /// Close the connection. Further use fails with a connection error.
    fn close(&mut self) -> Result<(), StoreError>;
}

/// Opens connections to databases on one store.
pub trait StoreConnector: Send + Sync {
    /// Open a connection to `db_name`.
    ///
    /// An empty name targets the server's default database.
    fn connect(&self, db_name: &str) -> Result<Box<dyn StoreConnection>, StoreError>;
}
