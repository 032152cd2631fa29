//! DDL and DML issued against the store.
//!
//! Every statement is logged at debug level before execution. Creation
//! statements are idempotent: an "already exists" failure, as classified by
//! the store backend, counts as success.
//!
//! Two insert paths exist side by side:
//! - [`StorageGateway::insert_context_data`] sends the legacy SQL text, with
//!   values interpolated verbatim between single quotes
//! - [`StorageGateway::insert_rows`] binds values as parameters
//!
//! The gateway's [`InsertStyle`] also decides how DDL renders identifiers:
//! literal mode keeps the legacy `"<name>"` text, parameterized mode doubles
//! embedded quotes the way [`quote_identifier`] does for inserts.

use clap::ValueEnum;
use std::fmt;

use crate::cache::{lock_connection, ConnectionCache, ConnectionHandle};
use crate::error::SinkError;
use crate::store::{SqlValue, StoreError, StoreErrorKind};

/// Database used to issue `CREATE DATABASE` (the server default).
pub const DEFAULT_DATABASE: &str = "";

/// Upper bound on bind parameters in one statement (PostgreSQL wire limit).
pub const MAX_PARAMS_PER_STATEMENT: usize = 65_535;

/// How inserts reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum InsertStyle {
    /// Legacy SQL text with values inlined between single quotes.
    Literal,
    /// Values bound as statement parameters, sent in text format so the
    /// server converts them to each column's declared type.
    #[default]
    Parameterized,
}

impl fmt::Display for InsertStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal => f.write_str("literal"),
            Self::Parameterized => f.write_str("parameterized"),
        }
    }
}

/// Which kind of statement failed, for error mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementClass {
    Ddl,
    Insert,
}

/// Issues DDL/DML through cached connections.
#[derive(Debug)]
pub struct StorageGateway {
    cache: ConnectionCache,
    style: InsertStyle,
}

impl StorageGateway {
    pub fn new(cache: ConnectionCache) -> Self {
        Self {
            cache,
            style: InsertStyle::default(),
        }
    }

    /// Render DDL identifiers for `style`.
    pub fn with_insert_style(mut self, style: InsertStyle) -> Self {
        self.style = style;
        self
    }

    pub fn insert_style(&self) -> InsertStyle {
        self.style
    }

    /// The connection cache backing this gateway.
    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// `CREATE DATABASE "<db>"`, through the server's default database.
    pub fn create_database(&self, db_name: &str) -> Result<(), SinkError> {
        let sql = format!("CREATE DATABASE {}", self.identifier(db_name));
        self.run(DEFAULT_DATABASE, &sql, &[], StatementClass::Ddl)
            .map(drop)
    }

    /// `CREATE SCHEMA "<schema>"` inside `db_name`.
    pub fn create_schema(&self, db_name: &str, schema_name: &str) -> Result<(), SinkError> {
        let sql = format!("CREATE SCHEMA {}", self.identifier(schema_name));
        self.run(db_name, &sql, &[], StatementClass::Ddl).map(drop)
    }

    /// `CREATE TABLE "<schema>"."<table>" <typedFieldNames>` inside `db_name`.
    pub fn create_table(
        &self,
        db_name: &str,
        schema_name: &str,
        table_name: &str,
        typed_field_names: &str,
    ) -> Result<(), SinkError> {
        let sql = format!(
            "CREATE TABLE {}.{} {typed_field_names}",
            self.identifier(schema_name),
            self.identifier(table_name)
        );
        self.run(db_name, &sql, &[], StatementClass::Ddl).map(drop)
    }

    /// `INSERT INTO "<schema>"."<table>" <fieldNames> VALUES <fieldValues>`.
    ///
    /// `field_values` is sent as-is; nothing is escaped.
    pub fn insert_context_data(
        &self,
        db_name: &str,
        schema_name: &str,
        table_name: &str,
        field_names: &str,
        field_values: &str,
    ) -> Result<u64, SinkError> {
        let sql = format!(
            "INSERT INTO \"{schema_name}\".\"{table_name}\" {field_names} VALUES {field_values}"
        );
        self.run(db_name, &sql, &[], StatementClass::Insert)
    }

    /// Insert `rows` with every value bound as a parameter.
    ///
    /// Large inserts are split so no statement exceeds
    /// [`MAX_PARAMS_PER_STATEMENT`]; chunks are not applied atomically.
    pub fn insert_rows(
        &self,
        db_name: &str,
        schema_name: &str,
        table_name: &str,
        field_names: &str,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, SinkError> {
        let prefix = format!(
            "INSERT INTO {}.{} {field_names} VALUES ",
            quote_identifier(schema_name),
            quote_identifier(table_name)
        );

        let mut inserted = 0;
        for chunk in chunk_rows(rows, MAX_PARAMS_PER_STATEMENT) {
            let (sql, params) = parameterize(&prefix, chunk);
            inserted += self.run(db_name, &sql, &params, StatementClass::Insert)?;
        }
        Ok(inserted)
    }

    fn identifier(&self, name: &str) -> String {
        match self.style {
            InsertStyle::Literal => format!("\"{name}\""),
            InsertStyle::Parameterized => quote_identifier(name),
        }
    }

    fn connection(&self, db_name: &str) -> Result<ConnectionHandle, SinkError> {
        self.cache
            .get_connection(db_name)
            .map_err(|e| SinkError::Connection {
                db_name: db_name.to_string(),
                message: e.message,
            })
    }

    fn run(
        &self,
        db_name: &str,
        sql: &str,
        params: &[SqlValue],
        class: StatementClass,
    ) -> Result<u64, SinkError> {
        let handle = self.connection(db_name)?;

        tracing::debug!(db_name, statement = %sql, params = params.len(), "Executing statement");
        let result = if params.is_empty() {
            lock_connection(&handle).execute(sql)
        } else {
            lock_connection(&handle).execute_with_params(sql, params)
        };

        match result {
            Ok(rows) => Ok(rows),
            Err(e) => self.map_error(db_name, class, e),
        }
    }

    fn map_error(
        &self,
        db_name: &str,
        class: StatementClass,
        err: StoreError,
    ) -> Result<u64, SinkError> {
        match (err.kind, class) {
            (StoreErrorKind::AlreadyExists, StatementClass::Ddl) => {
                tracing::debug!(db_name, error = %err.message, "Object already exists");
                Ok(0)
            }
            (StoreErrorKind::Timeout, _) => Err(SinkError::TransientPersistence(err.message)),
            (StoreErrorKind::Connection, _) => {
                self.cache.invalidate(db_name);
                Err(SinkError::Connection {
                    db_name: db_name.to_string(),
                    message: err.message,
                })
            }
            (_, StatementClass::Ddl) => Err(SinkError::Runtime(err.message)),
            (_, StatementClass::Insert) => Err(SinkError::DataRejection(err.message)),
        }
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Split rows into runs whose total value count stays within `max_params`.
///
/// A single row wider than `max_params` still gets a chunk of its own.
fn chunk_rows(rows: &[Vec<SqlValue>], max_params: usize) -> Vec<&[Vec<SqlValue>]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut params = 0;

    for (i, row) in rows.iter().enumerate() {
        if i > start && params + row.len() > max_params {
            chunks.push(&rows[start..i]);
            start = i;
            params = 0;
        }
        params += row.len();
    }
    if start < rows.len() {
        chunks.push(&rows[start..]);
    }
    chunks
}

/// Build `($1,$2),($3,$4)` placeholders and the flattened parameter list.
fn parameterize(prefix: &str, rows: &[Vec<SqlValue>]) -> (String, Vec<SqlValue>) {
    let mut sql = String::from(prefix);
    let mut params = Vec::with_capacity(rows.iter().map(Vec::len).sum());

    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        sql.push('(');
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                sql.push(',');
            }
            params.push(value.clone());
            sql.push('$');
            sql.push_str(&params.len().to_string());
        }
        sql.push(')');
    }
    (sql, params)
}
