//! PostgreSQL backend using the blocking `postgres` client.
//!
//! Errors are classified by SQLSTATE, never by message text.

use bytes::BytesMut;
use postgres::error::SqlState;
use postgres::types::{to_sql_checked, Format, IsNull, ToSql, Type};
use postgres::{Client, NoTls, SimpleQueryMessage};
use std::fmt;
use std::time::Duration;

use super::{SqlValue, StoreConnection, StoreConnector, StoreError, StoreErrorKind};

/// Placeholder rendered instead of the password.
const MASKED_PASSWORD: &str = "XXXXXXXXXX";

/// Time allowed for the validity probe before a cached connection is reused.
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Server address and credentials.
#[derive(Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub connect_timeout: Option<Duration>,
}

impl PostgresConfig {
    /// Connection target for `db_name`, with the password masked.
    ///
    /// Safe to log.
    pub fn target(&self, db_name: &str) -> String {
        format!(
            "{}:{}/{}?user={}&password={}",
            self.host, self.port, db_name, self.username, MASKED_PASSWORD
        )
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            username: "opendata".into(),
            password: String::new(),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &MASKED_PASSWORD)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Opens one `postgres::Client` per requested database.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    config: PostgresConfig,
}

impl PostgresConnector {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }
}

impl StoreConnector for PostgresConnector {
    fn connect(&self, db_name: &str) -> Result<Box<dyn StoreConnection>, StoreError> {
        let target = self.config.target(db_name);
        tracing::debug!(target = %target, "Connecting to PostgreSQL");

        let mut pg = postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .user(&self.config.username)
            .password(&self.config.password)
            .application_name("cistern");
        if !db_name.is_empty() {
            pg.dbname(db_name);
        }
        if let Some(timeout) = self.config.connect_timeout {
            pg.connect_timeout(timeout);
        }

        let client = pg.connect(NoTls).map_err(|e| {
            // Any failure to open is a connection failure, whatever its cause.
            StoreError::connection(format!("{target}: {e}"))
        })?;

        Ok(Box::new(PostgresConnection {
            client: Some(client),
        }))
    }
}

/// A single PostgreSQL session.
pub struct PostgresConnection {
    client: Option<Client>,
}

impl PostgresConnection {
    fn client(&mut self) -> Result<&mut Client, StoreError> {
        self.client
            .as_mut()
            .ok_or_else(|| StoreError::connection("connection already closed"))
    }
}

impl StoreConnection for PostgresConnection {
    fn is_valid(&mut self) -> bool {
        match self.client.as_mut() {
            Some(client) => client.is_valid(VALIDATION_TIMEOUT).is_ok(),
            None => false,
        }
    }

    fn execute(&mut self, statement: &str) -> Result<u64, StoreError> {
        let messages = self.client()?.simple_query(statement).map_err(classify)?;
        Ok(messages
            .iter()
            .map(|message| match message {
                SimpleQueryMessage::CommandComplete(rows) => *rows,
                _ => 0,
            })
            .sum())
    }

    fn execute_with_params(
        &mut self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<u64, StoreError> {
        let params: Vec<TextParam<'_>> = params.iter().map(TextParam).collect();
        let bound: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|param| param as &(dyn ToSql + Sync))
            .collect();
        self.client()?.execute(statement, &bound).map_err(classify)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        match self.client.take() {
            Some(client) => client.close().map_err(classify),
            None => Ok(()),
        }
    }
}

/// A bound value sent in the text wire format.
///
/// The server parses it with the target column's input function, as it would
/// a quoted literal, so typed columns (`float`, `boolean`, ...) accept it.
#[derive(Debug)]
struct TextParam<'a>(&'a SqlValue);

impl ToSql for TextParam<'_> {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            SqlValue::BigInt(n) => out.extend_from_slice(n.to_string().as_bytes()),
            SqlValue::Text(s) => out.extend_from_slice(s.as_bytes()),
        }
        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// Map a driver error onto a store error kind.
///
/// Errors without a SQLSTATE are transport failures, unless they come from
/// binding a value of the wrong type.
fn classify(err: postgres::Error) -> StoreError {
    let kind = if let Some(code) = err.code() {
        error_kind_for(code)
    } else if err.is_closed() {
        StoreErrorKind::Connection
    } else {
        match io_error_kind(&err) {
            Some(std::io::ErrorKind::TimedOut) => StoreErrorKind::Timeout,
            Some(_) => StoreErrorKind::Connection,
            None => StoreErrorKind::Rejected,
        }
    };
    StoreError::new(kind, err.to_string())
}

fn error_kind_for(code: &SqlState) -> StoreErrorKind {
    if *code == SqlState::DUPLICATE_DATABASE
        || *code == SqlState::DUPLICATE_SCHEMA
        || *code == SqlState::DUPLICATE_TABLE
    {
        StoreErrorKind::AlreadyExists
    } else if *code == SqlState::QUERY_CANCELED {
        StoreErrorKind::Timeout
    } else if *code == SqlState::ADMIN_SHUTDOWN
        || *code == SqlState::CRASH_SHUTDOWN
        || *code == SqlState::CANNOT_CONNECT_NOW
        || code.code().starts_with("08")
    {
        StoreErrorKind::Connection
    } else {
        StoreErrorKind::Rejected
    }
}

fn io_error_kind(err: &postgres::Error) -> Option<std::io::ErrorKind> {
    std::error::Error::source(err)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .map(std::io::Error::kind)
}
