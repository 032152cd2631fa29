//! In-process store backend.
//!
//! Keeps track of created databases, schemas and tables, records every
//! statement it is asked to run, and can be told to fail. Backs `--dry-run`
//! and the test suites.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{SqlValue, StoreConnection, StoreConnector, StoreError};

/// A statement as received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub db_name: String,
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Debug, Default)]
struct MemoryState {
    strict: bool,
    databases: HashSet<String>,
    schemas: HashSet<(String, String)>,
    tables: HashSet<(String, String, String)>,
    statements: Vec<ExecutedStatement>,
    inserted_rows: u64,
    connections_opened: usize,
    connections_closed: usize,
    generation: u64,
    refuse_connections: bool,
    failures: VecDeque<StoreError>,
}

/// Shared handle to an in-process store.
///
/// Clones observe the same state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that behaves like a real server: unknown databases refuse
    /// connections and inserts into unknown tables are rejected.
    pub fn new() -> Self {
        Self::with_strictness(true)
    }

    /// A store that accepts connections and inserts for any target.
    pub fn permissive() -> Self {
        Self::with_strictness(false)
    }

    fn with_strictness(strict: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                strict,
                ..MemoryState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pre-provision a table, with its schema and database.
    pub fn provision_table(&self, db_name: &str, schema_name: &str, table_name: &str) {
        let mut state = self.lock();
        state.databases.insert(db_name.to_string());
        state
            .schemas
            .insert((db_name.to_string(), schema_name.to_string()));
        state.tables.insert((
            db_name.to_string(),
            schema_name.to_string(),
            table_name.to_string(),
        ));
    }

    /// Make subsequent connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Fail the next executed statement with `err`.
    ///
    /// Calls queue up; each statement consumes one failure.
    pub fn fail_next(&self, err: StoreError) {
        self.lock().failures.push_back(err);
    }

    /// Invalidate every connection opened so far.
    pub fn expire_connections(&self) {
        self.lock().generation += 1;
    }

    pub fn has_database(&self, db_name: &str) -> bool {
        self.lock().databases.contains(db_name)
    }

    pub fn has_schema(&self, db_name: &str, schema_name: &str) -> bool {
        self.lock()
            .schemas
            .contains(&(db_name.to_string(), schema_name.to_string()))
    }

    pub fn has_table(&self, db_name: &str, schema_name: &str, table_name: &str) -> bool {
        self.lock().tables.contains(&(
            db_name.to_string(),
            schema_name.to_string(),
            table_name.to_string(),
        ))
    }

    /// Every statement received, in order, including failed ones.
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.lock().statements.clone()
    }

    /// SQL text of every statement received, in order.
    pub fn sql(&self) -> Vec<String> {
        self.lock()
            .statements
            .iter()
            .map(|statement| statement.sql.clone())
            .collect()
    }

    /// Rows accepted by successful inserts.
    pub fn inserted_rows(&self) -> u64 {
        self.lock().inserted_rows
    }

    pub fn connections_opened(&self) -> usize {
        self.lock().connections_opened
    }

    pub fn connections_closed(&self) -> usize {
        self.lock().connections_closed
    }
}

impl StoreConnector for MemoryStore {
    fn connect(&self, db_name: &str) -> Result<Box<dyn StoreConnection>, StoreError> {
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(StoreError::connection("connection refused"));
        }
        if state.strict && !db_name.is_empty() && !state.databases.contains(db_name) {
            return Err(StoreError::connection(format!(
                "database \"{db_name}\" does not exist"
            )));
        }
        state.connections_opened += 1;

        Ok(Box::new(MemoryConnection {
            store: self.clone(),
            db_name: db_name.to_string(),
            generation: state.generation,
            closed: false,
        }))
    }
}

struct MemoryConnection {
    store: MemoryStore,
    db_name: String,
    generation: u64,
    closed: bool,
}

impl MemoryConnection {
    fn run(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StoreError> {
        let mut state = self.store.lock();
        state.statements.push(ExecutedStatement {
            db_name: self.db_name.clone(),
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        if self.closed || self.generation != state.generation {
            return Err(StoreError::connection("connection is closed"));
        }
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        apply(&mut state, &self.db_name, sql)
    }
}

impl StoreConnection for MemoryConnection {
    fn is_valid(&mut self) -> bool {
        !self.closed && self.generation == self.store.lock().generation
    }

    fn execute(&mut self, statement: &str) -> Result<u64, StoreError> {
        self.run(statement, &[])
    }

    fn execute_with_params(
        &mut self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<u64, StoreError> {
        self.run(statement, params)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if !self.closed {
            self.closed = true;
            self.store.lock().connections_closed += 1;
        }
        Ok(())
    }
}

/// Interpret a statement against the catalog.
fn apply(state: &mut MemoryState, db_name: &str, sql: &str) -> Result<u64, StoreError> {
    if let Some(rest) = sql.strip_prefix("CREATE DATABASE ") {
        let name = quoted_names(rest).into_iter().next().unwrap_or_default();
        if !state.databases.insert(name.clone()) {
            return Err(StoreError::already_exists(format!(
                "database \"{name}\" already exists"
            )));
        }
        return Ok(0);
    }

    if let Some(rest) = sql.strip_prefix("CREATE SCHEMA ") {
        let name = quoted_names(rest).into_iter().next().unwrap_or_default();
        if !state.schemas.insert((db_name.to_string(), name.clone())) {
            return Err(StoreError::already_exists(format!(
                "schema \"{name}\" already exists"
            )));
        }
        return Ok(0);
    }

    if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
        let names = quoted_names(rest);
        let (schema, table) = (names[0].clone(), names[1].clone());
        if state.strict && !state.schemas.contains(&(db_name.to_string(), schema.clone())) {
            return Err(StoreError::rejected(format!(
                "schema \"{schema}\" does not exist"
            )));
        }
        if !state
            .tables
            .insert((db_name.to_string(), schema, table.clone()))
        {
            return Err(StoreError::already_exists(format!(
                "relation \"{table}\" already exists"
            )));
        }
        return Ok(0);
    }

    if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
        let names = quoted_names(rest);
        let key = (db_name.to_string(), names[0].clone(), names[1].clone());
        if state.strict && !state.tables.contains(&key) {
            return Err(StoreError::rejected(format!(
                "relation \"{}\".\"{}\" does not exist",
                key.1, key.2
            )));
        }
        let rows = count_tuples(rest);
        state.inserted_rows += rows;
        return Ok(rows);
    }

    Err(StoreError::rejected(format!(
        "unsupported statement: {sql}"
    )))
}

/// Leading double-quoted identifiers, with `""` unescaped. Always yields two
/// entries so callers can index schema and table.
fn quoted_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = text.chars().peekable();

    while chars.peek() == Some(&'"') {
        chars.next();
        let mut name = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    name.push('"');
                } else {
                    break;
                }
            } else {
                name.push(c);
            }
        }
        names.push(name);
        if chars.peek() == Some(&'.') {
            chars.next();
        } else {
            break;
        }
    }

    names.resize(names.len().max(2), String::new());
    names
}

/// Count top-level value tuples after the `VALUES` keyword.
fn count_tuples(text: &str) -> u64 {
    let Some(start) = text.find(" VALUES ") else {
        return 0;
    };

    let mut tuples = 0;
    let mut depth = 0usize;
    let mut in_literal = false;
    for c in text[start..].chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => {
                if depth == 0 {
                    tuples += 1;
                }
                depth += 1;
            }
            ')' if !in_literal => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    tuples
}
