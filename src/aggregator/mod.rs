//! Aggregation of one destination's events into an insert payload.
//!
//! An aggregator is created from the first event of a sub-batch (which fixes
//! the target identifiers and the column list) and then fed every event of
//! the sub-batch, the first included. Two layouts exist:
//!
//! - [`RowAggregator`]: one row per attribute, fixed nine-column schema
//! - [`ColumnAggregator`]: one row per event, two columns per attribute
//!
//! The payload is kept twice: as the legacy SQL literal text and as typed
//! rows for the parameterized insert path.

mod column;
mod row;

pub use column::{ColumnAggregator, FIXED_COLUMNS};
pub use row::{RowAggregator, ROW_WIDTH};

use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use std::fmt;

use crate::model::Event;
use crate::naming::{Identifiers, NamingError};
use crate::store::SqlValue;

/// Receipt time as Unix milliseconds.
pub const RECV_TIME_TS: &str = "recvTimeTs";
/// Receipt time, human readable (UTC).
pub const RECV_TIME: &str = "recvTime";
/// Service-path the event was notified under.
pub const SERVICE_PATH: &str = "fiwareservicepath";
pub const ENTITY_ID: &str = "entityId";
pub const ENTITY_TYPE: &str = "entityType";
pub const ATTR_NAME: &str = "attrName";
pub const ATTR_TYPE: &str = "attrType";
pub const ATTR_VALUE: &str = "attrValue";
pub const ATTR_MD: &str = "attrMd";
/// Suffix of the metadata column paired with each attribute in column mode.
pub const METADATA_SUFFIX: &str = "_md";

/// How attributes are laid out in tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AttrPersistence {
    /// One row per (event, attribute).
    #[default]
    Row,
    /// One row per event, one column pair per attribute.
    Column,
}

impl fmt::Display for AttrPersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Row => f.write_str("row"),
            Self::Column => f.write_str("column"),
        }
    }
}

/// Render a receipt timestamp as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn human_readable(recv_time_ts: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(recv_time_ts)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| recv_time_ts.to_string())
}

/// Target, schema and accumulated values of one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    identifiers: Identifiers,
    typed_field_names: String,
    field_names: String,
    field_values: String,
    rows: Vec<Vec<SqlValue>>,
}

impl Aggregation {
    fn new(identifiers: Identifiers, typed_field_names: String, field_names: String) -> Self {
        Self {
            identifiers,
            typed_field_names,
            field_names,
            field_values: String::new(),
            rows: Vec::new(),
        }
    }

    /// Append one value tuple, comma-separated from the previous ones.
    fn push_row(&mut self, row: Vec<SqlValue>) {
        if !self.field_values.is_empty() {
            self.field_values.push(',');
        }
        self.field_values.push('(');
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                self.field_values.push(',');
            }
            self.field_values.push_str(&value.to_literal());
        }
        self.field_values.push(')');
        self.rows.push(row);
    }

    pub fn identifiers(&self) -> &Identifiers {
        &self.identifiers
    }

    /// Column list with types, e.g. `(recvTime text,...)`.
    pub fn typed_field_names(&self) -> &str {
        &self.typed_field_names
    }

    /// Column list, e.g. `(recvTime,...)`.
    pub fn field_names(&self) -> &str {
        &self.field_names
    }

    /// Legacy literal payload, e.g. `('a','b'),('c','d')`.
    pub fn field_values(&self) -> &str {
        &self.field_values
    }

    /// Typed rows for parameterized inserts.
    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Row or column aggregation, fixed by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregator {
    Row(RowAggregator),
    Column(ColumnAggregator),
}

impl Aggregator {
    /// Start aggregating a sub-batch whose first event is `first`.
    pub fn initialize(
        mode: AttrPersistence,
        first: &Event,
        max_name_len: usize,
    ) -> Result<Self, NamingError> {
        Ok(match mode {
            AttrPersistence::Row => Self::Row(RowAggregator::initialize(first, max_name_len)?),
            AttrPersistence::Column => {
                Self::Column(ColumnAggregator::initialize(first, max_name_len)?)
            }
        })
    }

    /// Append an event's values.
    pub fn aggregate(&mut self, event: &Event) {
        match self {
            Self::Row(aggregator) => aggregator.aggregate(event),
            Self::Column(aggregator) => aggregator.aggregate(event),
        }
    }

    pub fn mode(&self) -> AttrPersistence {
        match self {
            Self::Row(_) => AttrPersistence::Row,
            Self::Column(_) => AttrPersistence::Column,
        }
    }

    /// Row-mode tables are created on demand; column-mode tables must be
    /// provisioned in advance.
    pub fn creates_tables(&self) -> bool {
        matches!(self, Self::Row(_))
    }

    pub fn aggregation(&self) -> &Aggregation {
        match self {
            Self::Row(aggregator) => aggregator.aggregation(),
            Self::Column(aggregator) => aggregator.aggregation(),
        }
    }
}
