//! Identifier derivation for tenant namespaces.
//!
//! Identifiers map 1:1 from tenancy strings: service → database,
//! service-path → schema, destination → table. Nothing is normalized or
//! escaped here; quoting is left to the gateway.

use std::fmt;
use thiserror::Error;

use crate::model::Event;

/// Default maximum identifier length (PostgreSQL's NAMEDATALEN - 1).
pub const DEFAULT_MAX_NAME_LEN: usize = 63;

/// Which identifier is being derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierField {
    Database,
    Schema,
    Table,
}

impl fmt::Display for IdentifierField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Database => "dbName",
            Self::Schema => "schemaName",
            Self::Table => "tableName",
        };
        f.write_str(name)
    }
}

/// An identifier longer than the configured maximum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} ({value}) is {len} bytes long, longer than the maximum of {max_len}")]
pub struct NamingError {
    pub field: IdentifierField,
    pub value: String,
    pub len: usize,
    pub max_len: usize,
}

/// Return `raw` unchanged if it fits within `max_len` bytes.
pub fn derive_identifier(
    field: IdentifierField,
    raw: &str,
    max_len: usize,
) -> Result<String, NamingError> {
    if raw.len() > max_len {
        return Err(NamingError {
            field,
            value: raw.to_string(),
            len: raw.len(),
            max_len,
        });
    }
    Ok(raw.to_string())
}

/// Database, schema and table a destination is persisted into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifiers {
    pub db_name: String,
    pub schema_name: String,
    pub table_name: String,
}

impl Identifiers {
    /// Derive all three identifiers from an event's tenancy.
    pub fn derive(event: &Event, max_len: usize) -> Result<Self, NamingError> {
        Ok(Self {
            db_name: derive_identifier(IdentifierField::Database, &event.service, max_len)?,
            schema_name: derive_identifier(IdentifierField::Schema, &event.service_path, max_len)?,
            table_name: derive_identifier(IdentifierField::Table, &event.destination, max_len)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(service: &str, service_path: &str, destination: &str) -> Event {
        Event {
            recv_time_ts: 0,
            service: service.into(),
            service_path: service_path.into(),
            destination: destination.into(),
            entity_id: "car1".into(),
            entity_type: "car".into(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_identifier_within_limit_is_unchanged() {
        let longest = "x".repeat(60);
        for raw in ["", "vehicles", "/4wheels", "with \"quotes\"", longest.as_str()] {
            assert_eq!(
                derive_identifier(IdentifierField::Table, raw, 60).unwrap(),
                raw
            );
        }
    }

    #[test]
    fn test_identifier_over_limit_is_rejected() {
        let raw = "s".repeat(77);
        let err = derive_identifier(IdentifierField::Database, &raw, 60).unwrap_err();

        assert_eq!(err.field, IdentifierField::Database);
        assert_eq!(err.len, 77);
        assert_eq!(err.max_len, 60);
        assert!(err.to_string().starts_with("dbName ("));
    }

    #[test]
    fn test_limit_counts_bytes() {
        // Four two-byte characters.
        assert!(derive_identifier(IdentifierField::Schema, "éééé", 8).is_ok());
        assert!(derive_identifier(IdentifierField::Schema, "éééé", 7).is_err());
    }

    #[test]
    fn test_derive_reports_offending_field() {
        let ok = Identifiers::derive(&event("vehicles", "4wheels", "car1_car"), 60).unwrap();
        assert_eq!(ok.db_name, "vehicles");
        assert_eq!(ok.schema_name, "4wheels");
        assert_eq!(ok.table_name, "car1_car");

        let long = "x".repeat(61);
        let cases = [
            (event(&long, "p", "d"), IdentifierField::Database),
            (event("s", &long, "d"), IdentifierField::Schema),
            (event("s", "p", &long), IdentifierField::Table),
        ];
        for (event, field) in cases {
            assert_eq!(Identifiers::derive(&event, 60).unwrap_err().field, field);
        }
    }
}
