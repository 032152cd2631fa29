use crate::model::Event;
use crate::naming::{Identifiers, NamingError};
use crate::store::SqlValue;

use super::{
    human_readable, Aggregation, ENTITY_ID, ENTITY_TYPE, METADATA_SUFFIX, RECV_TIME, SERVICE_PATH,
};

/// Columns present regardless of attributes.
pub const FIXED_COLUMNS: usize = 4;

/// One row per event, two columns per attribute of the first event.
///
/// Later events are serialized positionally. If their attribute set differs
/// from the first event's, the tuple no longer lines up with the column list;
/// this is logged, not reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnAggregator {
    aggregation: Aggregation,
    width: usize,
}

impl ColumnAggregator {
    /// Fix identifiers and the column list from `first`.
    pub fn initialize(first: &Event, max_name_len: usize) -> Result<Self, NamingError> {
        let identifiers = Identifiers::derive(first, max_name_len)?;

        let mut typed_field_names = format!(
            "({RECV_TIME} text,{SERVICE_PATH} text,{ENTITY_ID} text,{ENTITY_TYPE} text"
        );
        let mut field_names = format!("({RECV_TIME},{SERVICE_PATH},{ENTITY_ID},{ENTITY_TYPE}");
        for attribute in &first.attributes {
            let name = &attribute.name;
            typed_field_names.push_str(&format!(",{name} text,{name}{METADATA_SUFFIX} text"));
            field_names.push_str(&format!(",{name},{name}{METADATA_SUFFIX}"));
        }
        typed_field_names.push(')');
        field_names.push(')');

        Ok(Self {
            aggregation: Aggregation::new(identifiers, typed_field_names, field_names),
            width: FIXED_COLUMNS + 2 * first.attributes.len(),
        })
    }

    /// Append one tuple for `event`.
    pub fn aggregate(&mut self, event: &Event) {
        tracing::debug!(
            entity_id = %event.entity_id,
            entity_type = %event.entity_type,
            "Processing context element"
        );

        if event.attributes.is_empty() {
            tracing::warn!(
                entity_id = %event.entity_id,
                entity_type = %event.entity_type,
                "No attributes within the notified entity, nothing is done"
            );
            return;
        }

        let mut row = Vec::with_capacity(FIXED_COLUMNS + 2 * event.attributes.len());
        row.push(SqlValue::from(human_readable(event.recv_time_ts)));
        row.push(SqlValue::from(event.service_path.as_str()));
        row.push(SqlValue::from(event.entity_id.as_str()));
        row.push(SqlValue::from(event.entity_type.as_str()));
        for attribute in &event.attributes {
            tracing::debug!(
                name = %attribute.name,
                attr_type = %attribute.attr_type,
                "Processing context attribute"
            );
            row.push(SqlValue::from(attribute.value.as_str()));
            row.push(SqlValue::from(attribute.metadata.as_str()));
        }

        if row.len() != self.width {
            tracing::warn!(
                entity_id = %event.entity_id,
                expected = self.width,
                actual = row.len(),
                "Attribute set differs from the first event of the batch; values will not line up with columns"
            );
        }
        self.aggregation.push_row(row);
    }

    /// Number of columns declared by the schema.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }
}
