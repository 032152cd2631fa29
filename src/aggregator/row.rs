use crate::model::Event;
use crate::naming::{Identifiers, NamingError};
use crate::store::SqlValue;

use super::{
    human_readable, Aggregation, ATTR_MD, ATTR_NAME, ATTR_TYPE, ATTR_VALUE, ENTITY_ID,
    ENTITY_TYPE, RECV_TIME, RECV_TIME_TS, SERVICE_PATH,
};

/// Width of every row-mode tuple.
pub const ROW_WIDTH: usize = 9;

/// One row per attribute, fixed nine-column schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowAggregator {
    aggregation: Aggregation,
}

impl RowAggregator {
    /// Fix identifiers from `first`; the schema does not depend on it.
    pub fn initialize(first: &Event, max_name_len: usize) -> Result<Self, NamingError> {
        let identifiers = Identifiers::derive(first, max_name_len)?;
        let typed_field_names = format!(
            "({RECV_TIME_TS} bigint,{RECV_TIME} text,{SERVICE_PATH} text,{ENTITY_ID} text,\
             {ENTITY_TYPE} text,{ATTR_NAME} text,{ATTR_TYPE} text,{ATTR_VALUE} text,{ATTR_MD} text)"
        );
        let field_names = format!(
            "({RECV_TIME_TS},{RECV_TIME},{SERVICE_PATH},{ENTITY_ID},{ENTITY_TYPE},\
             {ATTR_NAME},{ATTR_TYPE},{ATTR_VALUE},{ATTR_MD})"
        );

        Ok(Self {
            aggregation: Aggregation::new(identifiers, typed_field_names, field_names),
        })
    }

    /// Append one tuple per attribute of `event`.
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

        let recv_time = human_readable(event.recv_time_ts);
        for attribute in &event.attributes {
            tracing::debug!(
                name = %attribute.name,
                attr_type = %attribute.attr_type,
                "Processing context attribute"
            );
            self.aggregation.push_row(vec![
                SqlValue::BigInt(event.recv_time_ts),
                SqlValue::from(recv_time.as_str()),
                SqlValue::from(event.service_path.as_str()),
                SqlValue::from(event.entity_id.as_str()),
                SqlValue::from(event.entity_type.as_str()),
                SqlValue::from(attribute.name.as_str()),
                SqlValue::from(attribute.attr_type.as_str()),
                SqlValue::from(attribute.value.as_str()),
                SqlValue::from(attribute.metadata.as_str()),
            ]);
        }
    }

    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }
}
