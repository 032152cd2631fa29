//! Per-destination persistence driver.
//!
//! For every destination of a batch: derive identifiers, aggregate the
//! destination's events, create the target if the layout requires it, insert,
//! and mark the destination persisted. Destinations are processed one at a
//! time; the first failure aborts the rest of the batch.

use std::time::Instant;

use crate::aggregator::{Aggregator, AttrPersistence};
use crate::error::SinkError;
use crate::gateway::{InsertStyle, StorageGateway};
use crate::model::{Batch, BatchPair};
use crate::naming::DEFAULT_MAX_NAME_LEN;
use crate::observability::metrics;

/// Settings fixed for the lifetime of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    pub attr_persistence: AttrPersistence,
    pub insert_style: InsertStyle,
    pub max_name_len: usize,
    /// Persist the grouped batch instead of the default one.
    pub enable_grouping: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            attr_persistence: AttrPersistence::Row,
            insert_style: InsertStyle::Parameterized,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            enable_grouping: false,
        }
    }
}

/// Outcome of a successful persist call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Destinations marked persisted by this call.
    pub destinations: usize,
    /// Rows inserted.
    pub rows: usize,
}

/// Drives aggregation and storage for whole batches.
#[derive(Debug)]
pub struct BatchRouter {
    gateway: StorageGateway,
    config: RouterConfig,
}

impl BatchRouter {
    pub fn new(gateway: StorageGateway, config: RouterConfig) -> Self {
        tracing::info!(
            attr_persistence = %config.attr_persistence,
            insert_style = %config.insert_style,
            enable_grouping = config.enable_grouping,
            "Batch router created"
        );
        let gateway = gateway.with_insert_style(config.insert_style);
        Self { gateway, config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn gateway(&self) -> &StorageGateway {
        &self.gateway
    }

    /// Persist the grouped or the default batch, depending on configuration.
    pub fn persist_batches(&self, batches: &mut BatchPair) -> Result<PersistReport, SinkError> {
        let batch = if self.config.enable_grouping {
            batches.grouped.as_mut()
        } else {
            batches.default.as_mut()
        };
        self.persist(batch)
    }

    /// Persist every destination of `batch`.
    ///
    /// An absent batch is a no-op. On failure, destinations persisted before
    /// the failing one stay marked.
    pub fn persist(&self, batch: Option<&mut Batch>) -> Result<PersistReport, SinkError> {
        let Some(batch) = batch else {
            tracing::debug!("Null batch, nothing to do");
            return Ok(PersistReport::default());
        };

        let mut report = PersistReport::default();
        for destination in batch.destinations() {
            let span = tracing::debug_span!("destination", destination = %destination);
            let _enter = span.enter();
            tracing::debug!("Processing sub-batch");

            let started = Instant::now();
            let rows = match self.persist_destination(batch, &destination) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::error!(error = %e, kind = e.kind(), "Failed to persist destination");
                    metrics::record_persist_error(e.kind());
                    return Err(e);
                }
            };
            metrics::record_persisted(
                &self.config.attr_persistence.to_string(),
                rows,
                started.elapsed().as_secs_f64(),
            );

            batch.set_persisted(&destination);
            report.destinations += 1;
            report.rows += rows;
        }
        Ok(report)
    }

    fn persist_destination(&self, batch: &Batch, destination: &str) -> Result<usize, SinkError> {
        let events = batch.events(destination).unwrap_or_default();
        let Some(first) = events.first() else {
            return Ok(0);
        };

        let mut aggregator =
            Aggregator::initialize(self.config.attr_persistence, first, self.config.max_name_len)?;
        for event in events {
            aggregator.aggregate(event);
        }
        self.persist_aggregation(&aggregator)
    }

    fn persist_aggregation(&self, aggregator: &Aggregator) -> Result<usize, SinkError> {
        let aggregation = aggregator.aggregation();
        let ids = aggregation.identifiers();

        if aggregation.is_empty() {
            tracing::debug!(
                db_name = %ids.db_name,
                table_name = %ids.table_name,
                "No values aggregated, nothing to insert"
            );
            return Ok(0);
        }

        let span = tracing::info_span!(
            "persist",
            db_name = %ids.db_name,
            schema_name = %ids.schema_name,
            table_name = %ids.table_name,
        );
        let _enter = span.enter();
        tracing::info!(rows = aggregation.row_count(), "Persisting data");
        tracing::debug!(fields = %aggregation.field_names(), "Field list");

        // Column-mode tables are provisioned in advance.
        if aggregator.creates_tables() {
            self.gateway.create_database(&ids.db_name)?;
            self.gateway.create_schema(&ids.db_name, &ids.schema_name)?;
            self.gateway.create_table(
                &ids.db_name,
                &ids.schema_name,
                &ids.table_name,
                aggregation.typed_field_names(),
            )?;
        }

        match self.config.insert_style {
            InsertStyle::Literal => self.gateway.insert_context_data(
                &ids.db_name,
                &ids.schema_name,
                &ids.table_name,
                aggregation.field_names(),
                aggregation.field_values(),
            )?,
            InsertStyle::Parameterized => self.gateway.insert_rows(
                &ids.db_name,
                &ids.schema_name,
                &ids.table_name,
                aggregation.field_names(),
                aggregation.rows(),
            )?,
        };
        Ok(aggregation.row_count())
    }
}
