//! Event and batch data model.
//!
//! Events are produced upstream and never mutated here. A [`Batch`] groups
//! them by destination and tracks which destinations have been persisted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata rendered for attributes that carry none.
pub const EMPTY_METADATA: &str = "[]";

fn empty_metadata() -> String {
    EMPTY_METADATA.to_string()
}

/// A single notified attribute.
///
/// `value` and `metadata` are already rendered to text by the producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    pub value: String,
    #[serde(default = "empty_metadata")]
    pub metadata: String,
}

impl Attribute {
    /// Create an attribute without metadata.
    pub fn new(
        name: impl Into<String>,
        attr_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            attr_type: attr_type.into(),
            value: value.into(),
            metadata: empty_metadata(),
        }
    }

    /// Replace the rendered metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }
}

/// A change notification for one entity, with its tenancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Receipt time in Unix milliseconds.
    #[serde(default = "crate::now_millis")]
    pub recv_time_ts: i64,
    pub service: String,
    pub service_path: String,
    pub destination: String,
    pub entity_id: String,
    pub entity_type: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Event {
    /// Copy of this event moved to another service-path and destination.
    ///
    /// Used to build the grouped batch from the same notification.
    #[must_use]
    pub fn regrouped(&self, service_path: &str, destination: &str) -> Self {
        Self {
            service_path: service_path.to_string(),
            destination: destination.to_string(),
            ..self.clone()
        }
    }
}

/// Events of one destination plus its persisted flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SubBatch {
    events: Vec<Event>,
    persisted: bool,
}

/// Events grouped by destination.
///
/// Destinations enumerate in lexicographic order, so processing order is
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    sub_batches: BTreeMap<String, SubBatch>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event under its own destination.
    pub fn add(&mut self, event: Event) {
        self.sub_batches
            .entry(event.destination.clone())
            .or_default()
            .events
            .push(event);
    }

    /// Destinations in processing order.
    pub fn destinations(&self) -> Vec<String> {
        self.sub_batches.keys().cloned().collect()
    }

    /// Events of a destination, in arrival order.
    pub fn events(&self, destination: &str) -> Option<&[Event]> {
        self.sub_batches
            .get(destination)
            .map(|sub| sub.events.as_slice())
    }

    pub fn set_persisted(&mut self, destination: &str) {
        if let Some(sub) = self.sub_batches.get_mut(destination) {
            sub.persisted = true;
        }
    }

    pub fn is_persisted(&self, destination: &str) -> bool {
        self.sub_batches
            .get(destination)
            .is_some_and(|sub| sub.persisted)
    }

    /// Number of destinations already persisted.
    pub fn persisted_count(&self) -> usize {
        self.sub_batches.values().filter(|sub| sub.persisted).count()
    }

    /// Drop destinations already persisted, keeping the rest for a retry.
    pub fn retain_unpersisted(&mut self) {
        self.sub_batches.retain(|_, sub| !sub.persisted);
    }

    /// Check if the batch holds no events.
    pub fn is_empty(&self) -> bool {
        self.sub_batches.is_empty()
    }

    /// Number of destinations.
    pub fn len(&self) -> usize {
        self.sub_batches.len()
    }

    /// Total number of events across destinations.
    pub fn event_count(&self) -> usize {
        self.sub_batches.values().map(|sub| sub.events.len()).sum()
    }
}

impl FromIterator<Event> for Batch {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let mut batch = Self::new();
        for event in iter {
            batch.add(event);
        }
        batch
    }
}

/// The default and grouped renditions of the same events.
///
/// The router persists exactly one of them, chosen by the grouping flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPair {
    pub default: Option<Batch>,
    pub grouped: Option<Batch>,
}

impl BatchPair {
    pub fn new(default: Option<Batch>, grouped: Option<Batch>) -> Self {
        Self { default, grouped }
    }

    /// Drop persisted destinations from both renditions.
    pub fn retain_unpersisted(&mut self) {
        for batch in [&mut self.default, &mut self.grouped].into_iter().flatten() {
            batch.retain_unpersisted();
        }
    }
}
