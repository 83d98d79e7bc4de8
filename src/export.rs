//! Exporter-facing view of a checkpoint set
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeMap;

use crate::aggregator::Aggregator;
use crate::descriptor::Descriptor;
use crate::error::{MetricsError, Result};
use crate::labels::LabelSet;
use crate::temporality::Temporality;

/// One exportable series, borrowed from the checkpoint set for the duration
/// of a visit
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    descriptor: &'a Descriptor,
    labels: &'a LabelSet,
    aggregator: &'a Aggregator,
    temporality: Temporality,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl<'a> Record<'a> {
    pub(crate) fn new(
        descriptor: &'a Descriptor,
        labels: &'a LabelSet,
        aggregator: &'a Aggregator,
        temporality: Temporality,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            descriptor,
            labels,
            aggregator,
            temporality,
            start,
            end,
        }
    }

    /// Descriptor as exported, after any view renaming
    pub fn descriptor(&self) -> &'a Descriptor {
        self.descriptor
    }

    pub fn labels(&self) -> &'a LabelSet {
        self.labels
    }

    pub fn aggregator(&self) -> &'a Aggregator {
        self.aggregator
    }

    pub fn temporality(&self) -> Temporality {
        self.temporality
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Render the record as a JSON object
    pub fn to_json(&self) -> JsonValue {
        let labels: Map<String, JsonValue> = self
            .labels
            .iter()
            .map(|kv| (kv.key.clone(), json!(kv.value)))
            .collect();

        json!({
            "name": self.descriptor.name(),
            "description": self.descriptor.description(),
            "unit": self.descriptor.unit(),
            "instrument_kind": self.descriptor.kind(),
            "library": self.descriptor.library(),
            "labels": labels,
            "aggregation": self.aggregator.kind(),
            "temporality": self.temporality,
            "start": self.start.to_rfc3339(),
            "end": self.end.to_rfc3339(),
            "value": aggregation_json(self.aggregator),
        })
    }
}

fn aggregation_json(aggregator: &Aggregator) -> JsonValue {
    match aggregator {
        Aggregator::Sum(_) => json!(aggregator.sum()),
        Aggregator::LastValue(_) => match aggregator.last_value() {
            Some((value, at)) => json!({ "value": value, "timestamp": at.to_rfc3339() }),
            None => JsonValue::Null,
        },
        Aggregator::MinMaxSumCount(_) => json!({
            "min": aggregator.min(),
            "max": aggregator.max(),
            "sum": aggregator.sum(),
            "count": aggregator.count(),
        }),
        Aggregator::Histogram(_) => {
            let buckets = aggregator.buckets();
            json!({
                "boundaries": buckets.map(|b| &b.boundaries),
                "counts": buckets.map(|b| &b.counts),
                "sum": aggregator.sum(),
                "count": aggregator.count(),
            })
        }
        Aggregator::Exact(_) => json!({
            "points": aggregator.points(),
            "sum": aggregator.sum(),
            "count": aggregator.count(),
        }),
        Aggregator::Sketch(_) => json!({
            "min": aggregator.min(),
            "max": aggregator.max(),
            "sum": aggregator.sum(),
            "count": aggregator.count(),
            "p50": aggregator.quantile(0.5).ok(),
            "p90": aggregator.quantile(0.9).ok(),
            "p99": aggregator.quantile(0.99).ok(),
        }),
    }
}

/// Flattens visited records into `"name/labels" -> value` for quick lookups
#[derive(Debug, Clone, Default)]
pub struct RecordMap {
    values: BTreeMap<String, f64>,
}

impl RecordMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record's scalar value (its sum, or its last value). Fails for
    /// aggregations without one, or if the key was already added.
    pub fn add_record(&mut self, record: &Record<'_>) -> Result<()> {
        let key = format!("{}/{}", record.descriptor().name(), record.labels().encoded());
        let value = record.aggregator().scalar().ok_or_else(|| {
            MetricsError::Export(format!(
                "{} aggregation of {} has no scalar value",
                record.aggregator().kind(),
                key
            ))
        })?;
        if self.values.insert(key.clone(), value).is_some() {
            return Err(MetricsError::Export(format!("duplicate record {}", key)));
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn map(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
