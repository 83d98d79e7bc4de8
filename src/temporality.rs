//! Export-kind (temporality) policy
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::aggregator::AggregationKind;
use crate::descriptor::Descriptor;

/// Whether an exported value covers the series' lifetime or the last interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temporality {
    /// Running total since the series was created
    Cumulative,
    /// Change since the previous successful collection
    Delta,
}

impl fmt::Display for Temporality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Temporality::Cumulative => f.write_str("cumulative"),
            Temporality::Delta => f.write_str("delta"),
        }
    }
}

/// Decides the temporality for an instrument
pub trait TemporalitySelector: fmt::Debug + Send + Sync {
    fn temporality_for(&self, descriptor: &Descriptor, aggregation: AggregationKind) -> Temporality;
}

/// The stock temporality policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKindSelector {
    /// Everything cumulative
    #[default]
    Cumulative,
    /// Everything delta
    Delta,
    /// Whatever needs no memory: precomputed sums stay cumulative, the rest is delta
    Stateless,
}

impl TemporalitySelector for ExportKindSelector {
    fn temporality_for(&self, descriptor: &Descriptor, aggregation: AggregationKind) -> Temporality {
        match self {
            ExportKindSelector::Cumulative => Temporality::Cumulative,
            ExportKindSelector::Delta => Temporality::Delta,
            ExportKindSelector::Stateless => {
                if aggregation == AggregationKind::Sum && descriptor.kind().is_precomputed_sum() {
                    Temporality::Cumulative
                } else {
                    Temporality::Delta
                }
            }
        }
    }
}
