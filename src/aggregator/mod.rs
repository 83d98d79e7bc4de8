//! Per-series accumulators.
//!
//! [`Aggregator`] is a closed set of variants. A selector picks an
//! [`AggregationKind`] plus an [`AggregatorConfig`], and [`Aggregator::new`]
//! turns that pair into a zero-valued accumulator. All variants share one
//! contract: `update` with a raw value, `synchronized_move` to detach the
//! current state and reset, and `merge` to fold another state of the same
//! variant into this one.
mod exact;
mod histogram;
mod lastvalue;
mod minmaxsumcount;
mod sketch;
mod sum;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MetricsError, Result};
use crate::number::{Number, NumberKind};

pub use exact::ExactAggregator;
pub use histogram::{Buckets, DEFAULT_BOUNDARIES, HistogramAggregator, HistogramConfig};
pub use lastvalue::LastValueAggregator;
pub use minmaxsumcount::MinMaxSumCountAggregator;
pub use sketch::{SketchAggregator, SketchConfig};
pub use sum::SumAggregator;

/// The statistical aggregation applied to a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Sum,
    LastValue,
    MinMaxSumCount,
    Histogram,
    Exact,
    Sketch,
}

impl AggregationKind {
    /// Whether this kind summarises a distribution of values
    pub fn is_distribution(&self) -> bool {
        matches!(
            self,
            AggregationKind::MinMaxSumCount
                | AggregationKind::Histogram
                | AggregationKind::Exact
                | AggregationKind::Sketch
        )
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationKind::Sum => "sum",
            AggregationKind::LastValue => "last_value",
            AggregationKind::MinMaxSumCount => "min_max_sum_count",
            AggregationKind::Histogram => "histogram",
            AggregationKind::Exact => "exact",
            AggregationKind::Sketch => "sketch",
        };
        f.write_str(name)
    }
}

/// Variant-specific configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub histogram: HistogramConfig,
    #[serde(default)]
    pub sketch: SketchConfig,
}

/// A per-series accumulator
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregator {
    Sum(SumAggregator),
    LastValue(LastValueAggregator),
    MinMaxSumCount(MinMaxSumCountAggregator),
    Histogram(HistogramAggregator),
    Exact(ExactAggregator),
    Sketch(SketchAggregator),
}

impl Aggregator {
    /// Allocate a zero-valued accumulator of the given kind
    pub fn new(kind: AggregationKind, number_kind: NumberKind, config: &AggregatorConfig) -> Self {
        match kind {
            AggregationKind::Sum => Aggregator::Sum(SumAggregator::new(number_kind)),
            AggregationKind::LastValue => Aggregator::LastValue(LastValueAggregator::new()),
            AggregationKind::MinMaxSumCount => {
                Aggregator::MinMaxSumCount(MinMaxSumCountAggregator::new(number_kind))
            }
            AggregationKind::Histogram => {
                Aggregator::Histogram(HistogramAggregator::new(number_kind, &config.histogram))
            }
            AggregationKind::Exact => Aggregator::Exact(ExactAggregator::new(number_kind)),
            AggregationKind::Sketch => {
                Aggregator::Sketch(SketchAggregator::new(number_kind, &config.sketch))
            }
        }
    }

    pub fn kind(&self) -> AggregationKind {
        match self {
            Aggregator::Sum(_) => AggregationKind::Sum,
            Aggregator::LastValue(_) => AggregationKind::LastValue,
            Aggregator::MinMaxSumCount(_) => AggregationKind::MinMaxSumCount,
            Aggregator::Histogram(_) => AggregationKind::Histogram,
            Aggregator::Exact(_) => AggregationKind::Exact,
            Aggregator::Sketch(_) => AggregationKind::Sketch,
        }
    }

    /// Add one measurement; `at` only matters to last-value accumulators
    pub fn update(&mut self, number: Number, at: DateTime<Utc>) -> Result<()> {
        match self {
            Aggregator::Sum(a) => a.update(number),
            Aggregator::LastValue(a) => {
                a.update(number, at);
                Ok(())
            }
            Aggregator::MinMaxSumCount(a) => a.update(number),
            Aggregator::Histogram(a) => a.update(number),
            Aggregator::Exact(a) => a.update(number),
            Aggregator::Sketch(a) => a.update(number),
        }
    }

    /// Detach the current state and leave an empty accumulator in its place
    pub fn synchronized_move(&mut self) -> Aggregator {
        let empty = self.empty_like();
        let mut moved = std::mem::replace(self, empty);
        if let Aggregator::Exact(points) = &mut moved {
            points.sort();
        }
        moved
    }

    /// A zero-valued accumulator with the same variant and configuration
    fn empty_like(&self) -> Aggregator {
        match self {
            Aggregator::Sum(a) => Aggregator::Sum(SumAggregator::new(a.sum().kind())),
            Aggregator::LastValue(_) => Aggregator::LastValue(LastValueAggregator::new()),
            Aggregator::MinMaxSumCount(a) => {
                Aggregator::MinMaxSumCount(MinMaxSumCountAggregator::new(a.sum().kind()))
            }
            Aggregator::Histogram(a) => {
                let config = HistogramConfig::with_boundaries(a.buckets().boundaries.clone());
                Aggregator::Histogram(HistogramAggregator::new(a.sum().kind(), &config))
            }
            Aggregator::Exact(a) => Aggregator::Exact(ExactAggregator::new(a.sum().kind())),
            Aggregator::Sketch(a) => {
                let mut empty = a.clone();
                empty.clear();
                Aggregator::Sketch(empty)
            }
        }
    }

    /// Fold `other` into this accumulator. Both must be the same variant.
    pub fn merge(&mut self, other: &Aggregator) -> Result<()> {
        match (self, other) {
            (Aggregator::Sum(a), Aggregator::Sum(b)) => a.merge(b),
            (Aggregator::LastValue(a), Aggregator::LastValue(b)) => {
                a.merge(b);
                Ok(())
            }
            (Aggregator::MinMaxSumCount(a), Aggregator::MinMaxSumCount(b)) => a.merge(b),
            (Aggregator::Histogram(a), Aggregator::Histogram(b)) => a.merge(b),
            (Aggregator::Exact(a), Aggregator::Exact(b)) => a.merge(b),
            (Aggregator::Sketch(a), Aggregator::Sketch(b)) => a.merge(b),
            (a, b) => Err(MetricsError::Aggregation(format!(
                "cannot merge {} into {}",
                b.kind(),
                a.kind()
            ))),
        }
    }

    /// Turn a cumulative sum into the delta since `previous`
    pub(crate) fn subtract(&mut self, previous: &Aggregator) -> Result<()> {
        match (self, previous) {
            (Aggregator::Sum(a), Aggregator::Sum(b)) => a.subtract(b),
            (a, b) => Err(MetricsError::Aggregation(format!(
                "cannot subtract {} from {}",
                b.kind(),
                a.kind()
            ))),
        }
    }

    pub fn sum(&self) -> Option<Number> {
        match self {
            Aggregator::Sum(a) => Some(a.sum()),
            Aggregator::LastValue(_) => None,
            Aggregator::MinMaxSumCount(a) => Some(a.sum()),
            Aggregator::Histogram(a) => Some(a.sum()),
            Aggregator::Exact(a) => Some(a.sum()),
            Aggregator::Sketch(a) => Some(a.sum()),
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Aggregator::Sum(_) | Aggregator::LastValue(_) => None,
            Aggregator::MinMaxSumCount(a) => Some(a.count()),
            Aggregator::Histogram(a) => Some(a.count()),
            Aggregator::Exact(a) => Some(a.count()),
            Aggregator::Sketch(a) => Some(a.count()),
        }
    }

    pub fn min(&self) -> Option<Number> {
        match self {
            Aggregator::MinMaxSumCount(a) => a.min(),
            Aggregator::Exact(a) => a.min(),
            Aggregator::Sketch(a) => a.min(),
            _ => None,
        }
    }

    pub fn max(&self) -> Option<Number> {
        match self {
            Aggregator::MinMaxSumCount(a) => a.max(),
            Aggregator::Exact(a) => a.max(),
            Aggregator::Sketch(a) => a.max(),
            _ => None,
        }
    }

    pub fn last_value(&self) -> Option<(Number, DateTime<Utc>)> {
        match self {
            Aggregator::LastValue(a) => a.last_value(),
            _ => None,
        }
    }

    pub fn buckets(&self) -> Option<&Buckets> {
        match self {
            Aggregator::Histogram(a) => Some(a.buckets()),
            _ => None,
        }
    }

    pub fn points(&self) -> Option<&[Number]> {
        match self {
            Aggregator::Exact(a) => Some(a.points()),
            _ => None,
        }
    }

    pub fn quantile(&self, q: f64) -> Result<f64> {
        match self {
            Aggregator::Exact(a) => a.quantile(q),
            Aggregator::Sketch(a) => a.quantile(q),
            other => Err(MetricsError::Aggregation(format!(
                "{} does not support quantiles",
                other.kind()
            ))),
        }
    }

    /// Single scalar summary: the sum, or the last value for last-value series
    pub fn scalar(&self) -> Option<f64> {
        self.sum()
            .or_else(|| self.last_value().map(|(v, _)| v))
            .map(|v| v.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_dispatches_on_kind() {
        let config = AggregatorConfig::default();
        for kind in [
            AggregationKind::Sum,
            AggregationKind::LastValue,
            AggregationKind::MinMaxSumCount,
            AggregationKind::Histogram,
            AggregationKind::Exact,
            AggregationKind::Sketch,
        ] {
            assert_eq!(Aggregator::new(kind, NumberKind::I64, &config).kind(), kind);
        }
    }

    #[test]
    fn test_synchronized_move_resets() {
        let mut agg = Aggregator::new(AggregationKind::Sum, NumberKind::I64, &AggregatorConfig::default());
        agg.update(Number::I64(10), Utc::now()).unwrap();
        let moved = agg.synchronized_move();
        assert_eq!(moved.sum(), Some(Number::I64(10)));
        assert_eq!(agg.sum(), Some(Number::I64(0)));
    }

    #[test]
    fn test_synchronized_move_keeps_histogram_boundaries() {
        let config = AggregatorConfig {
            histogram: HistogramConfig::with_boundaries(vec![1.0, 2.0]),
            ..Default::default()
        };
        let mut agg = Aggregator::new(AggregationKind::Histogram, NumberKind::F64, &config);
        agg.update(Number::F64(1.5), Utc::now()).unwrap();
        let moved = agg.synchronized_move();
        assert_eq!(moved.buckets().map(|b| b.counts.clone()), Some(vec![0, 1, 0]));
        assert_eq!(agg.buckets().map(|b| b.boundaries.clone()), Some(vec![1.0, 2.0]));
        assert_eq!(agg.count(), Some(0));
    }

    #[test]
    fn test_merge_mismatched_variants() {
        let config = AggregatorConfig::default();
        let mut sum = Aggregator::new(AggregationKind::Sum, NumberKind::I64, &config);
        let last = Aggregator::new(AggregationKind::LastValue, NumberKind::I64, &config);
        assert!(matches!(sum.merge(&last), Err(MetricsError::Aggregation(_))));
    }

    #[test]
    fn test_scalar() {
        let config = AggregatorConfig::default();
        let mut last = Aggregator::new(AggregationKind::LastValue, NumberKind::F64, &config);
        assert_eq!(last.scalar(), None);
        last.update(Number::F64(4.5), Utc::now()).unwrap();
        assert_eq!(last.scalar(), Some(4.5));
        assert!(last.quantile(0.5).is_err());
    }
}
