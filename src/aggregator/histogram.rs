use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};
use crate::number::{Number, NumberKind};

/// Boundaries used when none are configured
pub const DEFAULT_BOUNDARIES: [f64; 14] = [
    5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// Configuration for fixed-bucket histograms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramConfig {
    /// Upper bounds of each bucket; a final overflow bucket is implied
    #[serde(default = "default_boundaries")]
    pub boundaries: Vec<f64>,
}

fn default_boundaries() -> Vec<f64> {
    DEFAULT_BOUNDARIES.to_vec()
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            boundaries: default_boundaries(),
        }
    }
}

impl HistogramConfig {
    pub fn with_boundaries(boundaries: impl Into<Vec<f64>>) -> Self {
        Self {
            boundaries: boundaries.into(),
        }
    }

    /// Sorted, deduplicated boundaries without NaN
    fn normalized(&self) -> Vec<f64> {
        let mut bounds: Vec<f64> = self.boundaries.iter().copied().filter(|b| !b.is_nan()).collect();
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        bounds
    }
}

/// Bucket boundaries and per-bucket counts; `counts.len() == boundaries.len() + 1`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Buckets {
    pub boundaries: Vec<f64>,
    pub counts: Vec<u64>,
}

/// Fixed-bucket histogram
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramAggregator {
    buckets: Buckets,
    sum: Number,
    count: u64,
}

impl HistogramAggregator {
    pub fn new(kind: NumberKind, config: &HistogramConfig) -> Self {
        let boundaries = config.normalized();
        let counts = vec![0; boundaries.len() + 1];
        Self {
            buckets: Buckets { boundaries, counts },
            sum: Number::zero(kind),
            count: 0,
        }
    }

    pub fn update(&mut self, number: Number) -> Result<()> {
        self.sum = self.sum.checked_add(number)?;
        let value = number.to_f64();
        // A value equal to a boundary belongs to the bucket above it.
        let index = self
            .buckets
            .boundaries
            .iter()
            .position(|bound| value < *bound)
            .unwrap_or(self.buckets.boundaries.len());
        self.buckets.counts[index] += 1;
        self.count += 1;
        Ok(())
    }

    pub fn merge(&mut self, other: &HistogramAggregator) -> Result<()> {
        if self.buckets.boundaries != other.buckets.boundaries {
            return Err(MetricsError::Aggregation(
                "cannot merge histograms with different boundaries".to_string(),
            ));
        }
        self.sum = self.sum.checked_add(other.sum)?;
        self.count += other.count;
        for (mine, theirs) in self.buckets.counts.iter_mut().zip(&other.buckets.counts) {
            *mine += theirs;
        }
        Ok(())
    }

    pub fn buckets(&self) -> &Buckets {
        &self.buckets
    }

    pub fn sum(&self) -> Number {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
