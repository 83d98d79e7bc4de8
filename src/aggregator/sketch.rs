//! Relative-error quantile sketch.
//!
//! Values are mapped to logarithmically sized bins: a positive value `v` lands
//! in bin `ceil(log_gamma(v))` with `gamma = (1 + a) / (1 - a)`, so any quantile
//! estimate is within relative error `a` of a true value in that bin. Negative
//! values use a mirrored store and values too small to index are counted as zero.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MetricsError, Result};
use crate::number::{Number, NumberKind};

/// Configuration for the quantile sketch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchConfig {
    #[serde(default = "default_relative_accuracy")]
    pub relative_accuracy: f64,
    #[serde(default = "default_max_bins")]
    pub max_bins: usize,
}

fn default_relative_accuracy() -> f64 {
    0.01
}

fn default_max_bins() -> usize {
    2048
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self {
            relative_accuracy: default_relative_accuracy(),
            max_bins: default_max_bins(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SketchAggregator {
    gamma: f64,
    ln_gamma: f64,
    min_indexable: f64,
    max_bins: usize,
    positive: BTreeMap<i32, u64>,
    negative: BTreeMap<i32, u64>,
    zero_count: u64,
    min: Option<Number>,
    max: Option<Number>,
    sum: Number,
    count: u64,
}

impl SketchAggregator {
    pub fn new(kind: NumberKind, config: &SketchConfig) -> Self {
        let accuracy = if config.relative_accuracy > 0.0 && config.relative_accuracy < 1.0 {
            config.relative_accuracy
        } else {
            default_relative_accuracy()
        };
        let gamma = (1.0 + accuracy) / (1.0 - accuracy);
        Self {
            gamma,
            ln_gamma: gamma.ln(),
            min_indexable: f64::MIN_POSITIVE * gamma,
            max_bins: config.max_bins.max(1),
            positive: BTreeMap::new(),
            negative: BTreeMap::new(),
            zero_count: 0,
            min: None,
            max: None,
            sum: Number::zero(kind),
            count: 0,
        }
    }

    /// Drop all recorded values, keeping accuracy and bin limit
    pub(crate) fn clear(&mut self) {
        self.positive.clear();
        self.negative.clear();
        self.zero_count = 0;
        self.min = None;
        self.max = None;
        self.sum = Number::zero(self.sum.kind());
        self.count = 0;
    }

    fn key(&self, magnitude: f64) -> i32 {
        (magnitude.ln() / self.ln_gamma).ceil() as i32
    }

    fn bin_value(&self, key: i32) -> f64 {
        2.0 * self.gamma.powi(key) / (self.gamma + 1.0)
    }

    fn collapse(store: &mut BTreeMap<i32, u64>, max_bins: usize) {
        while store.len() > max_bins {
            let Some((key, count)) = store.pop_first() else {
                break;
            };
            match store.first_entry() {
                Some(mut next) => *next.get_mut() += count,
                None => {
                    store.insert(key, count);
                    break;
                }
            }
        }
    }

    pub fn update(&mut self, number: Number) -> Result<()> {
        self.sum = self.sum.checked_add(number)?;
        self.count += 1;
        self.min = Some(self.min.map_or(number, |m| m.min(number)));
        self.max = Some(self.max.map_or(number, |m| m.max(number)));

        let value = number.to_f64();
        if value.abs() < self.min_indexable {
            self.zero_count += 1;
        } else if value > 0.0 {
            let key = self.key(value);
            *self.positive.entry(key).or_insert(0) += 1;
            Self::collapse(&mut self.positive, self.max_bins);
        } else {
            let key = self.key(-value);
            *self.negative.entry(key).or_insert(0) += 1;
            Self::collapse(&mut self.negative, self.max_bins);
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &SketchAggregator) -> Result<()> {
        if self.gamma != other.gamma {
            return Err(MetricsError::Aggregation(
                "cannot merge sketches with different accuracy".to_string(),
            ));
        }
        self.sum = self.sum.checked_add(other.sum)?;
        self.count += other.count;
        self.zero_count += other.zero_count;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        for (key, count) in &other.positive {
            *self.positive.entry(*key).or_insert(0) += count;
        }
        for (key, count) in &other.negative {
            *self.negative.entry(*key).or_insert(0) += count;
        }
        Self::collapse(&mut self.positive, self.max_bins);
        Self::collapse(&mut self.negative, self.max_bins);
        Ok(())
    }

    /// Estimated value at quantile `q`
    pub fn quantile(&self, q: f64) -> Result<f64> {
        if !(0.0..=1.0).contains(&q) {
            return Err(MetricsError::Aggregation(format!("invalid quantile {}", q)));
        }
        let (Some(min), Some(max)) = (self.min, self.max) else {
            return Err(MetricsError::NoData);
        };

        let rank = q * (self.count - 1) as f64;
        let mut seen = 0u64;

        // Most negative values first: larger keys in the negative store.
        for (key, count) in self.negative.iter().rev() {
            seen += count;
            if seen as f64 > rank {
                return Ok((-self.bin_value(*key)).clamp(min.to_f64(), max.to_f64()));
            }
        }
        seen += self.zero_count;
        if seen as f64 > rank {
            return Ok(0.0_f64.clamp(min.to_f64(), max.to_f64()));
        }
        for (key, count) in &self.positive {
            seen += count;
            if seen as f64 > rank {
                return Ok(self.bin_value(*key).clamp(min.to_f64(), max.to_f64()));
            }
        }
        Ok(max.to_f64())
    }

    pub fn min(&self) -> Option<Number> {
        self.min
    }

    pub fn max(&self) -> Option<Number> {
        self.max
    }

    pub fn sum(&self) -> Number {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
