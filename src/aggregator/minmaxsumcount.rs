use crate::error::Result;
use crate::number::{Number, NumberKind};

/// Min, max, sum and count of the recorded values
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxSumCountAggregator {
    min: Option<Number>,
    max: Option<Number>,
    sum: Number,
    count: u64,
}

impl MinMaxSumCountAggregator {
    pub fn new(kind: NumberKind) -> Self {
        Self {
            min: None,
            max: None,
            sum: Number::zero(kind),
            count: 0,
        }
    }

    pub fn update(&mut self, number: Number) -> Result<()> {
        self.sum = self.sum.checked_add(number)?;
        self.count += 1;
        self.min = Some(self.min.map_or(number, |m| m.min(number)));
        self.max = Some(self.max.map_or(number, |m| m.max(number)));
        Ok(())
    }

    pub fn merge(&mut self, other: &MinMaxSumCountAggregator) -> Result<()> {
        self.sum = self.sum.checked_add(other.sum)?;
        self.count += other.count;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        Ok(())
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
