use crate::error::Result;
use crate::number::{Number, NumberKind};

/// Running sum
#[derive(Debug, Clone, PartialEq)]
pub struct SumAggregator {
    value: Number,
}

impl SumAggregator {
    pub fn new(kind: NumberKind) -> Self {
        Self {
            value: Number::zero(kind),
        }
    }

    pub fn update(&mut self, number: Number) -> Result<()> {
        self.value = self.value.checked_add(number)?;
        Ok(())
    }

    pub fn merge(&mut self, other: &SumAggregator) -> Result<()> {
        self.update(other.value)
    }

    /// Replace this sum with the difference `self - previous`
    pub fn subtract(&mut self, previous: &SumAggregator) -> Result<()> {
        self.value = self.value.checked_sub(previous.value)?;
        Ok(())
    }

    pub fn sum(&self) -> Number {
        self.value
    }
}
