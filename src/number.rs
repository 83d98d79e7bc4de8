//! Numeric representation of measurements
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{MetricsError, Result};

/// The number representation an instrument records with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberKind {
    /// 64-bit signed integers
    I64,
    /// 64-bit floating point
    F64,
}

/// A single measured or aggregated value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Number {
    I64(i64),
    F64(f64),
}

impl Number {
    /// The zero value for a number kind
    pub fn zero(kind: NumberKind) -> Self {
        match kind {
            NumberKind::I64 => Number::I64(0),
            NumberKind::F64 => Number::F64(0.0),
        }
    }

    pub fn kind(&self) -> NumberKind {
        match self {
            Number::I64(_) => NumberKind::I64,
            Number::F64(_) => NumberKind::F64,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match *self {
            Number::I64(v) => v as f64,
            Number::F64(v) => v,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Number::F64(v) if v.is_nan())
    }

    pub fn is_negative(&self) -> bool {
        match *self {
            Number::I64(v) => v < 0,
            Number::F64(v) => v < 0.0,
        }
    }

    /// Add two numbers, failing on integer overflow
    pub(crate) fn checked_add(self, other: Number) -> Result<Number> {
        match (self, other) {
            (Number::I64(a), Number::I64(b)) => a
                .checked_add(b)
                .map(Number::I64)
                .ok_or_else(|| MetricsError::Aggregation(format!("integer overflow adding {} to {}", b, a))),
            (a, b) => Ok(Number::F64(a.to_f64() + b.to_f64())),
        }
    }

    /// Subtract two numbers, failing on integer overflow
    pub(crate) fn checked_sub(self, other: Number) -> Result<Number> {
        match (self, other) {
            (Number::I64(a), Number::I64(b)) => a
                .checked_sub(b)
                .map(Number::I64)
                .ok_or_else(|| MetricsError::Aggregation(format!("integer overflow subtracting {} from {}", b, a))),
            (a, b) => Ok(Number::F64(a.to_f64() - b.to_f64())),
        }
    }

    pub(crate) fn min(self, other: Number) -> Number {
        if other < self { other } else { self }
    }

    pub(crate) fn max(self, other: Number) -> Number {
        if other > self { other } else { self }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Number::I64(a), Number::I64(b)) => a.partial_cmp(b),
            (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::I64(v) => write!(f, "{}", v),
            Number::F64(v) => write!(f, "{}", v),
        }
    }
}

/// Primitive types instruments can be parameterised with
pub trait MetricNumber: Copy + Send + Sync + fmt::Debug + 'static {
    const KIND: NumberKind;

    fn into_number(self) -> Number;
}

impl MetricNumber for i64 {
    const KIND: NumberKind = NumberKind::I64;

    fn into_number(self) -> Number {
        Number::I64(self)
    }
}

impl MetricNumber for f64 {
    const KIND: NumberKind = NumberKind::F64;

    fn into_number(self) -> Number {
        Number::F64(self)
    }
}
