use crate::error::{MetricsError, Result};
use crate::number::{Number, NumberKind};

/// Retains every recorded point
#[derive(Debug, Clone, PartialEq)]
pub struct ExactAggregator {
    points: Vec<Number>,
    sum: Number,
}

impl ExactAggregator {
    pub fn new(kind: NumberKind) -> Self {
        Self {
            points: Vec::new(),
            sum: Number::zero(kind),
        }
    }

    pub fn update(&mut self, number: Number) -> Result<()> {
        self.sum = self.sum.checked_add(number)?;
        self.points.push(number);
        Ok(())
    }

    pub fn merge(&mut self, other: &ExactAggregator) -> Result<()> {
        self.sum = self.sum.checked_add(other.sum)?;
        self.points.extend_from_slice(&other.points);
        self.sort();
        Ok(())
    }

    /// Points are kept sorted once a checkpoint is taken
    pub(crate) fn sort(&mut self) {
        self.points
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    }

    pub fn points(&self) -> &[Number] {
        &self.points
    }

    pub fn sum(&self) -> Number {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.points.len() as u64
    }

    pub fn min(&self) -> Option<Number> {
        self.points.iter().copied().reduce(Number::min)
    }

    pub fn max(&self) -> Option<Number> {
        self.points.iter().copied().reduce(Number::max)
    }

    /// Value at quantile `q` of the sorted points
    pub fn quantile(&self, q: f64) -> Result<f64> {
        if !(0.0..=1.0).contains(&q) {
            return Err(MetricsError::Aggregation(format!("invalid quantile {}", q)));
        }
        if self.points.is_empty() {
            return Err(MetricsError::NoData);
        }
        let mut sorted = self.points.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let position = ((sorted.len() - 1) as f64 * q).ceil() as usize;
        Ok(sorted[position].to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantiles() {
        let mut a = ExactAggregator::new(NumberKind::I64);
        for v in [5, 1, 4, 2, 3] {
            a.update(Number::I64(v)).unwrap();
        }
        assert_eq!(a.quantile(0.0).unwrap(), 1.0);
        assert_eq!(a.quantile(0.5).unwrap(), 3.0);
        assert_eq!(a.quantile(1.0).unwrap(), 5.0);
        assert!(a.quantile(1.5).is_err());
        assert_eq!(a.min(), Some(Number::I64(1)));
        assert_eq!(a.max(), Some(Number::I64(5)));
        assert_eq!(a.sum(), Number::I64(15));
    }

    #[test]
    fn test_empty_has_no_data() {
        let a = ExactAggregator::new(NumberKind::F64);
        assert!(matches!(a.quantile(0.5), Err(MetricsError::NoData)));
    }

    #[test]
    fn test_merge_sorts() {
        let mut a = ExactAggregator::new(NumberKind::I64);
        a.update(Number::I64(9)).unwrap();
        let mut b = ExactAggregator::new(NumberKind::I64);
        b.update(Number::I64(2)).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a.points(), &[Number::I64(2), Number::I64(9)]);
    }
}
