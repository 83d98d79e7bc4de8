use chrono::{DateTime, Utc};

use crate::number::Number;

/// Most recent value and when it was recorded
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LastValueAggregator {
    last: Option<(Number, DateTime<Utc>)>,
}

impl LastValueAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value; `at` comes from the collecting clock
    pub fn update(&mut self, number: Number, at: DateTime<Utc>) {
        self.last = Some((number, at));
    }

    /// Keep whichever value was recorded later
    pub fn merge(&mut self, other: &LastValueAggregator) {
        match (&self.last, &other.last) {
            (Some((_, mine)), Some((_, theirs))) if theirs <= mine => {}
            (_, Some(_)) => self.last = other.last,
            (_, None) => {}
        }
    }

    pub fn last_value(&self) -> Option<(Number, DateTime<Utc>)> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_update_overwrites() {
        let at = DateTime::from_timestamp(1_000, 0).unwrap();
        let mut a = LastValueAggregator::new();
        assert!(a.last_value().is_none());
        a.update(Number::F64(1.0), at);
        a.update(Number::F64(2.5), at);
        assert_eq!(a.last_value(), Some((Number::F64(2.5), at)));
    }

    #[test]
    fn test_merge_keeps_newer() {
        let at = DateTime::from_timestamp(1_000, 0).unwrap();
        let mut older = LastValueAggregator::new();
        older.update(Number::I64(1), at);
        let mut newer = LastValueAggregator::new();
        newer.update(Number::I64(2), at + TimeDelta::seconds(1));

        let mut merged = newer.clone();
        merged.merge(&older);
        assert_eq!(merged.last_value().map(|(v, _)| v), Some(Number::I64(2)));

        older.merge(&newer);
        assert_eq!(older.last_value().map(|(v, _)| v), Some(Number::I64(2)));

        let mut empty = LastValueAggregator::new();
        empty.merge(&LastValueAggregator::new());
        assert!(empty.last_value().is_none());
    }
}
