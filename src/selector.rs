//! Aggregator selection
use std::fmt::Debug;

use crate::aggregator::{AggregationKind, Aggregator, AggregatorConfig, HistogramConfig, SketchConfig};
use crate::descriptor::{Descriptor, InstrumentKind};
use crate::error::{MetricsError, Result};
use crate::view::View;

/// Maps an instrument (and an optional matched view) to an accumulator
pub trait AggregatorSelector: Debug + Send + Sync {
    /// Choose the aggregation kind and its configuration
    fn select_for(&self, descriptor: &Descriptor, view: Option<&View>) -> (AggregationKind, AggregatorConfig);

    /// Allocate a fresh, zero-valued accumulator for this instrument
    fn aggregator_for(&self, descriptor: &Descriptor, view: Option<&View>) -> Aggregator {
        let (kind, config) = self.select_for(descriptor, view);
        Aggregator::new(kind, descriptor.number_kind(), &config)
    }
}

/// Fixed mapping for adding instruments and observers, with a configurable
/// choice for value recorders
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleSelector {
    distribution: AggregationKind,
    config: AggregatorConfig,
}

impl SimpleSelector {
    /// Value recorders get the given distribution aggregation
    pub fn new(distribution: AggregationKind, config: AggregatorConfig) -> Result<Self> {
        if !distribution.is_distribution() {
            return Err(MetricsError::Config(format!(
                "{} is not a distribution aggregation",
                distribution
            )));
        }
        Ok(Self { distribution, config })
    }

    /// Min, max, sum and count for value recorders
    pub fn inexpensive() -> Self {
        Self {
            distribution: AggregationKind::MinMaxSumCount,
            config: AggregatorConfig::default(),
        }
    }

    /// Every recorded value is kept
    pub fn exact() -> Self {
        Self {
            distribution: AggregationKind::Exact,
            config: AggregatorConfig::default(),
        }
    }

    pub fn sketch(sketch: SketchConfig) -> Self {
        Self {
            distribution: AggregationKind::Sketch,
            config: AggregatorConfig {
                sketch,
                ..Default::default()
            },
        }
    }

    pub fn histogram(histogram: HistogramConfig) -> Self {
        Self {
            distribution: AggregationKind::Histogram,
            config: AggregatorConfig {
                histogram,
                ..Default::default()
            },
        }
    }

    pub fn distribution(&self) -> AggregationKind {
        self.distribution
    }
}

impl Default for SimpleSelector {
    fn default() -> Self {
        Self::inexpensive()
    }
}

impl AggregatorSelector for SimpleSelector {
    fn select_for(&self, descriptor: &Descriptor, view: Option<&View>) -> (AggregationKind, AggregatorConfig) {
        let kind = view.and_then(View::aggregation).unwrap_or(match descriptor.kind() {
            InstrumentKind::Counter
            | InstrumentKind::UpDownCounter
            | InstrumentKind::SumObserver
            | InstrumentKind::UpDownSumObserver => AggregationKind::Sum,
            InstrumentKind::ValueObserver => AggregationKind::LastValue,
            InstrumentKind::ValueRecorder => self.distribution,
        });
        let config = view
            .and_then(View::aggregator_config)
            .cloned()
            .unwrap_or_else(|| self.config.clone());
        (kind, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Library;
    use crate::number::NumberKind;

    fn desc(name: &str, kind: InstrumentKind) -> Descriptor {
        Descriptor::new(name, kind, NumberKind::I64, Library::new("test"))
    }

    fn check_fixed(selector: &SimpleSelector) {
        let fixed = [
            (InstrumentKind::ValueObserver, AggregationKind::LastValue),
            (InstrumentKind::Counter, AggregationKind::Sum),
            (InstrumentKind::UpDownCounter, AggregationKind::Sum),
            (InstrumentKind::SumObserver, AggregationKind::Sum),
            (InstrumentKind::UpDownSumObserver, AggregationKind::Sum),
        ];
        for (kind, expected) in fixed {
            assert_eq!(selector.aggregator_for(&desc("x", kind), None).kind(), expected);
        }
    }

    fn recorder_kind(selector: &SimpleSelector) -> AggregationKind {
        selector
            .aggregator_for(&desc("valuerecorder", InstrumentKind::ValueRecorder), None)
            .kind()
    }

    #[test]
    fn test_inexpensive_distribution() {
        let selector = SimpleSelector::inexpensive();
        assert_eq!(recorder_kind(&selector), AggregationKind::MinMaxSumCount);
        check_fixed(&selector);
    }

    #[test]
    fn test_sketch_distribution() {
        let selector = SimpleSelector::sketch(SketchConfig::default());
        assert_eq!(recorder_kind(&selector), AggregationKind::Sketch);
        check_fixed(&selector);
    }

    #[test]
    fn test_exact_distribution() {
        let selector = SimpleSelector::exact();
        assert_eq!(recorder_kind(&selector), AggregationKind::Exact);
        check_fixed(&selector);
    }

    #[test]
    fn test_histogram_distribution() {
        let selector = SimpleSelector::histogram(HistogramConfig::default());
        assert_eq!(recorder_kind(&selector), AggregationKind::Histogram);
        check_fixed(&selector);
    }

    #[test]
    fn test_rejects_non_distribution() {
        assert!(SimpleSelector::new(AggregationKind::Sum, AggregatorConfig::default()).is_err());
        assert!(SimpleSelector::new(AggregationKind::Exact, AggregatorConfig::default()).is_ok());
    }

    #[test]
    fn test_view_override_takes_precedence() {
        let selector = SimpleSelector::inexpensive();
        let config = AggregatorConfig {
            histogram: HistogramConfig::with_boundaries(vec![1.0]),
            ..Default::default()
        };
        let view = View::builder()
            .with_aggregation(AggregationKind::Histogram)
            .with_aggregator_config(config.clone())
            .build();

        let counter = desc("counter", InstrumentKind::Counter);
        let (kind, selected) = selector.select_for(&counter, Some(&view));
        assert_eq!(kind, AggregationKind::Histogram);
        assert_eq!(selected, config);

        // A view without an aggregation leaves the default mapping alone.
        let rename = View::builder().with_name("renamed").build();
        assert_eq!(selector.select_for(&counter, Some(&rename)).0, AggregationKind::Sum);
    }
}
