use std::sync::Arc;
use std::time::Duration;

use crate::selector::{AggregatorSelector, SimpleSelector};
use crate::temporality::{ExportKindSelector, TemporalitySelector};
use crate::view::View;

/// Default time a checkpoint set is served before a new sweep runs
pub const DEFAULT_CACHE_PERIOD: Duration = Duration::from_secs(10);

/// Configuration for a pull controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How long a completed sweep satisfies further `collect` calls.
    /// Zero disables caching.
    pub cache_period: Duration,
    /// Decides which state is retained between sweeps
    pub temporality: Arc<dyn TemporalitySelector>,
    /// Picks the accumulator for each instrument
    pub selector: Arc<dyn AggregatorSelector>,
    /// Views in registration order
    pub views: Vec<View>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cache_period: DEFAULT_CACHE_PERIOD,
            temporality: Arc::new(ExportKindSelector::Cumulative),
            selector: Arc::new(SimpleSelector::default()),
            views: Vec::new(),
        }
    }
}

/// Builder for controller configuration
#[derive(Debug, Default)]
pub struct ControllerConfigBuilder {
    config: ControllerConfig,
}

impl ControllerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache period; `Duration::ZERO` sweeps on every call
    pub fn cache_period(mut self, period: Duration) -> Self {
        self.config.cache_period = period;
        self
    }

    pub fn temporality(mut self, selector: impl TemporalitySelector + 'static) -> Self {
        self.config.temporality = Arc::new(selector);
        self
    }

    pub fn aggregator_selector(mut self, selector: impl AggregatorSelector + 'static) -> Self {
        self.config.selector = Arc::new(selector);
        self
    }

    /// Append a view; earlier views take precedence
    pub fn view(mut self, view: View) -> Self {
        self.config.views.push(view);
        self
    }

    pub fn views(mut self, views: impl IntoIterator<Item = View>) -> Self {
        self.config.views.extend(views);
        self
    }

    /// Build the configuration
    pub fn build(self) -> ControllerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregationKind;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.cache_period, Duration::from_secs(10));
        assert!(config.views.is_empty());
    }

    #[test]
    fn test_builder_setters() {
        let config = ControllerConfigBuilder::new()
            .cache_period(Duration::ZERO)
            .temporality(ExportKindSelector::Delta)
            .aggregator_selector(SimpleSelector::exact())
            .view(View::builder().with_name("a").build())
            .views(vec![View::builder().with_aggregation(AggregationKind::Exact).build()])
            .build();

        assert_eq!(config.cache_period, Duration::ZERO);
        assert_eq!(config.views.len(), 2);
        assert_eq!(config.views[0].name(), Some("a"));
    }
}
