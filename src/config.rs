//! Controller settings loaded from TOML files, TOML strings and the environment
use log::{debug, trace, warn};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::aggregator::{AggregationKind, AggregatorConfig, HistogramConfig, SketchConfig};
use crate::controller::{ControllerConfig, ControllerConfigBuilder};
use crate::descriptor::{InstrumentKind, Library};
use crate::error::{MetricsError, Result};
use crate::number::NumberKind;
use crate::selector::SimpleSelector;
use crate::temporality::{ExportKindSelector, Temporality};
use crate::view::View;

/// Source of configuration
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path (TOML format)
    File(String),
    /// Environment variables with a prefix, nested keys separated by `__`
    Environment(String),
    /// TOML string
    Toml(String),
    /// Default configuration
    Defaults,
}

/// Logging level
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Top-level settings
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// How long a sweep is reused, in milliseconds; 0 disables caching
    #[serde(default = "default_cache_period_ms")]
    pub cache_period_ms: u64,
    /// Which state the controller retains between sweeps
    #[serde(default)]
    pub temporality: ExportKindSelector,
    /// Aggregation for value recorders
    #[serde(default)]
    pub distribution: DistributionSettings,
    /// Views, first match wins
    #[serde(default)]
    pub views: Vec<ViewSettings>,
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_cache_period_ms() -> u64 {
    10_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_period_ms: default_cache_period_ms(),
            temporality: ExportKindSelector::default(),
            distribution: DistributionSettings::default(),
            views: Vec::new(),
            log_level: LogLevel::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DistributionSettings {
    #[serde(default = "default_distribution")]
    pub kind: AggregationKind,
    #[serde(default)]
    pub histogram: HistogramConfig,
    #[serde(default)]
    pub sketch: SketchConfig,
}

fn default_distribution() -> AggregationKind {
    AggregationKind::MinMaxSumCount
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            kind: default_distribution(),
            histogram: HistogramConfig::default(),
            sketch: SketchConfig::default(),
        }
    }
}

/// One view as written in configuration. Unset fields match anything.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ViewSettings {
    pub instrument_name: Option<String>,
    pub instrument_name_regex: Option<String>,
    pub instrument_kind: Option<InstrumentKind>,
    pub number_kind: Option<NumberKind>,
    pub library_name: Option<String>,
    pub library_version: Option<String>,
    pub library_schema_url: Option<String>,
    /// Label keys to keep; absent keeps all, empty keeps none
    pub keys: Option<Vec<String>>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub aggregation: Option<AggregationKind>,
    pub temporality: Option<Temporality>,
    pub histogram_boundaries: Option<Vec<f64>>,
}

impl ViewSettings {
    /// Validate and convert into a [`View`]
    pub fn to_view(&self) -> Result<View> {
        let mut builder = View::builder();

        match (&self.instrument_name, &self.instrument_name_regex) {
            (Some(_), Some(_)) => {
                return Err(MetricsError::Config(
                    "view sets both instrument_name and instrument_name_regex".to_string(),
                ));
            }
            (Some(name), None) => builder = builder.match_instrument_name(name),
            (None, Some(pattern)) => {
                let re = Regex::new(pattern).map_err(|e| {
                    MetricsError::Config(format!("invalid instrument_name_regex '{}': {}", pattern, e))
                })?;
                builder = builder.match_instrument_name_regex(re);
            }
            (None, None) => {}
        }

        if let Some(kind) = self.instrument_kind {
            builder = builder.match_instrument_kind(kind);
        }
        if let Some(kind) = self.number_kind {
            builder = builder.match_number_kind(kind);
        }

        match &self.library_name {
            Some(name) => {
                let mut library = Library::new(name);
                if let Some(version) = &self.library_version {
                    library = library.with_version(version);
                }
                if let Some(schema_url) = &self.library_schema_url {
                    library = library.with_schema_url(schema_url);
                }
                builder = builder.match_library(library);
            }
            None if self.library_version.is_some() || self.library_schema_url.is_some() => {
                return Err(MetricsError::Config(
                    "library_version and library_schema_url require library_name".to_string(),
                ));
            }
            None => {}
        }

        if let Some(keys) = &self.keys {
            builder = builder.with_keys(keys.iter().cloned());
        }
        if let Some(name) = &self.name {
            builder = builder.with_name(name);
        }
        if let Some(description) = &self.description {
            builder = builder.with_description(description);
        }
        if let Some(aggregation) = self.aggregation {
            builder = builder.with_aggregation(aggregation);
        }
        if let Some(temporality) = self.temporality {
            builder = builder.with_temporality(temporality);
        }
        if let Some(boundaries) = &self.histogram_boundaries {
            builder = builder.with_aggregator_config(AggregatorConfig {
                histogram: HistogramConfig::with_boundaries(boundaries.clone()),
                ..Default::default()
            });
        }

        Ok(builder.build())
    }
}

impl Settings {
    pub fn cache_period(&self) -> Duration {
        Duration::from_millis(self.cache_period_ms)
    }

    /// Validate the settings and build a controller configuration
    pub fn controller_config(&self) -> Result<ControllerConfig> {
        let sketch = &self.distribution.sketch;
        if !(sketch.relative_accuracy > 0.0 && sketch.relative_accuracy < 1.0) {
            return Err(MetricsError::Config(format!(
                "sketch relative_accuracy must be in (0, 1), got {}",
                sketch.relative_accuracy
            )));
        }
        if sketch.max_bins == 0 {
            return Err(MetricsError::Config("sketch max_bins must be positive".to_string()));
        }

        let selector = SimpleSelector::new(
            self.distribution.kind,
            AggregatorConfig {
                histogram: self.distribution.histogram.clone(),
                sketch: sketch.clone(),
            },
        )?;

        let views = self
            .views
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.to_view()
                    .map_err(|e| MetricsError::Config(format!("views[{}]: {}", i, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ControllerConfigBuilder::new()
            .cache_period(self.cache_period())
            .temporality(self.temporality)
            .aggregator_selector(selector)
            .views(views)
            .build())
    }
}

type Builder = config::ConfigBuilder<config::builder::DefaultState>;

/// Layer one source over `builder`. Missing files are skipped with a warning.
fn layer(builder: Builder, source: &ConfigSource) -> Builder {
    match source {
        ConfigSource::File(path) if Path::new(path).exists() => {
            builder.add_source(config::File::new(path, config::FileFormat::Toml))
        }
        ConfigSource::File(path) => {
            warn!("Skipping missing settings file {}", path);
            builder
        }
        ConfigSource::Environment(prefix) => builder.add_source(
            config::Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        ),
        ConfigSource::Toml(text) => builder.add_source(config::File::from_str(text, config::FileFormat::Toml)),
        ConfigSource::Defaults => builder,
    }
}

/// Load settings from the given sources; later sources override earlier ones.
/// Every view is checked here, so bad patterns fail at load time rather than
/// when the controller is built.
pub fn load_settings(sources: Vec<ConfigSource>) -> Result<Settings> {
    let settings: Settings = sources
        .iter()
        .fold(config::Config::builder(), |builder, source| {
            trace!("Layering settings source {:?}", source);
            layer(builder, source)
        })
        .build()
        .and_then(|config| config.try_deserialize::<Settings>())
        .map_err(|e| MetricsError::Config(format!("invalid settings: {}", e)))?;

    for (index, view) in settings.views.iter().enumerate() {
        view.to_view()
            .map_err(|e| MetricsError::Config(format!("views[{}]: {}", index, e)))?;
    }
    debug!(
        "Loaded settings: {} views, cache period {:?}",
        settings.views.len(),
        settings.cache_period()
    );
    Ok(settings)
}

/// Load settings from a single TOML file
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MetricsError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }
    load_settings(vec![ConfigSource::File(path.to_string_lossy().to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = load_settings(vec![ConfigSource::Defaults]).unwrap();
        assert_eq!(settings.cache_period(), Duration::from_secs(10));
        assert_eq!(settings.temporality, ExportKindSelector::Cumulative);
        assert_eq!(settings.distribution.kind, AggregationKind::MinMaxSumCount);
        assert_eq!(settings.log_level, LogLevel::Info);
        assert!(settings.views.is_empty());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            cache_period_ms = 0
            temporality = "stateless"
            log_level = "debug"

            [distribution]
            kind = "histogram"
            histogram = {{ boundaries = [1.0, 10.0, 100.0] }}

            [[views]]
            instrument_name = "http.requests"
            keys = ["code"]
            name = "requests"

            [[views]]
            instrument_name_regex = "^db\\."
            aggregation = "exact"
            temporality = "delta"
        "#
        )
        .unwrap();

        let settings = load_file(file.path()).unwrap();
        assert_eq!(settings.cache_period(), Duration::ZERO);
        assert_eq!(settings.temporality, ExportKindSelector::Stateless);
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.distribution.histogram.boundaries, vec![1.0, 10.0, 100.0]);
        assert_eq!(settings.views.len(), 2);

        let config = settings.controller_config().unwrap();
        assert_eq!(config.cache_period, Duration::ZERO);
        assert_eq!(config.views[0].name(), Some("requests"));
        assert_eq!(config.views[0].keys(), Some(&["code".to_string()][..]));
        assert_eq!(config.views[1].aggregation(), Some(AggregationKind::Exact));
        assert_eq!(config.views[1].temporality(), Some(Temporality::Delta));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            load_file("/nonexistent/pullmetrics.toml"),
            Err(MetricsError::Config(_))
        ));
    }

    #[test]
    fn test_multiple_sources() {
        let settings = load_settings(vec![
            ConfigSource::Toml("cache_period_ms = 500\ntemporality = \"delta\"".to_string()),
            ConfigSource::Toml("cache_period_ms = 750".to_string()),
        ])
        .unwrap();

        // Later sources override earlier ones
        assert_eq!(settings.cache_period_ms, 750);
        assert_eq!(settings.temporality, ExportKindSelector::Delta);
    }

    #[test]
    fn test_missing_files_are_skipped_and_env_overrides() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("PULLMETRICS_LAYERED__CACHE_PERIOD_MS", "250") };
        let settings = load_settings(vec![
            ConfigSource::Defaults,
            ConfigSource::File("/nonexistent/pullmetrics.toml".to_string()),
            ConfigSource::Toml("cache_period_ms = 500\nlog_level = \"trace\"".to_string()),
            ConfigSource::Environment("PULLMETRICS_LAYERED".to_string()),
        ])
        .unwrap();
        unsafe { std::env::remove_var("PULLMETRICS_LAYERED__CACHE_PERIOD_MS") };

        assert_eq!(settings.cache_period(), Duration::from_millis(250));
        assert_eq!(settings.log_level, LogLevel::Trace);
    }

    #[test]
    fn test_bad_view_fails_at_load() {
        let result = load_settings(vec![ConfigSource::Toml(
            "[[views]]\ninstrument_name_regex = \"(\"".to_string(),
        )]);
        assert!(matches!(result, Err(MetricsError::Config(msg)) if msg.starts_with("views[0]")));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = load_settings(vec![ConfigSource::Toml(
            "[[views]]\ninstrument_kind = \"gauge\"".to_string(),
        )]);
        assert!(matches!(result, Err(MetricsError::Config(_))));
    }

    #[test]
    fn test_invalid_views() {
        let both = ViewSettings {
            instrument_name: Some("a".to_string()),
            instrument_name_regex: Some("a".to_string()),
            ..Default::default()
        };
        assert!(both.to_view().is_err());

        let bad_regex = ViewSettings {
            instrument_name_regex: Some("(".to_string()),
            ..Default::default()
        };
        assert!(bad_regex.to_view().is_err());

        let orphan_version = ViewSettings {
            library_version: Some("1.0".to_string()),
            ..Default::default()
        };
        assert!(orphan_version.to_view().is_err());

        let settings = Settings {
            views: vec![bad_regex],
            ..Default::default()
        };
        assert!(matches!(settings.controller_config(), Err(MetricsError::Config(_))));
    }

    #[test]
    fn test_non_distribution_selector_is_rejected() {
        let settings = Settings {
            distribution: DistributionSettings {
                kind: AggregationKind::Sum,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(settings.controller_config(), Err(MetricsError::Config(_))));
    }

    #[test]
    fn test_invalid_sketch_settings() {
        let mut settings = Settings::default();
        settings.distribution.sketch.relative_accuracy = 1.5;
        assert!(settings.controller_config().is_err());

        settings.distribution.sketch.relative_accuracy = 0.02;
        settings.distribution.sketch.max_bins = 0;
        assert!(settings.controller_config().is_err());
    }

    #[test]
    fn test_view_settings_library_and_boundaries() {
        let view = ViewSettings {
            library_name: Some("http".to_string()),
            library_version: Some("1.0.0".to_string()),
            number_kind: Some(NumberKind::F64),
            histogram_boundaries: Some(vec![0.5, 1.0]),
            ..Default::default()
        }
        .to_view()
        .unwrap();

        let matching = crate::descriptor::Descriptor::new(
            "latency",
            InstrumentKind::ValueRecorder,
            NumberKind::F64,
            Library::new("http").with_version("1.0.0"),
        );
        assert!(view.matches(&matching));
        assert_eq!(
            view.aggregator_config().map(|c| c.histogram.boundaries.clone()),
            Some(vec![0.5, 1.0])
        );
    }
}
