//! Views: operator-defined overrides matched against instrument identity.
//!
//! A [`View`] pairs a set of matchers with a set of overrides. Every matcher
//! is optional; an unset matcher accepts anything. Views are registered once,
//! in order, into a [`ViewRegistry`] and the first view whose set matchers
//! all accept an instrument is the one applied to it.
use log::warn;
use regex::Regex;
use std::sync::Arc;

use crate::aggregator::{AggregationKind, AggregatorConfig};
use crate::descriptor::{Descriptor, InstrumentKind, Library};
use crate::number::NumberKind;
use crate::temporality::Temporality;

/// How a view matches instrument names
#[derive(Debug, Clone)]
pub enum NameMatcher {
    /// Exact string equality
    Exact(String),
    /// Unanchored regular expression search
    Regex(Regex),
}

impl NameMatcher {
    fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Exact(expected) => expected == name,
            NameMatcher::Regex(re) => re.is_match(name),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Matchers {
    instrument_name: Option<NameMatcher>,
    instrument_kind: Option<InstrumentKind>,
    number_kind: Option<NumberKind>,
    library_name: Option<String>,
    library_version: Option<String>,
    library_schema_url: Option<String>,
}

fn accepts<T: PartialEq + ?Sized>(expected: Option<&T>, actual: Option<&T>) -> bool {
    match expected {
        None => true,
        Some(expected) => actual == Some(expected),
    }
}

impl Matchers {
    fn matches(&self, descriptor: &Descriptor) -> bool {
        let library = descriptor.library();
        accepts(self.library_name.as_deref(), Some(library.name.as_str()))
            && accepts(self.library_version.as_deref(), library.version.as_deref())
            && accepts(self.library_schema_url.as_deref(), library.schema_url.as_deref())
            && self
                .instrument_name
                .as_ref()
                .is_none_or(|m| m.matches(descriptor.name()))
            && accepts(self.instrument_kind.as_ref(), Some(&descriptor.kind()))
            && accepts(self.number_kind.as_ref(), Some(&descriptor.number_kind()))
    }
}

/// An override rule for the instruments it matches
#[derive(Debug, Clone, Default)]
pub struct View {
    matchers: Matchers,
    keys: Option<Vec<String>>,
    name: Option<String>,
    description: Option<String>,
    aggregation: Option<AggregationKind>,
    temporality: Option<Temporality>,
    aggregator_config: Option<AggregatorConfig>,
}

impl View {
    pub fn builder() -> ViewBuilder {
        ViewBuilder::default()
    }

    /// Whether every set matcher accepts this instrument
    pub fn matches(&self, descriptor: &Descriptor) -> bool {
        self.matchers.matches(descriptor)
    }

    /// Views matching an exact instrument name are meant for one instrument
    pub fn is_single_instrument(&self) -> bool {
        matches!(self.matchers.instrument_name, Some(NameMatcher::Exact(ref n)) if !n.is_empty())
    }

    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// `None` keeps every label key, `Some(keys)` keeps only `keys`
    pub fn keys(&self) -> Option<&[String]> {
        self.keys.as_deref()
    }

    pub fn aggregation(&self) -> Option<AggregationKind> {
        self.aggregation
    }

    pub fn temporality(&self) -> Option<Temporality> {
        self.temporality
    }

    pub fn aggregator_config(&self) -> Option<&AggregatorConfig> {
        self.aggregator_config.as_ref()
    }
}

/// Named setters for a [`View`]; `build` freezes the result
#[derive(Debug, Default)]
pub struct ViewBuilder {
    view: View,
}

impl ViewBuilder {
    /// Match one instrument by exact name; replaces any name regex
    pub fn match_instrument_name(mut self, name: impl Into<String>) -> Self {
        self.view.matchers.instrument_name = Some(NameMatcher::Exact(name.into()));
        self
    }

    /// Match instrument names by regex; replaces any exact name
    pub fn match_instrument_name_regex(mut self, re: Regex) -> Self {
        self.view.matchers.instrument_name = Some(NameMatcher::Regex(re));
        self
    }

    pub fn match_instrument_kind(mut self, kind: InstrumentKind) -> Self {
        self.view.matchers.instrument_kind = Some(kind);
        self
    }

    pub fn match_number_kind(mut self, kind: NumberKind) -> Self {
        self.view.matchers.number_kind = Some(kind);
        self
    }

    /// Match the owning library; version and schema are only matched when set
    pub fn match_library(mut self, library: Library) -> Self {
        self.view.matchers.library_name = Some(library.name);
        self.view.matchers.library_version = library.version;
        self.view.matchers.library_schema_url = library.schema_url;
        self
    }

    /// Restrict exported labels to these keys. Calls accumulate; passing no
    /// keys at all keeps none.
    pub fn with_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.view
            .keys
            .get_or_insert_with(Vec::new)
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Export every label key (the default)
    pub fn with_all_keys(mut self) -> Self {
        self.view.keys = None;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.view.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.view.description = Some(description.into());
        self
    }

    pub fn with_aggregation(mut self, kind: AggregationKind) -> Self {
        self.view.aggregation = Some(kind);
        self
    }

    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.view.temporality = Some(temporality);
        self
    }

    pub fn with_aggregator_config(mut self, config: AggregatorConfig) -> Self {
        self.view.aggregator_config = Some(config);
        self
    }

    pub fn build(self) -> View {
        self.view
    }
}

/// Ordered, read-only collection of views
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    views: Vec<Arc<View>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a view; earlier views take precedence
    pub fn register(&mut self, view: View) -> &mut Self {
        if view.has_name() && !view.is_single_instrument() {
            warn!(
                "View renames instruments to '{}' but does not match a single instrument name",
                view.name().unwrap_or_default()
            );
        }
        self.views.push(Arc::new(view));
        self
    }

    /// The first registered view matching this instrument
    pub fn lookup(&self, descriptor: &Descriptor) -> Option<Arc<View>> {
        self.views.iter().find(|v| v.matches(descriptor)).cloned()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

impl FromIterator<View> for ViewRegistry {
    fn from_iter<I: IntoIterator<Item = View>>(iter: I) -> Self {
        let mut registry = ViewRegistry::new();
        for view in iter {
            registry.register(view);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str, kind: InstrumentKind, number_kind: NumberKind) -> Descriptor {
        Descriptor::new(
            name,
            kind,
            number_kind,
            Library::new("http").with_version("1.2.0"),
        )
    }

    #[test]
    fn test_empty_view_matches_everything() {
        let view = View::builder().build();
        assert!(view.matches(&desc("a", InstrumentKind::Counter, NumberKind::I64)));
        assert!(view.matches(&desc("b", InstrumentKind::ValueObserver, NumberKind::F64)));
        assert!(!view.is_single_instrument());
    }

    #[test]
    fn test_each_set_matcher_constrains() {
        let d = desc("requests", InstrumentKind::Counter, NumberKind::I64);

        assert!(View::builder().match_instrument_name("requests").build().matches(&d));
        assert!(!View::builder().match_instrument_name("other").build().matches(&d));
        assert!(!View::builder()
            .match_instrument_kind(InstrumentKind::ValueRecorder)
            .build()
            .matches(&d));
        assert!(!View::builder().match_number_kind(NumberKind::F64).build().matches(&d));
        assert!(View::builder().match_library(Library::new("http")).build().matches(&d));
        assert!(!View::builder()
            .match_library(Library::new("http").with_version("2.0.0"))
            .build()
            .matches(&d));
        assert!(!View::builder()
            .match_library(Library::new("http").with_schema_url("https://schema"))
            .build()
            .matches(&d));
    }

    #[test]
    fn test_regex_must_match() {
        let view = View::builder()
            .match_instrument_name_regex(Regex::new("^http\\.").unwrap())
            .build();
        assert!(view.matches(&desc("http.latency", InstrumentKind::ValueRecorder, NumberKind::F64)));
        assert!(!view.matches(&desc("db.latency", InstrumentKind::ValueRecorder, NumberKind::F64)));
    }

    #[test]
    fn test_name_matchers_replace_each_other() {
        let view = View::builder()
            .match_instrument_name("exact")
            .match_instrument_name_regex(Regex::new("^re").unwrap())
            .build();
        assert!(view.matches(&desc("regex", InstrumentKind::Counter, NumberKind::I64)));
        assert!(!view.matches(&desc("exact", InstrumentKind::Counter, NumberKind::I64)));
        assert!(!view.is_single_instrument());
    }

    #[test]
    fn test_keys_semantics() {
        assert_eq!(View::builder().build().keys(), None);
        let none: Vec<String> = Vec::new();
        assert_eq!(View::builder().with_keys(none).build().keys(), Some(&[][..]));
        let view = View::builder().with_keys(["a"]).with_keys(["b"]).build();
        assert_eq!(view.keys(), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(View::builder().with_keys(["a"]).with_all_keys().build().keys(), None);
    }

    #[test]
    fn test_first_match_wins() {
        let registry: ViewRegistry = vec![
            View::builder()
                .match_instrument_name("latency")
                .with_aggregation(AggregationKind::Histogram)
                .build(),
            View::builder()
                .match_instrument_kind(InstrumentKind::ValueRecorder)
                .with_aggregation(AggregationKind::Exact)
                .with_temporality(Temporality::Delta)
                .build(),
        ]
        .into_iter()
        .collect();

        let latency = desc("latency", InstrumentKind::ValueRecorder, NumberKind::F64);
        let view = registry.lookup(&latency).unwrap();
        assert_eq!(view.aggregation(), Some(AggregationKind::Histogram));
        // No merging with the second view.
        assert_eq!(view.temporality(), None);

        let size = desc("size", InstrumentKind::ValueRecorder, NumberKind::F64);
        assert_eq!(registry.lookup(&size).unwrap().aggregation(), Some(AggregationKind::Exact));

        let count = desc("count", InstrumentKind::Counter, NumberKind::I64);
        assert!(registry.lookup(&count).is_none());
        assert_eq!(registry.len(), 2);
    }
}
