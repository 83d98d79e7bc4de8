//! Meters and the instruments they create
use log::warn;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{InstrumentCore, Registry, Series};
use crate::descriptor::{Descriptor, InstrumentKind, Library};
use crate::error::Result;
use crate::labels::{KeyValue, LabelSet};
use crate::number::{MetricNumber, Number};

/// Creates instruments on behalf of one instrumentation library
#[derive(Debug, Clone)]
pub struct Meter {
    registry: Arc<Registry>,
    library: Library,
}

impl Meter {
    pub(crate) fn new(registry: Arc<Registry>, library: Library) -> Self {
        Self { registry, library }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn counter<T: MetricNumber>(&self, name: impl Into<String>) -> InstrumentBuilder<'_, Counter<T>> {
        InstrumentBuilder::new(self, name.into())
    }

    pub fn up_down_counter<T: MetricNumber>(
        &self,
        name: impl Into<String>,
    ) -> InstrumentBuilder<'_, UpDownCounter<T>> {
        InstrumentBuilder::new(self, name.into())
    }

    pub fn value_recorder<T: MetricNumber>(
        &self,
        name: impl Into<String>,
    ) -> InstrumentBuilder<'_, ValueRecorder<T>> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Monotonic cumulative totals reported by `callback` at collection time
    pub fn sum_observer<T, F>(&self, name: impl Into<String>, callback: F) -> ObserverBuilder<'_, T>
    where
        T: MetricNumber,
        F: Fn(&mut ObserverResult<T>) -> Result<()> + Send + Sync + 'static,
    {
        ObserverBuilder::new(self, name.into(), InstrumentKind::SumObserver, callback)
    }

    /// Non-monotonic cumulative totals reported by `callback` at collection time
    pub fn up_down_sum_observer<T, F>(&self, name: impl Into<String>, callback: F) -> ObserverBuilder<'_, T>
    where
        T: MetricNumber,
        F: Fn(&mut ObserverResult<T>) -> Result<()> + Send + Sync + 'static,
    {
        ObserverBuilder::new(self, name.into(), InstrumentKind::UpDownSumObserver, callback)
    }

    /// Point-in-time values reported by `callback` at collection time
    pub fn value_observer<T, F>(&self, name: impl Into<String>, callback: F) -> ObserverBuilder<'_, T>
    where
        T: MetricNumber,
        F: Fn(&mut ObserverResult<T>) -> Result<()> + Send + Sync + 'static,
    {
        ObserverBuilder::new(self, name.into(), InstrumentKind::ValueObserver, callback)
    }
}

/// Shared state of every synchronous instrument handle
#[derive(Debug, Clone)]
struct SyncInstrument<T> {
    registry: Arc<Registry>,
    core: Arc<InstrumentCore>,
    _marker: PhantomData<T>,
}

impl<T: MetricNumber> SyncInstrument<T> {
    fn record(&self, value: T, labels: &[KeyValue]) {
        let labels = LabelSet::from(labels);
        if let Err(e) = self.registry.record(&self.core, labels, value.into_number()) {
            warn!("Dropping measurement for {}: {}", self.core.descriptor().name(), e);
        }
    }

    fn bind(&self, labels: &[KeyValue]) -> Result<BoundInstrument<T>> {
        let series = self.registry.series_for(&self.core, LabelSet::from(labels))?;
        Ok(BoundInstrument {
            registry: Arc::clone(&self.registry),
            series,
            _marker: PhantomData,
        })
    }
}

/// Instrument types an [`InstrumentBuilder`] can produce
pub trait SyncInstrumentKind: Sized {
    const KIND: InstrumentKind;
    type Number: MetricNumber;

    #[doc(hidden)]
    fn from_parts(registry: Arc<Registry>, core: Arc<InstrumentCore>) -> Self;
}

macro_rules! sync_instrument {
    ($(#[$doc:meta])* $name:ident, $kind:expr, $method:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name<T> {
            inner: SyncInstrument<T>,
        }

        impl<T: MetricNumber> $name<T> {
            pub fn $method(&self, value: T, labels: &[KeyValue]) {
                self.inner.record(value, labels)
            }

            /// Resolve the series for `labels` once, for repeated updates
            pub fn bind(&self, labels: &[KeyValue]) -> Result<BoundInstrument<T>> {
                self.inner.bind(labels)
            }

            pub fn descriptor(&self) -> &Descriptor {
                self.inner.core.descriptor()
            }
        }

        impl<T: MetricNumber> SyncInstrumentKind for $name<T> {
            const KIND: InstrumentKind = $kind;
            type Number = T;

            fn from_parts(registry: Arc<Registry>, core: Arc<InstrumentCore>) -> Self {
                Self {
                    inner: SyncInstrument {
                        registry,
                        core,
                        _marker: PhantomData,
                    },
                }
            }
        }
    };
}

sync_instrument!(
    /// Monotonic sum of increments
    Counter,
    InstrumentKind::Counter,
    add
);
sync_instrument!(
    /// Sum of increments and decrements
    UpDownCounter,
    InstrumentKind::UpDownCounter,
    add
);
sync_instrument!(
    /// Distribution of recorded values
    ValueRecorder,
    InstrumentKind::ValueRecorder,
    record
);

/// A synchronous instrument bound to one label set
#[derive(Debug, Clone)]
pub struct BoundInstrument<T> {
    registry: Arc<Registry>,
    series: Arc<Series>,
    _marker: PhantomData<T>,
}

impl<T: MetricNumber> BoundInstrument<T> {
    pub fn update(&self, value: T) {
        if let Err(e) = self.registry.record_series(&self.series, value.into_number()) {
            warn!(
                "Dropping measurement for {}: {}",
                self.series.instrument().descriptor().name(),
                e
            );
        }
    }

    pub fn labels(&self) -> &LabelSet {
        self.series.labels()
    }
}

/// Builder for synchronous instruments
#[derive(Debug)]
pub struct InstrumentBuilder<'a, I> {
    meter: &'a Meter,
    name: String,
    description: String,
    unit: String,
    _marker: PhantomData<I>,
}

impl<'a, I: SyncInstrumentKind> InstrumentBuilder<'a, I> {
    fn new(meter: &'a Meter, name: String) -> Self {
        Self {
            meter,
            name,
            description: String::new(),
            unit: String::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn build(self) -> Result<I> {
        let descriptor = Descriptor::new(
            self.name,
            I::KIND,
            <I::Number as MetricNumber>::KIND,
            self.meter.library.clone(),
        )
        .with_description(self.description)
        .with_unit(self.unit);
        let core = self.meter.registry.register(descriptor)?;
        Ok(I::from_parts(Arc::clone(&self.meter.registry), core))
    }
}

/// Collects the observations made by one callback invocation.
/// Observing the same label set twice keeps the last value.
#[derive(Debug)]
pub struct ObserverResult<T> {
    observations: HashMap<LabelSet, Number>,
    _marker: PhantomData<T>,
}

impl<T: MetricNumber> ObserverResult<T> {
    fn new() -> Self {
        Self {
            observations: HashMap::new(),
            _marker: PhantomData,
        }
    }

    pub fn observe(&mut self, value: T, labels: &[KeyValue]) {
        self.observations.insert(LabelSet::from(labels), value.into_number());
    }
}

/// Builder for asynchronous instruments
pub struct ObserverBuilder<'a, T> {
    meter: &'a Meter,
    name: String,
    kind: InstrumentKind,
    description: String,
    unit: String,
    callback: Box<dyn Fn(&mut ObserverResult<T>) -> Result<()> + Send + Sync>,
}

impl<'a, T: MetricNumber> ObserverBuilder<'a, T> {
    fn new<F>(meter: &'a Meter, name: String, kind: InstrumentKind, callback: F) -> Self
    where
        F: Fn(&mut ObserverResult<T>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            meter,
            name,
            kind,
            description: String::new(),
            unit: String::new(),
            callback: Box::new(callback),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn build(self) -> Result<AsyncInstrument<T>> {
        let descriptor = Descriptor::new(self.name, self.kind, T::KIND, self.meter.library.clone())
            .with_description(self.description)
            .with_unit(self.unit);
        let callback = self.callback;
        let core = self.meter.registry.register_observer(
            descriptor,
            Box::new(move || {
                let mut result = ObserverResult::new();
                callback(&mut result)?;
                Ok(result.observations.into_iter().collect())
            }),
        )?;
        Ok(AsyncInstrument {
            core,
            _marker: PhantomData,
        })
    }
}

/// Handle to a registered asynchronous instrument
#[derive(Debug, Clone)]
pub struct AsyncInstrument<T> {
    core: Arc<InstrumentCore>,
    _marker: PhantomData<T>,
}

impl<T> AsyncInstrument<T> {
    pub fn descriptor(&self) -> &Descriptor {
        self.core.descriptor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::selector::SimpleSelector;
    use crate::view::ViewRegistry;

    fn meter() -> Meter {
        let registry = Arc::new(Registry::new(Arc::new(SimpleSelector::exact()), ViewRegistry::new()));
        Meter::new(registry, Library::new("test").with_version("0.1.0"))
    }

    fn swept_sum(meter: &Meter) -> Vec<Option<Number>> {
        meter
            .registry
            .collect(&Context::background())
            .unwrap()
            .iter()
            .map(|a| a.aggregator.sum())
            .collect()
    }

    #[test]
    fn test_counter_builder_sets_descriptor() {
        let meter = meter();
        let counter = meter
            .counter::<i64>("requests")
            .with_description("served requests")
            .with_unit("1")
            .build()
            .unwrap();
        let desc = counter.descriptor();
        assert_eq!(desc.name(), "requests");
        assert_eq!(desc.kind(), InstrumentKind::Counter);
        assert_eq!(desc.description(), "served requests");
        assert_eq!(desc.unit(), "1");
        assert_eq!(desc.library().version.as_deref(), Some("0.1.0"));
    }

    #[test]
    fn test_counter_drops_negative_and_nan() {
        let meter = meter();
        let counter = meter.counter::<f64>("c").build().unwrap();
        counter.add(1.5, &[]);
        counter.add(-1.0, &[]);
        counter.add(f64::NAN, &[]);
        assert_eq!(swept_sum(&meter), vec![Some(Number::F64(1.5))]);
    }

    #[test]
    fn test_up_down_counter_accepts_negative() {
        let meter = meter();
        let counter = meter.up_down_counter::<i64>("queue").build().unwrap();
        counter.add(5, &[]);
        counter.add(-7, &[]);
        assert_eq!(swept_sum(&meter), vec![Some(Number::I64(-2))]);
    }

    #[test]
    fn test_bound_instrument_shares_series() {
        let meter = meter();
        let recorder = meter.value_recorder::<i64>("latency").build().unwrap();
        let bound = recorder.bind(&[KeyValue::string("route", "/")]).unwrap();
        bound.update(3);
        recorder.record(4, &[KeyValue::string("route", "/")]);
        assert_eq!(bound.labels().encoded(), "route=/");
        assert_eq!(swept_sum(&meter), vec![Some(Number::I64(7))]);
    }

    #[test]
    fn test_observer_last_observation_wins() {
        let meter = meter();
        meter
            .sum_observer::<i64, _>("cpu.time", |result| {
                result.observe(10, &[KeyValue::string("cpu", "0")]);
                result.observe(12, &[KeyValue::string("cpu", "0")]);
                Ok(())
            })
            .build()
            .unwrap();
        assert_eq!(swept_sum(&meter), vec![Some(Number::I64(12))]);
        // Callbacks run again on every sweep.
        assert_eq!(swept_sum(&meter), vec![Some(Number::I64(12))]);
    }

    #[test]
    fn test_observer_error_fails_sweep() {
        let meter = meter();
        meter
            .value_observer::<f64, _>("broken", |_| {
                Err(crate::error::MetricsError::Other("sensor offline".to_string()))
            })
            .build()
            .unwrap();
        assert!(meter.registry.collect(&Context::background()).is_err());
    }

    #[test]
    fn test_second_callback_for_same_observer_is_rejected() {
        let meter = meter();
        meter
            .value_observer::<i64, _>("g", |result| {
                result.observe(1, &[]);
                Ok(())
            })
            .build()
            .unwrap();
        let again = meter
            .value_observer::<i64, _>("g", |result| {
                result.observe(2, &[]);
                Ok(())
            })
            .build();
        assert!(matches!(again, Err(crate::error::MetricsError::Instrument(_))));

        let swept = meter.registry.collect(&Context::background()).unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].aggregator.last_value().map(|(v, _)| v), Some(Number::I64(1)));
    }
}
