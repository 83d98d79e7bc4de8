//! Measurement intake: instrument registration and the series map.
//!
//! The [`Registry`] owns every instrument and every live series. Series are
//! created lazily on first measurement and live as long as the registry.
//! Each series guards its accumulator with its own mutex, so recording only
//! contends with other writers of the same series and with the sweep.
mod instruments;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::aggregator::{AggregationKind, Aggregator, AggregatorConfig};
use crate::clock::{Clock, SystemClock};
use crate::context::Context;
use crate::descriptor::{Descriptor, InstrumentKind, Library};
use crate::error::{MetricsError, Result};
use crate::labels::LabelSet;
use crate::number::Number;
use crate::selector::AggregatorSelector;
use crate::view::{View, ViewRegistry};

pub use instruments::{
    AsyncInstrument, BoundInstrument, Counter, InstrumentBuilder, Meter, ObserverBuilder,
    ObserverResult, SyncInstrumentKind, UpDownCounter, ValueRecorder,
};

/// Everything resolved about an instrument at registration time.
/// Opaque outside this crate.
#[derive(Debug)]
pub struct InstrumentCore {
    id: usize,
    descriptor: Arc<Descriptor>,
    export_descriptor: Arc<Descriptor>,
    view: Option<Arc<View>>,
    aggregation: AggregationKind,
    config: AggregatorConfig,
}

impl InstrumentCore {
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    /// Descriptor as presented to exporters, after view renaming
    pub(crate) fn export_descriptor(&self) -> &Arc<Descriptor> {
        &self.export_descriptor
    }

    pub(crate) fn view(&self) -> Option<&View> {
        self.view.as_deref()
    }

    pub(crate) fn aggregation(&self) -> AggregationKind {
        self.aggregation
    }

    fn new_aggregator(&self) -> Aggregator {
        Aggregator::new(self.aggregation, self.descriptor.number_kind(), &self.config)
    }

    /// Reject measurements the instrument cannot accept
    fn check_range(&self, number: Number) -> Result<()> {
        if number.is_nan() {
            return Err(MetricsError::Instrument(format!(
                "NaN measurement for {}",
                self.descriptor.name()
            )));
        }
        if self.descriptor.kind().is_monotonic() && number.is_negative() {
            return Err(MetricsError::Instrument(format!(
                "negative measurement {} for monotonic {} {}",
                number,
                self.descriptor.kind(),
                self.descriptor.name()
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SeriesState {
    aggregator: Aggregator,
    updated: bool,
}

/// One (instrument, label set) time series and its live accumulator
#[derive(Debug)]
pub(crate) struct Series {
    instrument: Arc<InstrumentCore>,
    labels: LabelSet,
    state: Mutex<SeriesState>,
}

impl Series {
    fn new(instrument: Arc<InstrumentCore>, labels: LabelSet) -> Self {
        let aggregator = instrument.new_aggregator();
        Self {
            instrument,
            labels,
            state: Mutex::new(SeriesState {
                aggregator,
                updated: false,
            }),
        }
    }

    pub(crate) fn instrument(&self) -> &Arc<InstrumentCore> {
        &self.instrument
    }

    pub(crate) fn labels(&self) -> &LabelSet {
        &self.labels
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SeriesState>> {
        self.state
            .lock()
            .map_err(|_| MetricsError::Other("Lock poisoned".to_string()))
    }

    /// Add a synchronous measurement taken at `at`
    fn record(&self, number: Number, at: DateTime<Utc>) -> Result<()> {
        self.instrument.check_range(number)?;
        let mut state = self.lock()?;
        state.aggregator.update(number, at)?;
        state.updated = true;
        Ok(())
    }

    /// Replace this sweep's observation for an asynchronous instrument
    fn observe(&self, number: Number, at: DateTime<Utc>) -> Result<()> {
        self.instrument.check_range(number)?;
        let mut fresh = self.instrument.new_aggregator();
        fresh.update(number, at)?;
        let mut state = self.lock()?;
        state.aggregator = fresh;
        state.updated = true;
        Ok(())
    }

    /// Detach everything recorded since the last sweep
    fn take(&self) -> Result<Option<Aggregator>> {
        let mut state = self.lock()?;
        if !state.updated {
            return Ok(None);
        }
        state.updated = false;
        Ok(Some(state.aggregator.synchronized_move()))
    }

    /// Put back state taken by a sweep that did not complete
    fn restore(&self, taken: &Aggregator) -> Result<()> {
        let mut state = self.lock()?;
        if self.instrument.descriptor.kind().is_asynchronous() && state.updated {
            // A newer observation already replaced the one being restored.
            return Ok(());
        }
        state.aggregator.merge(taken)?;
        state.updated = true;
        Ok(())
    }
}

/// State detached from one series during a sweep
#[derive(Debug)]
pub(crate) struct Accumulation {
    pub(crate) series: Arc<Series>,
    pub(crate) aggregator: Aggregator,
}

type ObserverCallback = Box<dyn Fn() -> Result<Vec<(LabelSet, Number)>> + Send + Sync>;

struct Observer {
    instrument: Arc<InstrumentCore>,
    callback: ObserverCallback,
}

type InstrumentKey = (Library, String);
type SeriesKey = (usize, LabelSet);

/// Instruments, series and observer callbacks shared by all meters of a controller
pub struct Registry {
    selector: Arc<dyn AggregatorSelector>,
    views: ViewRegistry,
    instruments: RwLock<HashMap<InstrumentKey, Arc<InstrumentCore>>>,
    series: RwLock<HashMap<SeriesKey, Arc<Series>>>,
    observers: RwLock<Vec<Arc<Observer>>>,
    clock: RwLock<Arc<dyn Clock>>,
    next_id: AtomicUsize,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("selector", &self.selector)
            .field("views", &self.views.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(selector: Arc<dyn AggregatorSelector>, views: ViewRegistry) -> Self {
        Self {
            selector,
            views,
            instruments: RwLock::new(HashMap::new()),
            series: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            clock: RwLock::new(Arc::new(SystemClock)),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Current time of the active clock
    pub(crate) fn now(&self) -> Result<DateTime<Utc>> {
        self.clock
            .read()
            .map(|clock| clock.now())
            .map_err(|_| MetricsError::Other("Lock poisoned".to_string()))
    }

    pub(crate) fn set_clock(&self, clock: Arc<dyn Clock>) -> Result<()> {
        let mut current = self
            .clock
            .write()
            .map_err(|_| MetricsError::Other("Lock poisoned".to_string()))?;
        *current = clock;
        Ok(())
    }

    /// Register an instrument, or return the existing one with the same identity
    pub(crate) fn register(&self, descriptor: Descriptor) -> Result<Arc<InstrumentCore>> {
        let key = (descriptor.library().clone(), descriptor.name().to_string());
        let mut instruments = self
            .instruments
            .write()
            .map_err(|_| MetricsError::Other("Lock poisoned".to_string()))?;

        if let Some(existing) = instruments.get(&key) {
            let desc = existing.descriptor();
            if desc.kind() != descriptor.kind() || desc.number_kind() != descriptor.number_kind() {
                return Err(MetricsError::Instrument(format!(
                    "instrument '{}' already registered as {} ({:?})",
                    descriptor.name(),
                    desc.kind(),
                    desc.number_kind()
                )));
            }
            return Ok(Arc::clone(existing));
        }

        let view = self.views.lookup(&descriptor);
        let (aggregation, config) = self.selector.select_for(&descriptor, view.as_deref());
        let export_descriptor = match &view {
            Some(v) if v.name().is_some() || v.description().is_some() => {
                Arc::new(descriptor.renamed(v.name(), v.description()))
            }
            _ => Arc::new(descriptor.clone()),
        };

        debug!(
            "Registered {} '{}' with {} aggregation{}",
            descriptor.kind(),
            descriptor.name(),
            aggregation,
            if view.is_some() { " (view applied)" } else { "" }
        );

        let core = Arc::new(InstrumentCore {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            descriptor: Arc::new(descriptor),
            export_descriptor,
            view,
            aggregation,
            config,
        });
        instruments.insert(key, Arc::clone(&core));
        Ok(core)
    }

    /// Register an asynchronous instrument together with its callback.
    /// An instrument has exactly one callback; registering it again fails.
    pub(crate) fn register_observer(
        &self,
        descriptor: Descriptor,
        callback: ObserverCallback,
    ) -> Result<Arc<InstrumentCore>> {
        let mut observers = self
            .observers
            .write()
            .map_err(|_| MetricsError::Other("Lock poisoned".to_string()))?;
        let instrument = self.register(descriptor)?;
        if observers.iter().any(|o| o.instrument.id() == instrument.id()) {
            return Err(MetricsError::Instrument(format!(
                "{} '{}' already has a callback",
                instrument.descriptor().kind(),
                instrument.descriptor().name()
            )));
        }
        observers.push(Arc::new(Observer {
            instrument: Arc::clone(&instrument),
            callback,
        }));
        Ok(instrument)
    }

    /// Find or create the series for these labels
    pub(crate) fn series_for(
        &self,
        instrument: &Arc<InstrumentCore>,
        labels: LabelSet,
    ) -> Result<Arc<Series>> {
        let key = (instrument.id(), labels);
        {
            let series = self
                .series
                .read()
                .map_err(|_| MetricsError::Other("Lock poisoned".to_string()))?;
            if let Some(existing) = series.get(&key) {
                return Ok(Arc::clone(existing));
            }
        }

        let mut series = self
            .series
            .write()
            .map_err(|_| MetricsError::Other("Lock poisoned".to_string()))?;
        let labels = key.1.clone();
        let entry = series
            .entry(key)
            .or_insert_with(|| Arc::new(Series::new(Arc::clone(instrument), labels)));
        Ok(Arc::clone(entry))
    }

    pub(crate) fn record(
        &self,
        instrument: &Arc<InstrumentCore>,
        labels: LabelSet,
        number: Number,
    ) -> Result<()> {
        // Validate before creating a series so rejected values leave no trace.
        instrument.check_range(number)?;
        let at = self.now()?;
        self.series_for(instrument, labels)?.record(number, at)
    }

    /// Record into an already resolved series
    pub(crate) fn record_series(&self, series: &Series, number: Number) -> Result<()> {
        series.record(number, self.now()?)
    }

    /// Number of live series
    pub fn series_count(&self) -> usize {
        self.series.read().map(|s| s.len()).unwrap_or(0)
    }

    fn run_observers(&self, ctx: &Context) -> Result<()> {
        let observers: Vec<Arc<Observer>> = self
            .observers
            .read()
            .map_err(|_| MetricsError::Other("Lock poisoned".to_string()))?
            .clone();
        let at = self.now()?;

        for observer in observers {
            ctx.check()?;
            let observations = (observer.callback)().map_err(|e| {
                MetricsError::Collection(format!(
                    "observer '{}' failed: {}",
                    observer.instrument.descriptor().name(),
                    e
                ))
            })?;
            for (labels, number) in observations {
                let series = self.series_for(&observer.instrument, labels)?;
                if let Err(e) = series.observe(number, at) {
                    warn!(
                        "Dropping observation for {}: {}",
                        observer.instrument.descriptor().name(),
                        e
                    );
                }
            }
        }
        Ok(())
    }

    /// Run observers, then detach the state of every series updated since the
    /// last successful sweep. On failure everything detached so far is restored.
    pub(crate) fn collect(&self, ctx: &Context) -> Result<Vec<Accumulation>> {
        self.run_observers(ctx)?;

        let live: Vec<Arc<Series>> = self
            .series
            .read()
            .map_err(|_| MetricsError::Other("Lock poisoned".to_string()))?
            .values()
            .cloned()
            .collect();

        let mut accumulations = Vec::new();
        for series in live {
            let taken = ctx.check().and_then(|_| series.take());
            match taken {
                Ok(Some(aggregator)) => accumulations.push(Accumulation { series, aggregator }),
                Ok(None) => {}
                Err(e) => {
                    self.restore(accumulations);
                    return Err(e);
                }
            }
        }
        debug!("Swept {} updated series", accumulations.len());
        Ok(accumulations)
    }

    /// Merge detached state back into the live series
    pub(crate) fn restore(&self, accumulations: Vec<Accumulation>) {
        for acc in accumulations {
            if let Err(e) = acc.series.restore(&acc.aggregator) {
                error!(
                    "Failed to restore state for {}{{{}}}: {}",
                    acc.series.instrument().descriptor().name(),
                    acc.series.labels(),
                    e
                );
            }
        }
    }

    /// Kind of instrument registered under this identity, if any
    pub fn instrument_kind(&self, library: &Library, name: &str) -> Option<InstrumentKind> {
        let instruments = self.instruments.read().ok()?;
        instruments
            .get(&(library.clone(), name.to_string()))
            .map(|core| core.descriptor().kind())
    }
}
