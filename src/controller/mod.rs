//! Pull-based collection.
//!
//! A [`PullController`] owns the registry that meters record into and the
//! checkpoint set exporters read from. `collect` sweeps the registry into a
//! new checkpoint set and swaps it in only if the whole sweep succeeded;
//! `for_each` always reads the last published set. Sweeps are serialized and
//! a sweep younger than the cache period is reused instead of repeated.
mod config;

pub use config::{ControllerConfig, ControllerConfigBuilder, DEFAULT_CACHE_PERIOD};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, trace, warn};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::checkpoint::CheckpointSet;
use crate::clock::Clock;
use crate::context::Context;
use crate::descriptor::Library;
use crate::error::{MetricsError, Result};
use crate::export::Record;
use crate::meter::{Meter, Registry};
use crate::temporality::TemporalitySelector;
use crate::view::ViewRegistry;

fn poisoned<T>(_: T) -> MetricsError {
    MetricsError::Other("Lock poisoned".to_string())
}

#[derive(Debug, Default)]
struct CollectState {
    last_collection: Option<DateTime<Utc>>,
}

/// Serves the most recent checkpoint set and runs sweeps on demand
#[derive(Debug)]
pub struct PullController {
    registry: Arc<Registry>,
    temporality: Arc<dyn TemporalitySelector>,
    cache_period: Duration,
    collect_state: Mutex<CollectState>,
    checkpoint: RwLock<Arc<CheckpointSet>>,
}

impl PullController {
    pub fn new(config: ControllerConfig) -> Self {
        let views: ViewRegistry = config.views.into_iter().collect();
        debug!(
            "Creating pull controller with {} views, cache period {:?}",
            views.len(),
            config.cache_period
        );
        let registry = Registry::new(config.selector, views);
        let start = registry.now().unwrap_or_else(|_| Utc::now());
        Self {
            registry: Arc::new(registry),
            temporality: config.temporality,
            cache_period: config.cache_period,
            collect_state: Mutex::new(CollectState::default()),
            checkpoint: RwLock::new(Arc::new(CheckpointSet::empty(start))),
        }
    }

    /// A meter for the named instrumentation library
    pub fn meter(&self, name: impl Into<String>) -> Meter {
        self.meter_with_library(Library::new(name))
    }

    pub fn meter_with_library(&self, library: Library) -> Meter {
        Meter::new(Arc::clone(&self.registry), library)
    }

    /// Sweep every series into a new checkpoint set, unless the last sweep
    /// is younger than the cache period. On failure the previous set stays
    /// published and the detached state is returned to the live series.
    pub fn collect(&self, ctx: &Context) -> Result<()> {
        let mut state = self.collect_state.lock().map_err(poisoned)?;
        let now = self.registry.now()?;

        if let Some(last) = state.last_collection {
            if !self.cache_period.is_zero() {
                let period = TimeDelta::from_std(self.cache_period).unwrap_or(TimeDelta::MAX);
                if now.signed_duration_since(last) < period {
                    trace!("Serving cached checkpoint set from {}", last);
                    return Ok(());
                }
            }
        }

        ctx.check()?;
        let accumulations = self.registry.collect(ctx)?;
        let previous = self.checkpoint_set()?;

        let published = previous
            .next(&accumulations, self.temporality.as_ref(), ctx, now)
            .and_then(|next| {
                let entries = next.len();
                let mut current = self.checkpoint.write().map_err(poisoned)?;
                *current = Arc::new(next);
                Ok(entries)
            });

        match published {
            Ok(entries) => {
                state.last_collection = Some(now);
                debug!(
                    "Collected {} updated series into {} checkpoint entries",
                    accumulations.len(),
                    entries
                );
                Ok(())
            }
            Err(e) => {
                warn!("Collection failed, keeping previous checkpoint set: {}", e);
                self.registry.restore(accumulations);
                Err(e)
            }
        }
    }

    /// Visit every record of the current checkpoint set. `selector` decides
    /// the temporality of records whose view does not fix one.
    pub fn for_each<F>(&self, selector: &dyn TemporalitySelector, visit: F) -> Result<()>
    where
        F: FnMut(&Record<'_>) -> Result<()>,
    {
        self.checkpoint_set()?.for_each(selector, visit)
    }

    /// Replace the time source used for cache checks, measurement and
    /// record timestamps. Before the first successful sweep this also moves
    /// the start of cumulative records to the new clock's present.
    pub fn set_clock<C: Clock + 'static>(&self, clock: C) -> Result<()> {
        let state = self.collect_state.lock().map_err(poisoned)?;
        let clock: Arc<dyn Clock> = Arc::new(clock);
        if state.last_collection.is_none() {
            let mut current = self.checkpoint.write().map_err(poisoned)?;
            *current = Arc::new(CheckpointSet::empty(clock.now()));
        }
        self.registry.set_clock(clock)
    }

    /// The currently published checkpoint set
    pub fn checkpoint_set(&self) -> Result<Arc<CheckpointSet>> {
        self.checkpoint
            .read()
            .map(|set| Arc::clone(&set))
            .map_err(poisoned)
    }

    /// Clock time at the start of the last successful sweep
    pub fn last_collection(&self) -> Option<DateTime<Utc>> {
        self.collect_state.lock().ok()?.last_collection
    }

    pub fn cache_period(&self) -> Duration {
        self.cache_period
    }

    /// Number of live series across all meters
    pub fn series_count(&self) -> usize {
        self.registry.series_count()
    }
}

impl Default for PullController {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}
