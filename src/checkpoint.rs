//! Checkpoint sets: the frozen result of one completed sweep.
//!
//! Each entry is keyed by instrument and exported label set (after a view's
//! key filter) and holds up to two aggregations: the delta detached by the
//! last sweep, and the cumulative state when the entry's temporality needs
//! memory. Precomputed sums always keep their last total, since their delta
//! is derived by subtraction. The set also keeps the last observed total of
//! every source series of a precomputed sum, before key filtering, so a
//! collapsed group still counts members that were not observed this sweep.
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry as MapEntry;
use std::sync::Arc;

use crate::aggregator::{AggregationKind, Aggregator};
use crate::context::Context;
use crate::error::{MetricsError, Result};
use crate::export::Record;
use crate::labels::LabelSet;
use crate::meter::{Accumulation, InstrumentCore};
use crate::temporality::{Temporality, TemporalitySelector};
use crate::view::View;

type SeriesKey = (usize, LabelSet);

fn is_precomputed(instrument: &InstrumentCore) -> bool {
    instrument.descriptor().kind().is_precomputed_sum() && instrument.aggregation() == AggregationKind::Sum
}

/// Labels as exported, after the instrument's view key filter
fn export_labels(instrument: &InstrumentCore, labels: &LabelSet) -> LabelSet {
    match instrument.view().and_then(View::keys) {
        Some(keys) => labels.filtered(keys),
        None => labels.clone(),
    }
}

#[derive(Debug, Clone)]
struct Entry {
    instrument: Arc<InstrumentCore>,
    labels: LabelSet,
    temporality: Temporality,
    delta: Option<Aggregator>,
    cumulative: Option<Aggregator>,
}

impl Entry {
    /// Combine the previous state of an entry with what this sweep detached.
    /// Returns `None` when nothing is left to export or remember.
    fn advance(
        instrument: Arc<InstrumentCore>,
        labels: LabelSet,
        previous: Option<&Entry>,
        current: Option<Aggregator>,
        policy: &dyn TemporalitySelector,
    ) -> Result<Option<Entry>> {
        let aggregation = instrument.aggregation();
        let temporality = instrument
            .view()
            .and_then(View::temporality)
            .unwrap_or_else(|| policy.temporality_for(instrument.export_descriptor(), aggregation));
        let total = previous.and_then(|p| p.cumulative.as_ref());

        let (delta, cumulative) = if is_precomputed(&instrument) {
            let delta = match (&current, total) {
                (Some(current), Some(total)) => {
                    let mut delta = current.clone();
                    delta.subtract(total)?;
                    Some(delta)
                }
                (current, _) => current.clone(),
            };
            (delta, current.or_else(|| total.cloned()))
        } else {
            let cumulative = match temporality {
                Temporality::Delta => None,
                Temporality::Cumulative => match (total, &current) {
                    (Some(total), Some(current)) => {
                        let mut merged = total.clone();
                        merged.merge(current)?;
                        Some(merged)
                    }
                    (Some(total), None) => Some(total.clone()),
                    (None, current) => current.clone(),
                },
            };
            (current, cumulative)
        };

        if delta.is_none() && cumulative.is_none() {
            return Ok(None);
        }
        Ok(Some(Entry {
            instrument,
            labels,
            temporality,
            delta,
            cumulative,
        }))
    }

    fn key(&self) -> SeriesKey {
        (self.instrument.id(), self.labels.clone())
    }
}

fn merge_pending(
    pending: &mut HashMap<SeriesKey, (Arc<InstrumentCore>, Aggregator)>,
    instrument: &Arc<InstrumentCore>,
    labels: LabelSet,
    aggregator: &Aggregator,
) -> Result<()> {
    match pending.entry((instrument.id(), labels)) {
        MapEntry::Occupied(mut e) => e.get_mut().1.merge(aggregator)?,
        MapEntry::Vacant(e) => {
            e.insert((Arc::clone(instrument), aggregator.clone()));
        }
    }
    Ok(())
}

/// The exportable state of every series as of the last completed sweep
#[derive(Debug, Clone)]
pub struct CheckpointSet {
    entries: Vec<Entry>,
    /// Last observed total per unfiltered series of each precomputed sum
    observed_totals: HashMap<SeriesKey, (Arc<InstrumentCore>, Aggregator)>,
    start: DateTime<Utc>,
    interval_start: DateTime<Utc>,
    interval_end: DateTime<Utc>,
}

impl CheckpointSet {
    /// The set published before the first sweep
    pub(crate) fn empty(start: DateTime<Utc>) -> Self {
        Self {
            entries: Vec::new(),
            observed_totals: HashMap::new(),
            start,
            interval_start: start,
            interval_end: start,
        }
    }

    /// Number of entries, including ones only held for cumulative memory
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// When the sweep that produced this set started
    pub fn collected_at(&self) -> DateTime<Utc> {
        self.interval_end
    }

    /// Build the successor of this set from the state detached by a sweep.
    /// `self` is left untouched, so a failure here publishes nothing.
    pub(crate) fn next(
        &self,
        accumulations: &[Accumulation],
        policy: &dyn TemporalitySelector,
        ctx: &Context,
        now: DateTime<Utc>,
    ) -> Result<CheckpointSet> {
        let mut pending: HashMap<SeriesKey, (Arc<InstrumentCore>, Aggregator)> =
            HashMap::with_capacity(accumulations.len());
        let mut observed_totals = self.observed_totals.clone();
        let mut observed_groups: HashSet<SeriesKey> = HashSet::new();

        for acc in accumulations {
            ctx.check()?;
            let instrument = acc.series.instrument();
            // Drop filtered keys before grouping so collapsed series merge.
            let labels = export_labels(instrument, acc.series.labels());
            if is_precomputed(instrument) {
                observed_totals.insert(
                    (instrument.id(), acc.series.labels().clone()),
                    (Arc::clone(instrument), acc.aggregator.clone()),
                );
                observed_groups.insert((instrument.id(), labels));
                continue;
            }
            merge_pending(&mut pending, instrument, labels, &acc.aggregator)?;
        }

        // A group's total is the sum of the latest total of each member.
        for ((id, source_labels), (instrument, total)) in &observed_totals {
            let labels = export_labels(instrument, source_labels);
            let key = (*id, labels);
            if observed_groups.contains(&key) {
                ctx.check()?;
                merge_pending(&mut pending, instrument, key.1, total)?;
            }
        }

        let mut entries = Vec::with_capacity(self.entries.len() + pending.len());
        for previous in &self.entries {
            let current = pending.remove(&previous.key()).map(|(_, agg)| agg);
            let advanced = Entry::advance(
                Arc::clone(&previous.instrument),
                previous.labels.clone(),
                Some(previous),
                current,
                policy,
            )?;
            entries.extend(advanced);
        }
        for ((_, labels), (instrument, current)) in pending {
            ctx.check()?;
            entries.extend(Entry::advance(instrument, labels, None, Some(current), policy)?);
        }

        entries.sort_by(|a, b| {
            a.instrument
                .export_descriptor()
                .name()
                .cmp(b.instrument.export_descriptor().name())
                .then_with(|| a.labels.encoded().cmp(b.labels.encoded()))
                .then_with(|| a.instrument.id().cmp(&b.instrument.id()))
        });

        Ok(CheckpointSet {
            entries,
            observed_totals,
            start: self.start,
            interval_start: self.interval_end,
            interval_end: now,
        })
    }

    /// Visit every exportable record. Temporality comes from the instrument's
    /// view if it sets one, otherwise from `selector`. Delta records not
    /// updated by the last sweep are skipped. The first error from `visit`
    /// stops the traversal and is returned.
    pub fn for_each<F>(&self, selector: &dyn TemporalitySelector, mut visit: F) -> Result<()>
    where
        F: FnMut(&Record<'_>) -> Result<()>,
    {
        for entry in &self.entries {
            let descriptor = entry.instrument.export_descriptor();
            let temporality = entry
                .instrument
                .view()
                .and_then(View::temporality)
                .unwrap_or_else(|| selector.temporality_for(descriptor, entry.instrument.aggregation()));

            let (aggregator, start) = match temporality {
                Temporality::Cumulative => match &entry.cumulative {
                    Some(total) => (total, self.start),
                    None => {
                        return Err(MetricsError::Temporality(format!(
                            "'{}' was collected with {} temporality and has no cumulative state",
                            descriptor.name(),
                            entry.temporality
                        )));
                    }
                },
                Temporality::Delta => match &entry.delta {
                    Some(delta) => (delta, self.interval_start),
                    None => continue,
                },
            };

            visit(&Record::new(
                descriptor,
                &entry.labels,
                aggregator,
                temporality,
                start,
                self.interval_end,
            ))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Descriptor, InstrumentKind, Library};
    use crate::labels::KeyValue;
    use crate::meter::Registry;
    use crate::number::{Number, NumberKind};
    use crate::selector::SimpleSelector;
    use crate::temporality::ExportKindSelector;
    use crate::view::ViewRegistry;

    fn sweep(
        registry: &Registry,
        set: &CheckpointSet,
        policy: ExportKindSelector,
    ) -> CheckpointSet {
        let ctx = Context::background();
        let accumulations = registry.collect(&ctx).unwrap();
        set.next(&accumulations, &policy, &ctx, Utc::now()).unwrap()
    }

    fn values(set: &CheckpointSet, selector: ExportKindSelector) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        set.for_each(&selector, |record| {
            out.push((record.labels().encoded().to_string(), record.aggregator().scalar().unwrap_or(f64::NAN)));
            Ok(())
        })
        .unwrap();
        out
    }

    fn desc(name: &str, kind: InstrumentKind) -> Descriptor {
        Descriptor::new(name, kind, NumberKind::I64, Library::new("test"))
    }

    #[test]
    fn test_cumulative_memory_and_delta_view() {
        let registry = Registry::new(Arc::new(SimpleSelector::exact()), ViewRegistry::new());
        let core = registry.register(desc("c", InstrumentKind::Counter)).unwrap();
        let labels = LabelSet::new(vec![KeyValue::string("A", "B")]);

        let empty = CheckpointSet::empty(Utc::now());
        registry.record(&core, labels.clone(), Number::I64(10)).unwrap();
        let first = sweep(&registry, &empty, ExportKindSelector::Cumulative);
        registry.record(&core, labels.clone(), Number::I64(5)).unwrap();
        let second = sweep(&registry, &first, ExportKindSelector::Cumulative);

        assert_eq!(values(&second, ExportKindSelector::Cumulative), vec![("A=B".to_string(), 15.0)]);
        assert_eq!(values(&second, ExportKindSelector::Delta), vec![("A=B".to_string(), 5.0)]);

        // No updates: cumulative persists, delta has nothing to report.
        let third = sweep(&registry, &second, ExportKindSelector::Cumulative);
        assert_eq!(values(&third, ExportKindSelector::Cumulative), vec![("A=B".to_string(), 15.0)]);
        assert!(values(&third, ExportKindSelector::Delta).is_empty());
    }

    #[test]
    fn test_delta_policy_keeps_no_memory() {
        let registry = Registry::new(Arc::new(SimpleSelector::exact()), ViewRegistry::new());
        let core = registry.register(desc("c", InstrumentKind::Counter)).unwrap();

        registry.record(&core, LabelSet::empty(), Number::I64(3)).unwrap();
        let first = sweep(&registry, &CheckpointSet::empty(Utc::now()), ExportKindSelector::Delta);
        assert_eq!(values(&first, ExportKindSelector::Delta), vec![(String::new(), 3.0)]);

        let result = first.for_each(&ExportKindSelector::Cumulative, |_| Ok(()));
        assert!(matches!(result, Err(MetricsError::Temporality(_))));

        let second = sweep(&registry, &first, ExportKindSelector::Delta);
        assert!(second.is_empty());
    }

    #[test]
    fn test_precomputed_sum_delta_by_subtraction() {
        let registry = Registry::new(Arc::new(SimpleSelector::exact()), ViewRegistry::new());
        let total = Arc::new(std::sync::atomic::AtomicI64::new(100));
        let observed = Arc::clone(&total);
        let descriptor = desc("bytes", InstrumentKind::SumObserver);
        registry
            .register_observer(
                descriptor,
                Box::new(move || {
                    let value = observed.load(std::sync::atomic::Ordering::SeqCst);
                    Ok(vec![(LabelSet::empty(), Number::I64(value))])
                }),
            )
            .unwrap();

        let first = sweep(&registry, &CheckpointSet::empty(Utc::now()), ExportKindSelector::Cumulative);
        total.store(130, std::sync::atomic::Ordering::SeqCst);
        let second = sweep(&registry, &first, ExportKindSelector::Cumulative);

        assert_eq!(values(&second, ExportKindSelector::Cumulative), vec![(String::new(), 130.0)]);
        assert_eq!(values(&second, ExportKindSelector::Delta), vec![(String::new(), 30.0)]);
    }

    #[test]
    fn test_collapsed_precomputed_sum_counts_unobserved_members() {
        let views: ViewRegistry = vec![View::builder().with_keys(["host"]).build()].into_iter().collect();
        let registry = Registry::new(Arc::new(SimpleSelector::exact()), views);
        let interface = |name: &str| {
            LabelSet::new(vec![KeyValue::string("host", "h"), KeyValue::string("if", name)])
        };
        let reported = Arc::new(std::sync::Mutex::new(vec![
            (interface("eth0"), Number::I64(100)),
            (interface("eth1"), Number::I64(50)),
        ]));
        let observed = Arc::clone(&reported);
        registry
            .register_observer(
                desc("rx_bytes", InstrumentKind::SumObserver),
                Box::new(move || Ok(observed.lock().unwrap().clone())),
            )
            .unwrap();

        let first = sweep(&registry, &CheckpointSet::empty(Utc::now()), ExportKindSelector::Cumulative);
        assert_eq!(values(&first, ExportKindSelector::Cumulative), vec![("host=h".to_string(), 150.0)]);

        // eth1 goes quiet; its last total still belongs to the group.
        *reported.lock().unwrap() = vec![(interface("eth0"), Number::I64(120))];
        let second = sweep(&registry, &first, ExportKindSelector::Cumulative);
        assert_eq!(values(&second, ExportKindSelector::Cumulative), vec![("host=h".to_string(), 170.0)]);
        assert_eq!(values(&second, ExportKindSelector::Delta), vec![("host=h".to_string(), 20.0)]);

        let third = sweep(&registry, &second, ExportKindSelector::Cumulative);
        assert_eq!(values(&third, ExportKindSelector::Cumulative), vec![("host=h".to_string(), 170.0)]);
        assert_eq!(values(&third, ExportKindSelector::Delta), vec![("host=h".to_string(), 0.0)]);
    }

    #[test]
    fn test_cancel_after_detach_restores_series() {
        let registry = Registry::new(Arc::new(SimpleSelector::exact()), ViewRegistry::new());
        let core = registry.register(desc("c", InstrumentKind::Counter)).unwrap();

        registry.record(&core, LabelSet::empty(), Number::I64(10)).unwrap();
        let first = sweep(&registry, &CheckpointSet::empty(Utc::now()), ExportKindSelector::Cumulative);

        registry.record(&core, LabelSet::empty(), Number::I64(5)).unwrap();
        let ctx = Context::background();
        let detached = registry.collect(&ctx).unwrap();
        assert_eq!(detached.len(), 1);

        ctx.cancel();
        let err = first
            .next(&detached, &ExportKindSelector::Cumulative, &ctx, Utc::now())
            .unwrap_err();
        assert!(err.is_cancellation());
        registry.restore(detached);

        let second = sweep(&registry, &first, ExportKindSelector::Cumulative);
        assert_eq!(values(&second, ExportKindSelector::Cumulative), vec![(String::new(), 15.0)]);
        assert_eq!(values(&second, ExportKindSelector::Delta), vec![(String::new(), 5.0)]);
    }
}
