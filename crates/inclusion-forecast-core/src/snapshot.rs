use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::feed::{decode_row, FeedBundle};
use crate::{
    validate_links, Event, EventCatalog, EventRow, ForecastError, ForecastRuleset, ImpactLinkInput,
    ImpactLinkRow, ImpactLinkSet, Indicator, IndicatorCatalog, IndicatorId, IndicatorRow,
    IngestReport, LinkId, Observation, ObservationRow, ObservationStore, Target, TargetBook,
    TargetRow, TrendPrior, TrendPriorRow, ValidationReport,
};

/// Every input the engine reads, frozen for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSnapshot {
    pub ruleset: ForecastRuleset,
    pub indicators: IndicatorCatalog,
    pub observations: ObservationStore,
    pub events: EventCatalog,
    pub links: ImpactLinkSet,
    pub targets: TargetBook,
    pub priors: BTreeMap<IndicatorId, TrendPrior>,
}

impl ModelSnapshot {
    #[must_use]
    pub fn empty(ruleset: ForecastRuleset) -> Self {
        Self {
            ruleset,
            indicators: IndicatorCatalog::new(),
            observations: ObservationStore::new(),
            events: EventCatalog::new(),
            links: ImpactLinkSet::new(),
            targets: TargetBook::new(),
            priors: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn validation_report(&self) -> ValidationReport {
        validate_links(&self.links, &self.observations, &self.ruleset)
    }
}

/// Per-feed outcome of [`SnapshotBuilder::ingest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotIngest {
    pub indicators: IngestReport,
    pub observations: IngestReport,
    pub events: IngestReport,
    pub impact_links: IngestReport,
    pub targets: IngestReport,
    pub priors: IngestReport,
}

impl SnapshotIngest {
    #[must_use]
    pub fn reports(&self) -> [&IngestReport; 6] {
        [
            &self.indicators,
            &self.observations,
            &self.events,
            &self.impact_links,
            &self.targets,
            &self.priors,
        ]
    }

    #[must_use]
    pub fn total_accepted(&self) -> usize {
        self.reports().iter().map(|report| report.accepted).sum()
    }

    #[must_use]
    pub fn total_rejected(&self) -> usize {
        self.reports()
            .iter()
            .map(|report| report.rejected_count())
            .sum()
    }
}

/// Mutable staging area for a snapshot. Nothing built here is visible to
/// readers until [`SnapshotBuilder::build`].
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    snapshot: ModelSnapshot,
}

impl SnapshotBuilder {
    /// # Errors
    /// Returns [`ForecastError::Configuration`] when the ruleset is invalid.
    pub fn new(ruleset: ForecastRuleset) -> Result<Self, ForecastError> {
        ruleset.validate()?;
        Ok(Self {
            snapshot: ModelSnapshot::empty(ruleset),
        })
    }

    /// # Errors
    /// See [`IndicatorCatalog::register`].
    pub fn indicator(&mut self, indicator: Indicator) -> Result<(), ForecastError> {
        self.snapshot.indicators.register(indicator)
    }

    /// # Errors
    /// See [`ObservationStore::insert`].
    pub fn observation(&mut self, observation: Observation) -> Result<(), ForecastError> {
        self.snapshot
            .observations
            .insert(&self.snapshot.indicators, observation)
    }

    /// # Errors
    /// See [`EventCatalog::insert`].
    pub fn event(&mut self, event: Event) -> Result<(), ForecastError> {
        self.snapshot.events.insert(event)
    }

    /// # Errors
    /// See [`ImpactLinkSet::add_link`].
    pub fn link(&mut self, input: ImpactLinkInput) -> Result<LinkId, ForecastError> {
        self.snapshot
            .links
            .add_link(&self.snapshot.events, &self.snapshot.indicators, input)
    }

    /// # Errors
    /// See [`TargetBook::insert`].
    pub fn target(&mut self, target: Target) -> Result<(), ForecastError> {
        self.snapshot
            .targets
            .insert(&self.snapshot.indicators, target)
    }

    /// Registers an expert prior, at most one per indicator.
    ///
    /// # Errors
    /// Returns [`ForecastError::Schema`] for an unregistered indicator, an
    /// out-of-range anchor or a second prior for the same indicator.
    pub fn prior(&mut self, prior: TrendPrior) -> Result<(), ForecastError> {
        let Some(indicator) = self.snapshot.indicators.get(&prior.indicator_id) else {
            return Err(ForecastError::Schema(format!(
                "prior references unregistered indicator {}",
                prior.indicator_id
            )));
        };
        if !indicator.contains(prior.anchor_value) {
            return Err(ForecastError::Schema(format!(
                "prior anchor {} for {} is outside the valid range",
                prior.anchor_value, prior.indicator_id
            )));
        }
        if self.snapshot.priors.contains_key(&prior.indicator_id) {
            return Err(ForecastError::Schema(format!(
                "duplicate prior for {}",
                prior.indicator_id
            )));
        }
        self.snapshot
            .priors
            .insert(prior.indicator_id.clone(), prior);
        Ok(())
    }

    /// Link set for in-place revision before the snapshot is frozen.
    pub fn links_mut(&mut self) -> &mut ImpactLinkSet {
        &mut self.snapshot.links
    }

    #[must_use]
    pub fn ruleset(&self) -> &ForecastRuleset {
        &self.snapshot.ruleset
    }

    /// Decodes and applies every feed row. Feeds are applied in dependency
    /// order (indicators, observations, events, links, targets, priors); a
    /// rejected row never stops the rows after it.
    pub fn ingest(&mut self, feeds: &FeedBundle) -> SnapshotIngest {
        let mut indicators = IngestReport::new("indicators");
        for (index, row) in feeds.indicators.iter().enumerate() {
            let outcome = decode_row::<IndicatorRow>(row)
                .and_then(IndicatorRow::into_indicator)
                .and_then(|indicator| self.indicator(indicator));
            indicators.record(index, outcome);
        }

        let mut observations = IngestReport::new("observations");
        for (index, row) in feeds.observations.iter().enumerate() {
            let outcome = decode_row::<ObservationRow>(row)
                .and_then(ObservationRow::into_observation)
                .and_then(|observation| self.observation(observation));
            observations.record(index, outcome);
        }

        let mut events = IngestReport::new("events");
        for (index, row) in feeds.events.iter().enumerate() {
            let outcome = decode_row::<EventRow>(row)
                .and_then(EventRow::into_event)
                .and_then(|event| self.event(event));
            events.record(index, outcome);
        }

        let mut impact_links = IngestReport::new("impact_links");
        for (index, row) in feeds.impact_links.iter().enumerate() {
            let outcome = decode_row::<ImpactLinkRow>(row)
                .and_then(|row| row.into_input(&self.snapshot.ruleset))
                .and_then(|input| self.link(input).map(|_| ()));
            impact_links.record(index, outcome);
        }

        let mut targets = IngestReport::new("targets");
        for (index, row) in feeds.targets.iter().enumerate() {
            let outcome = decode_row::<TargetRow>(row)
                .and_then(TargetRow::into_target)
                .and_then(|target| self.target(target));
            targets.record(index, outcome);
        }

        let mut priors = IngestReport::new("priors");
        for (index, row) in feeds.priors.iter().enumerate() {
            let outcome = decode_row::<TrendPriorRow>(row)
                .and_then(TrendPriorRow::into_prior)
                .and_then(|prior| self.prior(prior));
            priors.record(index, outcome);
        }

        SnapshotIngest {
            indicators,
            observations,
            events,
            impact_links,
            targets,
            priors,
        }
    }

    #[must_use]
    pub fn build(self) -> ModelSnapshot {
        self.snapshot
    }
}

/// Shared pointer to the current snapshot. Readers take an `Arc` and keep a
/// consistent view while a writer swaps in a rebuilt snapshot.
#[derive(Debug)]
pub struct SnapshotHandle {
    current: RwLock<Arc<ModelSnapshot>>,
}

impl SnapshotHandle {
    #[must_use]
    pub fn new(snapshot: ModelSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    #[must_use]
    pub fn load(&self) -> Arc<ModelSnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replaces the current snapshot and returns the previous one.
    pub fn swap(&self, snapshot: ModelSnapshot) -> Arc<ModelSnapshot> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{date, must_ok};
    use crate::{IndicatorId, Pillar, Scenario, ScenarioForecaster};
    use serde_json::json;

    fn feeds() -> FeedBundle {
        FeedBundle {
            indicators: vec![
                json!({"indicator_id": "ACC_OWNERSHIP", "name": "Account Ownership", "pillar": "access"}),
                json!({"indicator_id": "ACC_OWNERSHIP", "name": "Duplicate", "pillar": "access"}),
                json!({"indicator_id": "BAD", "name": "Bad", "pillar": "nowhere"}),
            ],
            observations: vec![
                json!({"indicator_id": "ACC_OWNERSHIP", "date": "2014-12-31", "value": 22.0, "confidence": "high", "source": "Findex"}),
                json!({"indicator_id": "ACC_OWNERSHIP", "date": "2017-12-31", "value": 35.0, "confidence": "high", "source": "Findex"}),
                json!({"indicator_id": "ACC_OWNERSHIP", "date": "2021-12-31", "value": 46.0, "confidence": "high", "source": "Findex"}),
                json!({"indicator_id": "ACC_OWNERSHIP", "date": "2022-12-31", "value": 146.0, "confidence": "high"}),
                json!({"indicator_id": "UNKNOWN", "date": "2022-12-31", "value": 10.0, "confidence": "high"}),
            ],
            events: vec![
                json!({"event_id": "EVT_TELEBIRR", "date": "2021-05-11", "category": "product_launch", "label": "Telebirr Launch", "confidence": "high"}),
                json!({"event_id": "EVT_MPESA", "date": "2023-08-01", "category": "market_entry", "label": "M-Pesa Ethiopia Launch", "confidence": "high"}),
            ],
            impact_links: vec![
                json!({"event_id": "EVT_MPESA", "indicator_id": "ACC_OWNERSHIP", "direction": "+", "magnitude": 5.0, "lag_months": 12, "confidence": "medium"}),
                json!({"event_id": "EVT_MPESA", "indicator_id": "ACC_OWNERSHIP", "direction": "-", "magnitude": 5.0, "lag_months": 12, "confidence": "medium"}),
            ],
            targets: vec![
                json!({"indicator_id": "ACC_OWNERSHIP", "target_date": "2025-01-01", "target_value": 70.0, "source": "NFIS-II"}),
            ],
            priors: Vec::new(),
        }
    }

    #[test]
    fn ingest_isolates_bad_rows() {
        let mut builder = must_ok(SnapshotBuilder::new(ForecastRuleset::v1()));
        let ingest = builder.ingest(&feeds());
        assert_eq!(ingest.indicators.accepted, 1);
        assert_eq!(ingest.indicators.rejected_count(), 2);
        assert_eq!(ingest.observations.accepted, 3);
        assert_eq!(ingest.observations.rejected_count(), 2);
        assert_eq!(ingest.observations.rejected[0].row_index, 3);
        assert_eq!(ingest.impact_links.accepted, 1);
        assert_eq!(ingest.impact_links.rejected_count(), 1);
        assert_eq!(ingest.total_rejected(), 5);
        assert_eq!(ingest.total_accepted(), 8);

        let snapshot = builder.build();
        assert_eq!(snapshot.observations.len(), 3);
        assert_eq!(snapshot.targets.len(), 1);
    }

    #[test]
    fn invalid_ruleset_is_rejected() {
        let mut ruleset = ForecastRuleset::v1();
        ruleset.optimistic_multiplier = 0.1;
        assert!(SnapshotBuilder::new(ruleset).is_err());
    }

    #[test]
    fn swap_keeps_existing_readers_consistent() {
        let mut builder = must_ok(SnapshotBuilder::new(ForecastRuleset::v1()));
        builder.ingest(&feeds());
        let handle = SnapshotHandle::new(builder.build());

        let reader = handle.load();
        let before = must_ok(ScenarioForecaster::new(&reader).forecast(
            &IndicatorId::from("ACC_OWNERSHIP"),
            date("2026-01-01"),
            Scenario::Base,
        ));

        let mut next = must_ok(SnapshotBuilder::new(ForecastRuleset::v1()));
        must_ok(next.indicator(Indicator::percentage("X", "X", Pillar::Usage)));
        let previous = handle.swap(next.build());

        assert!(Arc::ptr_eq(&previous, &reader));
        assert_eq!(handle.load().indicators.len(), 1);
        let after = must_ok(ScenarioForecaster::new(&reader).forecast(
            &IndicatorId::from("ACC_OWNERSHIP"),
            date("2026-01-01"),
            Scenario::Base,
        ));
        assert_eq!(before, after);
    }

    #[test]
    fn concurrent_readers_share_one_snapshot() {
        let mut builder = must_ok(SnapshotBuilder::new(ForecastRuleset::v1()));
        builder.ingest(&feeds());
        let handle = SnapshotHandle::new(builder.build());

        let values: Vec<f64> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let snapshot = handle.load();
                        must_ok(ScenarioForecaster::new(&snapshot).forecast(
                            &IndicatorId::from("ACC_OWNERSHIP"),
                            date("2027-01-01"),
                            Scenario::Optimistic,
                        ))
                        .value
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| match worker.join() {
                    Ok(value) => value,
                    Err(_) => panic!("forecast worker panicked"),
                })
                .collect()
        });
        assert!(values.windows(2).all(|pair| pair[0].to_bits() == pair[1].to_bits()));
    }
}
