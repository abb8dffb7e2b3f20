use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{Confidence, ForecastError, IndicatorCatalog, IndicatorId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub indicator_id: IndicatorId,
    #[serde(with = "crate::iso_date")]
    pub date: Date,
    pub value: f64,
    pub confidence: Confidence,
    pub source: String,
}

/// Per-indicator series kept in ascending date order, at most one
/// observation per (indicator, date).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationStore {
    series: BTreeMap<IndicatorId, Vec<Observation>>,
}

impl ObservationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an observation at its date position.
    ///
    /// # Errors
    /// Returns [`ForecastError::Schema`] when the indicator is unregistered,
    /// the value falls outside the indicator's valid range, or the
    /// (indicator, date) slot is already taken.
    pub fn insert(
        &mut self,
        catalog: &IndicatorCatalog,
        observation: Observation,
    ) -> Result<(), ForecastError> {
        let Some(indicator) = catalog.get(&observation.indicator_id) else {
            return Err(ForecastError::Schema(format!(
                "observation references unregistered indicator {}",
                observation.indicator_id
            )));
        };

        if !indicator.contains(observation.value) {
            return Err(ForecastError::Schema(format!(
                "observation value {} for {} at {} is outside [{}, {}]",
                observation.value,
                indicator.id,
                observation.date,
                indicator.valid_min,
                indicator.valid_max
            )));
        }

        let series = self
            .series
            .entry(observation.indicator_id.clone())
            .or_default();
        match series.binary_search_by(|existing| existing.date.cmp(&observation.date)) {
            Ok(_) => Err(ForecastError::Schema(format!(
                "duplicate observation for {} at {}",
                observation.indicator_id, observation.date
            ))),
            Err(position) => {
                series.insert(position, observation);
                Ok(())
            }
        }
    }

    /// The indicator's observations in ascending date order.
    #[must_use]
    pub fn series(&self, indicator_id: &IndicatorId) -> &[Observation] {
        self.series
            .get(indicator_id)
            .map_or(&[], |series| series.as_slice())
    }

    #[must_use]
    pub fn latest(&self, indicator_id: &IndicatorId) -> Option<&Observation> {
        self.series(indicator_id).last()
    }

    /// Latest observation dated strictly before `date`.
    #[must_use]
    pub fn last_before(&self, indicator_id: &IndicatorId, date: Date) -> Option<&Observation> {
        let series = self.series(indicator_id);
        let position = series.partition_point(|observation| observation.date < date);
        position.checked_sub(1).and_then(|index| series.get(index))
    }

    /// Earliest observation dated on or after `date`.
    #[must_use]
    pub fn first_on_or_after(
        &self,
        indicator_id: &IndicatorId,
        date: Date,
    ) -> Option<&Observation> {
        let series = self.series(indicator_id);
        let position = series.partition_point(|observation| observation.date < date);
        series.get(position)
    }

    pub fn indicators(&self) -> impl Iterator<Item = &IndicatorId> {
        self.series.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }
}
