use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    DataSufficiency, ForecastError, ForecastRuleset, IndicatorCatalog, IndicatorId, ModelSnapshot,
    Scenario, ScenarioForecaster,
};

/// Policy-declared goal for an indicator at a date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub indicator_id: IndicatorId,
    #[serde(with = "crate::iso_date")]
    pub target_date: Date,
    pub target_value: f64,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetBook {
    targets: BTreeMap<(IndicatorId, Date), Target>,
}

impl TargetBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a target.
    ///
    /// # Errors
    /// Returns [`ForecastError::Schema`] when the indicator is unregistered,
    /// the value is non-positive or out of range, or a target already exists
    /// for the (indicator, date) pair.
    pub fn insert(
        &mut self,
        catalog: &IndicatorCatalog,
        target: Target,
    ) -> Result<(), ForecastError> {
        let Some(indicator) = catalog.get(&target.indicator_id) else {
            return Err(ForecastError::Schema(format!(
                "target references unregistered indicator {}",
                target.indicator_id
            )));
        };
        if !indicator.contains(target.target_value) || target.target_value <= 0.0 {
            return Err(ForecastError::Schema(format!(
                "target value {} for {} MUST be positive and within [{}, {}]",
                target.target_value, target.indicator_id, indicator.valid_min, indicator.valid_max
            )));
        }

        let key = (target.indicator_id.clone(), target.target_date);
        if self.targets.contains_key(&key) {
            return Err(ForecastError::Schema(format!(
                "duplicate target for {} at {}",
                target.indicator_id, target.target_date
            )));
        }
        self.targets.insert(key, target);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, indicator_id: &IndicatorId, target_date: Date) -> Option<&Target> {
        self.targets.get(&(indicator_id.clone(), target_date))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TargetStatus {
    #[serde(rename = "On Track")]
    OnTrack,
    #[serde(rename = "At Risk")]
    AtRisk,
    #[serde(rename = "Off Track")]
    OffTrack,
}

impl TargetStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnTrack => "On Track",
            Self::AtRisk => "At Risk",
            Self::OffTrack => "Off Track",
        }
    }

    /// Status for an achievement ratio in percent.
    #[must_use]
    pub fn classify(achievement_ratio: f64, ruleset: &ForecastRuleset) -> Self {
        if achievement_ratio >= ruleset.on_track_min_ratio {
            Self::OnTrack
        } else if achievement_ratio >= ruleset.at_risk_min_ratio {
            Self::AtRisk
        } else {
            Self::OffTrack
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetEvaluation {
    pub indicator_id: IndicatorId,
    #[serde(with = "crate::iso_date")]
    pub target_date: Date,
    pub scenario: Scenario,
    pub forecast_value: f64,
    pub target_value: f64,
    pub gap: f64,
    pub achievement_ratio: f64,
    pub status: TargetStatus,
    pub sufficiency: DataSufficiency,
    pub source: String,
}

impl TargetEvaluation {
    /// Scores a forecast value against a target.
    #[must_use]
    pub fn score(
        target: &Target,
        scenario: Scenario,
        forecast_value: f64,
        sufficiency: DataSufficiency,
        ruleset: &ForecastRuleset,
    ) -> Self {
        let achievement_ratio = forecast_value / target.target_value * 100.0;
        Self {
            indicator_id: target.indicator_id.clone(),
            target_date: target.target_date,
            scenario,
            forecast_value,
            target_value: target.target_value,
            gap: forecast_value - target.target_value,
            achievement_ratio,
            status: TargetStatus::classify(achievement_ratio, ruleset),
            sufficiency,
            source: target.source.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TargetTracker<'a> {
    snapshot: &'a ModelSnapshot,
}

impl<'a> TargetTracker<'a> {
    #[must_use]
    pub fn new(snapshot: &'a ModelSnapshot) -> Self {
        Self { snapshot }
    }

    /// Forecasts `indicator_id` at `target_date` and scores it against the
    /// declared target. The tracker never infers a target.
    ///
    /// # Errors
    /// Returns [`ForecastError::NoTargetDefined`] when no target matches, and
    /// propagates forecast errors.
    pub fn evaluate(
        &self,
        indicator_id: &IndicatorId,
        target_date: Date,
        scenario: Scenario,
    ) -> Result<TargetEvaluation, ForecastError> {
        let target = self
            .snapshot
            .targets
            .get(indicator_id, target_date)
            .ok_or_else(|| ForecastError::NoTargetDefined {
                indicator_id: indicator_id.clone(),
                target_date,
            })?;
        let point =
            ScenarioForecaster::new(self.snapshot).forecast(indicator_id, target_date, scenario)?;
        Ok(TargetEvaluation::score(
            target,
            scenario,
            point.value,
            point.sufficiency,
            &self.snapshot.ruleset,
        ))
    }

    /// Evaluates every declared target under `scenario`, in (indicator, date)
    /// order. Targets whose forecast fails are returned as errors in place.
    #[must_use]
    pub fn evaluate_all(
        &self,
        scenario: Scenario,
    ) -> Vec<(Target, Result<TargetEvaluation, ForecastError>)> {
        self.snapshot
            .targets
            .iter()
            .map(|target| {
                (
                    target.clone(),
                    self.evaluate(&target.indicator_id, target.target_date, scenario),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{date, must_err, must_ok};
    use crate::{Confidence, Indicator, Observation, Pillar, SnapshotBuilder};

    fn account_target() -> Target {
        Target {
            indicator_id: IndicatorId::from("ACC_OWNERSHIP"),
            target_date: date("2025-01-01"),
            target_value: 70.0,
            source: "NFIS-II".to_string(),
        }
    }

    #[test]
    fn account_ownership_case_is_on_track() {
        let evaluation = TargetEvaluation::score(
            &account_target(),
            Scenario::Base,
            74.3,
            DataSufficiency::Dense,
            &ForecastRuleset::v1(),
        );
        assert!((evaluation.gap - 4.3).abs() < 1e-9);
        assert!((evaluation.achievement_ratio - 106.142_857).abs() < 1e-4);
        assert_eq!(evaluation.status, TargetStatus::OnTrack);
        let value = must_ok(serde_json::to_value(&evaluation));
        assert_eq!(value["status"], "On Track");
    }

    #[test]
    fn status_thresholds() {
        let ruleset = ForecastRuleset::v1();
        assert_eq!(TargetStatus::classify(95.0, &ruleset), TargetStatus::OnTrack);
        assert_eq!(TargetStatus::classify(94.99, &ruleset), TargetStatus::AtRisk);
        assert_eq!(TargetStatus::classify(80.0, &ruleset), TargetStatus::AtRisk);
        assert_eq!(TargetStatus::classify(79.9, &ruleset), TargetStatus::OffTrack);
    }

    fn snapshot_with_history() -> SnapshotBuilder {
        let mut builder = must_ok(SnapshotBuilder::new(ForecastRuleset::v1()));
        must_ok(builder.indicator(Indicator::percentage(
            "ACC_OWNERSHIP",
            "Account Ownership",
            Pillar::Access,
        )));
        for (day, value) in [("2017-12-31", 35.0), ("2021-12-31", 46.0)] {
            must_ok(builder.observation(Observation {
                indicator_id: IndicatorId::from("ACC_OWNERSHIP"),
                date: date(day),
                value,
                confidence: Confidence::High,
                source: "Global Findex".to_string(),
            }));
        }
        builder
    }

    #[test]
    fn missing_target_is_an_error() {
        let snapshot = snapshot_with_history().build();
        let err = must_err(TargetTracker::new(&snapshot).evaluate(
            &IndicatorId::from("ACC_OWNERSHIP"),
            date("2025-01-01"),
            Scenario::Base,
        ));
        assert_eq!(
            err,
            ForecastError::NoTargetDefined {
                indicator_id: IndicatorId::from("ACC_OWNERSHIP"),
                target_date: date("2025-01-01"),
            }
        );
    }

    #[test]
    fn evaluate_uses_the_forecast() {
        let mut builder = snapshot_with_history();
        must_ok(builder.target(account_target()));
        let snapshot = builder.build();
        let tracker = TargetTracker::new(&snapshot);
        let evaluation = must_ok(tracker.evaluate(
            &IndicatorId::from("ACC_OWNERSHIP"),
            date("2025-01-01"),
            Scenario::Base,
        ));
        let point = must_ok(ScenarioForecaster::new(&snapshot).forecast(
            &IndicatorId::from("ACC_OWNERSHIP"),
            date("2025-01-01"),
            Scenario::Base,
        ));
        assert!((evaluation.forecast_value - point.value).abs() < f64::EPSILON);
        assert_eq!(evaluation.sufficiency, DataSufficiency::Thin);
        assert_eq!(tracker.evaluate_all(Scenario::Base).len(), 1);
    }

    #[test]
    fn duplicate_and_zero_targets_are_rejected() {
        let mut catalog = IndicatorCatalog::new();
        must_ok(catalog.register(Indicator::percentage(
            "ACC_OWNERSHIP",
            "Account Ownership",
            Pillar::Access,
        )));
        let mut book = TargetBook::new();
        must_ok(book.insert(&catalog, account_target()));
        assert!(book.insert(&catalog, account_target()).is_err());

        let mut zero = account_target();
        zero.target_date = date("2030-01-01");
        zero.target_value = 0.0;
        assert!(matches!(
            must_err(book.insert(&catalog, zero)),
            ForecastError::Schema(_)
        ));
    }
}
