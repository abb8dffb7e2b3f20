use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::Date;
use ulid::Ulid;

use crate::{
    clamp, format_rfc3339, now_utc, years_between, Confidence, DataSufficiency, EventId,
    ForecastError, ForecastRuleset, ImpactLink, IndicatorId, LinkId, ModelSnapshot, Scenario,
    TrendEstimator, TrendFit, TrendMethod,
};

/// One link's share of a forecast point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventContribution {
    pub link_id: LinkId,
    pub event_id: EventId,
    #[serde(with = "crate::iso_date")]
    pub landing_date: Date,
    pub magnitude: f64,
    pub multiplier: f64,
    /// Ramp/decay factor in `[0, 1]`; 1 for a fully landed step effect.
    pub weight: f64,
    pub amount: f64,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub indicator_id: IndicatorId,
    #[serde(with = "crate::iso_date")]
    pub date: Date,
    pub scenario: Scenario,
    pub value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub baseline: f64,
    pub baseline_method: TrendMethod,
    pub event_contribution: f64,
    pub contributions: Vec<EventContribution>,
    pub years_ahead: f64,
    pub sufficiency: DataSufficiency,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForecastRequest {
    pub indicator_ids: Vec<IndicatorId>,
    #[serde(with = "iso_date_list")]
    pub dates: Vec<Date>,
    pub scenarios: Vec<Scenario>,
}

impl ForecastRequest {
    /// Every scenario for the given indicators and dates.
    #[must_use]
    pub fn all_scenarios(indicator_ids: Vec<IndicatorId>, dates: Vec<Date>) -> Self {
        Self {
            indicator_ids,
            dates,
            scenarios: Scenario::ALL.to_vec(),
        }
    }

    fn validate(&self) -> Result<(), ForecastError> {
        if self.indicator_ids.is_empty() || self.dates.is_empty() || self.scenarios.is_empty() {
            return Err(ForecastError::Configuration(
                "forecast request needs at least one indicator, date and scenario".to_string(),
            ));
        }
        Ok(())
    }
}

/// Indicator left out of a run, with the typed failure rendered as text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedIndicator {
    pub indicator_id: IndicatorId,
    pub reason: String,
}

/// Immutable output of one batch forecast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastRun {
    pub run_id: Ulid,
    pub generated_at: String,
    pub ruleset_version: u32,
    pub points: Vec<ForecastPoint>,
    pub skipped: Vec<SkippedIndicator>,
}

/// Baseline plus landed, scenario-scaled link effects, read from one
/// snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioForecaster<'a> {
    snapshot: &'a ModelSnapshot,
}

impl<'a> ScenarioForecaster<'a> {
    #[must_use]
    pub fn new(snapshot: &'a ModelSnapshot) -> Self {
        Self { snapshot }
    }

    fn ruleset(&self) -> &'a ForecastRuleset {
        &self.snapshot.ruleset
    }

    /// Fitted baseline, falling back to the indicator's expert prior when the
    /// history is too short.
    ///
    /// # Errors
    /// Returns [`ForecastError::UnknownIndicator`], or
    /// [`ForecastError::InsufficientHistory`] when there are fewer than two
    /// observations and no prior.
    pub fn baseline(&self, indicator_id: &IndicatorId) -> Result<TrendFit, ForecastError> {
        let estimator = TrendEstimator::new(
            &self.snapshot.indicators,
            &self.snapshot.observations,
            self.ruleset(),
        );
        match estimator.fit(indicator_id) {
            Ok(fit) => Ok(fit),
            Err(err @ ForecastError::InsufficientHistory { .. }) => {
                match self.snapshot.priors.get(indicator_id) {
                    Some(prior) => {
                        let indicator = self.snapshot.indicators.require(indicator_id)?;
                        Ok(TrendFit::from_prior(prior, indicator))
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Forecast for one indicator, date and scenario.
    ///
    /// Every active link whose landing date is on or before `date` and whose
    /// effect has not decayed contributes on top of the baseline. Inside the
    /// observed span the baseline is the interpolated history.
    ///
    /// # Errors
    /// Propagates [`ScenarioForecaster::baseline`] errors.
    pub fn forecast(
        &self,
        indicator_id: &IndicatorId,
        date: Date,
        scenario: Scenario,
    ) -> Result<ForecastPoint, ForecastError> {
        let fit = self.baseline(indicator_id)?;
        Ok(self.forecast_with(&fit, date, scenario))
    }

    fn forecast_with(&self, fit: &TrendFit, date: Date, scenario: Scenario) -> ForecastPoint {
        let ruleset = self.ruleset();
        let baseline = fit.project(date);
        let last_observed = fit.last_date().unwrap_or(date);
        let years_ahead = years_between(last_observed, date).max(0.0);

        let contributions: Vec<EventContribution> = self
            .snapshot
            .links
            .get_links(&fit.indicator_id)
            .into_iter()
            .filter(|link| link.landing_date <= date)
            .filter(|link| link.magnitude != 0.0)
            .filter_map(|link| contribution(ruleset, link, date, scenario))
            .collect();

        let event_contribution: f64 = contributions.iter().map(|item| item.amount).sum();
        let value = clamp(baseline + event_contribution, fit.valid_min, fit.valid_max);

        let uncertain = contributions
            .iter()
            .any(|item| item.confidence != Confidence::High);
        let factor = if uncertain {
            ruleset.uncertain_link_bound_factor
        } else {
            1.0
        };
        let bound = value
            * (ruleset.bound_base_fraction + ruleset.bound_per_year_fraction * years_ahead)
            * factor;

        ForecastPoint {
            indicator_id: fit.indicator_id.clone(),
            date,
            scenario,
            value,
            lower_bound: clamp(value - bound, fit.valid_min, fit.valid_max),
            upper_bound: clamp(value + bound, fit.valid_min, fit.valid_max),
            baseline,
            baseline_method: fit.method,
            event_contribution,
            contributions,
            years_ahead,
            sufficiency: fit.sufficiency,
        }
    }

    /// Runs the full (indicator x date x scenario) grid. Indicators are
    /// forecast on scoped worker threads sharing this snapshot; output order
    /// follows the request. Indicators whose baseline cannot be fitted are
    /// reported in `skipped`.
    ///
    /// # Errors
    /// Returns [`ForecastError::Configuration`] for an empty request and
    /// [`ForecastError::Schema`] if the run timestamp cannot be formatted.
    pub fn run(&self, request: &ForecastRequest) -> Result<ForecastRun, ForecastError> {
        request.validate()?;

        let mut seen = BTreeSet::new();
        let indicator_ids: Vec<&IndicatorId> = request
            .indicator_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .collect();

        let results: Vec<Result<Vec<ForecastPoint>, ForecastError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = indicator_ids
                .iter()
                .map(|indicator_id| {
                    scope.spawn(move || -> Result<Vec<ForecastPoint>, ForecastError> {
                        let fit = self.baseline(indicator_id)?;
                        let mut points =
                            Vec::with_capacity(request.dates.len() * request.scenarios.len());
                        for date in &request.dates {
                            for scenario in &request.scenarios {
                                points.push(self.forecast_with(&fit, *date, *scenario));
                            }
                        }
                        Ok(points)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        });

        let mut points = Vec::new();
        let mut skipped = Vec::new();
        for (indicator_id, result) in indicator_ids.into_iter().zip(results) {
            match result {
                Ok(mut batch) => points.append(&mut batch),
                Err(err) => skipped.push(SkippedIndicator {
                    indicator_id: indicator_id.clone(),
                    reason: err.to_string(),
                }),
            }
        }

        Ok(ForecastRun {
            run_id: Ulid::new(),
            generated_at: format_rfc3339(now_utc())?,
            ruleset_version: self.ruleset().ruleset_version,
            points,
            skipped,
        })
    }
}

fn contribution(
    ruleset: &ForecastRuleset,
    link: &ImpactLink,
    date: Date,
    scenario: Scenario,
) -> Option<EventContribution> {
    let weight = effect_weight(ruleset, link.landing_date, date);
    if weight <= 0.0 {
        return None;
    }
    let multiplier = ruleset.effect_multiplier(scenario, link.magnitude);
    Some(EventContribution {
        link_id: link.link_id,
        event_id: link.event_id.clone(),
        landing_date: link.landing_date,
        magnitude: link.magnitude,
        multiplier,
        weight,
        amount: link.magnitude * multiplier * weight,
        confidence: link.confidence,
    })
}

/// Share of a landed effect that counts at `date`.
fn effect_weight(ruleset: &ForecastRuleset, landing_date: Date, date: Date) -> f64 {
    let months_since_landing = years_between(landing_date, date) * 12.0;
    if let Some(horizon) = ruleset.decay_horizon_months {
        if months_since_landing > f64::from(horizon) {
            return 0.0;
        }
    }
    if ruleset.ramp_months == 0 {
        1.0
    } else {
        (months_since_landing / f64::from(ruleset.ramp_months)).clamp(0.0, 1.0)
    }
}

mod iso_date_list {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use time::Date;

    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    struct Item(#[serde(with = "crate::iso_date")] Date);

    pub fn serialize<S: Serializer>(dates: &[Date], serializer: S) -> Result<S::Ok, S::Error> {
        let items: Vec<Item> = dates.iter().copied().map(Item).collect();
        items.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Date>, D::Error> {
        let items = Vec::<Item>::deserialize(deserializer)?;
        Ok(items.into_iter().map(|item| item.0).collect())
    }
}
