//! Row shapes for the flat tabular feeds and per-feed ingest reports.
//!
//! Rows are decoded one at a time from raw JSON records so that a single
//! malformed row is rejected without failing its feed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    parse_iso_date, Confidence, Direction, Event, EventCategory, EventId, ForecastError,
    ForecastRuleset, ImpactLinkInput, Indicator, IndicatorId, LinkStatus, MagnitudeBand, Observation,
    Pillar, Target, TrendPrior,
};

/// Raw records for every feed, in ingest order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedBundle {
    pub indicators: Vec<Value>,
    pub observations: Vec<Value>,
    pub events: Vec<Value>,
    pub impact_links: Vec<Value>,
    pub targets: Vec<Value>,
    pub priors: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowRejection {
    pub row_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    pub feed: String,
    pub accepted: usize,
    pub rejected: Vec<RowRejection>,
}

impl IngestReport {
    #[must_use]
    pub fn new(feed: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            accepted: 0,
            rejected: Vec::new(),
        }
    }

    #[must_use]
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    pub(crate) fn record(&mut self, row_index: usize, outcome: Result<(), ForecastError>) {
        match outcome {
            Ok(()) => self.accepted += 1,
            Err(err) => self.rejected.push(RowRejection {
                row_index,
                reason: err.to_string(),
            }),
        }
    }
}

pub(crate) fn decode_row<T: DeserializeOwned>(value: &Value) -> Result<T, ForecastError> {
    serde_json::from_value(value.clone())
        .map_err(|err| ForecastError::Schema(format!("malformed row: {err}")))
}

fn parse_confidence(value: &str) -> Result<Confidence, ForecastError> {
    Confidence::parse(value)
        .ok_or_else(|| ForecastError::Schema(format!("unknown confidence {value:?}")))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorRow {
    pub indicator_id: String,
    pub name: String,
    pub pillar: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub valid_min: Option<f64>,
    #[serde(default)]
    pub valid_max: Option<f64>,
}

impl IndicatorRow {
    /// # Errors
    /// Returns [`ForecastError::Schema`] for an unknown pillar.
    pub fn into_indicator(self) -> Result<Indicator, ForecastError> {
        let pillar = Pillar::parse(&self.pillar)
            .ok_or_else(|| ForecastError::Schema(format!("unknown pillar {:?}", self.pillar)))?;
        let mut indicator = Indicator::percentage(self.indicator_id, self.name, pillar);
        if let Some(unit) = self.unit {
            indicator.unit = unit;
        }
        if let Some(min) = self.valid_min {
            indicator.valid_min = min;
        }
        if let Some(max) = self.valid_max {
            indicator.valid_max = max;
        }
        Ok(indicator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservationRow {
    pub indicator_id: String,
    pub date: String,
    pub value: f64,
    pub confidence: String,
    #[serde(default)]
    pub source: String,
}

impl ObservationRow {
    /// # Errors
    /// Returns [`ForecastError::Schema`] for a bad date or confidence.
    pub fn into_observation(self) -> Result<Observation, ForecastError> {
        Ok(Observation {
            indicator_id: IndicatorId::new(self.indicator_id),
            date: parse_iso_date(&self.date)?,
            value: self.value,
            confidence: parse_confidence(&self.confidence)?,
            source: self.source,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRow {
    pub event_id: String,
    pub date: String,
    pub category: String,
    pub label: String,
    pub confidence: String,
    #[serde(default)]
    pub source: String,
}

impl EventRow {
    /// # Errors
    /// Returns [`ForecastError::Schema`] for a bad date, category or
    /// confidence.
    pub fn into_event(self) -> Result<Event, ForecastError> {
        let category = EventCategory::parse(&self.category).ok_or_else(|| {
            ForecastError::Schema(format!("unknown event category {:?}", self.category))
        })?;
        Ok(Event {
            event_id: EventId::new(self.event_id),
            date: parse_iso_date(&self.date)?,
            category,
            label: self.label,
            confidence: parse_confidence(&self.confidence)?,
            source: self.source,
        })
    }
}

/// Link row. `lag_months` is required. Either `magnitude` or
/// `magnitude_band` must be present; a band takes its size from the ruleset
/// and its sign from `direction`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactLinkRow {
    pub event_id: String,
    pub indicator_id: String,
    pub direction: String,
    #[serde(default)]
    pub magnitude: Option<f64>,
    #[serde(default)]
    pub magnitude_band: Option<String>,
    pub lag_months: u32,
    pub confidence: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl ImpactLinkRow {
    /// # Errors
    /// Returns [`ForecastError::Schema`] for unparseable enums or a row with
    /// neither magnitude nor band.
    pub fn into_input(self, ruleset: &ForecastRuleset) -> Result<ImpactLinkInput, ForecastError> {
        let direction = Direction::parse(&self.direction).ok_or_else(|| {
            ForecastError::Schema(format!("unknown direction {:?}", self.direction))
        })?;

        let magnitude = match (self.magnitude, self.magnitude_band.as_deref()) {
            (Some(magnitude), _) => magnitude,
            (None, Some(band)) => {
                let band = MagnitudeBand::parse(band).ok_or_else(|| {
                    ForecastError::Schema(format!("unknown magnitude band {band:?}"))
                })?;
                let size = ruleset.band_magnitude(band);
                match direction {
                    Direction::Increase => size,
                    Direction::Decrease => -size,
                    Direction::Neutral => 0.0,
                }
            }
            (None, None) => {
                return Err(ForecastError::Schema(format!(
                    "{} -> {}: link row needs magnitude or magnitude_band",
                    self.event_id, self.indicator_id
                )))
            }
        };

        let status = match self.status.as_deref() {
            None => LinkStatus::Proposed,
            Some(status) => LinkStatus::parse(status)
                .ok_or_else(|| ForecastError::Schema(format!("unknown link status {status:?}")))?,
        };

        Ok(ImpactLinkInput {
            event_id: EventId::new(self.event_id),
            indicator_id: IndicatorId::new(self.indicator_id),
            direction,
            magnitude,
            lag_months: self.lag_months,
            confidence: parse_confidence(&self.confidence)?,
            status,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetRow {
    pub indicator_id: String,
    pub target_date: String,
    pub target_value: f64,
    #[serde(default)]
    pub source: String,
}

impl TargetRow {
    /// # Errors
    /// Returns [`ForecastError::Schema`] for a bad date.
    pub fn into_target(self) -> Result<Target, ForecastError> {
        Ok(Target {
            indicator_id: IndicatorId::new(self.indicator_id),
            target_date: parse_iso_date(&self.target_date)?,
            target_value: self.target_value,
            source: self.source,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPriorRow {
    pub indicator_id: String,
    pub anchor_date: String,
    pub anchor_value: f64,
    pub annual_change_pp: f64,
    #[serde(default)]
    pub source: String,
}

impl TrendPriorRow {
    /// # Errors
    /// Returns [`ForecastError::Schema`] for a bad date or a non-finite rate.
    pub fn into_prior(self) -> Result<TrendPrior, ForecastError> {
        if !self.annual_change_pp.is_finite() {
            return Err(ForecastError::Schema(format!(
                "prior for {} has a non-finite annual change",
                self.indicator_id
            )));
        }
        Ok(TrendPrior {
            indicator_id: IndicatorId::new(self.indicator_id),
            anchor_date: parse_iso_date(&self.anchor_date)?,
            anchor_value: self.anchor_value,
            annual_change_pp: self.annual_change_pp,
            source: self.source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{must_err, must_ok};
    use serde_json::json;

    #[test]
    fn band_takes_sign_from_direction() {
        let row: ImpactLinkRow = must_ok(decode_row(&json!({
            "event_id": "EVT_SHOCK",
            "indicator_id": "ACC_OWNERSHIP",
            "direction": "-",
            "magnitude_band": "medium",
            "lag_months": 6,
            "confidence": "low"
        })));
        let input = must_ok(row.into_input(&ForecastRuleset::v1()));
        assert!((input.magnitude + 8.0).abs() < f64::EPSILON);
        assert_eq!(input.status, LinkStatus::Proposed);
    }

    #[test]
    fn link_row_without_magnitude_is_rejected() {
        let row: ImpactLinkRow = must_ok(decode_row(&json!({
            "event_id": "EVT_SHOCK",
            "indicator_id": "ACC_OWNERSHIP",
            "direction": "+",
            "lag_months": 12,
            "confidence": "high"
        })));
        assert!(matches!(
            must_err(row.into_input(&ForecastRuleset::v1())),
            ForecastError::Schema(_)
        ));
    }

    #[test]
    fn link_row_without_lag_is_rejected() {
        let err = must_err(decode_row::<ImpactLinkRow>(&json!({
            "event_id": "EVT_TELEBIRR",
            "indicator_id": "ACC_OWNERSHIP",
            "direction": "+",
            "magnitude": 15.0,
            "confidence": "high"
        })));
        match err {
            ForecastError::Schema(reason) => assert!(reason.contains("lag_months")),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn wrongly_typed_row_is_a_schema_error() {
        let err = must_err(decode_row::<ObservationRow>(&json!({
            "indicator_id": "ACC_OWNERSHIP",
            "date": "2021-12-31",
            "value": "forty-six",
            "confidence": "high"
        })));
        assert!(matches!(err, ForecastError::Schema(_)));
    }

    #[test]
    fn report_counts_outcomes() {
        let mut report = IngestReport::new("observations");
        report.record(0, Ok(()));
        report.record(1, Err(ForecastError::Schema("bad".to_string())));
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected_count(), 1);
        assert_eq!(report.rejected[0].row_index, 1);
    }

    #[test]
    fn indicator_row_overrides_range() {
        let row: IndicatorRow = must_ok(decode_row(&json!({
            "indicator_id": "ENB_AGENTS",
            "name": "Agents per 100k adults",
            "pillar": "enabler",
            "unit": "per_100k",
            "valid_min": 0.0,
            "valid_max": 10000.0
        })));
        let indicator = must_ok(row.into_indicator());
        assert_eq!(indicator.unit, "per_100k");
        assert!((indicator.valid_max - 10_000.0).abs() < f64::EPSILON);
    }
}
