use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    clamp, years_between, DataSufficiency, ForecastError, ForecastRuleset, Indicator,
    IndicatorCatalog, IndicatorId, ObservationStore,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrendMethod {
    /// Linear rate over the trailing two observed intervals.
    PiecewiseLinear,
    /// `v = a + b * ln(1 + t)` fitted by least squares, `t` in years since the
    /// first observation.
    LogGrowth,
    /// Expert-supplied anchor and annual change.
    Prior,
}

impl TrendMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PiecewiseLinear => "piecewise_linear",
            Self::LogGrowth => "log_growth",
            Self::Prior => "prior",
        }
    }
}

/// Baseline supplied from outside the observation history, for indicators
/// with fewer than two observations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPrior {
    pub indicator_id: IndicatorId,
    #[serde(with = "crate::iso_date")]
    pub anchor_date: Date,
    pub anchor_value: f64,
    pub annual_change_pp: f64,
    pub source: String,
}

/// A fitted baseline for one indicator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendFit {
    pub indicator_id: IndicatorId,
    pub method: TrendMethod,
    pub sufficiency: DataSufficiency,
    pub points: Vec<TrendPoint>,
    /// Annual pp rate used for linear extrapolation past either end.
    pub trailing_rate_per_year: f64,
    pub leading_rate_per_year: f64,
    pub log_growth_coefficient: Option<f64>,
    pub valid_min: f64,
    pub valid_max: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    #[serde(with = "crate::iso_date")]
    pub date: Date,
    pub value: f64,
}

impl TrendFit {
    /// Builds a baseline from an expert prior.
    #[must_use]
    pub fn from_prior(prior: &TrendPrior, indicator: &Indicator) -> Self {
        Self {
            indicator_id: indicator.id.clone(),
            method: TrendMethod::Prior,
            sufficiency: DataSufficiency::Prior,
            points: vec![TrendPoint {
                date: prior.anchor_date,
                value: prior.anchor_value,
            }],
            trailing_rate_per_year: prior.annual_change_pp,
            leading_rate_per_year: prior.annual_change_pp,
            log_growth_coefficient: None,
            valid_min: indicator.valid_min,
            valid_max: indicator.valid_max,
        }
    }

    #[must_use]
    pub fn last_date(&self) -> Option<Date> {
        self.points.last().map(|point| point.date)
    }

    /// Baseline value at `date`, clamped to the indicator's valid range.
    /// Inside the observed span this is plain interpolation.
    #[must_use]
    pub fn project(&self, date: Date) -> f64 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return self.valid_min;
        };

        let raw = if date <= first.date {
            first.value + self.leading_rate_per_year * years_between(first.date, date)
        } else if date >= last.date {
            self.extrapolate(first, last, date)
        } else {
            self.interpolate(date)
        };

        clamp(raw, self.valid_min, self.valid_max)
    }

    fn extrapolate(&self, first: &TrendPoint, last: &TrendPoint, date: Date) -> f64 {
        match (self.method, self.log_growth_coefficient) {
            (TrendMethod::LogGrowth, Some(coefficient)) => {
                let t_last = years_between(first.date, last.date);
                let t = years_between(first.date, date);
                last.value + coefficient * ((1.0 + t).ln() - (1.0 + t_last).ln())
            }
            _ => last.value + self.trailing_rate_per_year * years_between(last.date, date),
        }
    }

    fn interpolate(&self, date: Date) -> f64 {
        let upper = self.points.partition_point(|point| point.date < date);
        match (
            upper.checked_sub(1).and_then(|index| self.points.get(index)),
            self.points.get(upper),
        ) {
            (Some(lhs), Some(rhs)) => {
                if rhs.date == date {
                    return rhs.value;
                }
                let span = years_between(lhs.date, rhs.date);
                let offset = years_between(lhs.date, date);
                lhs.value + (rhs.value - lhs.value) * offset / span
            }
            (Some(only), None) | (None, Some(only)) => only.value,
            (None, None) => self.valid_min,
        }
    }
}

/// Event-agnostic baseline estimator over an observation store.
#[derive(Debug, Clone, Copy)]
pub struct TrendEstimator<'a> {
    catalog: &'a IndicatorCatalog,
    observations: &'a ObservationStore,
    ruleset: &'a ForecastRuleset,
}

impl<'a> TrendEstimator<'a> {
    #[must_use]
    pub fn new(
        catalog: &'a IndicatorCatalog,
        observations: &'a ObservationStore,
        ruleset: &'a ForecastRuleset,
    ) -> Self {
        Self {
            catalog,
            observations,
            ruleset,
        }
    }

    /// Fits the indicator's baseline from its own observations.
    ///
    /// # Errors
    /// Returns [`ForecastError::UnknownIndicator`] for an unregistered id and
    /// [`ForecastError::InsufficientHistory`] when fewer than two
    /// observations exist.
    pub fn fit(&self, indicator_id: &IndicatorId) -> Result<TrendFit, ForecastError> {
        let indicator = self.catalog.require(indicator_id)?;
        let series = self.observations.series(indicator_id);
        if series.len() < 2 {
            return Err(ForecastError::InsufficientHistory {
                indicator_id: indicator_id.clone(),
                observations: series.len(),
            });
        }

        let points: Vec<TrendPoint> = series
            .iter()
            .map(|observation| TrendPoint {
                date: observation.date,
                value: observation.value,
            })
            .collect();

        let last_index = points.len() - 1;
        let window_start = points.len().saturating_sub(3);
        let trailing_rate_per_year = rate_between(&points[window_start], &points[last_index]);
        let leading_rate_per_year = rate_between(&points[0], &points[1]);

        let (method, log_growth_coefficient) = if points.len() >= self.ruleset.log_growth_min_points
        {
            match fit_log_growth(&points) {
                Some(coefficient) => (TrendMethod::LogGrowth, Some(coefficient)),
                None => (TrendMethod::PiecewiseLinear, None),
            }
        } else {
            (TrendMethod::PiecewiseLinear, None)
        };

        let sufficiency = if points.len() >= self.ruleset.dense_history_min_points {
            DataSufficiency::Dense
        } else {
            DataSufficiency::Thin
        };

        Ok(TrendFit {
            indicator_id: indicator_id.clone(),
            method,
            sufficiency,
            points,
            trailing_rate_per_year,
            leading_rate_per_year,
            log_growth_coefficient,
            valid_min: indicator.valid_min,
            valid_max: indicator.valid_max,
        })
    }

    /// Baseline value for `indicator_id` at `date`.
    ///
    /// # Errors
    /// Propagates [`TrendEstimator::fit`] errors; never substitutes a value.
    pub fn project(&self, indicator_id: &IndicatorId, date: Date) -> Result<f64, ForecastError> {
        Ok(self.fit(indicator_id)?.project(date))
    }
}

fn rate_between(from: &TrendPoint, to: &TrendPoint) -> f64 {
    let years = years_between(from.date, to.date);
    if years == 0.0 {
        0.0
    } else {
        (to.value - from.value) / years
    }
}

#[allow(clippy::cast_precision_loss)]
fn fit_log_growth(points: &[TrendPoint]) -> Option<f64> {
    let first = points.first()?.date;
    let xs: Vec<f64> = points
        .iter()
        .map(|point| (1.0 + years_between(first, point.date)).ln())
        .collect();
    let count = points.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / count;
    let mean_y = points.iter().map(|point| point.value).sum::<f64>() / count;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, point) in xs.iter().zip(points) {
        covariance += (x - mean_x) * (point.value - mean_y);
        variance += (x - mean_x) * (x - mean_x);
    }

    if variance <= f64::EPSILON {
        return None;
    }
    let coefficient = covariance / variance;
    coefficient.is_finite().then_some(coefficient)
}
