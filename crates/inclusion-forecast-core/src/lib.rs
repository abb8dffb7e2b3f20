//! Event impact model and scenario forecast engine for sparse
//! financial-inclusion indicators.
//!
//! The crate is a pure computation over an immutable [`ModelSnapshot`]:
//! - [`IndicatorCatalog`], [`ObservationStore`], [`EventCatalog`] and
//!   [`ImpactLinkSet`] hold the inputs.
//! - [`validate_links`] scores each impact link against observed deltas.
//! - [`TrendEstimator`] fits an event-agnostic baseline per indicator.
//! - [`ScenarioForecaster`] adds landed, scenario-scaled link effects.
//! - [`TargetTracker`] scores a forecast against a declared policy target.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime, UtcOffset};

mod analysis;
mod catalog;
mod feed;
mod forecast;
mod links;
mod observations;
mod ruleset;
mod snapshot;
mod targets;
mod trend;
mod validator;

pub use analysis::{
    compound_annual_growth_rate, growth_summary, key_drivers, milestones, scenario_summary,
    DriverRow, GrowthRow, MilestoneCrossing, ScenarioSummaryRow,
};
pub use catalog::{Event, EventCatalog, Indicator, IndicatorCatalog};
pub use feed::{
    EventRow, FeedBundle, ImpactLinkRow, IndicatorRow, IngestReport, ObservationRow, RowRejection,
    TargetRow, TrendPriorRow,
};
pub use forecast::{
    EventContribution, ForecastPoint, ForecastRequest, ForecastRun, ScenarioForecaster,
    SkippedIndicator,
};
pub use links::{ImpactLink, ImpactLinkInput, ImpactLinkSet, LinkId, LinkStatus, MatrixCell};
pub use observations::{Observation, ObservationStore};
pub use ruleset::{ForecastRuleset, MagnitudeBand};
pub use snapshot::{ModelSnapshot, SnapshotBuilder, SnapshotHandle, SnapshotIngest};
pub use targets::{Target, TargetBook, TargetEvaluation, TargetStatus, TargetTracker};
pub use trend::{TrendEstimator, TrendFit, TrendMethod, TrendPoint, TrendPrior};
pub use validator::{
    apply_verdicts, validate_link, validate_links, UnscoredLink, ValidationCase,
    ValidationReport, Verdict,
};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ForecastError {
    #[error("schema error: {0}")]
    Schema(String),
    #[error("invalid impact link: {0}")]
    InvalidLink(String),
    #[error("insufficient data to validate link {link_id}: {reason}")]
    InsufficientData { link_id: LinkId, reason: String },
    #[error(
        "insufficient history for indicator {indicator_id}: {observations} observation(s), at least 2 required"
    )]
    InsufficientHistory {
        indicator_id: IndicatorId,
        observations: usize,
    },
    #[error("no target defined for indicator {indicator_id} at {target_date}")]
    NoTargetDefined {
        indicator_id: IndicatorId,
        target_date: Date,
    },
    #[error("unknown indicator: {0}")]
    UnknownIndicator(IndicatorId),
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct IndicatorId(pub String);

impl IndicatorId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for IndicatorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndicatorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Pillar {
    Access,
    Usage,
    Enabler,
}

impl Pillar {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Usage => "usage",
            Self::Enabler => "enabler",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "access" => Some(Self::Access),
            "usage" => Some(Self::Usage),
            "enabler" => Some(Self::Enabler),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    ProductLaunch,
    Policy,
    MarketEntry,
    ExternalShock,
    Milestone,
}

impl EventCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProductLaunch => "product_launch",
            Self::Policy => "policy",
            Self::MarketEntry => "market_entry",
            Self::ExternalShock => "external_shock",
            Self::Milestone => "milestone",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "product_launch" => Some(Self::ProductLaunch),
            "policy" => Some(Self::Policy),
            "market_entry" => Some(Self::MarketEntry),
            "external_shock" => Some(Self::ExternalShock),
            "milestone" => Some(Self::Milestone),
            _ => None,
        }
    }
}

/// Expected sign of an event's effect on an indicator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Direction {
    #[serde(rename = "+")]
    Increase,
    #[serde(rename = "-")]
    Decrease,
    #[serde(rename = "0")]
    Neutral,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Increase => "+",
            Self::Decrease => "-",
            Self::Neutral => "0",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "+" | "increase" | "positive" => Some(Self::Increase),
            "-" | "\u{2212}" | "decrease" | "negative" => Some(Self::Decrease),
            "0" | "none" | "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }

    /// Returns true when `magnitude` carries the sign this direction asserts.
    #[must_use]
    pub fn agrees_with(self, magnitude: f64) -> bool {
        match self {
            Self::Increase => magnitude > 0.0,
            Self::Decrease => magnitude < 0.0,
            Self::Neutral => magnitude == 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Pessimistic,
    Base,
    Optimistic,
}

impl Scenario {
    pub const ALL: [Self; 3] = [Self::Base, Self::Optimistic, Self::Pessimistic];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pessimistic => "pessimistic",
            Self::Base => "base",
            Self::Optimistic => "optimistic",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pessimistic" => Some(Self::Pessimistic),
            "base" => Some(Self::Base),
            "optimistic" => Some(Self::Optimistic),
            _ => None,
        }
    }

    /// The scenario whose multiplier applies to negative effects.
    #[must_use]
    pub fn mirrored(self) -> Self {
        match self {
            Self::Pessimistic => Self::Optimistic,
            Self::Base => Self::Base,
            Self::Optimistic => Self::Pessimistic,
        }
    }
}

/// How much observed data stands behind a computed number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataSufficiency {
    /// Enough observations for the fitted log-growth trend.
    Dense,
    /// Two or three observations, or a validation window bracketed by a
    /// single pair of points.
    Thin,
    /// No usable history; the baseline came from an expert prior.
    Prior,
}

impl DataSufficiency {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Thin => "thin",
            Self::Prior => "prior",
        }
    }
}

/// Parses an ISO-8601 calendar date (`YYYY-MM-DD`).
///
/// # Errors
/// Returns [`ForecastError::Schema`] when the value is not a valid date.
pub fn parse_iso_date(value: &str) -> Result<Date, ForecastError> {
    Date::parse(
        value.trim(),
        time::macros::format_description!("[year]-[month]-[day]"),
    )
    .map_err(|err| ForecastError::Schema(format!("invalid ISO-8601 date {value:?}: {err}")))
}

/// Formats a date as `YYYY-MM-DD`.
///
/// # Errors
/// Returns [`ForecastError::Schema`] when formatting fails.
pub fn format_iso_date(value: Date) -> Result<String, ForecastError> {
    value
        .format(time::macros::format_description!("[year]-[month]-[day]"))
        .map_err(|err| ForecastError::Schema(format!("failed to format date: {err}")))
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`ForecastError::Schema`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, ForecastError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| ForecastError::Schema(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

/// Adds whole calendar months, clamping the day to the target month's length
/// (2021-01-31 + 1 month = 2021-02-28).
///
/// # Errors
/// Returns [`ForecastError::Schema`] when the result leaves the supported
/// calendar range.
pub fn add_months(date: Date, months: u32) -> Result<Date, ForecastError> {
    let months = i32::try_from(months)
        .map_err(|_| ForecastError::Schema(format!("month offset {months} is too large")))?;
    let zero_based = date
        .year()
        .checked_mul(12)
        .and_then(|value| value.checked_add(i32::from(u8::from(date.month())) - 1))
        .and_then(|value| value.checked_add(months))
        .ok_or_else(|| ForecastError::Schema("date arithmetic overflow".to_string()))?;

    let year = zero_based.div_euclid(12);
    let month_number = u8::try_from(zero_based.rem_euclid(12) + 1)
        .map_err(|_| ForecastError::Schema("month out of range".to_string()))?;
    let month = Month::try_from(month_number)
        .map_err(|err| ForecastError::Schema(format!("month out of range: {err}")))?;
    let day = date.day().min(month.length(year));

    Date::from_calendar_date(year, month, day)
        .map_err(|err| ForecastError::Schema(format!("date out of range: {err}")))
}

/// Fractional years from `from` to `to`; negative when `to` precedes `from`.
#[must_use]
pub fn years_between(from: Date, to: Date) -> f64 {
    f64::from(to.to_julian_day() - from.to_julian_day()) / DAYS_PER_YEAR
}

pub(crate) const DAYS_PER_YEAR: f64 = 365.25;

pub(crate) fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.min(max).max(min)
}

#[cfg(test)]
pub(crate) mod test_support {
    use time::Date;

    pub fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    pub fn must_err<T: std::fmt::Debug, E>(result: Result<T, E>) -> E {
        match result {
            Ok(value) => panic!("expected Err(..), got Ok({value:?})"),
            Err(err) => err,
        }
    }

    pub fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    pub fn date(value: &str) -> Date {
        must_ok(super::parse_iso_date(value))
    }
}
