use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Confidence, ForecastError, Scenario};

/// Qualitative size of an asserted effect, used when a link row carries no
/// numeric magnitude.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MagnitudeBand {
    Low,
    Medium,
    High,
}

impl MagnitudeBand {
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

/// Versioned tuning parameters for validation, trend fitting, forecasting and
/// target scoring. Fields missing from a decoded payload take their `v1`
/// value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForecastRuleset {
    pub ruleset_version: u32,
    pub validation_error_threshold_pct: f64,
    pub validation_tolerance_months: u32,
    pub log_growth_min_points: usize,
    pub dense_history_min_points: usize,
    pub base_multiplier: f64,
    pub optimistic_multiplier: f64,
    pub pessimistic_multiplier: f64,
    pub bound_base_fraction: f64,
    pub bound_per_year_fraction: f64,
    pub uncertain_link_bound_factor: f64,
    pub ramp_months: u32,
    pub decay_horizon_months: Option<u32>,
    pub on_track_min_ratio: f64,
    pub at_risk_min_ratio: f64,
    pub high_confidence_weight: f64,
    pub medium_confidence_weight: f64,
    pub low_confidence_weight: f64,
    pub band_high_pp: f64,
    pub band_medium_pp: f64,
    pub band_low_pp: f64,
    pub driver_high_min_pp: f64,
    pub driver_medium_min_pp: f64,
}

impl Default for ForecastRuleset {
    fn default() -> Self {
        Self::v1()
    }
}

impl ForecastRuleset {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            ruleset_version: 1,
            validation_error_threshold_pct: 15.0,
            validation_tolerance_months: 36,
            log_growth_min_points: 4,
            dense_history_min_points: 4,
            base_multiplier: 1.0,
            optimistic_multiplier: 1.3,
            pessimistic_multiplier: 0.6,
            bound_base_fraction: 0.05,
            bound_per_year_fraction: 0.02,
            uncertain_link_bound_factor: 1.5,
            ramp_months: 0,
            decay_horizon_months: None,
            on_track_min_ratio: 95.0,
            at_risk_min_ratio: 80.0,
            high_confidence_weight: 1.0,
            medium_confidence_weight: 0.6,
            low_confidence_weight: 0.3,
            band_high_pp: 15.0,
            band_medium_pp: 8.0,
            band_low_pp: 3.0,
            driver_high_min_pp: 10.0,
            driver_medium_min_pp: 5.0,
        }
    }

    /// Validates numeric bounds and ordering invariants.
    ///
    /// # Errors
    /// Returns [`ForecastError::Configuration`] when one or more fields are
    /// outside allowed bounds.
    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.ruleset_version == 0 {
            return Err(ForecastError::Configuration(
                "ruleset_version MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            (
                "validation_error_threshold_pct",
                self.validation_error_threshold_pct,
            ),
            ("base_multiplier", self.base_multiplier),
            ("optimistic_multiplier", self.optimistic_multiplier),
            ("pessimistic_multiplier", self.pessimistic_multiplier),
            ("bound_base_fraction", self.bound_base_fraction),
            ("bound_per_year_fraction", self.bound_per_year_fraction),
            ("on_track_min_ratio", self.on_track_min_ratio),
            ("at_risk_min_ratio", self.at_risk_min_ratio),
            ("band_high_pp", self.band_high_pp),
            ("band_medium_pp", self.band_medium_pp),
            ("band_low_pp", self.band_low_pp),
            ("driver_high_min_pp", self.driver_high_min_pp),
            ("driver_medium_min_pp", self.driver_medium_min_pp),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ForecastError::Configuration(format!(
                    "{name} MUST be a finite value >= 0"
                )));
            }
        }

        for (name, value) in [
            ("high_confidence_weight", self.high_confidence_weight),
            ("medium_confidence_weight", self.medium_confidence_weight),
            ("low_confidence_weight", self.low_confidence_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ForecastError::Configuration(format!(
                    "{name} MUST be in [0.0, 1.0]"
                )));
            }
        }

        if !self.uncertain_link_bound_factor.is_finite() || self.uncertain_link_bound_factor < 1.0
        {
            return Err(ForecastError::Configuration(
                "uncertain_link_bound_factor MUST be >= 1.0".to_string(),
            ));
        }

        if !(self.pessimistic_multiplier <= self.base_multiplier
            && self.base_multiplier <= self.optimistic_multiplier)
        {
            return Err(ForecastError::Configuration(
                "scenario multipliers MUST satisfy pessimistic <= base <= optimistic".to_string(),
            ));
        }

        if self.at_risk_min_ratio > self.on_track_min_ratio {
            return Err(ForecastError::Configuration(
                "at_risk_min_ratio cannot exceed on_track_min_ratio".to_string(),
            ));
        }

        if self.log_growth_min_points < 3 {
            return Err(ForecastError::Configuration(
                "log_growth_min_points MUST be >= 3".to_string(),
            ));
        }

        if self.dense_history_min_points < 2 {
            return Err(ForecastError::Configuration(
                "dense_history_min_points MUST be >= 2".to_string(),
            ));
        }

        if self.driver_medium_min_pp > self.driver_high_min_pp {
            return Err(ForecastError::Configuration(
                "driver_medium_min_pp cannot exceed driver_high_min_pp".to_string(),
            ));
        }

        if self.decay_horizon_months == Some(0) {
            return Err(ForecastError::Configuration(
                "decay_horizon_months MUST be >= 1 when set".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn multiplier(&self, scenario: Scenario) -> f64 {
        match scenario {
            Scenario::Base => self.base_multiplier,
            Scenario::Optimistic => self.optimistic_multiplier,
            Scenario::Pessimistic => self.pessimistic_multiplier,
        }
    }

    /// Multiplier for a single effect. Negative effects take the mirrored
    /// scenario's multiplier, so an optimistic outlook softens a shock.
    #[must_use]
    pub fn effect_multiplier(&self, scenario: Scenario, magnitude: f64) -> f64 {
        if magnitude < 0.0 {
            self.multiplier(scenario.mirrored())
        } else {
            self.multiplier(scenario)
        }
    }

    #[must_use]
    pub fn confidence_weight(&self, confidence: Confidence) -> f64 {
        match confidence {
            Confidence::High => self.high_confidence_weight,
            Confidence::Medium => self.medium_confidence_weight,
            Confidence::Low => self.low_confidence_weight,
        }
    }

    #[must_use]
    pub fn band_magnitude(&self, band: MagnitudeBand) -> f64 {
        match band {
            MagnitudeBand::High => self.band_high_pp,
            MagnitudeBand::Medium => self.band_medium_pp,
            MagnitudeBand::Low => self.band_low_pp,
        }
    }

    #[must_use]
    pub fn driver_band(&self, magnitude: f64) -> MagnitudeBand {
        let size = magnitude.abs();
        if size >= self.driver_high_min_pp {
            MagnitudeBand::High
        } else if size >= self.driver_medium_min_pp {
            MagnitudeBand::Medium
        } else {
            MagnitudeBand::Low
        }
    }

    /// Decodes and validates a ruleset from JSON.
    ///
    /// # Errors
    /// Returns [`ForecastError::Configuration`] when JSON decoding fails
    /// or decoded values violate ruleset constraints.
    pub fn from_json(value: &Value) -> Result<Self, ForecastError> {
        let ruleset: Self = serde_json::from_value(value.clone()).map_err(|err| {
            ForecastError::Configuration(format!("invalid ruleset JSON payload: {err}"))
        })?;
        ruleset.validate()?;
        Ok(ruleset)
    }
}
