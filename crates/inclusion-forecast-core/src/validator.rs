use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    add_months, Confidence, DataSufficiency, EventId, ForecastError, ForecastRuleset, ImpactLink,
    ImpactLinkSet, IndicatorId, LinkId, LinkStatus, ObservationStore,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

/// A link's predicted effect scored against the observed delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationCase {
    pub link_id: LinkId,
    pub event_id: EventId,
    pub indicator_id: IndicatorId,
    #[serde(with = "crate::iso_date")]
    pub event_date: Date,
    #[serde(with = "crate::iso_date")]
    pub before_date: Date,
    pub before_value: f64,
    #[serde(with = "crate::iso_date")]
    pub after_date: Date,
    pub after_value: f64,
    pub predicted_delta: f64,
    pub actual_delta: f64,
    pub absolute_error_pct: f64,
    pub verdict: Verdict,
    pub confidence: Confidence,
    pub sufficiency: DataSufficiency,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnscoredLink {
    pub link_id: LinkId,
    pub event_id: EventId,
    pub indicator_id: IndicatorId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub ruleset_version: u32,
    pub error_threshold_pct: f64,
    pub cases: Vec<ValidationCase>,
    pub unscored: Vec<UnscoredLink>,
    pub pass_count: usize,
    pub fail_count: usize,
    /// `100 - average_error`, unweighted. `None` when no link was scorable.
    pub model_accuracy: Option<f64>,
    pub average_error: Option<f64>,
    /// `100 -` the confidence-weighted mean error.
    pub weighted_model_accuracy: Option<f64>,
}

/// Scores one link against the observations bracketing its event.
///
/// The `before` point is the latest observation strictly before the event
/// date; the `after` point is the earliest observation on or after the
/// landing date and no later than `landing + validation_tolerance_months`.
///
/// # Errors
/// Returns [`ForecastError::InsufficientData`] when either bracketing
/// observation is missing, or when the observed delta is zero while the
/// link predicts a non-zero effect.
pub fn validate_link(
    link: &ImpactLink,
    observations: &ObservationStore,
    ruleset: &ForecastRuleset,
) -> Result<ValidationCase, ForecastError> {
    let insufficient = |reason: String| ForecastError::InsufficientData {
        link_id: link.link_id,
        reason,
    };

    let before = observations
        .last_before(&link.indicator_id, link.event_date)
        .ok_or_else(|| {
            insufficient(format!(
                "no {} observation before {}",
                link.indicator_id, link.event_date
            ))
        })?;

    let window_end = add_months(link.landing_date, ruleset.validation_tolerance_months)
        .map_err(|err| insufficient(err.to_string()))?;
    let after = observations
        .first_on_or_after(&link.indicator_id, link.landing_date)
        .filter(|observation| observation.date <= window_end)
        .ok_or_else(|| {
            insufficient(format!(
                "no {} observation in [{}, {}]",
                link.indicator_id, link.landing_date, window_end
            ))
        })?;

    let actual_delta = after.value - before.value;
    let predicted_delta = link.magnitude;
    let absolute_error_pct = if actual_delta == 0.0 {
        if predicted_delta == 0.0 {
            0.0
        } else {
            return Err(insufficient(
                "observed delta is zero; relative error is undefined".to_string(),
            ));
        }
    } else {
        (actual_delta - predicted_delta).abs() / actual_delta.abs() * 100.0
    };

    let verdict = if absolute_error_pct <= ruleset.validation_error_threshold_pct {
        Verdict::Pass
    } else {
        Verdict::Fail
    };

    let sufficiency =
        if observations.series(&link.indicator_id).len() >= ruleset.dense_history_min_points {
            DataSufficiency::Dense
        } else {
            DataSufficiency::Thin
        };

    Ok(ValidationCase {
        link_id: link.link_id,
        event_id: link.event_id.clone(),
        indicator_id: link.indicator_id.clone(),
        event_date: link.event_date,
        before_date: before.date,
        before_value: before.value,
        after_date: after.date,
        after_value: after.value,
        predicted_delta,
        actual_delta,
        absolute_error_pct,
        verdict,
        confidence: link.confidence,
        sufficiency,
    })
}

/// Scores every active link. Pure: the same links, observations and ruleset
/// always produce the same report.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn validate_links(
    links: &ImpactLinkSet,
    observations: &ObservationStore,
    ruleset: &ForecastRuleset,
) -> ValidationReport {
    let mut cases = Vec::new();
    let mut unscored = Vec::new();

    for link in links.active() {
        match validate_link(link, observations, ruleset) {
            Ok(case) => cases.push(case),
            Err(err) => unscored.push(UnscoredLink {
                link_id: link.link_id,
                event_id: link.event_id.clone(),
                indicator_id: link.indicator_id.clone(),
                reason: err.to_string(),
            }),
        }
    }

    let pass_count = cases
        .iter()
        .filter(|case| case.verdict == Verdict::Pass)
        .count();
    let fail_count = cases.len() - pass_count;

    let average_error = if cases.is_empty() {
        None
    } else {
        Some(cases.iter().map(|case| case.absolute_error_pct).sum::<f64>() / cases.len() as f64)
    };

    let weight_total: f64 = cases
        .iter()
        .map(|case| ruleset.confidence_weight(case.confidence))
        .sum();
    let weighted_error = if weight_total > 0.0 {
        Some(
            cases
                .iter()
                .map(|case| ruleset.confidence_weight(case.confidence) * case.absolute_error_pct)
                .sum::<f64>()
                / weight_total,
        )
    } else {
        None
    };

    ValidationReport {
        ruleset_version: ruleset.ruleset_version,
        error_threshold_pct: ruleset.validation_error_threshold_pct,
        cases,
        unscored,
        pass_count,
        fail_count,
        model_accuracy: average_error.map(|error| 100.0 - error),
        average_error,
        weighted_model_accuracy: weighted_error.map(|error| 100.0 - error),
    }
}

/// Promotes proposed links whose case passed. Returns the promoted ids.
///
/// # Errors
/// Returns [`ForecastError::InvalidLink`] when a reported link no longer
/// exists in `links`.
pub fn apply_verdicts(
    links: &mut ImpactLinkSet,
    report: &ValidationReport,
) -> Result<Vec<LinkId>, ForecastError> {
    let mut promoted = Vec::new();
    for case in &report.cases {
        if case.verdict != Verdict::Pass {
            continue;
        }
        let Some(link) = links.get(case.link_id) else {
            return Err(ForecastError::InvalidLink(format!(
                "unknown link {}",
                case.link_id
            )));
        };
        if link.status == LinkStatus::Proposed {
            links.mark_validated(case.link_id)?;
            promoted.push(case.link_id);
        }
    }
    Ok(promoted)
}
