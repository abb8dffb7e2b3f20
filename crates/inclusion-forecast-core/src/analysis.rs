use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::{
    years_between, Confidence, Direction, EventId, ForecastPoint, IndicatorId, LinkId,
    MagnitudeBand, ModelSnapshot, Scenario,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverRow {
    pub rank: usize,
    pub indicator_id: IndicatorId,
    pub event_id: EventId,
    pub event_label: String,
    pub link_id: LinkId,
    pub magnitude: f64,
    pub direction: Direction,
    pub band: MagnitudeBand,
    pub lag_months: u32,
    pub confidence: Confidence,
}

/// Active links on an indicator ranked by absolute magnitude, largest first.
#[must_use]
pub fn key_drivers(snapshot: &ModelSnapshot, indicator_id: &IndicatorId) -> Vec<DriverRow> {
    let mut links = snapshot.links.get_links(indicator_id);
    links.sort_by(|lhs, rhs| {
        rhs.magnitude
            .abs()
            .total_cmp(&lhs.magnitude.abs())
            .then(lhs.link_id.cmp(&rhs.link_id))
    });

    links
        .into_iter()
        .enumerate()
        .map(|(index, link)| DriverRow {
            rank: index + 1,
            indicator_id: link.indicator_id.clone(),
            event_id: link.event_id.clone(),
            event_label: snapshot
                .events
                .get(&link.event_id)
                .map(|event| event.label.clone())
                .unwrap_or_default(),
            link_id: link.link_id,
            magnitude: link.magnitude,
            direction: link.direction,
            band: snapshot.ruleset.driver_band(link.magnitude),
            lag_months: link.lag_months,
            confidence: link.confidence,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrowthRow {
    pub indicator_id: IndicatorId,
    #[serde(with = "crate::iso_date")]
    pub date: Date,
    pub scenario: Scenario,
    #[serde(with = "crate::iso_date")]
    pub observed_date: Date,
    pub observed_value: f64,
    pub forecast_value: f64,
    pub growth_pp: f64,
    pub growth_pct: Option<f64>,
    pub cagr_pct: Option<f64>,
}

/// Compound annual growth rate in percent, `None` when undefined.
#[must_use]
pub fn compound_annual_growth_rate(start: f64, end: f64, years: f64) -> Option<f64> {
    if !(start > 0.0 && end >= 0.0 && years > 0.0) {
        return None;
    }
    let rate = ((end / start).powf(1.0 / years) - 1.0) * 100.0;
    rate.is_finite().then_some(rate)
}

/// Growth of each forecast point over the latest observed value of its
/// indicator. Points on indicators without observations are skipped.
#[must_use]
pub fn growth_summary(snapshot: &ModelSnapshot, points: &[ForecastPoint]) -> Vec<GrowthRow> {
    points
        .iter()
        .filter_map(|point| {
            let observed = snapshot.observations.latest(&point.indicator_id)?;
            let growth_pp = point.value - observed.value;
            let growth_pct = (observed.value != 0.0).then(|| growth_pp / observed.value * 100.0);
            Some(GrowthRow {
                indicator_id: point.indicator_id.clone(),
                date: point.date,
                scenario: point.scenario,
                observed_date: observed.date,
                observed_value: observed.value,
                forecast_value: point.value,
                growth_pp,
                growth_pct,
                cagr_pct: compound_annual_growth_rate(
                    observed.value,
                    point.value,
                    years_between(observed.date, point.date),
                ),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestoneCrossing {
    pub indicator_id: IndicatorId,
    pub scenario: Scenario,
    pub level: f64,
    /// First date the path reaches `level`; `None` if it never does.
    #[serde(with = "crate::iso_date::option")]
    pub crossed_on: Option<Date>,
}

/// First date the (indicator, scenario) path reaches each level, interpolating
/// linearly between forecast dates.
#[must_use]
pub fn milestones(
    points: &[ForecastPoint],
    indicator_id: &IndicatorId,
    scenario: Scenario,
    levels: &[f64],
) -> Vec<MilestoneCrossing> {
    let mut path: Vec<&ForecastPoint> = points
        .iter()
        .filter(|point| &point.indicator_id == indicator_id && point.scenario == scenario)
        .collect();
    path.sort_by_key(|point| point.date);

    levels
        .iter()
        .map(|level| MilestoneCrossing {
            indicator_id: indicator_id.clone(),
            scenario,
            level: *level,
            crossed_on: first_crossing(&path, *level),
        })
        .collect()
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn first_crossing(path: &[&ForecastPoint], level: f64) -> Option<Date> {
    let first = path.first()?;
    if first.value >= level {
        return Some(first.date);
    }
    path.windows(2).find_map(|pair| {
        let (from, to) = (pair[0], pair[1]);
        if from.value < level && to.value >= level {
            let fraction = (level - from.value) / (to.value - from.value);
            let span_days = (to.date - from.date).whole_days();
            let offset = (span_days as f64 * fraction).round() as i64;
            from.date.checked_add(Duration::days(offset))
        } else {
            None
        }
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSummaryRow {
    pub indicator_id: IndicatorId,
    #[serde(with = "crate::iso_date")]
    pub date: Date,
    pub pessimistic: Option<f64>,
    pub base: Option<f64>,
    pub optimistic: Option<f64>,
    /// `optimistic - pessimistic` when both are present.
    pub spread: Option<f64>,
}

/// One row per (indicator, date) with the scenario values side by side.
#[must_use]
pub fn scenario_summary(points: &[ForecastPoint]) -> Vec<ScenarioSummaryRow> {
    let mut grid: BTreeMap<(IndicatorId, Date), ScenarioSummaryRow> = BTreeMap::new();
    for point in points {
        let row = grid
            .entry((point.indicator_id.clone(), point.date))
            .or_insert_with(|| ScenarioSummaryRow {
                indicator_id: point.indicator_id.clone(),
                date: point.date,
                pessimistic: None,
                base: None,
                optimistic: None,
                spread: None,
            });
        match point.scenario {
            Scenario::Pessimistic => row.pessimistic = Some(point.value),
            Scenario::Base => row.base = Some(point.value),
            Scenario::Optimistic => row.optimistic = Some(point.value),
        }
    }

    grid.into_values()
        .map(|mut row| {
            row.spread = row
                .optimistic
                .zip(row.pessimistic)
                .map(|(high, low)| high - low);
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{date, must_ok, must_some};
    use crate::{
        DataSufficiency, Event, EventCategory, ForecastRuleset, ImpactLinkInput, Indicator,
        Observation, Pillar, SnapshotBuilder, TrendMethod,
    };

    fn point(day: &str, scenario: Scenario, value: f64) -> ForecastPoint {
        ForecastPoint {
            indicator_id: IndicatorId::from("ACC_OWNERSHIP"),
            date: date(day),
            scenario,
            value,
            lower_bound: value,
            upper_bound: value,
            baseline: value,
            baseline_method: TrendMethod::PiecewiseLinear,
            event_contribution: 0.0,
            contributions: Vec::new(),
            years_ahead: 0.0,
            sufficiency: DataSufficiency::Thin,
        }
    }

    #[test]
    fn cagr_edge_cases() {
        let rate = must_some(compound_annual_growth_rate(46.0, 50.0, 2.0));
        assert!((rate - ((50.0_f64 / 46.0).sqrt() - 1.0) * 100.0).abs() < 1e-9);
        assert!(compound_annual_growth_rate(0.0, 50.0, 2.0).is_none());
        assert!(compound_annual_growth_rate(46.0, 50.0, 0.0).is_none());
    }

    #[test]
    fn milestones_interpolate_between_points() {
        let points = vec![
            point("2025-01-01", Scenario::Base, 50.0),
            point("2026-01-01", Scenario::Base, 60.0),
            point("2025-01-01", Scenario::Optimistic, 70.0),
        ];
        let crossings = milestones(
            &points,
            &IndicatorId::from("ACC_OWNERSHIP"),
            Scenario::Base,
            &[40.0, 55.0, 90.0],
        );
        assert_eq!(crossings[0].crossed_on, Some(date("2025-01-01")));
        assert_eq!(crossings[1].crossed_on, Some(date("2025-07-03")));
        assert_eq!(crossings[2].crossed_on, None);
    }

    #[test]
    fn summary_groups_scenarios() {
        let points = vec![
            point("2025-01-01", Scenario::Base, 50.0),
            point("2025-01-01", Scenario::Optimistic, 53.0),
            point("2025-01-01", Scenario::Pessimistic, 48.0),
            point("2026-01-01", Scenario::Base, 52.0),
        ];
        let rows = scenario_summary(&points);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].base, Some(50.0));
        assert!((must_some(rows[0].spread) - 5.0).abs() < 1e-12);
        assert_eq!(rows[1].spread, None);
    }

    #[test]
    fn drivers_are_ranked_by_absolute_magnitude() {
        let mut builder = must_ok(SnapshotBuilder::new(ForecastRuleset::v1()));
        must_ok(builder.indicator(Indicator::percentage(
            "ACC_OWNERSHIP",
            "Account Ownership",
            Pillar::Access,
        )));
        for (id, day, label) in [
            ("EVT_TELEBIRR", "2021-05-11", "Telebirr Launch"),
            ("EVT_SHOCK", "2022-06-01", "FX shock"),
            ("EVT_MPESA", "2023-08-01", "M-Pesa Ethiopia Launch"),
        ] {
            must_ok(builder.event(Event {
                event_id: EventId::from(id),
                date: date(day),
                category: EventCategory::ProductLaunch,
                label: label.to_string(),
                confidence: Confidence::High,
                source: String::new(),
            }));
        }
        for (event, direction, magnitude) in [
            ("EVT_TELEBIRR", Direction::Increase, 15.0),
            ("EVT_SHOCK", Direction::Decrease, -6.0),
            ("EVT_MPESA", Direction::Increase, 3.0),
        ] {
            must_ok(builder.link(ImpactLinkInput::proposed(
                event,
                "ACC_OWNERSHIP",
                direction,
                magnitude,
                12,
                Confidence::Medium,
            )));
        }
        let snapshot = builder.build();
        let drivers = key_drivers(&snapshot, &IndicatorId::from("ACC_OWNERSHIP"));
        let ranked: Vec<(&str, MagnitudeBand)> = drivers
            .iter()
            .map(|row| (row.event_id.as_str(), row.band))
            .collect();
        assert_eq!(
            ranked,
            vec![
                ("EVT_TELEBIRR", MagnitudeBand::High),
                ("EVT_SHOCK", MagnitudeBand::Medium),
                ("EVT_MPESA", MagnitudeBand::Low),
            ]
        );
        assert_eq!(drivers[0].event_label, "Telebirr Launch");
        assert_eq!(drivers[2].rank, 3);
    }

    #[test]
    fn growth_is_measured_from_latest_observation() {
        let mut builder = must_ok(SnapshotBuilder::new(ForecastRuleset::v1()));
        must_ok(builder.indicator(Indicator::percentage(
            "ACC_OWNERSHIP",
            "Account Ownership",
            Pillar::Access,
        )));
        must_ok(builder.observation(Observation {
            indicator_id: IndicatorId::from("ACC_OWNERSHIP"),
            date: date("2021-12-31"),
            value: 46.0,
            confidence: Confidence::High,
            source: String::new(),
        }));
        let snapshot = builder.build();
        let rows = growth_summary(&snapshot, &[point("2025-01-01", Scenario::Base, 50.6)]);
        assert_eq!(rows.len(), 1);
        assert!((rows[0].growth_pp - 4.6).abs() < 1e-9);
        assert!((must_some(rows[0].growth_pct) - 10.0).abs() < 1e-9);
        assert!(rows[0].cagr_pct.is_some());
    }
}
