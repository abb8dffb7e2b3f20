//! Command surface for the inclusion forecast engine.
//!
//! Every subcommand loads one snapshot from a feed directory, runs a single
//! engine operation against it and prints either a table or a versioned JSON
//! envelope (`contract_version`). Hosts embed the same behavior through
//! [`run_cli`] or, with a snapshot they built themselves, [`run_command`].

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use inclusion_forecast_core::{
    apply_verdicts, format_iso_date, growth_summary, key_drivers, milestones, parse_iso_date,
    scenario_summary, DriverRow, ForecastRequest, ForecastRuleset, ForecastRun, GrowthRow,
    IndicatorId, LinkId, MatrixCell, MilestoneCrossing, ModelSnapshot, Scenario,
    ScenarioForecaster, ScenarioSummaryRow, SnapshotIngest, TargetEvaluation, TargetTracker,
    ValidationReport,
};
use inclusion_forecast_store::{load_ruleset, load_snapshot, write_json};
use serde::Serialize;
use time::Date;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "fif")]
#[command(about = "Financial inclusion event impact model and scenario forecaster")]
pub struct Cli {
    /// Directory holding the JSON feed files.
    #[arg(long, default_value = "./data/feeds")]
    feeds: PathBuf,

    /// Ruleset file (`.json`, `.yaml` or `.yml`); defaults to ruleset v1.
    #[arg(long)]
    ruleset: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Report accepted and rejected rows per feed.
    IngestCheck(IngestCheckArgs),
    /// Export the event x indicator association matrix.
    Matrix(OutputArgs),
    /// Score impact links against observed deltas.
    Validate(OutputArgs),
    /// Forecast indicators under each scenario.
    Forecast(ForecastArgs),
    /// Score forecasts against declared policy targets.
    Target(TargetArgs),
    /// Rank the links driving each indicator.
    Drivers(DriversArgs),
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    #[arg(long)]
    json: bool,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct IngestCheckArgs {
    /// Exit non-zero when any row was rejected.
    #[arg(long)]
    strict: bool,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct ForecastArgs {
    #[arg(long = "indicator")]
    indicators: Vec<String>,
    #[arg(long = "date", required = true)]
    dates: Vec<String>,
    #[arg(long = "scenario", value_enum)]
    scenarios: Vec<ScenarioArg>,
    #[arg(long = "milestone")]
    milestones: Vec<f64>,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    #[arg(long)]
    indicator: Option<String>,
    #[arg(long)]
    date: Option<String>,
    #[arg(long, value_enum, default_value_t = ScenarioArg::Base)]
    scenario: ScenarioArg,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct DriversArgs {
    #[arg(long = "indicator")]
    indicators: Vec<String>,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioArg {
    Pessimistic,
    Base,
    Optimistic,
}

impl From<ScenarioArg> for Scenario {
    fn from(value: ScenarioArg) -> Self {
        match value {
            ScenarioArg::Pessimistic => Scenario::Pessimistic,
            ScenarioArg::Base => Scenario::Base,
            ScenarioArg::Optimistic => Scenario::Optimistic,
        }
    }
}

/// Versioned JSON output of one command.
#[derive(Debug, Serialize, PartialEq)]
pub struct ContractEnvelope<T> {
    pub contract_version: &'static str,
    pub ruleset_version: u32,
    #[serde(flatten)]
    pub payload: T,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct IngestPayload {
    pub accepted: usize,
    pub rejected: usize,
    pub feeds: SnapshotIngest,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MatrixPayload {
    pub cells: Vec<MatrixCell>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ValidationPayload {
    pub report: ValidationReport,
    /// Proposed links whose case passed and would be promoted to validated.
    pub promotable: Vec<LinkId>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ForecastPayload {
    pub run: ForecastRun,
    pub scenario_summary: Vec<ScenarioSummaryRow>,
    pub growth: Vec<GrowthRow>,
    pub milestones: Vec<MilestoneCrossing>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct UnscoredTarget {
    pub indicator_id: IndicatorId,
    pub target_date: String,
    pub reason: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TargetPayload {
    pub scenario: Scenario,
    pub evaluations: Vec<TargetEvaluation>,
    pub unscored: Vec<UnscoredTarget>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct DriversPayload {
    pub drivers: Vec<DriverRow>,
}

/// Loads the ruleset and feed directory named on the command line and runs
/// the selected command.
///
/// # Errors
/// Returns an error when the ruleset or feeds cannot be loaded, or the
/// command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let ruleset = match &cli.ruleset {
        Some(path) => load_ruleset(path)?,
        None => ForecastRuleset::v1(),
    };
    let (snapshot, ingest) = load_snapshot(&cli.feeds, ruleset)?;
    run_command(cli.command, &snapshot, &ingest)
}

/// Runs one command against an already loaded snapshot.
///
/// # Errors
/// Returns an error when argument values are invalid, a computation fails
/// with a typed engine error, or the output file cannot be written.
pub fn run_command(command: Command, snapshot: &ModelSnapshot, ingest: &SnapshotIngest) -> Result<()> {
    match command {
        Command::IngestCheck(args) => {
            let envelope = envelope(snapshot, "ingest_report.v1", build_ingest_payload(ingest));
            emit(&args.output, &envelope, print_ingest)?;
            if args.strict && envelope.payload.rejected > 0 {
                return Err(anyhow!(
                    "{} feed row(s) rejected",
                    envelope.payload.rejected
                ));
            }
            Ok(())
        }
        Command::Matrix(output) => {
            let envelope = envelope(snapshot, "association_matrix.v1", build_matrix_payload(snapshot));
            emit(&output, &envelope, print_matrix)
        }
        Command::Validate(output) => {
            let envelope = envelope(
                snapshot,
                "validation_report.v1",
                build_validation_payload(snapshot)?,
            );
            emit(&output, &envelope, print_validation)
        }
        Command::Forecast(args) => {
            let payload = build_forecast_payload(
                snapshot,
                &args.indicators,
                &args.dates,
                &args.scenarios,
                &args.milestones,
            )?;
            let envelope = envelope(snapshot, "forecast_run.v1", payload);
            emit(&args.output, &envelope, print_forecast)
        }
        Command::Target(args) => {
            let payload = build_target_payload(
                snapshot,
                args.indicator.as_deref(),
                args.date.as_deref(),
                args.scenario.into(),
            )?;
            let envelope = envelope(snapshot, "target_evaluation.v1", payload);
            emit(&args.output, &envelope, print_targets)
        }
        Command::Drivers(args) => {
            let envelope = envelope(
                snapshot,
                "key_drivers.v1",
                build_drivers_payload(snapshot, &args.indicators),
            );
            emit(&args.output, &envelope, print_drivers)
        }
    }
}

fn envelope<T>(
    snapshot: &ModelSnapshot,
    contract_version: &'static str,
    payload: T,
) -> ContractEnvelope<T> {
    ContractEnvelope {
        contract_version,
        ruleset_version: snapshot.ruleset.ruleset_version,
        payload,
    }
}

fn emit<T: Serialize>(
    output: &OutputArgs,
    envelope: &ContractEnvelope<T>,
    print_table: fn(&T),
) -> Result<()> {
    if let Some(path) = &output.output {
        write_json(path, envelope)?;
        info!(
            path = %path.display(),
            contract = envelope.contract_version,
            "wrote envelope"
        );
    }

    if output.json {
        println!("{}", serde_json::to_string_pretty(envelope)?);
    } else {
        print_table(&envelope.payload);
    }
    Ok(())
}

#[must_use]
pub fn build_ingest_payload(ingest: &SnapshotIngest) -> IngestPayload {
    IngestPayload {
        accepted: ingest.total_accepted(),
        rejected: ingest.total_rejected(),
        feeds: ingest.clone(),
    }
}

#[must_use]
pub fn build_matrix_payload(snapshot: &ModelSnapshot) -> MatrixPayload {
    MatrixPayload {
        cells: snapshot.links.matrix_cells(),
    }
}

/// Validates every active link and lists the links a promotion pass would
/// mark validated. The snapshot itself is never modified.
///
/// # Errors
/// Returns an error when the report references a link missing from the
/// snapshot.
pub fn build_validation_payload(snapshot: &ModelSnapshot) -> Result<ValidationPayload> {
    let report = snapshot.validation_report();
    let mut links = snapshot.links.clone();
    let promotable = apply_verdicts(&mut links, &report)?;
    Ok(ValidationPayload { report, promotable })
}

/// Runs a forecast grid. Empty `indicators` means every registered indicator
/// and empty `scenarios` means all three.
///
/// # Errors
/// Returns an error for unparseable dates, non-finite milestone levels or an
/// empty grid.
pub fn build_forecast_payload(
    snapshot: &ModelSnapshot,
    indicators: &[String],
    dates: &[String],
    scenarios: &[ScenarioArg],
    milestone_levels: &[f64],
) -> Result<ForecastPayload> {
    let indicator_ids = select_indicators(snapshot, indicators);
    let dates = parse_dates(dates)?;
    let scenarios: Vec<Scenario> = if scenarios.is_empty() {
        Scenario::ALL.to_vec()
    } else {
        scenarios.iter().map(|scenario| Scenario::from(*scenario)).collect()
    };
    if milestone_levels.iter().any(|level| !level.is_finite()) {
        return Err(anyhow!("--milestone values must be finite"));
    }

    let request = ForecastRequest {
        indicator_ids,
        dates,
        scenarios,
    };
    let run = ScenarioForecaster::new(snapshot).run(&request)?;
    for skipped in &run.skipped {
        warn!(
            indicator = %skipped.indicator_id,
            reason = %skipped.reason,
            "indicator skipped"
        );
    }

    let mut crossings = Vec::new();
    if !milestone_levels.is_empty() {
        for indicator_id in &request.indicator_ids {
            for scenario in &request.scenarios {
                crossings.extend(milestones(
                    &run.points,
                    indicator_id,
                    *scenario,
                    milestone_levels,
                ));
            }
        }
    }

    Ok(ForecastPayload {
        scenario_summary: scenario_summary(&run.points),
        growth: growth_summary(snapshot, &run.points),
        milestones: crossings,
        run,
    })
}

/// Evaluates one target when both `indicator` and `date` are given, else
/// every declared target.
///
/// # Errors
/// Returns an error when only one of `indicator`/`date` is given, the date
/// does not parse, or the single requested target is not defined.
pub fn build_target_payload(
    snapshot: &ModelSnapshot,
    indicator: Option<&str>,
    date: Option<&str>,
    scenario: Scenario,
) -> Result<TargetPayload> {
    let tracker = TargetTracker::new(snapshot);
    match (indicator, date) {
        (Some(indicator), Some(date)) => {
            let evaluation =
                tracker.evaluate(&IndicatorId::from(indicator), parse_date(date)?, scenario)?;
            Ok(TargetPayload {
                scenario,
                evaluations: vec![evaluation],
                unscored: Vec::new(),
            })
        }
        (None, None) => {
            let mut evaluations = Vec::new();
            let mut unscored = Vec::new();
            for (target, result) in tracker.evaluate_all(scenario) {
                match result {
                    Ok(evaluation) => evaluations.push(evaluation),
                    Err(err) => unscored.push(UnscoredTarget {
                        indicator_id: target.indicator_id,
                        target_date: format_iso_date(target.target_date)?,
                        reason: err.to_string(),
                    }),
                }
            }
            Ok(TargetPayload {
                scenario,
                evaluations,
                unscored,
            })
        }
        _ => Err(anyhow!("--indicator and --date must be given together")),
    }
}

#[must_use]
pub fn build_drivers_payload(snapshot: &ModelSnapshot, indicators: &[String]) -> DriversPayload {
    let drivers = select_indicators(snapshot, indicators)
        .iter()
        .flat_map(|indicator_id| key_drivers(snapshot, indicator_id))
        .collect();
    DriversPayload { drivers }
}

fn select_indicators(snapshot: &ModelSnapshot, requested: &[String]) -> Vec<IndicatorId> {
    if requested.is_empty() {
        snapshot
            .indicators
            .iter()
            .map(|indicator| indicator.id.clone())
            .collect()
    } else {
        requested
            .iter()
            .map(|id| IndicatorId::from(id.as_str()))
            .collect()
    }
}

fn parse_date(value: &str) -> Result<Date> {
    parse_iso_date(value).map_err(|err| anyhow!("invalid date {value:?}: {err}"))
}

fn parse_dates(values: &[String]) -> Result<Vec<Date>> {
    values.iter().map(|value| parse_date(value)).collect()
}

fn fmt_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |value| format!("{value:.2}"))
}

fn print_ingest(payload: &IngestPayload) {
    println!("accepted={} rejected={}", payload.accepted, payload.rejected);
    println!("{:<16} {:<10} rejected", "feed", "accepted");
    println!("{}", "-".repeat(40));
    for report in payload.feeds.reports() {
        println!(
            "{:<16} {:<10} {}",
            report.feed,
            report.accepted,
            report.rejected_count()
        );
    }
    for report in payload.feeds.reports() {
        for rejection in &report.rejected {
            println!(
                "rejected {}[{}]: {}",
                report.feed, rejection.row_index, rejection.reason
            );
        }
    }
}

fn print_matrix(payload: &MatrixPayload) {
    println!(
        "{:<24} {:<24} {:<9} {:<5} {:<10} status",
        "event", "indicator", "effect", "lag", "confidence"
    );
    println!("{}", "-".repeat(90));
    for cell in &payload.cells {
        println!(
            "{:<24} {:<24} {:<9.2} {:<5} {:<10} {}",
            cell.event_id,
            cell.indicator_id,
            cell.effect,
            cell.lag_months,
            cell.confidence.as_str(),
            cell.status.as_str()
        );
    }
}

fn print_validation(payload: &ValidationPayload) {
    let report = &payload.report;
    println!(
        "model_accuracy={} average_error={} weighted_accuracy={} pass={} fail={} unscored={}",
        fmt_optional(report.model_accuracy),
        fmt_optional(report.average_error),
        fmt_optional(report.weighted_model_accuracy),
        report.pass_count,
        report.fail_count,
        report.unscored.len()
    );
    println!(
        "{:<8} {:<24} {:<24} {:<10} {:<10} {:<8} verdict",
        "link", "event", "indicator", "predicted", "actual", "error%"
    );
    println!("{}", "-".repeat(100));
    for case in &report.cases {
        println!(
            "{:<8} {:<24} {:<24} {:<10.2} {:<10.2} {:<8.2} {:?}",
            case.link_id.to_string(),
            case.event_id,
            case.indicator_id,
            case.predicted_delta,
            case.actual_delta,
            case.absolute_error_pct,
            case.verdict
        );
    }
    for item in &report.unscored {
        println!("unscored {}: {}", item.link_id, item.reason);
    }
}

fn print_forecast(payload: &ForecastPayload) {
    println!(
        "run={} generated_at={} points={}",
        payload.run.run_id,
        payload.run.generated_at,
        payload.run.points.len()
    );
    println!(
        "{:<20} {:<11} {:<12} {:<8} {:<8} {:<8} {:<9} {:<8} data",
        "indicator", "date", "scenario", "value", "lower", "upper", "baseline", "events"
    );
    println!("{}", "-".repeat(100));
    for point in &payload.run.points {
        println!(
            "{:<20} {:<11} {:<12} {:<8.2} {:<8.2} {:<8.2} {:<9.2} {:<8.2} {}",
            point.indicator_id,
            point.date,
            point.scenario.as_str(),
            point.value,
            point.lower_bound,
            point.upper_bound,
            point.baseline,
            point.event_contribution,
            point.sufficiency.as_str()
        );
    }
    for crossing in &payload.milestones {
        println!(
            "milestone {} {} {:.1}: {}",
            crossing.indicator_id,
            crossing.scenario.as_str(),
            crossing.level,
            crossing
                .crossed_on
                .map_or_else(|| "not reached".to_string(), |date| date.to_string())
        );
    }
    for skipped in &payload.run.skipped {
        println!("skipped {}: {}", skipped.indicator_id, skipped.reason);
    }
}

fn print_targets(payload: &TargetPayload) {
    println!("scenario={}", payload.scenario.as_str());
    println!(
        "{:<20} {:<11} {:<9} {:<8} {:<8} {:<8} status",
        "indicator", "date", "forecast", "target", "gap", "ratio%"
    );
    println!("{}", "-".repeat(80));
    for item in &payload.evaluations {
        println!(
            "{:<20} {:<11} {:<9.2} {:<8.2} {:<+8.2} {:<8.1} {}",
            item.indicator_id,
            item.target_date,
            item.forecast_value,
            item.target_value,
            item.gap,
            item.achievement_ratio,
            item.status.as_str()
        );
    }
    for item in &payload.unscored {
        println!(
            "unscored {} {}: {}",
            item.indicator_id, item.target_date, item.reason
        );
    }
}

fn print_drivers(payload: &DriversPayload) {
    println!(
        "{:<5} {:<20} {:<24} {:<9} {:<7} {:<5} confidence",
        "rank", "indicator", "event", "effect", "band", "lag"
    );
    println!("{}", "-".repeat(85));
    for row in &payload.drivers {
        println!(
            "{:<5} {:<20} {:<24} {:<+9.2} {:<7} {:<5} {}",
            row.rank,
            row.indicator_id,
            row.event_id,
            row.magnitude,
            row.band.as_str(),
            row.lag_months,
            row.confidence.as_str()
        );
    }
}
