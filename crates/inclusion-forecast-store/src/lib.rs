#![allow(clippy::missing_errors_doc)]

//! Flat-file interchange for the forecast engine: feed directories in,
//! pretty-printed JSON records out.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use inclusion_forecast_core::{
    FeedBundle, ForecastRuleset, IngestReport, ModelSnapshot, SnapshotBuilder, SnapshotIngest,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Feed file names inside a feed directory, with whether each is required.
pub const FEED_FILES: [(&str, bool); 6] = [
    ("indicators.json", true),
    ("observations.json", true),
    ("events.json", false),
    ("impact_links.json", false),
    ("targets.json", false),
    ("priors.json", false),
];

/// Reads every feed file of `dir` as raw records. Optional feeds that are
/// absent load as empty.
pub fn load_feed_dir(dir: &Path) -> Result<FeedBundle> {
    if !dir.is_dir() {
        return Err(anyhow!("feed directory {} does not exist", dir.display()));
    }

    let mut bundle = FeedBundle::default();
    for (file_name, required) in FEED_FILES {
        let path = dir.join(file_name);
        let rows = if path.exists() {
            read_records(&path)?
        } else if required {
            return Err(anyhow!("required feed {} is missing", path.display()));
        } else {
            debug!(feed = file_name, "optional feed absent");
            Vec::new()
        };

        match file_name {
            "indicators.json" => bundle.indicators = rows,
            "observations.json" => bundle.observations = rows,
            "events.json" => bundle.events = rows,
            "impact_links.json" => bundle.impact_links = rows,
            "targets.json" => bundle.targets = rows,
            _ => bundle.priors = rows,
        }
    }
    Ok(bundle)
}

/// Reads a JSON array of records.
pub fn read_records(path: &Path) -> Result<Vec<Value>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read feed {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("feed {} is not valid JSON", path.display()))?;
    match value {
        Value::Array(rows) => Ok(rows),
        _ => Err(anyhow!(
            "feed {} must be a JSON array of records",
            path.display()
        )),
    }
}

/// Loads a ruleset from a `.json`, `.yaml` or `.yml` file and validates it.
pub fn load_ruleset(path: &Path) -> Result<ForecastRuleset> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read ruleset {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    );

    let value: Value = if is_yaml {
        serde_yaml::from_str(&content)
            .map_err(|err| anyhow!("invalid ruleset YAML {}: {err}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("invalid ruleset JSON {}", path.display()))?
    };

    let ruleset = ForecastRuleset::from_json(&value)
        .with_context(|| format!("ruleset {} failed validation", path.display()))?;
    info!(
        ruleset_version = ruleset.ruleset_version,
        path = %path.display(),
        "loaded ruleset"
    );
    Ok(ruleset)
}

/// Builds a snapshot from a feed directory. Rejected rows are logged and
/// reported; they never abort the load.
pub fn load_snapshot(
    dir: &Path,
    ruleset: ForecastRuleset,
) -> Result<(ModelSnapshot, SnapshotIngest)> {
    let feeds = load_feed_dir(dir)?;
    let mut builder = SnapshotBuilder::new(ruleset).context("invalid ruleset")?;
    let ingest = builder.ingest(&feeds);

    for report in ingest.reports() {
        log_report(report);
    }
    info!(
        dir = %dir.display(),
        accepted = ingest.total_accepted(),
        rejected = ingest.total_rejected(),
        "snapshot loaded"
    );
    Ok((builder.build(), ingest))
}

fn log_report(report: &IngestReport) {
    debug!(
        feed = %report.feed,
        accepted = report.accepted,
        rejected = report.rejected_count(),
        "feed ingested"
    );
    for rejection in &report.rejected {
        warn!(
            feed = %report.feed,
            row = rejection.row_index,
            reason = %rejection.reason,
            "row rejected"
        );
    }
}

/// Writes `value` as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let mut payload = serde_json::to_string_pretty(value)?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "wrote output");
    Ok(())
}

/// Writes `value` into `dir/file_name` and returns the written path.
pub fn export_records<T: Serialize + ?Sized>(
    dir: &Path,
    file_name: &str,
    value: &T,
) -> Result<PathBuf> {
    let path = dir.join(file_name);
    write_json(&path, value)?;
    Ok(path)
}
