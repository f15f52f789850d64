//! CSV metrics files consumed by the charting tools.
//!
//! Unknown values are written as `nan` so every row keeps the same columns.

use crate::constants::{
    ARCHIVED_METRICS_FILE, CONCURRENT_METRICS_FILE, CSV_TIMESTAMP_FORMAT, CURRENT_METRICS_FILE,
};
use crate::stats::{BuildStats, ConcurrencySample, FleetSummary};
use crate::Result;
use serde::{Serialize, Serializer};
use std::fs::File;
use std::io;
use std::path::Path;

/// Column names of the per-build metrics files, in row order
pub const METRICS_HEADER: [&str; 16] = [
    "name",
    "image",
    "completion",
    "state",
    "throughput",
    "pending",
    "running",
    "plugin_pull_base_image",
    "plugin_distgit_fetch_artefacts",
    "docker_build",
    "plugin_squash",
    "plugin_compress",
    "plugin_pulp_push",
    "upload_size_mb",
    "failed_plugin",
    "exception",
];

pub const CONCURRENCY_HEADER: [&str; 2] = ["timestamp", "nbuilds"];

fn or_nan<T: Serialize, S: Serializer>(
    value: &Option<T>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => v.serialize(serializer),
        None => serializer.serialize_str("nan"),
    }
}

#[derive(Serialize)]
struct MetricsRow<'a> {
    #[serde(serialize_with = "or_nan")]
    name: Option<&'a str>,
    #[serde(serialize_with = "or_nan")]
    image: Option<&'a str>,
    completion: String,
    state: &'a str,
    throughput: usize,
    #[serde(serialize_with = "or_nan")]
    pending: Option<i64>,
    running: f64,
    #[serde(serialize_with = "or_nan")]
    pull_base_image: Option<f64>,
    #[serde(serialize_with = "or_nan")]
    distgit_fetch_artefacts: Option<f64>,
    #[serde(serialize_with = "or_nan")]
    dockerfile_content: Option<f64>,
    #[serde(serialize_with = "or_nan")]
    squash: Option<f64>,
    #[serde(serialize_with = "or_nan")]
    compress: Option<f64>,
    #[serde(serialize_with = "or_nan")]
    pulp_push: Option<f64>,
    #[serde(serialize_with = "or_nan")]
    upload_size_mb: Option<f64>,
    #[serde(serialize_with = "or_nan")]
    failed_plugin: Option<&'a str>,
    #[serde(serialize_with = "or_nan")]
    exception: Option<&'a str>,
}

impl<'a> From<&'a BuildStats> for MetricsRow<'a> {
    fn from(b: &'a BuildStats) -> Self {
        let plugin = |name: &str| b.plugin_durations.get(name).copied();
        Self {
            name: b.name.as_deref(),
            image: b.image.as_deref(),
            completion: b.completion.format(CSV_TIMESTAMP_FORMAT).to_string(),
            state: &b.phase,
            throughput: b.throughput,
            pending: b.pending_secs,
            running: b.running_secs,
            pull_base_image: plugin("pull_base_image"),
            distgit_fetch_artefacts: plugin("distgit_fetch_artefacts"),
            dockerfile_content: plugin("dockerfile_content"),
            squash: plugin("squash"),
            compress: plugin("compress"),
            pulp_push: plugin("pulp_push"),
            upload_size_mb: b.upload_size_mib,
            failed_plugin: b.failed_plugin.as_deref(),
            exception: b.exception.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct ConcurrencyRow {
    timestamp: String,
    nbuilds: usize,
}

/// Write the per-build metrics table; the header is written even with no rows
pub fn write_build_metrics<'a, W: io::Write>(
    out: W,
    builds: impl IntoIterator<Item = &'a BuildStats>,
) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    wtr.write_record(METRICS_HEADER)?;
    for build in builds {
        wtr.serialize(MetricsRow::from(build))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write `timestamp,nbuilds` concurrency samples
pub fn write_concurrency<W: io::Write>(out: W, samples: &[ConcurrencySample]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    wtr.write_record(CONCURRENCY_HEADER)?;
    for sample in samples {
        wtr.serialize(ConcurrencyRow {
            timestamp: sample.timestamp.format(CSV_TIMESTAMP_FORMAT).to_string(),
            nbuilds: sample.running,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the current, archived and concurrency files into `dir`
pub fn write_metrics_files(dir: &Path, summary: &FleetSummary) -> Result<()> {
    write_build_metrics(File::create(dir.join(CURRENT_METRICS_FILE))?, summary.current())?;
    write_build_metrics(File::create(dir.join(ARCHIVED_METRICS_FILE))?, summary.archived())?;
    write_concurrency(
        File::create(dir.join(CONCURRENT_METRICS_FILE))?,
        &summary.concurrency,
    )?;

    tracing::info!(dir = %dir.display(), "CSV metrics written");
    Ok(())
}
