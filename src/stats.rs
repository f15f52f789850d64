//! Fleet statistics over build records: throughput, concurrency, pending
//! time and per-build cost breakdowns.

use crate::constants::BYTES_PER_MIB;
use crate::record::{split_tag, strip_registry, RawBuild};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};

/// Number of completions inside a sliding window ending at the latest one
#[derive(Debug, Clone)]
pub struct ThroughputModel {
    window: Duration,
    builds: VecDeque<DateTime<Utc>>,
}

impl ThroughputModel {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            builds: VecDeque::new(),
        }
    }

    /// Record a completion (in ascending order) and return the throughput
    pub fn append(&mut self, completion: DateTime<Utc>) -> usize {
        self.builds.push_back(completion);
        while let (Some(&first), Some(&last)) = (self.builds.front(), self.builds.back()) {
            if last - first < self.window {
                break;
            }
            self.builds.pop_front();
        }
        self.builds.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConcurrencySample {
    pub timestamp: DateTime<Utc>,
    pub running: usize,
}

/// Running-build count sampled at every start and finish
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyModel {
    intervals: Vec<(DateTime<Utc>, DateTime<Utc>)>,
}

impl ConcurrencyModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, start: DateTime<Utc>, finish: DateTime<Utc>) {
        self.intervals.push((start, finish));
    }

    /// Samples stop at the last start; finishes after it are not emitted.
    pub fn samples(&self) -> Vec<ConcurrencySample> {
        let mut intervals = self.intervals.clone();
        intervals.sort_by_key(|(start, _)| *start);

        let mut finishes: BinaryHeap<Reverse<DateTime<Utc>>> = BinaryHeap::new();
        let mut samples = Vec::with_capacity(intervals.len() * 2);

        for (start, finish) in intervals {
            while let Some(Reverse(first)) = finishes.peek().copied() {
                if start < first {
                    break;
                }
                finishes.pop();
                samples.push(ConcurrencySample {
                    timestamp: first,
                    running: finishes.len(),
                });
            }

            finishes.push(Reverse(finish));
            samples.push(ConcurrencySample {
                timestamp: start,
                running: finishes.len(),
            });
        }

        samples
    }
}

/// One finished build as seen by the fleet report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildStats {
    pub name: Option<String>,
    pub completion: DateTime<Utc>,
    pub phase: String,
    pub throughput: usize,
    /// Seconds between creation and start; `None` for archived builds
    pub pending_secs: Option<i64>,
    pub running_secs: f64,
    pub upload_size_mib: Option<f64>,
    pub image: Option<String>,
    pub plugin_durations: BTreeMap<String, f64>,
    pub failed_plugin: Option<String>,
    pub exception: Option<String>,
}

impl BuildStats {
    /// Created after it started: re-imported from an archive
    pub fn is_archived(&self) -> bool {
        self.pending_secs.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetSummary {
    pub builds_examined: usize,
    pub earliest_completion: Option<DateTime<Utc>>,
    pub latest_completion: Option<DateTime<Utc>>,
    pub states: BTreeMap<String, usize>,
    pub builds: Vec<BuildStats>,
    pub concurrency: Vec<ConcurrencySample>,
}

impl FleetSummary {
    /// Builds whose creation preceded their start
    pub fn current(&self) -> impl Iterator<Item = &BuildStats> {
        self.builds.iter().filter(|b| !b.is_archived())
    }

    /// Builds re-imported after they ran
    pub fn archived(&self) -> impl Iterator<Item = &BuildStats> {
        self.builds.iter().filter(|b| b.is_archived())
    }

    pub fn from_records(records: &[Value], window: Duration) -> Self {
        let mut finished: Vec<(DateTime<Utc>, RawBuild)> = records
            .iter()
            .filter_map(RawBuild::from_value)
            .filter_map(|raw| raw.completed().map(|c| (c, raw)))
            .collect();
        finished.sort_by_key(|(completion, _)| *completion);

        let mut throughput_model = ThroughputModel::new(window);
        let mut throughput = 0;
        let mut summary = FleetSummary {
            builds_examined: 0,
            earliest_completion: finished.first().map(|(c, _)| *c),
            latest_completion: finished.last().map(|(c, _)| *c),
            states: BTreeMap::new(),
            builds: Vec::new(),
            concurrency: Vec::new(),
        };

        for (completion, raw) in &finished {
            let phase = raw.status.phase.clone().unwrap_or_default();
            *summary.states.entry(phase.clone()).or_insert(0) += 1;

            let Some(started) = raw.started() else {
                continue;
            };
            let pending_secs = raw
                .created()
                .map(|created| (started - created).num_seconds())
                .filter(|secs| *secs >= 0);
            let plugins = raw.plugins_metadata().unwrap_or_default();
            let (failed_plugin, exception) = first_failure(&plugins.errors);

            let mut stats = BuildStats {
                name: raw.metadata.name.clone(),
                completion: *completion,
                phase: phase.clone(),
                throughput,
                pending_secs,
                running_secs: raw.duration_secs().unwrap_or(0.0),
                upload_size_mib: None,
                image: None,
                plugin_durations: BTreeMap::new(),
                failed_plugin,
                exception,
            };

            match phase.as_str() {
                "Complete" => {
                    throughput = throughput_model.append(*completion);
                    stats.throughput = throughput;
                    if !stats.is_archived() {
                        stats.upload_size_mib = raw.size_hint().map(|b| b as f64 / BYTES_PER_MIB);
                        stats.plugin_durations = plugins.durations;
                        stats.image = raw
                            .repositories()
                            .and_then(|r| r.unique.into_iter().next())
                            .map(|u| split_tag(strip_registry(&u)).0.to_string());
                    }
                    summary.builds.push(stats);
                }
                "Failed" => summary.builds.push(stats),
                _ => {}
            }
            summary.builds_examined += 1;
        }

        let mut concurrency = ConcurrencyModel::new();
        for (completion, raw) in &finished {
            if let Some(started) = raw.started() {
                concurrency.append(started, *completion);
            }
        }
        summary.concurrency = concurrency.samples();

        tracing::info!(
            examined = summary.builds_examined,
            reported = summary.builds.len(),
            "Fleet summary computed"
        );
        summary
    }
}

/// Alphabetically first failed plugin and the exception type it raised
fn first_failure(errors: &BTreeMap<String, String>) -> (Option<String>, Option<String>) {
    match errors.iter().next() {
        Some((plugin, message)) => {
            let exception = message.split('(').next().unwrap_or("").replace('"', "'");
            (Some(plugin.clone()), Some(exception))
        }
        None => (None, None),
    }
}
