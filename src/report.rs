//! Per-tag summaries and run totals handed to renderers and reporters.

use crate::aggregate::{self, Totals};
use crate::graph::BuildTree;
use crate::record::Tag;
use serde::Serialize;

const SIZE_UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// What a renderer shows next to one tag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSummary {
    pub tag: Tag,
    pub started: Option<String>,
    pub duration: Option<String>,
    pub upload_size: Option<String>,
}

impl TagSummary {
    /// Missing metrics stay `None` and render as empty
    pub fn for_tag(tree: &BuildTree, tag: &str) -> Self {
        let metrics = tree.metrics_for(tag);
        Self {
            tag: tag.to_string(),
            started: tree
                .when_for(tag)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            duration: metrics.map(|m| human_duration(m.duration_secs)),
            upload_size: metrics.map(|m| human_size(m.upload_size)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub base: Tag,
    pub layer: TagSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HumanTotals {
    pub duration: String,
    pub upload_size: String,
    pub layer_size: String,
    pub deduplicated_layer_size: String,
}

/// Everything a run produces, ready to serialize
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageReport {
    pub edges: Vec<Edge>,
    pub excess: Vec<Tag>,
    pub totals: Totals,
    pub deduplicated_layer_size: u64,
    pub human: HumanTotals,
}

impl LineageReport {
    pub fn from_tree(tree: &BuildTree) -> Self {
        let edges = tree
            .edges()
            .map(|(base, layer)| Edge {
                base: base.clone(),
                layer: TagSummary::for_tag(tree, layer),
            })
            .collect();
        let totals = aggregate::calculate_totals(tree);
        let deduplicated_layer_size = aggregate::total_layer_size_after_dedup(tree);

        Self {
            edges,
            excess: tree.excess().iter().cloned().collect(),
            totals,
            deduplicated_layer_size,
            human: HumanTotals {
                duration: human_duration(totals.duration_secs),
                upload_size: human_size(totals.upload_size),
                layer_size: human_size(totals.layer_size),
                deduplicated_layer_size: human_size(deduplicated_layer_size),
            },
        }
    }
}

/// `1h 02m 03s`, `4m 05s` or `7s`
pub fn human_duration(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.round() as u64
    } else {
        0
    };
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);

    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Binary-prefixed size with one decimal, e.g. `1.5 MiB`
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, SIZE_UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration() {
        assert_eq!(human_duration(0.0), "0s");
        assert_eq!(human_duration(7.4), "7s");
        assert_eq!(human_duration(245.0), "4m 05s");
        assert_eq!(human_duration(3723.0), "1h 02m 03s");
        assert_eq!(human_duration(f64::NAN), "0s");
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(2 * 1024 * 1024), "2.0 MiB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn test_unknown_tag_summary_is_empty() {
        let tree = BuildTree::new();
        let summary = TagSummary::for_tag(&tree, "ghost:1");
        assert_eq!(summary.started, None);
        assert_eq!(summary.duration, None);
        assert_eq!(summary.upload_size, None);
    }
}
