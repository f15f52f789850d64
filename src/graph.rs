use crate::record::{is_latest, BuildFact, Tag};
use crate::registry::SizeOracle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Cost attributed to the canonical tag of one build
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TagMetrics {
    pub duration_secs: f64,
    /// Bytes including the whole parent chain
    pub upload_size: u64,
    /// Bytes of the image's own registry layer
    pub layer_size: u64,
}

/// Lineage of image builds: which base each tag was built from, plus the
/// bookkeeping needed to deduplicate rebuilt tags and attribute cost.
#[derive(Debug, Clone, Default)]
pub struct BuildTree {
    /// base -> derived tags
    deps: BTreeMap<Tag, BTreeSet<Tag>>,
    /// Every tag ever attached as a derived node
    seen: HashSet<Tag>,
    /// Produced tag -> canonical tag of the build that produced it
    aliases: HashMap<Tag, Tag>,
    /// Keyed by canonical tag
    metrics: BTreeMap<Tag, TagMetrics>,
    /// Keyed by every produced tag
    when: HashMap<Tag, DateTime<Utc>>,
    /// Tags pruned by `trim_excess_tags`
    excess: BTreeSet<Tag>,
}

impl BuildTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the tree from raw records. Records are normalized, ordered
    /// newest first and ingested one at a time, so the most recent build of
    /// any tag is the one that counts.
    pub fn from_records(records: &[Value], sizes: &mut dyn SizeOracle) -> Self {
        let mut facts: Vec<BuildFact> = records
            .iter()
            .filter_map(BuildFact::from_record)
            .collect();
        let skipped = records.len() - facts.len();

        // Stable, so equal timestamps keep input order
        facts.sort_by(|a, b| b.when.cmp(&a.when));

        let mut tree = Self::new();
        let mut suppressed = 0;
        for fact in &facts {
            if !tree.add_fact(fact, sizes) {
                suppressed += 1;
            }
        }

        tracing::info!(
            records = records.len(),
            skipped,
            suppressed,
            bases = tree.deps.len(),
            tags = tree.seen.len(),
            "Build tree constructed"
        );
        tree
    }

    /// Normalize and ingest one record. Returns false if the record was
    /// incomplete or every tag it produced was already seen.
    pub fn add(&mut self, record: &Value, sizes: &mut dyn SizeOracle) -> bool {
        match BuildFact::from_record(record) {
            Some(fact) => self.add_fact(&fact, sizes),
            None => false,
        }
    }

    /// Ingest one normalized build. Callers feeding builds directly must do
    /// so newest first.
    pub fn add_fact(&mut self, fact: &BuildFact, sizes: &mut dyn SizeOracle) -> bool {
        let new_tags: Vec<&Tag> = fact
            .produced_tags
            .iter()
            .filter(|t| !self.seen.contains(*t))
            .collect();

        let Some(canonical) = new_tags.first().map(|t| (*t).clone()) else {
            tracing::debug!(
                build = fact.name.as_deref().unwrap_or("-"),
                tags = ?fact.produced_tags,
                "All tags already built by a newer build"
            );
            return false;
        };

        let resolved = sizes.resolve(fact);

        self.seen.extend(new_tags.iter().map(|t| (*t).clone()));
        self.deps
            .entry(fact.base_image.clone())
            .or_default()
            .extend(new_tags.into_iter().cloned());

        self.metrics.insert(
            canonical.clone(),
            TagMetrics {
                duration_secs: fact.duration_secs,
                upload_size: resolved.total,
                layer_size: resolved.own,
            },
        );

        // A newer build may already own some of these tags
        for tag in &fact.produced_tags {
            self.when.entry(tag.clone()).or_insert(fact.when);
            self.aliases
                .entry(tag.clone())
                .or_insert_with(|| canonical.clone());
        }

        tracing::debug!(
            base = %fact.base_image,
            canonical = %canonical,
            upload_size = resolved.total,
            layer_size = resolved.own,
            "Added build"
        );
        true
    }

    /// Prune non-`latest` leaf tags until nothing more can be removed.
    /// Returns the number of tags pruned by this call.
    ///
    /// A tag is a leaf when it is not a key of the graph. A base whose
    /// derived set has been emptied stays a key and so is never pruned.
    pub fn trim_excess_tags(&mut self) -> usize {
        let mut pruned = 0;
        loop {
            let bases: HashSet<Tag> = self.deps.keys().cloned().collect();
            let mut removed = Vec::new();

            for layers in self.deps.values_mut() {
                let excess: Vec<Tag> = layers
                    .iter()
                    .filter(|t| !is_latest(t) && !bases.contains(*t))
                    .cloned()
                    .collect();
                for tag in &excess {
                    layers.remove(tag);
                }
                removed.extend(excess);
            }

            if removed.is_empty() {
                break;
            }
            pruned += removed.len();
            self.excess.extend(removed);
        }

        if pruned > 0 {
            tracing::info!(pruned, total_excess = self.excess.len(), "Trimmed leaf tags");
        }
        pruned
    }

    pub fn deps(&self) -> &BTreeMap<Tag, BTreeSet<Tag>> {
        &self.deps
    }

    /// Every (base, derived) edge in sorted order
    pub fn edges(&self) -> impl Iterator<Item = (&Tag, &Tag)> {
        self.deps
            .iter()
            .flat_map(|(base, layers)| layers.iter().map(move |layer| (base, layer)))
    }

    pub fn edge_count(&self) -> usize {
        self.deps.values().map(BTreeSet::len).sum()
    }

    pub fn derived(&self, base: &str) -> Option<&BTreeSet<Tag>> {
        self.deps.get(base)
    }

    pub fn is_base(&self, tag: &str) -> bool {
        self.deps.contains_key(tag)
    }

    pub fn has_seen(&self, tag: &str) -> bool {
        self.seen.contains(tag)
    }

    pub fn excess(&self) -> &BTreeSet<Tag> {
        &self.excess
    }

    pub fn canonical_of(&self, tag: &str) -> Option<&Tag> {
        self.aliases.get(tag)
    }

    /// Metric entries keyed by canonical tag
    pub fn metrics(&self) -> &BTreeMap<Tag, TagMetrics> {
        &self.metrics
    }

    /// Metrics for any tag: its own entry, else its canonical tag's entry
    pub fn metrics_for(&self, tag: &str) -> Option<&TagMetrics> {
        self.metrics.get(tag).or_else(|| {
            self.aliases
                .get(tag)
                .and_then(|canonical| self.metrics.get(canonical))
        })
    }

    pub fn when_for(&self, tag: &str) -> Option<DateTime<Utc>> {
        self.when.get(tag).copied()
    }

    /// All graph nodes ordered so that every base precedes the tags built
    /// from it. Ties are broken by tag order.
    pub fn topological_order(&self) -> Vec<Tag> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();

        for base in self.deps.keys() {
            if !visited.contains(base.as_str()) {
                self.dfs_topo(base, &mut visited, &mut stack);
            }
        }

        stack.reverse();
        stack.into_iter().map(str::to_string).collect()
    }

    fn dfs_topo<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) {
        visited.insert(node);

        if let Some(layers) = self.deps.get(node) {
            for layer in layers.iter().rev() {
                if !visited.contains(layer.as_str()) {
                    self.dfs_topo(layer, visited, stack);
                }
            }
        }

        stack.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LayerSizes;

    struct FixedSizes(u64);

    impl SizeOracle for FixedSizes {
        fn resolve(&mut self, _fact: &BuildFact) -> LayerSizes {
            LayerSizes {
                total: self.0,
                own: self.0,
            }
        }
    }

    fn fact(base: &str, tags: &[&str], hour: u32) -> BuildFact {
        BuildFact {
            name: None,
            phase: None,
            base_image: base.to_string(),
            produced_tags: tags.iter().map(|t| t.to_string()).collect(),
            when: format!("2016-03-01T{:02}:00:00Z", hour).parse().unwrap(),
            duration_secs: 1.0,
            image_id: format!("id-{}", tags[0]),
            lookup_image: tags[0].to_string(),
            size_hint: None,
            plugin_durations: BTreeMap::new(),
        }
    }

    #[test]
    fn test_topological_order_bases_first() {
        let mut tree = BuildTree::new();
        let mut sizes = FixedSizes(0);
        tree.add_fact(&fact("b:1", &["c:1"], 3), &mut sizes);
        tree.add_fact(&fact("a:1", &["b:1", "d:1"], 2), &mut sizes);

        let order = tree.topological_order();
        let pos = |t: &str| order.iter().position(|o| o == t).unwrap();
        assert!(pos("a:1") < pos("b:1"));
        assert!(pos("b:1") < pos("c:1"));
        assert!(pos("a:1") < pos("d:1"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_canonical_is_first_new_tag() {
        let mut tree = BuildTree::new();
        let mut sizes = FixedSizes(5);
        tree.add_fact(&fact("base:1", &["x:latest"], 5), &mut sizes);
        tree.add_fact(&fact("base:1", &["x:latest", "x:1.0"], 4), &mut sizes);

        assert_eq!(tree.canonical_of("x:1.0").map(String::as_str), Some("x:1.0"));
        // The newer build keeps its alias
        assert_eq!(tree.canonical_of("x:latest").map(String::as_str), Some("x:latest"));
        assert!(tree.metrics().contains_key("x:1.0"));
    }

    #[test]
    fn test_suppressed_build_adds_no_base_key() {
        let mut tree = BuildTree::new();
        let mut sizes = FixedSizes(5);
        assert!(tree.add_fact(&fact("a:1", &["x:1"], 5), &mut sizes));
        assert!(!tree.add_fact(&fact("other:1", &["x:1"], 4), &mut sizes));
        assert!(!tree.is_base("other:1"));
    }
}
