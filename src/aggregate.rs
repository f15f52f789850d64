use crate::graph::BuildTree;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Fleet-wide cost of the builds that survive trimming
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub duration_secs: f64,
    pub upload_size: u64,
    pub layer_size: u64,
}

/// Sum every canonical tag's metrics, less the tags pruned by trimming.
pub fn calculate_totals(tree: &BuildTree) -> Totals {
    let mut totals = Totals::default();
    for m in tree.metrics().values() {
        totals.duration_secs += m.duration_secs;
        totals.upload_size += m.upload_size;
        totals.layer_size += m.layer_size;
    }

    for tag in tree.excess() {
        if let Some(m) = tree.metrics().get(tag) {
            totals.duration_secs -= m.duration_secs;
            totals.upload_size = totals.upload_size.saturating_sub(m.upload_size);
            totals.layer_size = totals.layer_size.saturating_sub(m.layer_size);
        }
    }

    totals
}

/// Total registry layer bytes with shared base layers counted once.
///
/// A derived image's reported layer size includes its base's bytes, so the
/// base's recorded size is subtracted from each derived tag that has one.
/// Bases are visited before the tags built from them and every tag is
/// adjusted at most once. Trimmed tags are not counted.
pub fn total_layer_size_after_dedup(tree: &BuildTree) -> u64 {
    let mut adjusted: BTreeMap<&str, u64> = tree
        .metrics()
        .iter()
        .filter(|(tag, _)| !tree.excess().contains(*tag))
        .map(|(tag, m)| (tag.as_str(), m.layer_size))
        .collect();
    let mut done: HashSet<&str> = HashSet::new();

    for base in tree.topological_order() {
        let Some(layers) = tree.derived(&base) else {
            continue;
        };
        let Some(base_size) = tree.metrics().get(&base).map(|m| m.layer_size) else {
            continue;
        };

        for layer in layers {
            if done.contains(layer.as_str()) {
                continue;
            }
            if let Some(size) = adjusted.get_mut(layer.as_str()) {
                *size = size.saturating_sub(base_size);
                done.insert(layer.as_str());
            }
        }
    }

    adjusted.values().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BuildFact;
    use crate::registry::{LayerSizes, SizeOracle};
    use std::collections::HashMap;

    struct SizesByTag(HashMap<&'static str, u64>);

    impl SizeOracle for SizesByTag {
        fn resolve(&mut self, fact: &BuildFact) -> LayerSizes {
            let own = self.0.get(fact.produced_tags[0].as_str()).copied().unwrap_or(0);
            LayerSizes { total: own, own }
        }
    }

    fn fact(base: &str, tag: &str, hour: u32) -> BuildFact {
        BuildFact {
            name: None,
            phase: None,
            base_image: base.to_string(),
            produced_tags: vec![tag.to_string()],
            when: format!("2016-03-01T{:02}:00:00Z", hour).parse().unwrap(),
            duration_secs: 1.0,
            image_id: tag.to_string(),
            lookup_image: tag.to_string(),
            size_hint: None,
            plugin_durations: Default::default(),
        }
    }

    #[test]
    fn test_dedup_subtracts_base_layer() {
        let mut sizes = SizesByTag(HashMap::from([("b:1", 100), ("c:1", 150), ("d:1", 130)]));
        let mut tree = BuildTree::new();
        tree.add_fact(&fact("b:1", "c:1", 5), &mut sizes);
        tree.add_fact(&fact("b:1", "d:1", 4), &mut sizes);
        tree.add_fact(&fact("a:1", "b:1", 3), &mut sizes);

        // b:1 has no recorded base, c:1 and d:1 lose b:1's 100 bytes
        assert_eq!(total_layer_size_after_dedup(&tree), 100 + 50 + 30);
    }

    #[test]
    fn test_dedup_three_level_chain_subtracts_recorded_base_size() {
        let mut sizes = SizesByTag(HashMap::from([("a:1", 100), ("b:1", 150), ("c:1", 180)]));
        let mut tree = BuildTree::new();
        tree.add_fact(&fact("b:1", "c:1", 5), &mut sizes);
        tree.add_fact(&fact("a:1", "b:1", 4), &mut sizes);
        tree.add_fact(&fact("z:1", "a:1", 3), &mut sizes);

        // b:1 loses a:1's 100. c:1 loses b:1's recorded 150, not its adjusted 50.
        assert_eq!(total_layer_size_after_dedup(&tree), 100 + 50 + 30);
    }

    #[test]
    fn test_dedup_skips_trimmed_tags() {
        let mut sizes = SizesByTag(HashMap::from([("b:1", 100), ("c:1", 150)]));
        let mut tree = BuildTree::new();
        tree.add_fact(&fact("b:1", "c:1", 5), &mut sizes);
        tree.add_fact(&fact("a:1", "b:1", 3), &mut sizes);
        tree.trim_excess_tags();

        assert_eq!(total_layer_size_after_dedup(&tree), 100);
    }

    #[test]
    fn test_empty_tree_totals() {
        let tree = BuildTree::new();
        assert_eq!(calculate_totals(&tree), Totals::default());
        assert_eq!(total_layer_size_after_dedup(&tree), 0);
    }
}
