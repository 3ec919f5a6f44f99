// beacongraph/src/rank.rs
//
// Suspicion ranking of the surviving domains.
//
// Three signals per domain: parents (how many other domains keep it in
// their neighbor list), children (its own neighbor-list size), and request
// volume. The composite is the weighted sum of the raw signals under the
// caller's weights normalized to sum to one. The ranking is ascending by
// composite score with ties grouped — the low-activity extreme first, the
// high-activity extreme last. Which end is "most suspicious" follows from
// the caller's weights; the ROC exporter walks the same ascending order.

use std::collections::HashMap;

use crate::graph::SimilarityGraph;
use crate::model::Domain;

/// Weights over (parents, children, request volume).
pub type RankingWeights = [f64; 3];

/// Ascending score → domains mapping; ties share one entry. Domain names
/// within a tie are sorted for stable output.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    entries: Vec<(f64, Vec<String>)>,
}

impl Ranking {
    pub fn entries(&self) -> &[(f64, Vec<String>)] {
        &self.entries
    }

    /// Number of ranked domains.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, doms)| doms.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Domains in ascending score order.
    pub fn walk(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries
            .iter()
            .flat_map(|(score, doms)| doms.iter().map(move |d| (d.as_str(), *score)))
    }

    /// Ascending position of a domain (0 = lowest score).
    pub fn position(&self, name: &str) -> Option<usize> {
        self.walk().position(|(d, _)| d == name)
    }

    pub fn score_of(&self, name: &str) -> Option<f64> {
        self.walk()
            .find(|(d, _)| *d == name)
            .map(|(_, score)| score)
    }
}

/// What the ranking stage reports back to the session diagnostics.
#[derive(Debug, Default)]
pub struct RankOutcome {
    pub ranking: Ranking,
    /// Domains dropped by the min-requests noise floor.
    pub dropped_low_volume: usize,
    /// Domains that were actually scored.
    pub ranked: usize,
}

/// Merge the surviving clusters into one graph and rank its domains.
pub fn rank(
    clusters: &[SimilarityGraph<Domain>],
    weights: &RankingWeights,
    min_requests: usize,
) -> RankOutcome {
    let k = clusters.first().map(|c| c.k()).unwrap_or(0);
    let mut merged: SimilarityGraph<Domain> = SimilarityGraph::new(k.max(1));
    for cluster in clusters {
        for node in cluster.nodes() {
            merged.add_node(node.clone());
        }
    }
    for cluster in clusters {
        for key in cluster.keys() {
            if let Some(list) = cluster.neighbors(key) {
                for neighbor in list.iter() {
                    merged.offer_edge(key, neighbor.key.clone(), neighbor.similarity);
                }
            }
        }
    }

    // Noise floor: domains below the minimum request volume are not ranked.
    let low_volume: std::collections::HashSet<String> = merged
        .nodes()
        .filter(|d| d.len() < min_requests)
        .map(|d| d.name().to_string())
        .collect();
    let dropped_low_volume = low_volume.len();
    merged.remove_nodes(&low_volume);

    // Signals.
    let mut parents: HashMap<String, usize> =
        merged.keys().map(|k| (k.clone(), 0)).collect();
    let mut children: HashMap<String, usize> = HashMap::new();
    let mut volume: HashMap<String, usize> = HashMap::new();
    for key in merged.keys() {
        let list = merged.neighbors(key).map(|l| l.len()).unwrap_or(0);
        children.insert(key.clone(), list);
        if let Some(domain) = merged.node(key) {
            volume.insert(key.clone(), domain.len());
        }
    }
    for key in merged.keys() {
        if let Some(list) = merged.neighbors(key) {
            for neighbor in list.iter() {
                if let Some(count) = parents.get_mut(&neighbor.key) {
                    *count += 1;
                }
            }
        }
    }

    let total: f64 = weights.iter().sum();
    let mut scored: Vec<(String, f64)> = merged
        .keys()
        .map(|key| {
            let score = (weights[0] * parents[key] as f64
                + weights[1] * children[key] as f64
                + weights[2] * volume[key] as f64)
                / total;
            (key.clone(), score)
        })
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut entries: Vec<(f64, Vec<String>)> = Vec::new();
    for (name, score) in scored {
        match entries.last_mut() {
            Some((last, doms)) if *last == score => doms.push(name),
            _ => entries.push((score, vec![name])),
        }
    }

    RankOutcome {
        ranked: entries.iter().map(|(_, d)| d.len()).sum(),
        ranking: Ranking { entries },
        dropped_low_volume,
    }
}

/// Evaluation summary for synthetic marker domains: where do domains with
/// the marker suffix land in the ascending ranking?
pub fn marker_summary(ranking: &Ranking, suffix: &str, total_domains: usize) -> String {
    let ranked = ranking.len();
    let mut lines: Vec<String> = Vec::new();
    for (name, score) in ranking.walk() {
        if name.ends_with(suffix) {
            let at_or_below = ranking
                .walk()
                .filter(|(_, s)| *s <= score)
                .count();
            let share = at_or_below as f64 / total_domains.max(1) as f64 * 100.0;
            lines.push(format!(
                "marker {name}: rank {}/{} (top {share:.2}% of {total_domains} domains)",
                ranking.position(name).unwrap_or(0) + 1,
                ranked,
            ));
        }
    }
    if lines.is_empty() {
        format!("marker {suffix}: NOT FOUND")
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::request;

    fn domain(name: &str, n_requests: usize) -> Domain {
        let mut dom = Domain::new(name);
        for i in 0..n_requests {
            dom.insert(request(
                i as i64,
                "10.0.0.1",
                &format!("http://{name}/{i}"),
                name,
            ));
        }
        dom
    }

    fn cluster(domains: &[(&str, usize)], edges: &[(&str, &str, f64)]) -> SimilarityGraph<Domain> {
        let mut graph = SimilarityGraph::new(10);
        for (name, n) in domains {
            graph.add_node(domain(name, *n));
        }
        for (from, to, sim) in edges {
            graph.offer_edge(&from.to_string(), to.to_string(), *sim);
        }
        graph
    }

    #[test]
    fn volume_weight_pushes_busy_domains_to_the_tail() {
        let clusters = vec![cluster(
            &[("quiet.be", 1), ("mid.be", 5), ("busy.be", 50)],
            &[("quiet.be", "mid.be", 0.2)],
        )];
        let outcome = rank(&clusters, &[0.0, 0.0, 1.0], 0);
        let walk: Vec<&str> = outcome.ranking.walk().map(|(d, _)| d).collect();
        assert_eq!(*walk.last().unwrap(), "busy.be");
        assert_eq!(outcome.ranking.position("busy.be"), Some(2));
    }

    #[test]
    fn parents_count_incoming_references() {
        let clusters = vec![cluster(
            &[("a.be", 1), ("b.be", 1), ("c.be", 1)],
            &[("a.be", "c.be", 0.5), ("b.be", "c.be", 0.5)],
        )];
        let outcome = rank(&clusters, &[1.0, 0.0, 0.0], 0);
        // c.be has two parents, the rest none — it ranks last.
        let walk: Vec<&str> = outcome.ranking.walk().map(|(d, _)| d).collect();
        assert_eq!(*walk.last().unwrap(), "c.be");
    }

    #[test]
    fn ties_group_into_one_entry() {
        let clusters = vec![cluster(&[("a.be", 2), ("b.be", 2), ("c.be", 4)], &[])];
        let outcome = rank(&clusters, &[0.0, 0.0, 1.0], 0);
        let entries = outcome.ranking.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, vec!["a.be", "b.be"]);
        assert_eq!(entries[1].1, vec!["c.be"]);
        assert_eq!(outcome.ranking.len(), 3);
    }

    #[test]
    fn min_requests_drops_low_volume_domains() {
        let clusters = vec![cluster(&[("a.be", 1), ("b.be", 10)], &[])];
        let outcome = rank(&clusters, &[0.0, 0.0, 1.0], 5);
        assert_eq!(outcome.dropped_low_volume, 1);
        assert_eq!(outcome.ranked, 1);
        assert!(outcome.ranking.position("a.be").is_none());
    }

    #[test]
    fn marker_summary_reports_rank_or_absence() {
        let clusters = vec![cluster(&[("x.be", 1), ("beacon.apt", 9)], &[])];
        let outcome = rank(&clusters, &[0.0, 0.0, 1.0], 0);
        let summary = marker_summary(&outcome.ranking, ".apt", 2);
        assert!(summary.contains("beacon.apt"));
        assert!(summary.contains("rank 2/2"));

        let missing = marker_summary(&outcome.ranking, ".nope", 2);
        assert!(missing.contains("NOT FOUND"));
    }
}
