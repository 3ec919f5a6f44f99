// beacongraph/src/whitelist.rs
//
// Known-benign domain removal. The whitelist is a static file of domain
// names (one per line) plus an optional caller-supplied extra domain;
// matching is exact-name. Removal goes through the graph arena, so a
// removed domain also vanishes from every other node's neighbor list.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use crate::graph::SimilarityGraph;
use crate::model::Domain;

#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    domains: HashSet<String>,
}

impl Whitelist {
    /// Read the whitelist file; blank lines and `#` comments are skipped.
    /// The optional extra domain joins the set.
    pub fn load(path: &Path, extra: Option<&str>) -> io::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let mut domains: HashSet<String> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        if let Some(extra) = extra {
            if !extra.trim().is_empty() {
                domains.insert(extra.trim().to_string());
            }
        }
        Ok(Self { domains })
    }

    pub fn from_domains<I: IntoIterator<Item = String>>(domains: I) -> Self {
        Self {
            domains: domains.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.domains.contains(name)
    }

    /// Remove whitelisted domains from every cluster. Returns the removed
    /// names for audit, each recorded exactly once. Applying the same
    /// whitelist twice is a no-op.
    pub fn apply(&self, clusters: &mut [SimilarityGraph<Domain>]) -> Vec<String> {
        let mut removed: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for cluster in clusters.iter_mut() {
            let matching: HashSet<String> = cluster
                .keys()
                .filter(|name| self.contains(name))
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            for name in &matching {
                if seen.insert(name.clone()) {
                    removed.push(name.clone());
                }
            }
            cluster.remove_nodes(&matching);
        }
        removed.sort();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::request;

    fn cluster_of(names: &[&str]) -> SimilarityGraph<Domain> {
        let mut graph = SimilarityGraph::new(10);
        for name in names {
            let mut dom = Domain::new(*name);
            dom.insert(request(1, "10.0.0.1", &format!("http://{name}/"), name));
            graph.add_node(dom);
        }
        for pair in names.windows(2) {
            graph.offer_edge(&pair[0].to_string(), pair[1].to_string(), 0.5);
        }
        graph
    }

    #[test]
    fn apply_removes_matches_and_records_each_once() {
        let whitelist = Whitelist::from_domains(["ad.example.test".to_string()]);
        let mut clusters = vec![
            cluster_of(&["ad.example.test", "x.be"]),
            cluster_of(&["y.be", "ad.example.test"]),
        ];

        let removed = whitelist.apply(&mut clusters);
        assert_eq!(removed, vec!["ad.example.test"]);

        for cluster in &clusters {
            assert!(!cluster.contains(&"ad.example.test".to_string()));
            for key in cluster.keys() {
                assert!(!cluster
                    .neighbors(key)
                    .unwrap()
                    .contains(&"ad.example.test".to_string()));
            }
        }
    }

    #[test]
    fn apply_is_idempotent() {
        let whitelist = Whitelist::from_domains(["a.be".to_string()]);
        let mut clusters = vec![cluster_of(&["a.be", "b.be", "c.be"])];

        let first = whitelist.apply(&mut clusters);
        assert_eq!(first, vec!["a.be"]);
        assert_eq!(clusters[0].len(), 2);

        let second = whitelist.apply(&mut clusters);
        assert!(second.is_empty());
        assert_eq!(clusters[0].len(), 2);
    }

    #[test]
    fn load_skips_comments_and_adds_extra() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.txt");
        fs::write(&path, "# benign\ncdn.example.test\n\nupdate.example.test\n").unwrap();

        let whitelist = Whitelist::load(&path, Some("ongoing.example.test")).unwrap();
        assert_eq!(whitelist.len(), 3);
        assert!(whitelist.contains("cdn.example.test"));
        assert!(whitelist.contains("update.example.test"));
        assert!(whitelist.contains("ongoing.example.test"));
        assert!(!whitelist.contains("# benign"));
    }

    #[test]
    fn missing_file_surfaces_as_io_error() {
        let err = Whitelist::load(Path::new("/nonexistent/whitelist.txt"), None);
        assert!(err.is_err());
    }
}
