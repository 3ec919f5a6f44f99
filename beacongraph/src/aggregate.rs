// beacongraph/src/aggregate.rs
//
// Domain aggregation: collapse request nodes into per-domain aggregates,
// maintain the by-user and cross-user views, and re-derive domain-level
// edges from request-level similarity.

use std::collections::HashMap;

use crate::graph::SimilarityGraph;
use crate::model::{Domain, Request};

/// Group the requests of a fused request graph by domain name.
pub fn aggregate_requests(graph: &SimilarityGraph<Request>) -> HashMap<String, Domain> {
    let mut domains: HashMap<String, Domain> = HashMap::new();
    for request in graph.nodes() {
        domains
            .entry(request.domain.clone())
            .or_insert_with(|| Domain::new(request.domain.clone()))
            .insert(request.clone());
    }
    domains
}

/// The two aggregation perspectives later stages need: `by_user` keeps one
/// disjoint aggregate per `user:domain` key, `all` merges aggregates with
/// the same name across users.
#[derive(Debug, Default)]
pub struct DomainIndex {
    by_user: HashMap<String, Domain>,
    all: HashMap<String, Domain>,
}

impl DomainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one user's aggregates, merging into the cross-user view.
    pub fn add_user(&mut self, user: &str, domains: &HashMap<String, Domain>) {
        for (name, domain) in domains {
            self.by_user
                .insert(format!("{user}:{name}"), domain.clone());
            let merged = match self.all.get(name) {
                Some(existing) if existing != domain => Some(existing.merge(domain)),
                Some(_) => None,
                None => Some(domain.clone()),
            };
            if let Some(merged) = merged {
                self.all.insert(name.clone(), merged);
            }
        }
    }

    pub fn by_user(&self, user: &str, name: &str) -> Option<&Domain> {
        self.by_user.get(&format!("{user}:{name}"))
    }

    pub fn all(&self) -> &HashMap<String, Domain> {
        &self.all
    }

    pub fn merged(&self, name: &str) -> Option<&Domain> {
        self.all.get(name)
    }

    pub fn total_domains(&self) -> usize {
        self.all.len()
    }
}

/// Derive a user's domain graph from their fused request graph.
///
/// The edge weight between two domains accumulates every request-level
/// similarity between their members; pairs inside the same domain are
/// skipped and all-zero totals produce no edge.
pub fn domain_graph(
    requests: &SimilarityGraph<Request>,
    domains: &HashMap<String, Domain>,
    k: usize,
) -> SimilarityGraph<Domain> {
    let mut graph: SimilarityGraph<Domain> = SimilarityGraph::new(k);
    for domain in domains.values() {
        graph.add_node(domain.clone());
    }

    for (name, domain) in domains {
        let mut accumulated: HashMap<String, f64> = HashMap::new();
        for request in domain.requests() {
            let Some(neighbors) = requests.neighbors(&request.key()) else {
                continue;
            };
            for neighbor in neighbors.iter() {
                let Some(other) = requests.node(&neighbor.key) else {
                    continue;
                };
                if &other.domain == name {
                    continue;
                }
                *accumulated.entry(other.domain.clone()).or_insert(0.0) += neighbor.similarity;
            }
        }
        for (other, total) in accumulated {
            if total != 0.0 {
                graph.offer_edge(name, other, total);
            }
        }
    }
    graph
}
