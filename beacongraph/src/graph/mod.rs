// beacongraph/src/graph/mod.rs
//
// Similarity graph over content-keyed nodes.
//
// Nodes live in an arena indexed by a stable content key (the request
// identity triple, or a domain name) and every edge refers to its endpoint
// by key. Removing a node deletes the arena entry and purges the key from
// every neighbor list, so no dangling back-reference can survive.

pub mod knn;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use petgraph::unionfind::UnionFind;

use crate::model::{Domain, Request, RequestKey};

/// A node the graph can hold: content-cloneable, with a stable content key.
pub trait GraphNode: Clone {
    type Key: Clone + Eq + Hash + Ord + fmt::Debug;

    fn key(&self) -> Self::Key;
}

impl GraphNode for Request {
    type Key = RequestKey;

    fn key(&self) -> RequestKey {
        Request::key(self)
    }
}

impl GraphNode for Domain {
    type Key = String;

    fn key(&self) -> String {
        self.name().to_string()
    }
}

// ── Neighbor list ─────────────────────────────────────────────────────────────

/// One outgoing edge: a neighbor key and the similarity toward it.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor<K> {
    pub key: K,
    pub similarity: f64,
}

/// A node's outgoing edges, kept sorted by descending similarity, free of
/// duplicate neighbors, and bounded by the configured capacity.
#[derive(Debug, Clone)]
pub struct NeighborList<K> {
    cap: usize,
    entries: Vec<Neighbor<K>>,
}

impl<K: Clone + Eq> NeighborList<K> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor<K>> {
        self.entries.iter()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.iter().any(|n| &n.key == key)
    }

    /// Similarity of the weakest kept neighbor.
    pub fn min_similarity(&self) -> Option<f64> {
        self.entries.last().map(|n| n.similarity)
    }

    /// Offer an edge. Keeps the list sorted, deduplicated, and capped;
    /// returns true when the list changed.
    pub fn offer(&mut self, key: K, similarity: f64) -> bool {
        if self.entries.iter().any(|n| n.key == key) {
            return false;
        }
        if self.entries.len() >= self.cap {
            match self.min_similarity() {
                Some(weakest) if similarity > weakest => {
                    self.entries.pop();
                }
                _ => return false,
            }
        }
        let at = self
            .entries
            .partition_point(|n| n.similarity >= similarity);
        self.entries.insert(at, Neighbor { key, similarity });
        true
    }

    /// Drop every edge with `similarity < threshold`.
    pub fn prune(&mut self, threshold: f64) {
        self.entries.retain(|n| n.similarity >= threshold);
    }

    pub fn remove(&mut self, key: &K) -> bool {
        let before = self.entries.len();
        self.entries.retain(|n| &n.key != key);
        before != self.entries.len()
    }
}

// ── Similarity graph ──────────────────────────────────────────────────────────

/// Directed similarity graph: every node owns a k-bounded neighbor list.
/// Connectivity queries treat edges as undirected.
#[derive(Debug, Clone)]
pub struct SimilarityGraph<T: GraphNode> {
    k: usize,
    nodes: HashMap<T::Key, T>,
    neighbors: HashMap<T::Key, NeighborList<T::Key>>,
}

impl<T: GraphNode> SimilarityGraph<T> {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            nodes: HashMap::new(),
            neighbors: HashMap::new(),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node(&self, key: &T::Key) -> Option<&T> {
        self.nodes.get(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.nodes.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &T::Key> {
        self.nodes.keys()
    }

    pub fn neighbors(&self, key: &T::Key) -> Option<&NeighborList<T::Key>> {
        self.neighbors.get(key)
    }

    /// Insert a node with an empty neighbor list. An existing node with the
    /// same key is replaced by the given value; its edges are kept.
    pub fn add_node(&mut self, node: T) {
        let key = node.key();
        self.neighbors
            .entry(key.clone())
            .or_insert_with(|| NeighborList::new(self.k));
        self.nodes.insert(key, node);
    }

    /// Offer a directed edge between two existing nodes. Returns true when
    /// the source's neighbor list changed.
    pub fn offer_edge(&mut self, from: &T::Key, to: T::Key, similarity: f64) -> bool {
        if from == &to || !self.nodes.contains_key(from) || !self.nodes.contains_key(&to) {
            return false;
        }
        match self.neighbors.get_mut(from) {
            Some(list) => list.offer(to, similarity),
            None => false,
        }
    }

    pub fn edge_count(&self) -> usize {
        self.neighbors.values().map(NeighborList::len).sum()
    }

    /// Every edge similarity in the graph, unordered.
    pub fn similarities(&self) -> Vec<f64> {
        self.neighbors
            .values()
            .flat_map(|list| list.iter().map(|n| n.similarity))
            .collect()
    }

    /// Drop every edge below the threshold. Nodes stay, even edgeless.
    pub fn prune(&mut self, threshold: f64) {
        for list in self.neighbors.values_mut() {
            list.prune(threshold);
        }
    }

    /// Remove nodes and purge their keys from every remaining neighbor list.
    pub fn remove_nodes(&mut self, keys: &HashSet<T::Key>) {
        for key in keys {
            self.nodes.remove(key);
            self.neighbors.remove(key);
        }
        for list in self.neighbors.values_mut() {
            for key in keys {
                list.remove(key);
            }
        }
    }

    /// Partition the graph into connected components under undirected
    /// reachability. Every node lands in exactly one component; each
    /// component keeps its nodes' full neighbor lists. Components are
    /// ordered by their smallest node key.
    pub fn connected_components(&self) -> Vec<SimilarityGraph<T>> {
        let mut keys: Vec<&T::Key> = self.nodes.keys().collect();
        keys.sort();
        let index: HashMap<&T::Key, usize> =
            keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();

        let mut sets: UnionFind<usize> = UnionFind::new(keys.len());
        for (from, list) in &self.neighbors {
            let i = index[from];
            for neighbor in list.iter() {
                sets.union(i, index[&neighbor.key]);
            }
        }

        let mut by_root: HashMap<usize, Vec<&T::Key>> = HashMap::new();
        for (i, key) in keys.iter().enumerate() {
            by_root.entry(sets.find(i)).or_default().push(*key);
        }

        let mut components: Vec<SimilarityGraph<T>> = Vec::with_capacity(by_root.len());
        let mut groups: Vec<Vec<&T::Key>> = by_root.into_values().collect();
        groups.sort_by(|a, b| a[0].cmp(b[0]));
        for group in groups {
            let mut sub = SimilarityGraph::new(self.k);
            for key in group {
                sub.nodes.insert(key.clone(), self.nodes[key].clone());
                sub.neighbors.insert(key.clone(), self.neighbors[key].clone());
            }
            components.push(sub);
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::request;

    fn graph_of(n: usize, k: usize) -> SimilarityGraph<Request> {
        let mut graph = SimilarityGraph::new(k);
        for i in 0..n {
            graph.add_node(request(
                i as i64,
                "10.0.0.1",
                &format!("http://d{i}.be/"),
                &format!("d{i}.be"),
            ));
        }
        graph
    }

    fn key_of(i: usize) -> RequestKey {
        request(
            i as i64,
            "10.0.0.1",
            &format!("http://d{i}.be/"),
            &format!("d{i}.be"),
        )
        .key()
    }

    #[test]
    fn neighbor_list_stays_sorted_bounded_and_deduped() {
        let mut list: NeighborList<u32> = NeighborList::new(3);
        assert!(list.offer(1, 0.5));
        assert!(list.offer(2, 0.9));
        assert!(list.offer(3, 0.1));
        // Duplicate neighbor is rejected.
        assert!(!list.offer(2, 0.7));
        // Weaker than the weakest kept entry once full.
        assert!(!list.offer(4, 0.05));
        // Stronger entry evicts the weakest.
        assert!(list.offer(5, 0.8));

        let sims: Vec<f64> = list.iter().map(|n| n.similarity).collect();
        assert_eq!(sims, vec![0.9, 0.8, 0.5]);
        assert!(!list.contains(&3));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn prune_is_monotonic_and_keeps_nodes() {
        let mut graph = graph_of(4, 4);
        graph.offer_edge(&key_of(0), key_of(1), 0.9);
        graph.offer_edge(&key_of(0), key_of(2), 0.5);
        graph.offer_edge(&key_of(1), key_of(3), 0.2);

        let mut loose = graph.clone();
        loose.prune(0.3);
        let mut strict = graph.clone();
        strict.prune(0.7);

        assert!(strict.edge_count() <= loose.edge_count());
        assert_eq!(loose.edge_count(), 2);
        assert_eq!(strict.edge_count(), 1);
        // Nodes survive even with no edges left.
        assert_eq!(strict.len(), 4);
        assert!(strict
            .similarities()
            .iter()
            .all(|&s| s >= 0.7));
    }

    #[test]
    fn connected_components_partition_the_node_set() {
        let mut graph = graph_of(5, 4);
        graph.offer_edge(&key_of(0), key_of(1), 0.9);
        // Directional edge still connects both endpoints.
        graph.offer_edge(&key_of(2), key_of(1), 0.4);
        graph.offer_edge(&key_of(3), key_of(4), 0.8);

        let components = graph.connected_components();
        assert_eq!(components.len(), 2);

        let total: usize = components.iter().map(|c| c.len()).sum();
        assert_eq!(total, graph.len());

        let sizes: Vec<usize> = components.iter().map(|c| c.len()).collect();
        assert!(sizes.contains(&3));
        assert!(sizes.contains(&2));

        // No cross-component edges: every neighbor key resolves inside.
        for component in &components {
            for key in component.keys() {
                for neighbor in component.neighbors(key).unwrap().iter() {
                    assert!(component.contains(&neighbor.key));
                }
            }
        }
    }

    #[test]
    fn edgeless_nodes_become_singleton_components() {
        let graph = graph_of(3, 2);
        let components = graph.connected_components();
        assert_eq!(components.len(), 3);
        assert!(components.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn remove_nodes_purges_every_neighbor_list() {
        let mut graph = graph_of(3, 4);
        graph.offer_edge(&key_of(0), key_of(1), 0.9);
        graph.offer_edge(&key_of(2), key_of(1), 0.8);
        graph.offer_edge(&key_of(1), key_of(0), 0.7);

        let removed: HashSet<RequestKey> = [key_of(1)].into_iter().collect();
        graph.remove_nodes(&removed);

        assert!(!graph.contains(&key_of(1)));
        for key in [key_of(0), key_of(2)] {
            assert!(!graph.neighbors(&key).unwrap().contains(&key_of(1)));
        }

        // Removing again is a no-op.
        let before = graph.len();
        graph.remove_nodes(&removed);
        assert_eq!(graph.len(), before);
    }

    #[test]
    fn self_edges_and_unknown_endpoints_are_rejected() {
        let mut graph = graph_of(2, 4);
        assert!(!graph.offer_edge(&key_of(0), key_of(0), 1.0));
        assert!(!graph.offer_edge(&key_of(0), key_of(9), 0.5));
        assert_eq!(graph.edge_count(), 0);
    }
}
