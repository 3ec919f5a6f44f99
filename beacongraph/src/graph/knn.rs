// beacongraph/src/graph/knn.rs
//
// Approximate k-NN graph construction.
//
// Three builders, picked by input size exactly as the batch stage does:
//   - Brute            — exact all-pairs scan, n < 2k
//   - NnDescent        — single-threaded neighbor-of-neighbor refinement
//   - ThreadedNnDescent — the same refinement, bulk-synchronous over a
//                         fixed worker pool: each pass the workers propose
//                         updates for their node partition against a frozen
//                         snapshot, the proposals merge after the join, and
//                         the next pass starts from the merged lists.
//
// The result is approximate: recall against the brute graph is a tested
// property, not an invariant. Runs are not deterministic.

use std::collections::HashSet;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::index::sample;
use tracing::debug;

use super::{GraphNode, NeighborList, SimilarityGraph};
use crate::similarity::Similarity;

/// Pass-to-pass improvement ratio under which refinement stops.
const DELTA: f64 = 0.001;
/// Upper bound on refinement passes.
const MAX_PASSES: usize = 12;

/// Build the k-NN graph for a node set, choosing the builder by input size.
pub fn build_graph<T>(nodes: &[T], k: usize, sim: &(dyn Similarity<T> + '_)) -> SimilarityGraph<T>
where
    T: GraphNode + Sync,
    T::Key: Send + Sync,
{
    if nodes.len() < 2 * k {
        Brute::new(k).build(nodes, sim)
    } else if nodes.len() < 500 {
        NnDescent::new(k).build(nodes, sim)
    } else {
        ThreadedNnDescent::new(k).build(nodes, sim)
    }
}

/// Keep the first occurrence of every content key.
fn dedup<T: GraphNode>(nodes: &[T]) -> Vec<T> {
    let mut seen: HashSet<T::Key> = HashSet::with_capacity(nodes.len());
    nodes
        .iter()
        .filter(|n| seen.insert(n.key()))
        .cloned()
        .collect()
}

fn assemble<T: GraphNode>(
    nodes: Vec<T>,
    lists: Vec<NeighborList<usize>>,
    k: usize,
) -> SimilarityGraph<T> {
    let mut graph = SimilarityGraph::new(k);
    for node in &nodes {
        graph.add_node(node.clone());
    }
    for (i, list) in lists.iter().enumerate() {
        let from = nodes[i].key();
        for neighbor in list.iter() {
            graph.offer_edge(&from, nodes[neighbor.key].key(), neighbor.similarity);
        }
    }
    graph
}

// ── Brute ─────────────────────────────────────────────────────────────────────

/// Exact k-NN by all-pairs scan. Quadratic; only used for small inputs.
pub struct Brute {
    k: usize,
}

impl Brute {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn build<T: GraphNode>(
        &self,
        nodes: &[T],
        sim: &(dyn Similarity<T> + '_),
    ) -> SimilarityGraph<T> {
        let nodes = dedup(nodes);
        let mut lists: Vec<NeighborList<usize>> =
            (0..nodes.len()).map(|_| NeighborList::new(self.k)).collect();
        for i in 0..nodes.len() {
            for j in 0..nodes.len() {
                if i != j {
                    lists[i].offer(j, sim.similarity(&nodes[i], &nodes[j]));
                }
            }
        }
        assemble(nodes, lists, self.k)
    }
}

// ── Descent core ──────────────────────────────────────────────────────────────

type Proposal = (usize, usize, f64);

/// One refinement pass: workers scan their partition of the node set against
/// the frozen `lists` snapshot and propose improving edges; the caller
/// applies the merged proposals. Returns the number of applied updates.
fn refine_pass<T>(
    nodes: &[T],
    lists: &mut [NeighborList<usize>],
    sim: &(dyn Similarity<T> + '_),
    workers: usize,
) -> usize
where
    T: GraphNode + Sync,
    T::Key: Send + Sync,
{
    let n = nodes.len();

    // Reverse adjacency, accumulated across workers.
    let reverse: DashMap<usize, Vec<usize>> = DashMap::new();
    let chunk = n.div_ceil(workers);
    std::thread::scope(|scope| {
        for w in 0..workers {
            let reverse = &reverse;
            let lists = &*lists;
            scope.spawn(move || {
                let lo = w * chunk;
                let hi = ((w + 1) * chunk).min(n);
                for (i, list) in lists.iter().enumerate().take(hi).skip(lo) {
                    for neighbor in list.iter() {
                        reverse.entry(neighbor.key).or_default().push(i);
                    }
                }
            });
        }
    });

    let proposals: Mutex<Vec<Proposal>> = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for w in 0..workers {
            let reverse = &reverse;
            let proposals = &proposals;
            let lists = &*lists;
            scope.spawn(move || {
                let mut local: Vec<Proposal> = Vec::new();
                let lo = w * chunk;
                let hi = ((w + 1) * chunk).min(n);
                for i in lo..hi {
                    let mut candidates: HashSet<usize> =
                        lists[i].iter().map(|nb| nb.key).collect();
                    if let Some(rev) = reverse.get(&i) {
                        candidates.extend(rev.iter().copied());
                    }

                    let full = lists[i].len() >= lists[i].cap();
                    let floor = lists[i].min_similarity().unwrap_or(f64::MIN);
                    let mut scanned: HashSet<usize> = HashSet::new();
                    for &c in &candidates {
                        let mut extended: Vec<usize> =
                            lists[c].iter().map(|nb| nb.key).collect();
                        if let Some(rev) = reverse.get(&c) {
                            extended.extend(rev.iter().copied());
                        }
                        for cc in extended {
                            if cc == i || lists[i].contains(&cc) || !scanned.insert(cc) {
                                continue;
                            }
                            let s = sim.similarity(&nodes[i], &nodes[cc]);
                            if !full || s > floor {
                                local.push((i, cc, s));
                            }
                        }
                    }
                }
                proposals.lock().extend(local);
            });
        }
    });

    let mut updates = 0usize;
    for (i, j, s) in proposals.into_inner() {
        if lists[i].offer(j, s) {
            updates += 1;
        }
    }
    updates
}

fn descend<T>(
    nodes: Vec<T>,
    k: usize,
    sim: &(dyn Similarity<T> + '_),
    workers: usize,
) -> SimilarityGraph<T>
where
    T: GraphNode + Sync,
    T::Key: Send + Sync,
{
    let n = nodes.len();
    let mut rng = rand::thread_rng();

    // Random initial candidates.
    let mut lists: Vec<NeighborList<usize>> = (0..n).map(|_| NeighborList::new(k)).collect();
    for i in 0..n {
        let picks = sample(&mut rng, n, (k + 1).min(n));
        for j in picks.into_iter().filter(|&j| j != i).take(k) {
            lists[i].offer(j, sim.similarity(&nodes[i], &nodes[j]));
        }
    }

    // Refine until a pass stops improving.
    let threshold = (DELTA * n as f64 * k as f64).max(1.0);
    for pass in 0..MAX_PASSES {
        let updates = refine_pass(&nodes, &mut lists, sim, workers);
        debug!(pass, updates, "knn refinement pass");
        if (updates as f64) < threshold {
            break;
        }
    }

    assemble(nodes, lists, k)
}

/// Single-threaded NNDescent-style refinement.
pub struct NnDescent {
    k: usize,
}

impl NnDescent {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn build<T>(&self, nodes: &[T], sim: &(dyn Similarity<T> + '_)) -> SimilarityGraph<T>
    where
        T: GraphNode + Sync,
        T::Key: Send + Sync,
    {
        descend(dedup(nodes), self.k, sim, 1)
    }
}

/// NNDescent refinement over a fixed-size worker pool. Bulk-synchronous:
/// no pass starts before every worker finished the previous one.
pub struct ThreadedNnDescent {
    k: usize,
    workers: usize,
}

impl ThreadedNnDescent {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            workers: num_cpus::get().max(1),
        }
    }

    pub fn with_workers(k: usize, workers: usize) -> Self {
        Self {
            k,
            workers: workers.max(1),
        }
    }

    pub fn build<T>(&self, nodes: &[T], sim: &(dyn Similarity<T> + '_)) -> SimilarityGraph<T>
    where
        T: GraphNode + Sync,
        T::Key: Send + Sync,
    {
        descend(dedup(nodes), self.k, sim, self.workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::request;
    use crate::model::Request;
    use crate::similarity::TimeSimilarity;

    fn random_requests(n: usize) -> Vec<Request> {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        (0..n)
            .map(|i| {
                let t: i64 = rng.gen_range(0..3_600_000);
                request(t, "10.0.0.1", &format!("http://d{i}.be/q{i}"), "d.be")
            })
            .collect()
    }

    fn recall(approx: &SimilarityGraph<Request>, exact: &SimilarityGraph<Request>) -> f64 {
        let mut hit = 0usize;
        let mut total = 0usize;
        for key in exact.keys() {
            let exact_list = exact.neighbors(key).unwrap();
            let approx_list = approx.neighbors(key).unwrap();
            for neighbor in exact_list.iter() {
                total += 1;
                if approx_list.contains(&neighbor.key) {
                    hit += 1;
                }
            }
        }
        hit as f64 / total as f64
    }

    #[test]
    fn brute_matches_every_node_with_k_neighbors() {
        let nodes = random_requests(30);
        let graph = Brute::new(5).build(&nodes, &TimeSimilarity);
        assert_eq!(graph.len(), 30);
        for key in graph.keys() {
            assert_eq!(graph.neighbors(key).unwrap().len(), 5);
        }
    }

    #[test]
    fn descent_respects_k_bound_sorting_and_dedup() {
        let nodes = random_requests(200);
        let graph = NnDescent::new(8).build(&nodes, &TimeSimilarity);
        assert_eq!(graph.len(), 200);
        for key in graph.keys() {
            let list = graph.neighbors(key).unwrap();
            assert!(list.len() <= 8);
            let sims: Vec<f64> = list.iter().map(|n| n.similarity).collect();
            assert!(sims.windows(2).all(|w| w[0] >= w[1]));
            let keys: HashSet<_> = list.iter().map(|n| n.key.clone()).collect();
            assert_eq!(keys.len(), list.len());
        }
    }

    #[test]
    fn descent_recall_approaches_brute() {
        let nodes = random_requests(200);
        let exact = Brute::new(8).build(&nodes, &TimeSimilarity);
        let approx = NnDescent::new(8).build(&nodes, &TimeSimilarity);
        assert!(recall(&approx, &exact) > 0.5);
    }

    #[test]
    fn threaded_descent_recall_approaches_brute() {
        let nodes = random_requests(600);
        let exact = Brute::new(10).build(&nodes, &TimeSimilarity);
        let approx = ThreadedNnDescent::with_workers(10, 4).build(&nodes, &TimeSimilarity);
        assert!(recall(&approx, &exact) > 0.5);
    }

    #[test]
    fn dispatch_picks_brute_for_tiny_inputs() {
        let nodes = random_requests(6);
        let graph = build_graph(&nodes, 10, &TimeSimilarity);
        assert_eq!(graph.len(), 6);
        for key in graph.keys() {
            assert_eq!(graph.neighbors(key).unwrap().len(), 5);
        }
    }

    #[test]
    fn content_duplicate_nodes_collapse() {
        let mut nodes = random_requests(20);
        let dup = nodes[0].clone();
        nodes.push(dup);
        let graph = build_graph(&nodes, 4, &TimeSimilarity);
        assert_eq!(graph.len(), 20);
    }
}
