// beacongraph/src/fusion.rs
//
// Weighted graph fusion. Used twice in the pipeline: combining a user's
// per-feature request graphs into one behavioral graph, and combining
// per-user domain graphs into the cross-user graph.
//
// For every edge present in any input graph the fused weight is the
// weighted sum of each input's similarity for that pair (a missing edge
// contributes 0), renormalized by the sum of the weights actually applied.
// Neighbor lists are re-sorted and re-truncated to k by construction.

use std::collections::HashMap;

use crate::error::AnalysisError;
use crate::graph::{GraphNode, SimilarityGraph};

/// Check a weight vector: finite, non-negative, positive sum. A zero
/// weight is legal and equivalent to omitting the entry.
pub fn validate_weights(name: &str, weights: &[f64]) -> Result<(), AnalysisError> {
    if weights.is_empty() {
        return Err(AnalysisError::InvalidWeights {
            which: name.to_string(),
            reason: "empty weight vector".to_string(),
        });
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(AnalysisError::InvalidWeights {
            which: name.to_string(),
            reason: format!("weights must be finite and non-negative, got {weights:?}"),
        });
    }
    if weights.iter().sum::<f64>() <= 0.0 {
        return Err(AnalysisError::InvalidWeights {
            which: name.to_string(),
            reason: "weights sum to zero".to_string(),
        });
    }
    Ok(())
}

/// Expand the three feature weights into the four stored graphs: the time
/// weight is re-split between the symmetric and ordered variants by the
/// ordered-weight pair.
pub fn effective_feature_weights(features: &[f64; 3], ordered: &[f64; 2]) -> [f64; 4] {
    let ordered_total: f64 = ordered.iter().sum();
    [
        features[0] * ordered[0] / ordered_total,
        features[0] * ordered[1] / ordered_total,
        features[1],
        features[2],
    ]
}

/// Uniform user weights for cross-user fusion.
pub fn uniform_weights(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

/// Fuse the given graphs under the given weights (one weight per graph).
///
/// The node set of the result is the union of the inputs' node sets; node
/// values are taken from the first graph that holds the key, so callers
/// fusing divergent values for the same key (cross-user domains) re-insert
/// their canonical nodes afterwards.
pub fn fuse<T: GraphNode>(
    graphs: &[&SimilarityGraph<T>],
    weights: &[f64],
    k: usize,
) -> SimilarityGraph<T> {
    debug_assert_eq!(graphs.len(), weights.len());
    let applied: f64 = weights.iter().filter(|w| **w > 0.0).sum();

    let mut fused: SimilarityGraph<T> = SimilarityGraph::new(k);
    for graph in graphs {
        for node in graph.nodes() {
            if !fused.contains(&node.key()) {
                fused.add_node(node.clone());
            }
        }
    }

    let keys: Vec<T::Key> = fused.keys().cloned().collect();
    for key in keys {
        let mut combined: HashMap<T::Key, f64> = HashMap::new();
        for (graph, &weight) in graphs.iter().zip(weights) {
            if weight <= 0.0 {
                continue;
            }
            if let Some(list) = graph.neighbors(&key) {
                for neighbor in list.iter() {
                    *combined.entry(neighbor.key.clone()).or_insert(0.0) +=
                        weight * neighbor.similarity;
                }
            }
        }
        for (to, sum) in combined {
            let similarity = sum / applied;
            if similarity != 0.0 {
                fused.offer_edge(&key, to, similarity);
            }
        }
    }
    fused
}
