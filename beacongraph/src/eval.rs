// beacongraph/src/eval.rs
//
// ROC export for evaluation runs against injected marker domains. Walks
// the ranking in its ascending order — the same order external consumers
// see — accumulating detection and false-alarm rates.

use std::io::Write;

use crate::rank::Ranking;

/// (false-positive rate, true-positive rate) points along the ascending
/// ranking walk. Positives are the domains carrying the marker suffix.
pub fn roc_points(ranking: &Ranking, marker_suffix: &str) -> Vec<(f64, f64)> {
    let total_pos = ranking
        .walk()
        .filter(|(name, _)| name.ends_with(marker_suffix))
        .count();
    let total_neg = ranking.len() - total_pos;

    let mut points = Vec::with_capacity(ranking.len());
    let mut pos = 0usize;
    let mut neg = 0usize;
    for (name, _) in ranking.walk() {
        if name.ends_with(marker_suffix) {
            pos += 1;
        } else {
            neg += 1;
        }
        points.push((
            neg as f64 / total_neg.max(1) as f64,
            pos as f64 / total_pos.max(1) as f64,
        ));
    }
    points
}

/// Trapezoidal area under the curve, anchored at (0,0).
pub fn auc(points: &[(f64, f64)]) -> f64 {
    let mut area = 0.0;
    let mut prev = (0.0, 0.0);
    for &(x, y) in points {
        area += (x - prev.0) * (y + prev.1) / 2.0;
        prev = (x, y);
    }
    area
}

/// One `fpr,tpr` row per ranked domain.
pub fn export_csv<W: Write>(points: &[(f64, f64)], mut out: W) -> std::io::Result<()> {
    for (fpr, tpr) in points {
        writeln!(out, "{fpr},{tpr}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SimilarityGraph;
    use crate::model::testutil::request;
    use crate::model::Domain;
    use crate::rank;

    fn ranking_of(domains: &[(&str, usize)]) -> Ranking {
        let mut graph: SimilarityGraph<Domain> = SimilarityGraph::new(10);
        for (name, volume) in domains {
            let mut dom = Domain::new(*name);
            for i in 0..*volume {
                dom.insert(request(
                    i as i64,
                    "10.0.0.1",
                    &format!("http://{name}/{i}"),
                    name,
                ));
            }
            graph.add_node(dom);
        }
        rank::rank(&[graph], &[0.0, 0.0, 1.0], 0).ranking
    }

    #[test]
    fn points_walk_the_ascending_ranking() {
        // Marker domain has the lowest volume, so it is seen first.
        let ranking = ranking_of(&[("x.apt", 1), ("a.be", 5), ("b.be", 9)]);
        let points = roc_points(&ranking, ".apt");
        assert_eq!(points, vec![(0.0, 1.0), (0.5, 1.0), (1.0, 1.0)]);
        assert!((auc(&points) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn late_marker_scores_poorly() {
        let ranking = ranking_of(&[("a.be", 1), ("b.be", 5), ("x.apt", 9)]);
        let points = roc_points(&ranking, ".apt");
        assert_eq!(points.last().unwrap(), &(1.0, 1.0));
        assert!(auc(&points) < 0.2);
    }

    #[test]
    fn csv_rows_match_points() {
        let ranking = ranking_of(&[("x.apt", 1), ("a.be", 5)]);
        let mut out = Vec::new();
        export_csv(&roc_points(&ranking, ".apt"), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(text.lines().next().unwrap(), "0,1");
    }
}
