// beacongraph/src/similarity.rs
//
// Pairwise request similarity metrics. Each metric returns a value in
// [0, 1]; the graph builder and fusion stages only ever see the trait.

use crate::model::Request;

/// Pairwise similarity capability used by the k-NN builders.
///
/// Implementations must be safe to call from the builder's worker threads.
pub trait Similarity<T>: Send + Sync {
    fn similarity(&self, a: &T, b: &T) -> f64;
}

/// Symmetric time proximity: `1 / (1 + |Δt|)` over second-resolution
/// timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSimilarity;

impl Similarity<Request> for TimeSimilarity {
    fn similarity(&self, a: &Request, b: &Request) -> f64 {
        let sec_a = (a.time as f64 / 1000.0).round() as i64;
        let sec_b = (b.time as f64 / 1000.0).round() as i64;
        1.0 / (1.0 + (sec_a - sec_b).abs() as f64)
    }
}

/// Ordered time proximity: nonzero only when `a` follows `b`. Asymmetric;
/// biases neighbor lists toward requests that causally follow a reference
/// request (candidate children in a request sequence).
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedTimeSimilarity;

impl Similarity<Request> for OrderedTimeSimilarity {
    fn similarity(&self, a: &Request, b: &Request) -> f64 {
        if a.time > b.time {
            1.0 / (1.0 + (a.time - b.time) as f64)
        } else {
            0.0
        }
    }
}

/// Shared-suffix domain similarity.
///
/// Both names are split on `.`; matching trailing labels are counted from
/// one label before the TLD, stopping at the first mismatch, and normalized
/// by the longer label count minus one. Identical names score 1.0; nothing
/// shared past the TLD scores 0.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainSimilarity;

impl Similarity<Request> for DomainSimilarity {
    fn similarity(&self, a: &Request, b: &Request) -> f64 {
        let labels_a: Vec<&str> = a.domain.split('.').collect();
        let labels_b: Vec<&str> = b.domain.split('.').collect();
        let longest = labels_a.len().max(labels_b.len());

        if labels_a.len() > 1
            && labels_b.len() > 1
            && labels_a.last() == labels_b.last()
        {
            let mut matched = 0usize;
            for i in 1..labels_a.len().min(labels_b.len()) {
                if labels_a[labels_a.len() - i - 1] == labels_b[labels_b.len() - i - 1] {
                    matched += 1;
                } else {
                    break;
                }
            }
            matched as f64 / (longest - 1) as f64
        } else if a.domain == b.domain {
            // Single-label names compare whole.
            1.0 / longest as f64
        } else {
            0.0
        }
    }
}

/// URL distinctness indicator: 0 for the same URL, 1 otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlSimilarity;

impl Similarity<Request> for UrlSimilarity {
    fn similarity(&self, a: &Request, b: &Request) -> f64 {
        if a.url == b.url {
            0.0
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::request;

    fn with_domain(domain: &str) -> Request {
        request(
            1_486_934_544,
            "127.0.0.2",
            &format!("http://{domain}/"),
            domain,
        )
    }

    #[test]
    fn time_similarity_decays_with_distance() {
        let sim = TimeSimilarity;
        let a = request(1_000_000, "u", "http://a.be/", "a.be");
        let b = request(1_000_000, "u", "http://b.be/", "b.be");
        let c = request(2_000_000, "u", "http://c.be/", "c.be");
        assert_eq!(sim.similarity(&a, &b), 1.0);
        // 1000 seconds apart.
        assert!((sim.similarity(&a, &c) - 1.0 / 1001.0).abs() < 1e-12);
        // Symmetric.
        assert_eq!(sim.similarity(&a, &c), sim.similarity(&c, &a));
    }

    #[test]
    fn ordered_time_similarity_is_asymmetric() {
        let sim = OrderedTimeSimilarity;
        let earlier = request(1_000, "u", "http://a.be/", "a.be");
        let later = request(1_010, "u", "http://b.be/", "b.be");
        assert_eq!(sim.similarity(&later, &earlier), 1.0 / 11.0);
        assert_eq!(sim.similarity(&earlier, &later), 0.0);
        assert_eq!(sim.similarity(&earlier, &earlier), 0.0);
    }

    #[test]
    fn domain_similarity_reference_values() {
        let sim = DomainSimilarity;
        let a_be = with_domain("a.be");
        let b_a_be = with_domain("b.a.be");
        let i_be = with_domain("i.be");
        let c_b_a_be = with_domain("c.b.a.be");
        let c_b_d_be = with_domain("c.b.d.be");
        let e_b_d_be = with_domain("e.b.d.be");

        assert_eq!(sim.similarity(&a_be, &a_be), 1.0);
        assert_eq!(sim.similarity(&a_be, &b_a_be), 1.0 / 2.0);
        assert_eq!(sim.similarity(&a_be, &i_be), 0.0);
        assert_eq!(sim.similarity(&a_be, &c_b_a_be), 1.0 / 3.0);
        assert_eq!(sim.similarity(&a_be, &c_b_d_be), 0.0);
        assert_eq!(sim.similarity(&c_b_d_be, &e_b_d_be), 2.0 / 3.0);
        assert_eq!(sim.similarity(&e_b_d_be, &e_b_d_be), 1.0);
    }

    #[test]
    fn domain_similarity_single_label_names() {
        let sim = DomainSimilarity;
        let bare = with_domain("domain");
        let other = with_domain("other");
        assert_eq!(sim.similarity(&bare, &bare.clone()), 1.0);
        assert_eq!(sim.similarity(&bare, &other), 0.0);
    }

    #[test]
    fn url_similarity_flags_distinct_urls() {
        let sim = UrlSimilarity;
        let a = request(1, "u", "http://a.be/x", "a.be");
        let b = request(2, "u", "http://a.be/x", "a.be");
        let c = request(1, "u", "http://a.be/y", "a.be");
        assert_eq!(sim.similarity(&a, &b), 0.0);
        assert_eq!(sim.similarity(&a, &c), 1.0);
    }
}
