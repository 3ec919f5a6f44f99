// beacongraph/src/batch.rs
//
// Batch graph production: parse a complete historical log, split it per
// user, build the four per-feature k-NN request graphs for each user, and
// persist them to the graph store analyze() later reads from.

use std::collections::HashMap;

use tracing::info;

use crate::graph::knn;
use crate::graph::SimilarityGraph;
use crate::logparse;
use crate::model::{Feature, Request};
use crate::similarity::{
    DomainSimilarity, OrderedTimeSimilarity, Similarity, TimeSimilarity, UrlSimilarity,
};
use crate::store::{GraphStore, StoreError};

/// Build one user's feature graphs in the fixed store order.
pub fn feature_graphs(requests: &[Request], k: usize) -> Vec<SimilarityGraph<Request>> {
    Feature::ALL
        .iter()
        .map(|feature| {
            let sim: &dyn Similarity<Request> = match feature {
                Feature::Time => &TimeSimilarity,
                Feature::OrderedTime => &OrderedTimeSimilarity,
                Feature::Domain => &DomainSimilarity,
                Feature::Url => &UrlSimilarity,
            };
            knn::build_graph(requests, k, sim)
        })
        .collect()
}

/// Build and persist the graphs of every user in the log. Users whose
/// file already exists are skipped unless `overwrite`; all users land in
/// the index either way. Returns the user list.
pub fn build_store(
    store: &GraphStore,
    requests: Vec<Request>,
    k: usize,
    overwrite: bool,
) -> Result<Vec<String>, StoreError> {
    let by_user: HashMap<String, Vec<Request>> = logparse::group_by_user(requests);

    let mut users: Vec<String> = Vec::with_capacity(by_user.len());
    for (user, requests) in by_user {
        if overwrite || !store.user_exists(&user) {
            info!(user = %user, requests = requests.len(), "building feature graphs");
            let graphs = feature_graphs(&requests, k);
            store.save_user(&user, &graphs, k)?;
        } else {
            info!(user = %user, "graphs already on disk, skipped");
        }
        users.push(user);
    }
    store.save_index(&users, k)?;
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::request;

    fn two_user_requests() -> Vec<Request> {
        let mut requests = Vec::new();
        for i in 0..30 {
            requests.push(request(
                1_000_000 + i * 1_000,
                "10.0.0.1",
                &format!("http://a{}.be/{i}", i % 3),
                &format!("a{}.be", i % 3),
            ));
            requests.push(request(
                1_000_500 + i * 1_000,
                "10.0.0.2",
                &format!("http://b{}.be/{i}", i % 4),
                &format!("b{}.be", i % 4),
            ));
        }
        requests
    }

    #[test]
    fn build_store_persists_every_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::new(dir.path());
        let users = build_store(&store, two_user_requests(), 5, false).unwrap();
        assert_eq!(users.len(), 2);

        let index = store.load_index().unwrap();
        assert_eq!(index.users, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(index.k, 5);

        let (graphs, k) = store.load_user("10.0.0.1").unwrap();
        assert_eq!(k, 5);
        assert_eq!(graphs.len(), Feature::ALL.len());
        for graph in &graphs {
            assert_eq!(graph.len(), 30);
            for key in graph.keys() {
                assert!(graph.neighbors(key).unwrap().len() <= 5);
            }
        }
    }

    #[test]
    fn existing_users_are_skipped_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::new(dir.path());
        build_store(&store, two_user_requests(), 5, false).unwrap();
        let before = std::fs::metadata(dir.path().join("10.0.0.1.graphs.json"))
            .unwrap()
            .modified()
            .unwrap();

        // Second run must not rewrite the existing artifact.
        build_store(&store, two_user_requests(), 5, false).unwrap();
        let after = std::fs::metadata(dir.path().join("10.0.0.1.graphs.json"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(before, after);
    }
}
