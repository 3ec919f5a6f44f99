// beacongraph/src/lib.rs
//
// beacongraph — APT command-and-control domain detection over proxy logs.
//
// The pipeline builds approximate k-NN similarity graphs over requests,
// fuses them across behavioral features, aggregates requests into domain
// nodes, fuses domain graphs across users, prunes statistically, clusters
// by connectivity, filters and whitelists, and ranks what survives.
// External surfaces (CLI, serializers) consume the read-only views in
// `pipeline::Output`.

pub mod aggregate;
pub mod batch;
pub mod error;
pub mod eval;
pub mod fusion;
pub mod graph;
pub mod inject;
pub mod logparse;
pub mod model;
pub mod pipeline;
pub mod rank;
pub mod similarity;
pub mod stats;
pub mod store;
pub mod subnet;
pub mod whitelist;

pub use error::AnalysisError;
pub use graph::{NeighborList, SimilarityGraph};
pub use model::{Domain, Feature, Request, RequestKey};
pub use pipeline::{AnalysisParams, Analyzer, Output, Stage, ALL_USERS};
pub use rank::Ranking;
pub use store::GraphStore;
