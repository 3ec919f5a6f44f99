// beacongraph/src/store.rs
//
// Persisted per-user feature graphs. Write-once, read-many: the batch
// builder writes one file per user holding the four per-feature request
// graphs plus the k they were built with; analyze() only ever reads.
//
// Files are JSON with a sha256 over the payload so a truncated or edited
// file surfaces as Corrupt instead of deserializing into garbage. The
// format is internal to this tool — no compatibility promise.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::graph::SimilarityGraph;
use crate::model::{Request, RequestKey};
use crate::subnet;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored graphs for {entry}")]
    NotFound { entry: String },

    #[error("corrupt store entry for {entry}: {reason}")]
    Corrupt { entry: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Store-wide metadata written next to the per-user files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreIndex {
    pub k: usize,
    pub users: Vec<String>,
    pub subnets: Vec<String>,
}

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct StoredFile {
    sha256: String,
    payload: String,
}

#[derive(Serialize, Deserialize)]
struct StoredUser {
    k: usize,
    graphs: Vec<StoredGraph>,
}

#[derive(Serialize, Deserialize)]
struct StoredGraph {
    nodes: Vec<Request>,
    edges: Vec<(RequestKey, Vec<(RequestKey, f64)>)>,
}

impl StoredGraph {
    fn from_graph(graph: &SimilarityGraph<Request>) -> Self {
        let mut nodes: Vec<Request> = graph.nodes().cloned().collect();
        nodes.sort_by_key(Request::key);
        let edges = nodes
            .iter()
            .map(|node| {
                let key = node.key();
                let list = graph
                    .neighbors(&key)
                    .map(|l| {
                        l.iter()
                            .map(|n| (n.key.clone(), n.similarity))
                            .collect()
                    })
                    .unwrap_or_default();
                (key, list)
            })
            .collect();
        Self { nodes, edges }
    }

    fn into_graph(self, k: usize) -> SimilarityGraph<Request> {
        let mut graph = SimilarityGraph::new(k);
        for node in self.nodes {
            graph.add_node(node);
        }
        for (from, list) in self.edges {
            for (to, similarity) in list {
                graph.offer_edge(&from, to, similarity);
            }
        }
        graph
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

pub struct GraphStore {
    dir: PathBuf,
}

impl GraphStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn user_path(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{user}.graphs.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    pub fn user_exists(&self, user: &str) -> bool {
        self.user_path(user).exists()
    }

    /// Persist one user's fixed-order feature graphs.
    pub fn save_user(
        &self,
        user: &str,
        graphs: &[SimilarityGraph<Request>],
        k: usize,
    ) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let stored = StoredUser {
            k,
            graphs: graphs.iter().map(StoredGraph::from_graph).collect(),
        };
        let payload = serde_json::to_string(&stored).map_err(|e| StoreError::Corrupt {
            entry: user.to_string(),
            reason: e.to_string(),
        })?;
        let file = StoredFile {
            sha256: checksum(&payload),
            payload,
        };
        let wrapped = serde_json::to_string(&file).map_err(|e| StoreError::Corrupt {
            entry: user.to_string(),
            reason: e.to_string(),
        })?;
        fs::write(self.user_path(user), wrapped)?;
        info!(user, "saved feature graphs");
        Ok(())
    }

    /// Load one user's feature graphs and the k they were built with.
    pub fn load_user(
        &self,
        user: &str,
    ) -> Result<(Vec<SimilarityGraph<Request>>, usize), StoreError> {
        let path = self.user_path(user);
        if !path.exists() {
            return Err(StoreError::NotFound {
                entry: user.to_string(),
            });
        }
        let raw = fs::read_to_string(&path)?;
        let file: StoredFile = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            entry: user.to_string(),
            reason: e.to_string(),
        })?;
        if checksum(&file.payload) != file.sha256 {
            return Err(StoreError::Corrupt {
                entry: user.to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }
        let stored: StoredUser =
            serde_json::from_str(&file.payload).map_err(|e| StoreError::Corrupt {
                entry: user.to_string(),
                reason: e.to_string(),
            })?;
        let k = stored.k;
        let graphs = stored
            .graphs
            .into_iter()
            .map(|g| g.into_graph(k))
            .collect();
        Ok((graphs, k))
    }

    /// Write the store index: IP-sorted users, derived subnets, and k.
    pub fn save_index(&self, users: &[String], k: usize) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let mut users = users.to_vec();
        subnet::sort_ips(&mut users);
        let index = StoreIndex {
            k,
            subnets: subnet::all_subnets(&users),
            users,
        };
        let body = serde_json::to_string_pretty(&index).map_err(|e| StoreError::Corrupt {
            entry: "index".to_string(),
            reason: e.to_string(),
        })?;
        fs::write(self.index_path(), body)?;
        Ok(())
    }

    pub fn load_index(&self) -> Result<StoreIndex, StoreError> {
        let path = self.index_path();
        if !path.exists() {
            return Err(StoreError::NotFound {
                entry: "index".to_string(),
            });
        }
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            entry: "index".to_string(),
            reason: e.to_string(),
        })
    }
}

fn checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}
