// beacongraph/src/pipeline.rs
//
// The analyze() pipeline: load per-user feature graphs, fuse features,
// aggregate domains, build and fuse domain graphs across users, prune,
// cluster, filter, whitelist, rank.
//
// Every invocation runs inside its own Session — there is no shared state
// between analyses, and a Session is never handed to another thread. Each
// stage consumes only the previous stage's output; a fatal failure aborts
// the session naming the stage it died in, everything non-fatal lands in
// the output diagnostics.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::aggregate::{self, DomainIndex};
use crate::error::AnalysisError;
use crate::fusion;
use crate::graph::SimilarityGraph;
use crate::model::{Domain, Feature, Request};
use crate::rank::{self, Ranking, RankingWeights};
use crate::stats::{self, HistData};
use crate::store::GraphStore;
use crate::subnet;
use crate::whitelist::Whitelist;

/// Address selecting every known user.
pub const ALL_USERS: &str = "0.0.0.0";

const SIMILARITY_HIST_STEP: f64 = 0.01;
const CLUSTER_HIST_STEP: f64 = 1.0;

// ── Parameters ────────────────────────────────────────────────────────────────

/// Caller-supplied inputs of one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    /// Single user address, subnet address, or `0.0.0.0` for everyone.
    pub user: String,
    /// Weights over (time, domain, url).
    pub feature_weights: [f64; 3],
    /// Re-split of the time weight over (symmetric, ordered).
    pub feature_ordered_weights: [f64; 2],
    /// Pruning threshold — absolute similarity, or z-score when
    /// `prune_is_zscore`.
    pub prune_threshold: f64,
    /// Maximum cluster size — absolute, or z-score when `cluster_is_zscore`.
    pub max_cluster_size: f64,
    pub prune_is_zscore: bool,
    pub cluster_is_zscore: bool,
    pub whitelist_enabled: bool,
    pub whitelist_path: Option<PathBuf>,
    /// Extra whitelist domain supplied with the call.
    pub whitelist_extra: Option<String>,
    /// Domains with fewer aggregated requests are not ranked. 0 disables.
    pub min_requests: usize,
    /// Weights over (parents, children, request volume).
    pub ranking_weights: RankingWeights,
    /// Marker suffix of injected evaluation domains; None in production.
    pub apt_eval: Option<String>,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            user: ALL_USERS.to_string(),
            feature_weights: [0.5, 0.4, 0.1],
            feature_ordered_weights: [0.5, 0.5],
            prune_threshold: 0.0,
            max_cluster_size: f64::MAX,
            prune_is_zscore: false,
            cluster_is_zscore: false,
            whitelist_enabled: false,
            whitelist_path: None,
            whitelist_extra: None,
            min_requests: 0,
            ranking_weights: [0.3, 0.3, 0.4],
            apt_eval: None,
        }
    }
}

// ── Stages ────────────────────────────────────────────────────────────────────

/// Pipeline progress marker; fatal errors carry the stage they died in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Loaded,
    Fused,
    Aggregated,
    DomainGraphBuilt,
    Pruned,
    Clustered,
    Filtered,
    Whitelisted,
    Ranked,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "loaded",
            Self::Fused => "fused",
            Self::Aggregated => "aggregated",
            Self::DomainGraphBuilt => "domain-graph-built",
            Self::Pruned => "pruned",
            Self::Clustered => "clustered",
            Self::Filtered => "filtered",
            Self::Whitelisted => "whitelisted",
            Self::Ranked => "ranked",
            Self::Done => "done",
        };
        write!(f, "{name}")
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

/// Terminal artifact of one analysis. External serializers render these
/// views; nothing here reaches back into pipeline internals.
#[derive(Debug)]
pub struct Output {
    /// The analyzed user or subnet.
    pub name: String,
    /// Surviving clusters after filtering and whitelisting.
    pub filtered: Vec<SimilarityGraph<Domain>>,
    /// Stage diagnostics, one line each.
    pub stdout: String,
    pub hist_pruning: HistData,
    pub hist_cluster: HistData,
    pub ranking: Ranking,
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Per-invocation working state. Built fresh by every analyze() call and
/// dropped with it; never shared.
struct Session {
    stage: Stage,
    stdout: String,
    users: Vec<String>,
    k: usize,
    index: DomainIndex,
    feature_graphs: HashMap<String, Vec<SimilarityGraph<Request>>>,
    fused_requests: HashMap<String, SimilarityGraph<Request>>,
    user_domains: HashMap<String, HashMap<String, Domain>>,
    merged: SimilarityGraph<Domain>,
    hist_pruning: HistData,
    hist_cluster: HistData,
    clusters: Vec<SimilarityGraph<Domain>>,
    filtered: Vec<SimilarityGraph<Domain>>,
    ranking: Ranking,
}

impl Session {
    fn new() -> Self {
        Self {
            stage: Stage::Loaded,
            stdout: String::new(),
            users: Vec::new(),
            k: 0,
            index: DomainIndex::new(),
            feature_graphs: HashMap::new(),
            fused_requests: HashMap::new(),
            user_domains: HashMap::new(),
            merged: SimilarityGraph::new(1),
            hist_pruning: HistData::default(),
            hist_cluster: HistData::default(),
            clusters: Vec::new(),
            filtered: Vec::new(),
            ranking: Ranking::default(),
        }
    }

    fn note(&mut self, line: impl AsRef<str>) {
        self.stdout.push_str(line.as_ref());
        self.stdout.push('\n');
    }
}

// ── Analyzer ──────────────────────────────────────────────────────────────────

/// The analyze() entry point over a graph store. Stateless between calls;
/// run several analyses concurrently by calling it from several threads,
/// each call owns its session.
pub struct Analyzer<'a> {
    store: &'a GraphStore,
}

impl<'a> Analyzer<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    pub fn analyze(&self, params: &AnalysisParams) -> Result<Output, AnalysisError> {
        validate(params)?;

        let mut session = Session::new();
        self.load(&mut session, params)?;
        self.fuse_features(&mut session, params);
        self.aggregate(&mut session);
        self.build_domain_graphs(&mut session);
        self.prune(&mut session, params);
        self.cluster(&mut session);
        self.filter(&mut session, params);
        self.whitelist(&mut session, params);
        self.rank(&mut session, params);
        session.stage = Stage::Done;

        Ok(Output {
            name: params.user.clone(),
            filtered: std::mem::take(&mut session.filtered),
            stdout: std::mem::take(&mut session.stdout),
            hist_pruning: std::mem::take(&mut session.hist_pruning),
            hist_cluster: std::mem::take(&mut session.hist_cluster),
            ranking: std::mem::take(&mut session.ranking),
        })
    }

    /// Resolve the user selection and load every member's feature graphs.
    /// In a multi-user run a failing user is skipped with a note; a run
    /// with no loadable user aborts.
    fn load(&self, session: &mut Session, params: &AnalysisParams) -> Result<(), AnalysisError> {
        let index = self
            .store
            .load_index()
            .map_err(|source| AnalysisError::GraphLoad {
                user: params.user.clone(),
                stage: Stage::Loaded,
                source,
            })?;

        let selected: Vec<String> = if params.user == ALL_USERS {
            index.users.clone()
        } else if subnet::is_subnet(&params.user) {
            if !index.subnets.contains(&params.user) {
                return Err(AnalysisError::UnknownUser(params.user.clone()));
            }
            subnet::users_in_subnet(&params.user, &index.users)
        } else {
            if !index.users.contains(&params.user) {
                return Err(AnalysisError::UnknownUser(params.user.clone()));
            }
            vec![params.user.clone()]
        };
        if selected.is_empty() {
            return Err(AnalysisError::UnknownUser(params.user.clone()));
        }

        let multi = selected.len() > 1;
        let mut last_error = None;
        for user in &selected {
            match self.store.load_user(user) {
                Ok((graphs, k)) if graphs.len() == Feature::ALL.len() => {
                    session.k = k;
                    session.users.push(user.clone());
                    session.feature_graphs.insert(user.clone(), graphs);
                }
                Ok((graphs, _)) => {
                    let source = crate::store::StoreError::Corrupt {
                        entry: user.clone(),
                        reason: format!(
                            "expected {} feature graphs, found {}",
                            Feature::ALL.len(),
                            graphs.len()
                        ),
                    };
                    if !multi {
                        return Err(AnalysisError::GraphLoad {
                            user: user.clone(),
                            stage: Stage::Loaded,
                            source,
                        });
                    }
                    warn!("skipping user {user}: {source}");
                    session.note(format!("skipped user {user}: {source}"));
                    last_error = Some(source);
                }
                Err(source) => {
                    if !multi {
                        return Err(AnalysisError::GraphLoad {
                            user: user.clone(),
                            stage: Stage::Loaded,
                            source,
                        });
                    }
                    warn!("skipping user {user}: {source}");
                    session.note(format!("skipped user {user}: {source}"));
                    last_error = Some(source);
                }
            }
        }
        if session.users.is_empty() {
            return Err(AnalysisError::GraphLoad {
                user: params.user.clone(),
                stage: Stage::Loaded,
                source: last_error.unwrap_or(crate::store::StoreError::NotFound {
                    entry: params.user.clone(),
                }),
            });
        }

        info!(users = session.users.len(), k = session.k, "graphs loaded");
        session.note(format!("Number of users selected: {}", session.users.len()));
        session.note(format!("k-NN graph: k = {}", session.k));
        session.stage = Stage::Loaded;
        Ok(())
    }

    /// Fuse every user's four feature graphs into their behavioral request
    /// graph.
    fn fuse_features(&self, session: &mut Session, params: &AnalysisParams) {
        let weights = fusion::effective_feature_weights(
            &params.feature_weights,
            &params.feature_ordered_weights,
        );
        for (user, graphs) in std::mem::take(&mut session.feature_graphs) {
            let refs: Vec<&SimilarityGraph<Request>> = graphs.iter().collect();
            session
                .fused_requests
                .insert(user, fusion::fuse(&refs, &weights, session.k));
        }
        session.stage = Stage::Fused;
    }

    /// Group every user's requests into domain aggregates, feeding both the
    /// per-user and the cross-user index view.
    fn aggregate(&self, session: &mut Session) {
        let users = session.users.clone();
        for user in &users {
            let domains = aggregate::aggregate_requests(&session.fused_requests[user]);
            session.index.add_user(user, &domains);
            session.user_domains.insert(user.clone(), domains);
        }
        session.stage = Stage::Aggregated;
        session.note(format!(
            "Total number of domains: {}",
            session.index.total_domains()
        ));
    }

    /// Per-user domain graphs, then cross-user fusion under uniform user
    /// weights. Per-user outputs are fully built before fusion reads them.
    fn build_domain_graphs(&self, session: &mut Session) {
        let mut per_user: Vec<SimilarityGraph<Domain>> = Vec::with_capacity(session.users.len());
        for user in &session.users {
            let fused = &session.fused_requests[user];
            per_user.push(aggregate::domain_graph(
                fused,
                &session.user_domains[user],
                session.k,
            ));
        }

        let refs: Vec<&SimilarityGraph<Domain>> = per_user.iter().collect();
        let weights = fusion::uniform_weights(refs.len());
        let mut merged = fusion::fuse(&refs, &weights, session.k);

        // Node values in the fused graph came from single users; swap in
        // the cross-user aggregates so request counts cover everyone.
        for (name, domain) in session.index.all() {
            if merged.contains(name) {
                merged.add_node(domain.clone());
            }
        }
        session.merged = merged;
        session.stage = Stage::DomainGraphBuilt;
        info!(domains = session.merged.len(), "domain graph fused");
    }

    fn prune(&self, session: &mut Session, params: &AnalysisParams) {
        let similarities = session.merged.similarities();
        let (mean, variance) = stats::mean_variance(&similarities);

        let hist_values: Vec<f64> = if params.prune_is_zscore {
            similarities
                .iter()
                .map(|&v| stats::get_z(mean, variance, v))
                .collect()
        } else {
            similarities.clone()
        };
        session.hist_pruning = HistData::from_values(&hist_values, SIMILARITY_HIST_STEP);

        let threshold = if params.prune_is_zscore {
            let abs = stats::prune_threshold_from_z(mean, variance, params.prune_threshold);
            session.note("Prune threshold:".to_string());
            session.note(format!("    mean = {mean}"));
            session.note(format!("    variance = {variance}"));
            session.note(format!("    threshold = {abs}"));
            abs
        } else {
            params.prune_threshold
        };

        session.merged.prune(threshold);
        session.stage = Stage::Pruned;
        info!(threshold, edges = session.merged.edge_count(), "pruned");
    }

    fn cluster(&self, session: &mut Session) {
        if session.merged.edge_count() == 0 {
            // Not fatal: the analysis continues with zero clusters and an
            // empty ranking.
            session.note("every edge pruned: zero clusters, empty ranking");
            session.clusters = Vec::new();
        } else {
            session.clusters = session.merged.connected_components();
        }
        session.stage = Stage::Clustered;
        info!(clusters = session.clusters.len(), "clustered");
    }

    fn filter(&self, session: &mut Session, params: &AnalysisParams) {
        let sizes: Vec<f64> = session.clusters.iter().map(|c| c.len() as f64).collect();
        let (mean, variance) = stats::mean_variance(&sizes);

        let hist_values: Vec<f64> = if params.cluster_is_zscore {
            sizes
                .iter()
                .map(|&v| stats::get_z(mean, variance, v))
                .collect()
        } else {
            sizes.clone()
        };
        session.hist_cluster = HistData::from_values(&hist_values, CLUSTER_HIST_STEP);

        let max_size = if params.cluster_is_zscore {
            let abs = stats::max_cluster_size_from_z(mean, variance, params.max_cluster_size);
            session.note("Cluster size:".to_string());
            session.note(format!("    mean = {mean}"));
            session.note(format!("    variance = {variance}"));
            session.note(format!("    max cluster size = {abs}"));
            abs
        } else {
            params.max_cluster_size
        };

        session.filtered = session
            .clusters
            .iter()
            .filter(|c| c.len() as f64 <= max_size)
            .cloned()
            .collect();
        session.stage = Stage::Filtered;
        session.note(format!(
            "Clusters kept after size filtering: {} of {}",
            session.filtered.len(),
            session.clusters.len()
        ));
    }

    fn whitelist(&self, session: &mut Session, params: &AnalysisParams) {
        if params.whitelist_enabled {
            let loaded = match &params.whitelist_path {
                Some(path) => Whitelist::load(path, params.whitelist_extra.as_deref())
                    .map_err(|e| e.to_string()),
                None => Err("no whitelist path configured".to_string()),
            };
            match loaded {
                Ok(whitelist) => {
                    let removed = whitelist.apply(&mut session.filtered);
                    session.note(format!("Number of whitelisted domains: {}", removed.len()));
                    for name in &removed {
                        session.note(format!("    whitelisted: {name}"));
                    }
                }
                Err(reason) => {
                    // Non-fatal: the stage is skipped, the analysis keeps going.
                    warn!("whitelist unavailable: {reason}");
                    session.note(format!("whitelist unavailable, stage skipped: {reason}"));
                }
            }
        }
        session.stage = Stage::Whitelisted;
    }

    fn rank(&self, session: &mut Session, params: &AnalysisParams) {
        let outcome = rank::rank(&session.filtered, &params.ranking_weights, params.min_requests);
        session.note(format!("Number of domains shown: {}", outcome.ranked));
        if outcome.dropped_low_volume > 0 {
            session.note(format!(
                "Domains below min_requests ({}): {}",
                params.min_requests, outcome.dropped_low_volume
            ));
        }
        if let Some(suffix) = &params.apt_eval {
            session.note(rank::marker_summary(
                &outcome.ranking,
                suffix,
                session.index.total_domains(),
            ));
        }
        session.note("Ranking:");
        let lines: Vec<String> = outcome
            .ranking
            .walk()
            .map(|(name, score)| format!("    ({score:.2}) {name}"))
            .collect();
        for line in lines {
            session.note(line);
        }
        session.note(format!("Found {} clusters", session.filtered.len()));
        session.ranking = outcome.ranking;
        session.stage = Stage::Ranked;
    }
}

fn validate(params: &AnalysisParams) -> Result<(), AnalysisError> {
    fusion::validate_weights("feature", &params.feature_weights)?;
    fusion::validate_weights("feature_ordered", &params.feature_ordered_weights)?;
    fusion::validate_weights("ranking", &params.ranking_weights)?;
    if !params.prune_is_zscore && params.prune_threshold < 0.0 {
        return Err(AnalysisError::InvalidThreshold {
            which: "prune_threshold".to_string(),
            value: params.prune_threshold,
        });
    }
    if !params.cluster_is_zscore && params.max_cluster_size < 0.0 {
        return Err(AnalysisError::InvalidThreshold {
            which: "max_cluster_size".to_string(),
            value: params.max_cluster_size,
        });
    }
    Ok(())
}
