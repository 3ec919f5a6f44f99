// beacongraph/src/error.rs
//
// Typed failures surfaced by `analyze()`. Non-fatal conditions (an empty
// graph after pruning, an unreadable whitelist) are not errors — they land
// in the output diagnostics and the pipeline carries on.

use thiserror::Error;

use crate::pipeline::Stage;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// No usable per-user graphs. In a multi-user run individual load
    /// failures are skipped with a diagnostic; this fires when the request
    /// cannot proceed at all.
    #[error("stage {stage}: failed to load graphs for user {user}: {source}")]
    GraphLoad {
        user: String,
        stage: Stage,
        source: StoreError,
    },

    /// A weight vector is missing, negative, or sums to zero. Fatal,
    /// surfaced before any computation.
    #[error("invalid {which} weights: {reason}")]
    InvalidWeights { which: String, reason: String },

    /// An absolute threshold parameter is negative. z-score thresholds may
    /// be negative; absolute ones never are.
    #[error("invalid {which}: {value}")]
    InvalidThreshold { which: String, value: f64 },

    /// The requested user or subnet is not in the store index.
    #[error("unknown user or subnet: {0}")]
    UnknownUser(String),
}

impl AnalysisError {
    /// The pipeline stage the session aborted in.
    pub fn stage(&self) -> Stage {
        match self {
            Self::GraphLoad { stage, .. } => *stage,
            Self::InvalidWeights { .. }
            | Self::InvalidThreshold { .. }
            | Self::UnknownUser(_) => Stage::Loaded,
        }
    }
}
