//! Error taxonomy shared by the clustering and dispatch stages.
//!
//! Every variant is terminal for the scenario being solved. Solving is
//! deterministic given its inputs, so nothing here is retried; batch callers
//! catch the error per scenario and move on.

use thiserror::Error;

pub type HubResult<T> = Result<T, HubError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum HubError {
    /// Mismatched lengths, missing catalogue entries or non-physical values,
    /// detected before any model is built.
    #[error("Data inconsistency at '{key}': {reason}")]
    DataInconsistency { key: String, reason: String },

    #[error("Clustering into {clusters} periods failed within {time_limit_s}s: {reason}")]
    ClusteringFailed {
        clusters: usize,
        time_limit_s: f64,
        reason: String,
    },

    /// The dispatch program is proven infeasible. `conflict` lists the
    /// constraint groups of an irreducible conflicting subset.
    #[error("Dispatch model is infeasible (conflicting constraint groups: {})", conflict.join(", "))]
    InfeasibleModel { conflict: Vec<String> },

    /// Modelling defect: some flow has no cost and no bound.
    #[error("Dispatch model is unbounded: {detail}")]
    UnboundedModel { detail: String },

    #[error("Solver reached its {time_limit_s}s limit without a feasible incumbent")]
    SolverTimeout { time_limit_s: f64 },

    #[error("Solver failure: {0}")]
    SolverFailure(String),
}

impl HubError {
    pub fn data(key: impl Into<String>, reason: impl Into<String>) -> Self {
        HubError::DataInconsistency {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable tag, used in logs and batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::DataInconsistency { .. } => "DataInconsistency",
            HubError::ClusteringFailed { .. } => "ClusteringFailed",
            HubError::InfeasibleModel { .. } => "InfeasibleModel",
            HubError::UnboundedModel { .. } => "UnboundedModel",
            HubError::SolverTimeout { .. } => "SolverTimeout",
            HubError::SolverFailure(_) => "SolverFailure",
        }
    }
}
