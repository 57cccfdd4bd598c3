//! Solver backends
//!
//! A backend receives a finished [`ModelContext`] and returns raw primal
//! values with a coarse status. Classifying the outcome into accepted
//! results and errors is the dispatcher's job, so backends stay thin:
//! - microlp: pure-Rust branch-and-bound through `good_lp`, always available
//! - HiGHS: native solver with time limit and gap control (`highs` feature)

pub mod milp;
#[cfg(feature = "highs")]
pub mod highs;

pub use milp::*;
#[cfg(feature = "highs")]
pub use self::highs::*;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::model::ModelContext;
use super::types::SolveBudget;
use crate::error::{HubError, HubResult};

/// Termination status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Optimal,
    /// Time or gap budget exhausted; `values` may hold an incumbent.
    LimitReached,
    Infeasible,
    Unbounded,
    InfeasibleOrUnbounded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSolution {
    pub status: BackendStatus,
    /// One value per model column, empty when the backend has none.
    pub values: Vec<f64>,
}

impl RawSolution {
    pub fn without_values(status: BackendStatus) -> Self {
        Self {
            status,
            values: Vec::new(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait MilpBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Solve the model once. Library or load failures come back as
    /// `HubError::SolverFailure`; every other outcome is a status.
    fn solve(&self, model: &ModelContext, budget: &SolveBudget) -> HubResult<RawSolution>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SolverType {
    #[default]
    Microlp,
    Highs,
}

impl SolverType {
    pub fn backend(self) -> HubResult<Box<dyn MilpBackend>> {
        match self {
            SolverType::Microlp => Ok(Box::new(MicroLpBackend)),
            #[cfg(feature = "highs")]
            SolverType::Highs => Ok(Box::new(HighsBackend)),
            #[cfg(not(feature = "highs"))]
            SolverType::Highs => Err(HubError::SolverFailure(
                "HiGHS backend requested but the crate was built without the 'highs' feature"
                    .to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_solver_type_names() {
        assert_eq!(SolverType::from_str("microlp").unwrap(), SolverType::Microlp);
        assert_eq!(SolverType::Highs.to_string(), "highs");
        assert_eq!(SolverType::Microlp.backend().unwrap().name(), "microlp");
    }

    #[cfg(not(feature = "highs"))]
    #[test]
    fn test_highs_unavailable_without_feature() {
        assert!(matches!(
            SolverType::Highs.backend(),
            Err(HubError::SolverFailure(_))
        ));
    }
}
