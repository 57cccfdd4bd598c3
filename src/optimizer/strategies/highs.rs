//! Native HiGHS backend. Unlike microlp it honours the time limit and MIP
//! gap, and reports whether a limit was hit.

use highs::{HighsModelStatus, RowProblem, Sense as HighsSense};
use tracing::debug;

use super::{BackendStatus, MilpBackend, RawSolution};
use crate::error::{HubError, HubResult};
use crate::optimizer::model::{ModelContext, Sense, VarId, VarKind};
use crate::optimizer::types::SolveBudget;

#[derive(Debug, Clone, Copy, Default)]
pub struct HighsBackend;

impl MilpBackend for HighsBackend {
    fn name(&self) -> &'static str {
        "highs"
    }

    fn solve(&self, model: &ModelContext, budget: &SolveBudget) -> HubResult<RawSolution> {
        let mut problem = RowProblem::default();
        let cols: Vec<highs::Col> = model
            .columns()
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let cost = model.objective().get(&VarId(i)).copied().unwrap_or(0.0);
                match column.kind {
                    VarKind::Binary => problem.add_integer_column(cost, 0.0..=1.0),
                    VarKind::Continuous => problem.add_column(cost, column.lower..=column.upper),
                }
            })
            .collect();

        for row in model.rows() {
            let factors: Vec<(highs::Col, f64)> =
                row.terms.iter().map(|(v, c)| (cols[v.0], *c)).collect();
            match row.sense {
                Sense::Le => problem.add_row(..=row.rhs, factors),
                Sense::Ge => problem.add_row(row.rhs.., factors),
                Sense::Eq => problem.add_row(row.rhs..=row.rhs, factors),
            }
        }

        let mut highs_model = problem.optimise(HighsSense::Minimise);
        highs_model.set_option("output_flag", budget.verbose);
        highs_model.set_option("time_limit", budget.time_limit_s);
        highs_model.set_option("mip_rel_gap", budget.mip_gap);
        if budget.threads > 0 {
            highs_model.set_option("threads", budget.threads as i32);
        }

        let solved = highs_model
            .try_solve()
            .map_err(|status| HubError::SolverFailure(format!("HiGHS returned {status:?}")))?;
        let model_status = solved.status();
        debug!(status = ?model_status, "HiGHS finished");

        let status = match model_status {
            HighsModelStatus::Optimal => BackendStatus::Optimal,
            HighsModelStatus::ReachedTimeLimit | HighsModelStatus::ReachedIterationLimit => {
                BackendStatus::LimitReached
            }
            HighsModelStatus::Infeasible => BackendStatus::Infeasible,
            HighsModelStatus::Unbounded => BackendStatus::Unbounded,
            HighsModelStatus::UnboundedOrInfeasible => BackendStatus::InfeasibleOrUnbounded,
            HighsModelStatus::ModelEmpty => return Ok(empty_solution(model)),
            other => return Err(HubError::SolverFailure(format!("HiGHS status {other:?}"))),
        };
        let values = match status {
            BackendStatus::Optimal | BackendStatus::LimitReached => {
                solved.get_solution().columns().to_vec()
            }
            _ => Vec::new(),
        };
        Ok(RawSolution { status, values })
    }
}

/// HiGHS reports no columns for an empty model; rows without terms only
/// need their right-hand side checked.
fn empty_solution(model: &ModelContext) -> RawSolution {
    let values = vec![0.0; model.num_vars()];
    if model.is_feasible(&values) {
        RawSolution {
            status: BackendStatus::Optimal,
            values,
        }
    } else {
        RawSolution::without_values(BackendStatus::Infeasible)
    }
}
