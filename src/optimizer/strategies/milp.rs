//! MILP backend on `good_lp` with the pure-Rust microlp solver.
//!
//! microlp has no time limit or gap parameter: it always runs to proven
//! optimality, so the budget is only logged. Keep models small (clustered
//! periods) when using it.

use good_lp::solvers::microlp::microlp;
use good_lp::{constraint, variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable};
use tracing::debug;

use super::{BackendStatus, MilpBackend, RawSolution};
use crate::error::{HubError, HubResult};
use crate::optimizer::model::{ModelContext, Sense, VarId, VarKind};
use crate::optimizer::types::SolveBudget;

#[derive(Debug, Clone, Copy, Default)]
pub struct MicroLpBackend;

fn linear(terms: impl IntoIterator<Item = (VarId, f64)>, vars: &[Variable]) -> Expression {
    terms
        .into_iter()
        .map(|(v, c)| c * vars[v.0])
        .sum::<Expression>()
}

impl MilpBackend for MicroLpBackend {
    fn name(&self) -> &'static str {
        "microlp"
    }

    fn solve(&self, model: &ModelContext, budget: &SolveBudget) -> HubResult<RawSolution> {
        debug!(
            time_limit_s = budget.time_limit_s,
            mip_gap = budget.mip_gap,
            "microlp ignores time and gap limits"
        );

        let mut problem = ProblemVariables::new();
        let vars: Vec<Variable> = model
            .columns()
            .iter()
            .map(|column| {
                let mut definition = variable();
                match column.kind {
                    VarKind::Binary => definition = definition.binary(),
                    VarKind::Continuous => {
                        if column.lower.is_finite() {
                            definition = definition.min(column.lower);
                        }
                        if column.upper.is_finite() {
                            definition = definition.max(column.upper);
                        }
                    }
                }
                problem.add(definition)
            })
            .collect();

        let objective = linear(model.objective().iter().map(|(v, c)| (*v, *c)), &vars);
        let mut solver_model = problem.minimise(objective).using(microlp);

        for row in model.rows() {
            let lhs = linear(row.terms.iter().copied(), &vars);
            let c = match row.sense {
                Sense::Le => constraint::leq(lhs, row.rhs),
                Sense::Ge => constraint::geq(lhs, row.rhs),
                Sense::Eq => constraint::eq(lhs, row.rhs),
            };
            solver_model.add_constraint(c);
        }

        match solver_model.solve() {
            Ok(solution) => Ok(RawSolution {
                status: BackendStatus::Optimal,
                values: vars.iter().map(|v| solution.value(*v)).collect(),
            }),
            Err(ResolutionError::Infeasible) => Ok(RawSolution::without_values(BackendStatus::Infeasible)),
            Err(ResolutionError::Unbounded) => Ok(RawSolution::without_values(BackendStatus::Unbounded)),
            Err(other) => Err(HubError::SolverFailure(format!("microlp: {other}"))),
        }
    }
}
