//! Dispatch optimizer: build, solve once, classify.

use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;
use strum_macros::Display;
use tracing::{info, warn};

use super::builder::{EnergyBalanceModelBuilder, ModelLayout};
use super::diagnose::diagnose;
use super::model::ModelContext;
use super::strategies::{BackendStatus, MilpBackend};
use super::types::DispatchSettings;
use crate::domain::{Catalogue, District, Market, PeriodData};
use crate::error::{HubError, HubResult};

/// Quality of an accepted solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SolutionStatus {
    Optimal,
    /// Feasible incumbent found before the time or gap limit
    Feasible,
}

/// Primal solution of one dispatch model, rounded and ready for aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolvedModel {
    pub layout: ModelLayout,
    pub values: Vec<f64>,
    /// Objective of the unrounded solution
    pub objective_value: f64,
    pub status: SolutionStatus,
    pub backend: &'static str,
    pub elapsed_ms: u64,
}

/// Round to `decimals` places, mapping `-0.0` to `0.0`.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    let rounded = (value * scale).round() / scale;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

pub struct DispatchOptimizer {
    backend: Box<dyn MilpBackend>,
    settings: DispatchSettings,
}

impl DispatchOptimizer {
    pub fn new(backend: Box<dyn MilpBackend>, settings: DispatchSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Build one model over `periods` and solve it.
    pub fn optimize(
        &self,
        catalogue: &Catalogue,
        district: &District,
        market: &Market,
        periods: &[PeriodData],
    ) -> HubResult<SolvedModel> {
        let builder = EnergyBalanceModelBuilder::new(catalogue, district, market, &self.settings);
        let (model, layout) = builder.build(periods)?;
        self.solve(&model, layout)
    }

    pub fn solve(&self, model: &ModelContext, layout: ModelLayout) -> HubResult<SolvedModel> {
        if model.num_vars() == 0 {
            return self.solve_empty(model, layout);
        }
        let budget = &self.settings.budget;
        let started = Instant::now();
        let raw = self.backend.solve(model, budget)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            backend = self.backend.name(),
            status = ?raw.status,
            elapsed_ms,
            variables = model.num_vars(),
            rows = model.num_rows(),
            "Dispatch solve finished"
        );

        let status = match raw.status {
            BackendStatus::Optimal => SolutionStatus::Optimal,
            BackendStatus::LimitReached if !raw.values.is_empty() && model.is_feasible(&raw.values) => {
                warn!(
                    time_limit_s = budget.time_limit_s,
                    mip_gap = budget.mip_gap,
                    "Accepting feasible incumbent at solver limit"
                );
                SolutionStatus::Feasible
            }
            BackendStatus::LimitReached => {
                return Err(HubError::SolverTimeout {
                    time_limit_s: budget.time_limit_s,
                })
            }
            BackendStatus::Infeasible => return Err(self.infeasible(model)?),
            BackendStatus::Unbounded => return Err(self.unbounded()),
            BackendStatus::InfeasibleOrUnbounded => {
                // Without an objective the model cannot be unbounded.
                let relaxed = model.feasibility_subproblem(&Default::default());
                let status = self.backend.solve(&relaxed, budget)?.status;
                return Err(match status {
                    BackendStatus::Infeasible | BackendStatus::InfeasibleOrUnbounded => self.infeasible(model)?,
                    _ => self.unbounded(),
                });
            }
        };

        if raw.values.len() != model.num_vars() {
            return Err(HubError::SolverFailure(format!(
                "{} returned {} values for {} variables",
                self.backend.name(),
                raw.values.len(),
                model.num_vars()
            )));
        }
        let objective_value = model.objective_value(&raw.values);
        let decimals = self.settings.solution_decimals;
        let values = raw.values.iter().map(|v| round_to(*v, decimals)).collect();

        Ok(SolvedModel {
            layout,
            values,
            objective_value,
            status,
            backend: self.backend.name(),
            elapsed_ms,
        })
    }

    /// A district with nothing to dispatch has no variables. Its rows are
    /// constant and are checked directly instead of going through the backend.
    fn solve_empty(&self, model: &ModelContext, layout: ModelLayout) -> HubResult<SolvedModel> {
        if !model.is_feasible(&[]) {
            let conflict: BTreeSet<String> = model
                .rows()
                .iter()
                .filter(|row| row.violation(&[]) > 0.0)
                .map(|row| row.group.clone())
                .collect();
            return Err(HubError::InfeasibleModel {
                conflict: conflict.into_iter().collect(),
            });
        }
        info!(rows = model.num_rows(), "Dispatch model has no variables");
        Ok(SolvedModel {
            layout,
            values: Vec::new(),
            objective_value: model.objective_value(&[]),
            status: SolutionStatus::Optimal,
            backend: self.backend.name(),
            elapsed_ms: 0,
        })
    }

    fn infeasible(&self, model: &ModelContext) -> HubResult<HubError> {
        let conflict = if self.settings.diagnose_infeasibility {
            diagnose(
                model,
                self.backend.as_ref(),
                &self.settings.budget,
                self.settings.diagnosis_max_groups,
            )?
            .conflict
        } else {
            Vec::new()
        };
        Ok(HubError::InfeasibleModel { conflict })
    }

    fn unbounded(&self) -> HubError {
        HubError::UnboundedModel {
            detail: format!(
                "{} reports an unbounded objective; a priced flow lacks an upper bound",
                self.backend.name()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::model::{Sense, VarId, VarKind};
    use crate::optimizer::strategies::{MicroLpBackend, MockMilpBackend, RawSolution};
    use rstest::rstest;

    fn empty_layout() -> ModelLayout {
        ModelLayout {
            capacities: Vec::new(),
            periods: Vec::new(),
            horizon_share: 0.0,
        }
    }

    /// x + y = 10, x ≤ 6
    fn model() -> ModelContext {
        let mut ctx = ModelContext::new();
        let x = ctx.add_var("x", 0.0, f64::INFINITY, VarKind::Continuous);
        let y = ctx.add_var("y", 0.0, f64::INFINITY, VarKind::Continuous);
        ctx.add_objective_term(x, 1.0);
        ctx.add_objective_term(y, 2.0);
        ctx.constrain("sum", "sum", vec![(x, 1.0), (y, 1.0)], Sense::Eq, 10.0);
        ctx.constrain("cap", "cap", vec![(x, 1.0)], Sense::Le, 6.0);
        ctx
    }

    fn optimizer(status: BackendStatus, values: Vec<f64>) -> DispatchOptimizer {
        let mut backend = MockMilpBackend::new();
        backend.expect_name().return_const("mock");
        backend
            .expect_solve()
            .returning(move |_, _| Ok(RawSolution { status, values: values.clone() }));
        DispatchOptimizer::new(
            Box::new(backend),
            DispatchSettings {
                diagnose_infeasibility: false,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 3), 1.235);
        assert_eq!(round_to(-1e-9, 3).to_bits(), 0.0f64.to_bits());
        assert_eq!(round_to(2.5, 0), 3.0);
    }

    #[test]
    fn test_optimal_values_are_rounded() {
        let solved = optimizer(BackendStatus::Optimal, vec![6.00004, 3.99996])
            .solve(&model(), empty_layout())
            .unwrap();
        assert_eq!(solved.status, SolutionStatus::Optimal);
        assert_eq!(solved.values, vec![6.0, 4.0]);
        assert!((solved.objective_value - 13.99996).abs() < 1e-9);
        assert_eq!(solved.backend, "mock");
    }

    #[test]
    fn test_feasible_incumbent_at_limit_is_accepted() {
        let solved = optimizer(BackendStatus::LimitReached, vec![2.0, 8.0])
            .solve(&model(), empty_layout())
            .unwrap();
        assert_eq!(solved.status, SolutionStatus::Feasible);
    }

    #[rstest]
    #[case(Vec::new())]
    #[case(vec![8.0, 2.0])]
    fn test_limit_without_feasible_incumbent_times_out(#[case] values: Vec<f64>) {
        let err = optimizer(BackendStatus::LimitReached, values)
            .solve(&model(), empty_layout())
            .unwrap_err();
        assert_eq!(err, HubError::SolverTimeout { time_limit_s: 60.0 });
    }

    #[test]
    fn test_unbounded_and_infeasible() {
        let err = optimizer(BackendStatus::Unbounded, Vec::new())
            .solve(&model(), empty_layout())
            .unwrap_err();
        assert_eq!(err.kind(), "UnboundedModel");

        let err = optimizer(BackendStatus::Infeasible, Vec::new())
            .solve(&model(), empty_layout())
            .unwrap_err();
        assert_eq!(err, HubError::InfeasibleModel { conflict: Vec::new() });
    }

    #[test]
    fn test_wrong_value_count_is_a_failure() {
        let err = optimizer(BackendStatus::Optimal, vec![1.0])
            .solve(&model(), empty_layout())
            .unwrap_err();
        assert_eq!(err.kind(), "SolverFailure");
    }

    #[test]
    fn test_empty_model_skips_the_backend() {
        let mut backend = MockMilpBackend::new();
        backend.expect_name().return_const("mock");
        backend.expect_solve().times(0);
        let optimizer = DispatchOptimizer::new(Box::new(backend), DispatchSettings::default());

        let solved = optimizer.solve(&ModelContext::new(), empty_layout()).unwrap();
        assert_eq!(solved.status, SolutionStatus::Optimal);
        assert!(solved.values.is_empty());
        assert_eq!(solved.objective_value, 0.0);

        let mut ctx = ModelContext::new();
        ctx.constrain("floor", "floor", Vec::new(), Sense::Ge, 1.0);
        let err = optimizer.solve(&ctx, empty_layout()).unwrap_err();
        assert_eq!(
            err,
            HubError::InfeasibleModel {
                conflict: vec!["floor".to_string()]
            }
        );
    }

    #[test]
    fn test_infeasible_model_is_diagnosed() {
        let mut ctx = model();
        ctx.constrain("floor", "floor", vec![(VarId(0), 1.0)], Sense::Ge, 7.0);
        let optimizer = DispatchOptimizer::new(Box::new(MicroLpBackend), DispatchSettings::default());
        let err = optimizer.solve(&ctx, empty_layout()).unwrap_err();
        assert_eq!(
            err,
            HubError::InfeasibleModel {
                conflict: vec!["cap".to_string(), "floor".to_string()]
            }
        );
    }
}
