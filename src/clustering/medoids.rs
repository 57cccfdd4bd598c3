//! k-medoids selection as a mixed-integer program.
//!
//! ```text
//! min  Σ_ij d_ij · x_ij
//! s.t. Σ_j x_ij = 1          every period assigned once
//!      Σ_j y_j  = k          exactly k medoids
//!      x_ij ≤ y_j            assign only to open medoids
//!      x_jj ≥ y_j            a medoid represents itself
//! ```
//! `y` is binary. For fixed `y` the assignment is a transportation problem
//! with an integral optimum, so `x` is kept continuous and rounded by argmax.

use ndarray::Array2;
use tracing::warn;

use crate::error::{HubError, HubResult};
use crate::optimizer::model::{Block, ModelContext, Sense, VarKind};
use crate::optimizer::strategies::{BackendStatus, MilpBackend};
use crate::optimizer::types::SolveBudget;

#[derive(Debug, Clone, PartialEq)]
pub struct MedoidSelection {
    /// Chosen periods, ascending
    pub medoids: Vec<usize>,
    /// Medoid period each period is assigned to
    pub assigned_medoid: Vec<usize>,
    pub objective: f64,
}

struct MedoidModel {
    ctx: ModelContext,
    open: Block,
    assign: Vec<Block>,
}

fn build(distances: &Array2<f64>, k: usize) -> MedoidModel {
    let n = distances.nrows();
    let mut ctx = ModelContext::new();
    let open = ctx.add_block("medoid", n, 0.0, 1.0, VarKind::Binary);
    let assign: Vec<Block> = (0..n)
        .map(|i| ctx.add_block(&format!("assign[{i}]"), n, 0.0, 1.0, VarKind::Continuous))
        .collect();

    for (i, row) in assign.iter().enumerate() {
        for j in 0..n {
            ctx.add_objective_term(row.at(j), distances[[i, j]]);
        }
        ctx.constrain(
            "assign_once",
            format!("assign_once[{i}]"),
            row.iter().map(|v| (v, 1.0)).collect(),
            Sense::Eq,
            1.0,
        );
    }
    ctx.constrain(
        "medoid_count",
        "medoid_count",
        open.iter().map(|v| (v, 1.0)).collect(),
        Sense::Eq,
        k as f64,
    );
    for (i, row) in assign.iter().enumerate() {
        for j in 0..n {
            let sense = if i == j { Sense::Ge } else { Sense::Le };
            ctx.constrain(
                "open_medoid",
                format!("open_medoid[{i},{j}]"),
                vec![(row.at(j), 1.0), (open.at(j), -1.0)],
                sense,
                0.0,
            );
        }
    }
    MedoidModel { ctx, open, assign }
}

/// Choose `k` medoids minimising the total assignment distance.
pub fn select_medoids(
    distances: &Array2<f64>,
    k: usize,
    backend: &dyn MilpBackend,
    budget: &SolveBudget,
) -> HubResult<MedoidSelection> {
    let n = distances.nrows();
    let failed = |reason: String| HubError::ClusteringFailed {
        clusters: k,
        time_limit_s: budget.time_limit_s,
        reason,
    };

    if k == n {
        return Ok(MedoidSelection {
            medoids: (0..n).collect(),
            assigned_medoid: (0..n).collect(),
            objective: 0.0,
        });
    }

    let model = build(distances, k);
    let raw = backend
        .solve(&model.ctx, budget)
        .map_err(|e| failed(e.to_string()))?;

    match raw.status {
        BackendStatus::Optimal => {}
        BackendStatus::LimitReached if model.ctx.is_feasible(&raw.values) => {
            warn!(k, "Medoid selection hit its budget, using the incumbent");
        }
        BackendStatus::LimitReached => return Err(failed("no incumbent within the time limit".into())),
        other => return Err(failed(format!("medoid program reported {other:?}"))),
    }
    if raw.values.len() != model.ctx.num_vars() {
        return Err(failed(format!(
            "backend returned {} values for {} variables",
            raw.values.len(),
            model.ctx.num_vars()
        )));
    }

    let values = &raw.values;
    let medoids: Vec<usize> = (0..n).filter(|j| values[model.open.at(*j).0] > 0.5).collect();
    if medoids.len() != k {
        return Err(failed(format!("solution opened {} medoids", medoids.len())));
    }

    let assigned_medoid = model
        .assign
        .iter()
        .enumerate()
        .map(|(i, row)| {
            if medoids.contains(&i) {
                return i;
            }
            medoids
                .iter()
                .copied()
                .max_by(|a, b| {
                    let (xa, xb) = (values[row.at(*a).0], values[row.at(*b).0]);
                    xa.total_cmp(&xb)
                        .then_with(|| distances[[i, *b]].total_cmp(&distances[[i, *a]]))
                })
                .unwrap_or(i)
        })
        .collect();

    Ok(MedoidSelection {
        medoids,
        assigned_medoid,
        objective: model.ctx.objective_value(values),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::strategies::{MicroLpBackend, MockMilpBackend, RawSolution};
    use ndarray::array;

    fn line_distances(points: &[f64]) -> Array2<f64> {
        Array2::from_shape_fn((points.len(), points.len()), |(i, j)| (points[i] - points[j]).abs())
    }

    #[test]
    fn test_two_groups() {
        let d = line_distances(&[0.0, 0.1, 0.2, 5.0, 5.1, 5.2]);
        let sel = select_medoids(&d, 2, &MicroLpBackend, &SolveBudget::default()).unwrap();
        assert_eq!(sel.medoids, vec![1, 4]);
        assert_eq!(sel.assigned_medoid, vec![1, 1, 1, 4, 4, 4]);
        assert!((sel.objective - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_all_periods_are_medoids() {
        let d = array![[0.0, 1.0], [1.0, 0.0]];
        let sel = select_medoids(&d, 2, &MicroLpBackend, &SolveBudget::default()).unwrap();
        assert_eq!(sel.medoids, vec![0, 1]);
        assert_eq!(sel.objective, 0.0);
    }

    #[test]
    fn test_timeout_without_incumbent_fails() {
        let mut backend = MockMilpBackend::new();
        backend
            .expect_solve()
            .returning(|_, _| Ok(RawSolution::without_values(BackendStatus::LimitReached)));
        let d = line_distances(&[0.0, 1.0, 2.0]);
        let budget = SolveBudget {
            time_limit_s: 2.0,
            ..Default::default()
        };
        let err = select_medoids(&d, 1, &backend, &budget).unwrap_err();
        assert_eq!(
            err,
            HubError::ClusteringFailed {
                clusters: 1,
                time_limit_s: 2.0,
                reason: "no incumbent within the time limit".into()
            }
        );
    }

    #[test]
    fn test_incumbent_at_limit_is_accepted() {
        // Feasible but suboptimal incumbent: medoid 0 for all three points.
        let mut backend = MockMilpBackend::new();
        backend.expect_solve().returning(|ctx, _| {
            let mut values = vec![0.0; ctx.num_vars()];
            values[0] = 1.0;
            for i in 0..3 {
                values[3 + i * 3] = 1.0;
            }
            Ok(RawSolution {
                status: BackendStatus::LimitReached,
                values,
            })
        });
        let d = line_distances(&[0.0, 1.0, 2.0]);
        let sel = select_medoids(&d, 1, &backend, &SolveBudget::default()).unwrap();
        assert_eq!(sel.medoids, vec![0]);
        assert_eq!(sel.assigned_medoid, vec![0, 0, 0]);
        assert!((sel.objective - 3.0).abs() < 1e-9);
    }
}
