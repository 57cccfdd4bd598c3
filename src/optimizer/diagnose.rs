//! Infeasibility diagnosis
//!
//! Deletion filter over constraint groups: drop one group at a time and
//! keep it dropped while the remaining model stays infeasible. The groups
//! still present at the end form an irreducible conflicting set, named the
//! way the builder named them (`capacity[BOI@b0]`, `balance.heat[b0]`, ...).

use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::model::ModelContext;
use super::strategies::{BackendStatus, MilpBackend};
use super::types::SolveBudget;
use crate::error::HubResult;

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub conflict: Vec<String>,
    pub groups_tested: usize,
    /// False when the group budget was exceeded and nothing was probed
    pub complete: bool,
}

/// Whether the model without `excluded` still admits no solution. A probe
/// that runs out of budget counts as feasible so the group is kept.
fn still_infeasible(
    model: &ModelContext,
    excluded: &HashSet<String>,
    backend: &dyn MilpBackend,
    budget: &SolveBudget,
) -> HubResult<bool> {
    let probe = model.feasibility_subproblem(excluded);
    let raw = backend.solve(&probe, budget)?;
    Ok(matches!(
        raw.status,
        BackendStatus::Infeasible | BackendStatus::InfeasibleOrUnbounded
    ))
}

pub fn diagnose(
    model: &ModelContext,
    backend: &dyn MilpBackend,
    budget: &SolveBudget,
    max_groups: usize,
) -> HubResult<Diagnosis> {
    let groups = model.groups();
    if groups.len() > max_groups {
        warn!(
            groups = groups.len(),
            max_groups, "Too many constraint groups, skipping infeasibility diagnosis"
        );
        return Ok(Diagnosis {
            conflict: Vec::new(),
            groups_tested: 0,
            complete: false,
        });
    }

    let mut excluded = HashSet::new();
    for group in &groups {
        excluded.insert(group.clone());
        if still_infeasible(model, &excluded, backend, budget)? {
            debug!(group = %group, "Group not needed for the conflict");
        } else {
            excluded.remove(group);
        }
    }
    let conflict: Vec<String> = groups.iter().filter(|g| !excluded.contains(*g)).cloned().collect();
    info!(
        groups_tested = groups.len(),
        conflict_size = conflict.len(),
        conflict = ?conflict,
        "Infeasibility diagnosis finished"
    );
    Ok(Diagnosis {
        conflict,
        groups_tested: groups.len(),
        complete: true,
    })
}
