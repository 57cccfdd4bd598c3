//! Objective coefficients.
//!
//! Flows are in W and steps in hours while prices and CO2 factors are per
//! kWh, so an energy term is `factor × flow × dt / 1000`.

use super::{CapacityRef, InstalledCapacity};
use crate::domain::CarrierMarket;
use crate::optimizer::model::ModelContext;
use crate::optimizer::types::ObjectiveKind;

pub const W_PER_KW: f64 = 1000.0;

/// Cost or emissions per W of import over one step.
pub fn import_coefficient(market: &CarrierMarket, objective: ObjectiveKind, dt_h: f64, weight: f64) -> f64 {
    let per_kwh = match objective {
        ObjectiveKind::Costs => market.import_price,
        ObjectiveKind::Emissions => market.import_co2,
    };
    per_kwh * dt_h / W_PER_KW * weight
}

/// Revenue or credited emissions per W of export over one step (negative).
pub fn export_coefficient(market: &CarrierMarket, objective: ObjectiveKind, dt_h: f64, weight: f64) -> f64 {
    let per_kwh = match objective {
        ObjectiveKind::Costs => market.export_price,
        ObjectiveKind::Emissions => market.export_co2,
    };
    -per_kwh * dt_h / W_PER_KW * weight
}

/// Charge per W of daily import peak; added whatever the objective.
pub fn peak_coefficient(peak_price: f64, weight: f64) -> f64 {
    peak_price / W_PER_KW * weight
}

/// Annualised investment of sized hub devices, pro-rated to the share of
/// the year covered by the model. Emission runs carry no investment term.
pub fn add_investment(
    mut ctx: ModelContext,
    capacities: &[InstalledCapacity],
    horizon_share: f64,
    objective: ObjectiveKind,
) -> ModelContext {
    if objective != ObjectiveKind::Costs {
        return ctx;
    }
    for installed in capacities {
        if let CapacityRef::Sized { var, .. } = installed.capacity {
            ctx.add_objective_term(var, installed.annual_cost_per_w * horizon_share);
        }
    }
    ctx
}
