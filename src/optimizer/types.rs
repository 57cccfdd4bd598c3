use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Single-objective switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ObjectiveKind {
    #[default]
    Costs,
    Emissions,
}

/// Whether representative periods are solved one by one or together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HorizonMode {
    /// One model per period with weight 1; hub capacities sized per period.
    #[default]
    PerPeriod,
    /// One model over all periods, weighted, with shared hub capacities.
    Aggregate,
}

/// Limits handed to the solver for one call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveBudget {
    pub time_limit_s: f64,
    /// Relative MIP gap at which an incumbent is accepted
    pub mip_gap: f64,
    /// 0 lets the solver decide
    pub threads: usize,
    pub verbose: bool,
}

impl Default for SolveBudget {
    fn default() -> Self {
        Self {
            time_limit_s: 60.0,
            mip_gap: 0.01,
            threads: 0,
            verbose: false,
        }
    }
}

/// Everything the dispatch stage needs besides the scenario data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    pub objective: ObjectiveKind,
    /// Currency per kW of daily import peak
    pub peak_price: f64,
    pub horizon: HorizonMode,
    pub budget: SolveBudget,
    /// Decimals kept when rounding primal values
    pub solution_decimals: u32,
    pub diagnose_infeasibility: bool,
    /// Upper bound on constraint groups probed by the infeasibility diagnosis
    pub diagnosis_max_groups: usize,
    /// Forbid simultaneous charging and discharging with a binary per step
    pub exclusive_storage_operation: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            objective: ObjectiveKind::Costs,
            peak_price: 0.0,
            horizon: HorizonMode::PerPeriod,
            budget: SolveBudget::default(),
            solution_decimals: 3,
            diagnose_infeasibility: true,
            diagnosis_max_groups: 200,
            exclusive_storage_operation: true,
        }
    }
}
