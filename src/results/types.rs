use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::clustering::ClusterSet;
use crate::domain::{Carrier, NodeId};
use crate::optimizer::{HorizonMode, ObjectiveKind, SolutionStatus};

/// Solved charge, discharge and state-of-charge trajectories (W, W, Wh).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageResult {
    pub carrier: Carrier,
    pub charge: Vec<f64>,
    pub discharge: Vec<f64>,
    /// `steps + 1` boundary points
    pub soc: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceResult {
    pub abbreviation: String,
    /// Installed or sized capacity in W (Wh for storages)
    pub capacity: f64,
    pub inputs: BTreeMap<Carrier, Vec<f64>>,
    pub outputs: BTreeMap<Carrier, Vec<f64>>,
    pub storage: Option<StorageResult>,
}

/// Exchange of one node with a bus or network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeResult {
    pub carrier: Carrier,
    pub withdraw: Vec<f64>,
    pub inject: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeResult {
    pub node: NodeId,
    pub devices: Vec<DeviceResult>,
    pub exchanges: Vec<ExchangeResult>,
    /// Fuel bought directly at the node
    pub deliveries: BTreeMap<Carrier, Vec<f64>>,
}

/// Import and export trajectories of one carrier at the grid connection point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridExchange {
    pub carrier: Carrier,
    pub import: Vec<f64>,
    pub export: Vec<f64>,
}

/// Cost and emission components, both evaluated whatever the objective was.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ObjectiveBreakdown {
    pub import_cost: f64,
    pub export_revenue: f64,
    pub peak_cost: f64,
    pub investment_cost: f64,
    /// kg CO2 of imports
    pub import_emissions: f64,
    /// kg CO2 credited for exports
    pub export_credit: f64,
}

impl ObjectiveBreakdown {
    pub fn total_cost(&self) -> f64 {
        self.import_cost - self.export_revenue + self.peak_cost + self.investment_cost
    }

    pub fn total_emissions(&self) -> f64 {
        self.import_emissions - self.export_credit
    }

    /// Component-wise `self + factor × other`.
    pub fn add_scaled(&mut self, other: &ObjectiveBreakdown, factor: f64) {
        self.import_cost += factor * other.import_cost;
        self.export_revenue += factor * other.export_revenue;
        self.peak_cost += factor * other.peak_cost;
        self.investment_cost += factor * other.investment_cost;
        self.import_emissions += factor * other.import_emissions;
        self.export_credit += factor * other.export_credit;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodResult {
    pub index: usize,
    /// Number of original periods represented
    pub weight: f64,
    pub steps: usize,
    pub dt_h: f64,
    pub nodes: Vec<NodeResult>,
    pub grid: Vec<GridExchange>,
    /// Daily maximum of electricity import in W
    pub daily_peaks: Vec<f64>,
    /// Operating components of this period, unweighted
    pub breakdown: ObjectiveBreakdown,
}

impl PeriodResult {
    pub fn node(&self, node: NodeId) -> Option<&NodeResult> {
        self.nodes.iter().find(|n| n.node == node)
    }

    pub fn device(&self, node: NodeId, abbreviation: &str) -> Option<&DeviceResult> {
        self.node(node)?.devices.iter().find(|d| d.abbreviation == abbreviation)
    }

    pub fn grid(&self, carrier: Carrier) -> Option<&GridExchange> {
        self.grid.iter().find(|g| g.carrier == carrier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityResult {
    pub node: NodeId,
    pub abbreviation: String,
    pub capacity: f64,
    pub sized: bool,
}

/// Result of one solved dispatch model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub objective: ObjectiveKind,
    pub horizon: HorizonMode,
    pub status: SolutionStatus,
    pub objective_value: f64,
    pub capacities: Vec<CapacityResult>,
    pub periods: Vec<PeriodResult>,
    /// Pro-rated investment of sized devices over the model horizon
    pub investment_cost: f64,
}

/// Weighted totals over the represented horizon.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnualSummary {
    /// kWh per carrier at the grid connection point or delivered to nodes
    pub imports_kwh: BTreeMap<Carrier, f64>,
    pub exports_kwh: BTreeMap<Carrier, f64>,
    pub breakdown: ObjectiveBreakdown,
    pub total_cost: f64,
    pub total_emissions: f64,
    /// Sum of daily electricity import peaks in kW
    pub peak_sum_kw: f64,
}

/// Everything produced for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub scenario: String,
    /// Representative profiles, weights and rescaling, when the horizon was clustered
    pub clusters: Option<ClusterSet>,
    /// `(period, cluster)` 0/1 membership of every original period
    pub assignment_matrix: Option<Array2<u8>>,
    pub dispatch: Vec<DispatchResult>,
    pub summary: AnnualSummary,
}
