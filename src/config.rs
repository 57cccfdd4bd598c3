use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use validator::Validate;

use crate::clustering::ClusterSettings;
use crate::optimizer::{DispatchSettings, HorizonMode, ObjectiveKind, SolveBudget, SolverType};
use crate::scenario::{ClusteringPlan, RunSettings};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub clustering: ClusteringConfig,
    #[validate(nested)]
    pub optimization: OptimizationConfig,
    pub solver: SolverConfig,
    pub io: IoConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClusteringConfig {
    pub enabled: bool,
    #[validate(range(min = 1))]
    pub clusters: usize,
    /// Minkowski exponent; `inf` selects the maximum norm
    #[validate(range(min = 1.0))]
    pub norm: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub time_limit_s: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub mip_gap: f64,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[validate(range(min = 1))]
    pub steps_per_period: usize,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OptimizationConfig {
    pub objective: ObjectiveKind,
    /// Currency per kW of daily import peak
    #[validate(range(min = 0.0))]
    pub peak_price: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub time_limit_s: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub mip_gap: f64,
    pub threads: usize,
    #[validate(range(max = 12))]
    pub solution_decimals: u32,
    pub diagnose_infeasibility: bool,
    pub diagnosis_max_groups: usize,
    pub exclusive_storage_operation: bool,
    pub horizon: HorizonMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolverConfig {
    pub backend: SolverType,
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IoConfig {
    pub scenario_path: PathBuf,
    pub output_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("DEH__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn run_settings(&self) -> RunSettings {
        let clustering = self.clustering.enabled.then(|| ClusteringPlan {
            settings: ClusterSettings {
                clusters: self.clustering.clusters,
                norm: self.clustering.norm,
                budget: SolveBudget {
                    time_limit_s: self.clustering.time_limit_s,
                    mip_gap: self.clustering.mip_gap,
                    threads: self.optimization.threads,
                    verbose: self.solver.verbose,
                },
            },
            steps_per_period: self.clustering.steps_per_period,
            weights: self.clustering.weights.clone(),
        });
        let opt = &self.optimization;
        RunSettings {
            clustering,
            dispatch: DispatchSettings {
                objective: opt.objective,
                peak_price: opt.peak_price,
                horizon: opt.horizon,
                budget: SolveBudget {
                    time_limit_s: opt.time_limit_s,
                    mip_gap: opt.mip_gap,
                    threads: opt.threads,
                    verbose: self.solver.verbose,
                },
                solution_decimals: opt.solution_decimals,
                diagnose_infeasibility: opt.diagnose_infeasibility,
                diagnosis_max_groups: opt.diagnosis_max_groups,
                exclusive_storage_operation: opt.exclusive_storage_operation,
            },
            solver: self.solver.backend,
        }
    }
}
