//! Scenario orchestration
//!
//! One scenario runs strictly in sequence: cluster the horizon, build and
//! solve the dispatch model(s), aggregate. Independent scenarios share
//! nothing mutable and run in parallel on the rayon pool, each with its own
//! solver backend.

use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clustering::{ClusterSet, ClusterSettings, ClusteringInput, TimeSeriesClusterer};
use crate::domain::{Catalogue, District, Market, NodeId, NodeSeries, PeriodData, RawDeviceEntry};
use crate::error::{HubError, HubResult};
use crate::optimizer::{DispatchOptimizer, DispatchSettings, HorizonMode, SolverType};
use crate::results::{ResultAggregator, ScenarioResult};

/// Series name of the ambient temperature, which is clustered but never rescaled.
pub const AMBIENT_SERIES: &str = "ambient";

/// A district with its catalogue, market and full-horizon input series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub catalogue: Vec<RawDeviceEntry>,
    pub district: District,
    #[serde(default)]
    pub market: Market,
    /// Full horizon as one period; its `weight` is ignored
    pub series: PeriodData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringPlan {
    pub settings: ClusterSettings,
    pub steps_per_period: usize,
    /// Relative weight keyed by carrier, device abbreviation or `ambient`;
    /// unnamed series weigh 1
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// `None` optimises the full horizon as one period
    pub clustering: Option<ClusteringPlan>,
    pub dispatch: DispatchSettings,
    pub solver: SolverType,
}

/// Flatten the horizon into named series:
/// `b0.demand.heat`, `hub.generation.PV`, `loss.heat`, `ambient`.
pub fn named_series(series: &PeriodData) -> Vec<(String, Vec<f64>)> {
    let mut named = Vec::new();
    let nodes = series
        .buildings
        .iter()
        .enumerate()
        .map(|(i, s)| (NodeId::Building(i), s))
        .chain(std::iter::once((NodeId::Hub, &series.hub)));
    for (node, node_series) in nodes {
        for (carrier, values) in &node_series.demand {
            named.push((format!("{node}.demand.{carrier}"), values.clone()));
        }
        for (abbreviation, values) in &node_series.generation {
            named.push((format!("{node}.generation.{abbreviation}"), values.clone()));
        }
    }
    for (carrier, values) in &series.network_losses {
        named.push((format!("loss.{carrier}"), values.clone()));
    }
    if let Some(ambient) = &series.ambient_c {
        named.push((AMBIENT_SERIES.to_string(), ambient.clone()));
    }
    named
}

fn series_weights(named: &[(String, Vec<f64>)], weights: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    named
        .iter()
        .map(|(name, _)| {
            let tag = name.rsplit('.').next().unwrap_or(name);
            (name.clone(), weights.get(tag).copied().unwrap_or(1.0))
        })
        .collect()
}

/// Rebuild the period inputs of one cluster from its representative profiles.
pub fn cluster_period(series: &PeriodData, set: &ClusterSet, cluster: usize, steps: usize) -> HubResult<PeriodData> {
    let profile = |name: String| -> HubResult<Vec<f64>> {
        set.profile(&name, cluster)
            .map(|p| p.to_vec())
            .ok_or_else(|| HubError::data(name, "series missing from the cluster set"))
    };
    let node_series = |node: NodeId, source: &NodeSeries| -> HubResult<NodeSeries> {
        Ok(NodeSeries {
            demand: source
                .demand
                .keys()
                .map(|carrier| profile(format!("{node}.demand.{carrier}")).map(|p| (*carrier, p)))
                .collect::<HubResult<_>>()?,
            generation: source
                .generation
                .keys()
                .map(|abbreviation| {
                    profile(format!("{node}.generation.{abbreviation}")).map(|p| (abbreviation.clone(), p))
                })
                .collect::<HubResult<_>>()?,
        })
    };

    let mut period = PeriodData::new(steps, series.dt_h);
    period.weight = set.weights[cluster] as f64;
    period.ambient_c = series
        .ambient_c
        .as_ref()
        .map(|_| profile(AMBIENT_SERIES.to_string()))
        .transpose()?;
    period.buildings = series
        .buildings
        .iter()
        .enumerate()
        .map(|(i, s)| node_series(NodeId::Building(i), s))
        .collect::<HubResult<_>>()?;
    period.hub = node_series(NodeId::Hub, &series.hub)?;
    period.network_losses = series
        .network_losses
        .keys()
        .map(|carrier| profile(format!("loss.{carrier}")).map(|p| (*carrier, p)))
        .collect::<HubResult<_>>()?;
    Ok(period)
}

fn cluster_horizon(scenario: &Scenario, plan: &ClusteringPlan, solver: SolverType) -> HubResult<(ClusterSet, Vec<PeriodData>)> {
    let named = named_series(&scenario.series);
    let mut input = ClusteringInput::from_series(&named, plan.steps_per_period)?;
    if !plan.weights.is_empty() {
        input = input.with_weights(&series_weights(&named, &plan.weights))?;
    }
    let input = input.keep_raw(AMBIENT_SERIES);

    let clusterer = TimeSeriesClusterer::new(plan.settings.clone(), solver.backend()?);
    let set = clusterer.cluster(&input)?;
    let periods = (0..set.len())
        .map(|c| cluster_period(&scenario.series, &set, c, plan.steps_per_period))
        .collect::<HubResult<Vec<_>>>()?;
    Ok((set, periods))
}

pub fn run_scenario(scenario: &Scenario, settings: &RunSettings) -> HubResult<ScenarioResult> {
    let run_id = Uuid::new_v4();
    info!(%run_id, scenario = %scenario.name, buildings = scenario.district.buildings.len(), "Running scenario");

    let catalogue = Catalogue::from_raw(&scenario.catalogue)?;
    scenario.district.validate(&catalogue)?;
    scenario.market.validate()?;
    scenario.series.validate(&scenario.district)?;

    let (clusters, periods) = match &settings.clustering {
        Some(plan) => {
            let (set, periods) = cluster_horizon(scenario, plan, settings.solver)?;
            (Some(set), periods)
        }
        None => {
            let mut whole = scenario.series.clone();
            whole.weight = 1.0;
            (None, vec![whole])
        }
    };

    let optimizer = DispatchOptimizer::new(settings.solver.backend()?, settings.dispatch.clone());
    let solved = match settings.dispatch.horizon {
        HorizonMode::PerPeriod => periods
            .iter()
            .map(|period| {
                optimizer.optimize(&catalogue, &scenario.district, &scenario.market, std::slice::from_ref(period))
            })
            .collect::<HubResult<Vec<_>>>()?,
        HorizonMode::Aggregate => vec![optimizer.optimize(
            &catalogue,
            &scenario.district,
            &scenario.market,
            &periods,
        )?],
    };

    let aggregator = ResultAggregator::new(&scenario.market, &settings.dispatch);
    let dispatch: Vec<_> = solved.iter().map(|s| aggregator.aggregate(s)).collect();
    let summary = aggregator.annual_summary(&dispatch);
    info!(
        %run_id,
        scenario = %scenario.name,
        models = dispatch.len(),
        total_cost = summary.total_cost,
        total_emissions = summary.total_emissions,
        "Scenario finished"
    );

    Ok(ScenarioResult {
        run_id,
        created_at: Utc::now(),
        scenario: scenario.name.clone(),
        assignment_matrix: clusters.as_ref().map(ClusterSet::assignment_matrix),
        clusters,
        dispatch,
        summary,
    })
}

/// Solve independent scenarios concurrently. A failing scenario is logged
/// and reported in place; it never aborts the others.
pub fn run_batch(scenarios: &[Scenario], settings: &RunSettings) -> Vec<(String, HubResult<ScenarioResult>)> {
    scenarios
        .par_iter()
        .map(|scenario| {
            let outcome = run_scenario(scenario, settings);
            if let Err(e) = &outcome {
                warn!(scenario = %scenario.name, kind = e.kind(), error = %e, "Scenario failed");
            }
            (scenario.name.clone(), outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Carrier;

    fn horizon() -> PeriodData {
        let mut series = PeriodData::new(4, 1.0);
        let mut building = NodeSeries::default();
        building.demand.insert(Carrier::Heat, vec![1.0, 2.0, 3.0, 4.0]);
        building.generation.insert("PV".into(), vec![0.0, 1.0, 1.0, 0.0]);
        series.buildings.push(building);
        series.hub.generation.insert("WT".into(), vec![0.5; 4]);
        series.network_losses.insert(Carrier::Heat, vec![0.1; 4]);
        series.ambient_c = Some(vec![5.0, 6.0, 7.0, 8.0]);
        series
    }

    #[test]
    fn test_named_series() {
        let names: Vec<String> = named_series(&horizon()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["b0.demand.heat", "b0.generation.PV", "hub.generation.WT", "loss.heat", "ambient"]
        );
    }

    #[test]
    fn test_series_weights_by_tag() {
        let named = named_series(&horizon());
        let weights = BTreeMap::from([("heat".to_string(), 3.0), ("ambient".to_string(), 0.0)]);
        let mapped = series_weights(&named, &weights);
        assert_eq!(mapped["b0.demand.heat"], 3.0);
        assert_eq!(mapped["loss.heat"], 3.0);
        assert_eq!(mapped["b0.generation.PV"], 1.0);
        assert_eq!(mapped["ambient"], 0.0);
    }
}
