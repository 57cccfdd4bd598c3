//! Reshapes flat solution vectors into per-node, per-device results.
//!
//! No decisions are taken here. Cost and emission components are evaluated
//! from the solved flows and the market, and period weights are carried
//! through so annual totals stay correct.

use itertools::Itertools;
use std::collections::BTreeMap;

use super::types::*;
use crate::domain::{Carrier, CarrierMarket, Market, NodeId};
use crate::optimizer::builder::{
    objective::W_PER_KW, CapacityRef, ModelLayout, PeriodLayout, UnitFlows, UnitLayout,
};
use crate::optimizer::model::Block;
use crate::optimizer::{DispatchSettings, HorizonMode, SolvedModel};

/// Daily maxima of a trajectory with step length `dt_h`.
pub fn daily_maxima(values: &[f64], dt_h: f64) -> Vec<f64> {
    let days = values
        .iter()
        .enumerate()
        .chunk_by(|(t, _)| ((*t as f64 * dt_h) / 24.0 + 1e-9).floor() as usize);
    let maxima = days
        .into_iter()
        .map(|(_, day)| day.map(|(_, v)| *v).fold(0.0, f64::max))
        .collect();
    maxima
}

/// Energy in kWh of a W trajectory.
fn energy_kwh(values: &[f64], dt_h: f64) -> f64 {
    values.iter().sum::<f64>() * dt_h / W_PER_KW
}

fn trajectory(block: Option<Block>, steps: usize, values: &[f64]) -> Vec<f64> {
    block.map_or_else(|| vec![0.0; steps], |b| b.values(values).to_vec())
}

fn node_entry(nodes: &mut BTreeMap<NodeId, NodeResult>, node: NodeId) -> &mut NodeResult {
    nodes.entry(node).or_insert_with(|| NodeResult {
        node,
        devices: Vec::new(),
        exchanges: Vec::new(),
        deliveries: BTreeMap::new(),
    })
}

pub struct ResultAggregator<'a> {
    market: &'a Market,
    settings: &'a DispatchSettings,
}

impl<'a> ResultAggregator<'a> {
    pub fn new(market: &'a Market, settings: &'a DispatchSettings) -> Self {
        Self { market, settings }
    }

    pub fn aggregate(&self, solved: &SolvedModel) -> DispatchResult {
        let layout = &solved.layout;
        let values = &solved.values;
        let capacities = layout
            .capacities
            .iter()
            .map(|installed| CapacityResult {
                node: installed.node,
                abbreviation: installed.abbreviation.clone(),
                capacity: installed.capacity.value(values),
                sized: matches!(installed.capacity, CapacityRef::Sized { .. }),
            })
            .collect::<Vec<_>>();
        let investment_cost = self.investment_cost(layout, values);
        let periods = layout
            .periods
            .iter()
            .map(|period| self.period(layout, period, values))
            .collect();

        DispatchResult {
            objective: self.settings.objective,
            horizon: self.settings.horizon,
            status: solved.status,
            objective_value: solved.objective_value,
            capacities,
            periods,
            investment_cost,
        }
    }

    fn investment_cost(&self, layout: &ModelLayout, values: &[f64]) -> f64 {
        layout
            .capacities
            .iter()
            .filter(|c| matches!(c.capacity, CapacityRef::Sized { .. }))
            .map(|c| c.capacity.value(values) * c.annual_cost_per_w * layout.horizon_share)
            .sum()
    }

    fn device(&self, layout: &ModelLayout, unit: &UnitLayout, values: &[f64]) -> DeviceResult {
        let mut inputs = BTreeMap::new();
        let mut outputs = BTreeMap::new();
        let mut storage = None;
        match &unit.flows {
            UnitFlows::Conversion { input, outputs: outs } => {
                inputs.insert(input.carrier, input.block.values(values).to_vec());
                for out in outs {
                    outputs.insert(out.carrier, out.block.values(values).to_vec());
                }
            }
            UnitFlows::Renewable { output } => {
                outputs.insert(output.carrier, output.block.values(values).to_vec());
            }
            UnitFlows::Storage {
                carrier,
                charge,
                discharge,
                soc,
                ..
            } => {
                inputs.insert(*carrier, charge.values(values).to_vec());
                outputs.insert(*carrier, discharge.values(values).to_vec());
                storage = Some(StorageResult {
                    carrier: *carrier,
                    charge: charge.values(values).to_vec(),
                    discharge: discharge.values(values).to_vec(),
                    soc: soc.values(values).to_vec(),
                });
            }
        }
        DeviceResult {
            abbreviation: unit.abbreviation.clone(),
            capacity: layout.capacities[unit.capacity].capacity.value(values),
            inputs,
            outputs,
            storage,
        }
    }

    fn period(&self, layout: &ModelLayout, period: &PeriodLayout, values: &[f64]) -> PeriodResult {
        let steps = period.steps;
        let mut nodes: BTreeMap<NodeId, NodeResult> = BTreeMap::new();
        for unit in &period.units {
            let device = self.device(layout, unit, values);
            node_entry(&mut nodes, unit.node).devices.push(device);
        }
        for exchange in &period.exchanges {
            node_entry(&mut nodes, exchange.node).exchanges.push(ExchangeResult {
                carrier: exchange.carrier,
                withdraw: trajectory(exchange.withdraw, steps, values),
                inject: trajectory(exchange.inject, steps, values),
            });
        }
        for delivery in &period.deliveries {
            node_entry(&mut nodes, delivery.node)
                .deliveries
                .insert(delivery.carrier, delivery.import.values(values).to_vec());
        }

        let grid: Vec<GridExchange> = period
            .grid
            .iter()
            .map(|g| GridExchange {
                carrier: g.carrier,
                import: trajectory(g.import, steps, values),
                export: trajectory(g.export, steps, values),
            })
            .collect();
        let daily_peaks = grid
            .iter()
            .find(|g| g.carrier == Carrier::Electricity)
            .map(|g| daily_maxima(&g.import, period.dt_h))
            .unwrap_or_default();

        let mut breakdown = ObjectiveBreakdown::default();
        for exchange in &grid {
            if let Some(market) = self.market.get(exchange.carrier) {
                self.add_trade(&mut breakdown, market, &exchange.import, &exchange.export, period.dt_h);
            }
        }
        for delivery in &period.deliveries {
            if let Some(market) = self.market.get(delivery.carrier) {
                self.add_trade(&mut breakdown, market, delivery.import.values(values), &[], period.dt_h);
            }
        }
        breakdown.peak_cost = self.settings.peak_price * daily_peaks.iter().sum::<f64>() / W_PER_KW;

        PeriodResult {
            index: period.index,
            weight: period.weight,
            steps,
            dt_h: period.dt_h,
            nodes: nodes.into_values().collect(),
            grid,
            daily_peaks,
            breakdown,
        }
    }

    fn add_trade(
        &self,
        breakdown: &mut ObjectiveBreakdown,
        market: &CarrierMarket,
        import: &[f64],
        export: &[f64],
        dt_h: f64,
    ) {
        let (imported, exported) = (energy_kwh(import, dt_h), energy_kwh(export, dt_h));
        breakdown.import_cost += imported * market.import_price;
        breakdown.import_emissions += imported * market.import_co2;
        breakdown.export_revenue += exported * market.export_price;
        breakdown.export_credit += exported * market.export_co2;
    }

    /// Weighted totals over all solved models. Operating terms scale with
    /// the period weight; investment is already pro-rated in aggregate
    /// models and scales with the period weight in per-period models.
    pub fn annual_summary(&self, results: &[DispatchResult]) -> AnnualSummary {
        let mut summary = AnnualSummary::default();
        for result in results {
            for period in &result.periods {
                summary.breakdown.add_scaled(&period.breakdown, period.weight);
                summary.peak_sum_kw += period.weight * period.daily_peaks.iter().sum::<f64>() / W_PER_KW;
                for grid in &period.grid {
                    *summary.imports_kwh.entry(grid.carrier).or_insert(0.0) +=
                        period.weight * energy_kwh(&grid.import, period.dt_h);
                    *summary.exports_kwh.entry(grid.carrier).or_insert(0.0) +=
                        period.weight * energy_kwh(&grid.export, period.dt_h);
                }
                for (carrier, import) in period.nodes.iter().flat_map(|n| &n.deliveries) {
                    *summary.imports_kwh.entry(*carrier).or_insert(0.0) +=
                        period.weight * energy_kwh(import, period.dt_h);
                }
            }
            let investment_scale = match result.horizon {
                HorizonMode::Aggregate => 1.0,
                HorizonMode::PerPeriod if result.periods.is_empty() => 0.0,
                HorizonMode::PerPeriod => {
                    result.periods.iter().map(|p| p.weight).sum::<f64>() / result.periods.len() as f64
                }
            };
            summary.breakdown.investment_cost += investment_scale * result.investment_cost;
        }
        summary.total_cost = summary.breakdown.total_cost();
        summary.total_emissions = summary.breakdown.total_emissions();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{ObjectiveKind, SolutionStatus};

    fn period(weight: f64, import: Vec<f64>, peak: f64) -> PeriodResult {
        PeriodResult {
            index: 0,
            weight,
            steps: import.len(),
            dt_h: 1.0,
            nodes: Vec::new(),
            grid: vec![GridExchange {
                carrier: Carrier::Electricity,
                export: vec![0.0; import.len()],
                import,
            }],
            daily_peaks: vec![peak],
            breakdown: ObjectiveBreakdown {
                import_cost: 2.0,
                import_emissions: 1.0,
                ..Default::default()
            },
        }
    }

    fn result(horizon: HorizonMode, periods: Vec<PeriodResult>, investment_cost: f64) -> DispatchResult {
        DispatchResult {
            objective: ObjectiveKind::Costs,
            horizon,
            status: SolutionStatus::Optimal,
            objective_value: 0.0,
            capacities: Vec::new(),
            periods,
            investment_cost,
        }
    }

    #[test]
    fn test_daily_maxima() {
        let values: Vec<f64> = (0..48).map(|t| (t % 24) as f64 + if t >= 24 { 100.0 } else { 0.0 }).collect();
        assert_eq!(daily_maxima(&values, 1.0), vec![23.0, 123.0]);
        assert_eq!(daily_maxima(&[1.0, 5.0, 2.0, 7.0], 12.0), vec![5.0, 7.0]);
        assert!(daily_maxima(&[], 1.0).is_empty());
    }

    #[test]
    fn test_annual_summary_weights_periods() {
        let market = Market::new();
        let settings = DispatchSettings::default();
        let aggregator = ResultAggregator::new(&market, &settings);

        let per_period = vec![
            result(HorizonMode::PerPeriod, vec![period(3.0, vec![1000.0, 2000.0], 2000.0)], 10.0),
            result(HorizonMode::PerPeriod, vec![period(2.0, vec![500.0, 500.0], 500.0)], 1.0),
        ];
        let summary = aggregator.annual_summary(&per_period);
        assert!((summary.imports_kwh[&Carrier::Electricity] - (3.0 * 3.0 + 2.0 * 1.0)).abs() < 1e-12);
        assert!((summary.breakdown.import_cost - 10.0).abs() < 1e-12);
        assert!((summary.breakdown.investment_cost - 32.0).abs() < 1e-12);
        assert!((summary.total_cost - 42.0).abs() < 1e-12);
        assert!((summary.total_emissions - 5.0).abs() < 1e-12);
        assert!((summary.peak_sum_kw - 7.0).abs() < 1e-12);

        let aggregate = vec![result(
            HorizonMode::Aggregate,
            vec![period(3.0, vec![1000.0], 1000.0), period(2.0, vec![0.0], 0.0)],
            10.0,
        )];
        let summary = aggregator.annual_summary(&aggregate);
        assert!((summary.breakdown.investment_cost - 10.0).abs() < 1e-12);
        assert!((summary.imports_kwh[&Carrier::Electricity] - 3.0).abs() < 1e-12);
    }
}
