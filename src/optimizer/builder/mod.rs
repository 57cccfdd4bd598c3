//! Dispatch model construction
//!
//! The builder walks the district node by node and dispatches every
//! installed device to the generator for its role (conversion, renewable,
//! storage). Each generator takes the [`ModelContext`] by value, adds its
//! variables and rows, posts its flows to the balance ledger and hands the
//! context back together with a [`UnitLayout`] describing where its
//! variables live. Exchanges between nodes, markets, the daily peak and
//! investment follow, and the ledger is closed into balance rows last.

pub mod conversion;
pub mod exchange;
pub mod objective;
pub mod renewable;
pub mod storage;

use serde::Serialize;
use std::collections::BTreeMap;
use strum::{EnumCount, IntoEnumIterator};
use tracing::debug;

use super::model::{BalanceKey, Block, ModelContext, Sense, VarId, VarKind};
use super::types::{DispatchSettings, HorizonMode};
use crate::domain::{
    Capacity, Carrier, Catalogue, DeviceRole, DeviceSpec, District, Market, NodeId, PeriodData,
};
use crate::error::{HubError, HubResult};

/// Installed capacity as seen by the constraint generators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CapacityRef {
    Fixed(f64),
    /// Sizing variable with its upper bound
    Sized { var: VarId, max: f64 },
}

impl CapacityRef {
    pub fn upper(&self) -> f64 {
        match *self {
            CapacityRef::Fixed(c) => c,
            CapacityRef::Sized { max, .. } => max,
        }
    }

    pub fn value(&self, values: &[f64]) -> f64 {
        match *self {
            CapacityRef::Fixed(c) => c,
            CapacityRef::Sized { var, .. } => values[var.0],
        }
    }

    /// Terms and right-hand side of `var − factor × capacity (sense) 0`.
    pub fn relative(&self, var: VarId, factor: f64) -> (Vec<(VarId, f64)>, f64) {
        match *self {
            CapacityRef::Fixed(c) => (vec![(var, 1.0)], factor * c),
            CapacityRef::Sized { var: cap, .. } => (vec![(var, 1.0), (cap, -factor)], 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstalledCapacity {
    pub node: NodeId,
    pub abbreviation: String,
    pub capacity: CapacityRef,
    /// Annualised investment per W (Wh for storages)
    pub annual_cost_per_w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CarrierFlow {
    pub carrier: Carrier,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UnitFlows {
    Conversion {
        input: CarrierFlow,
        outputs: Vec<CarrierFlow>,
    },
    Renewable {
        output: CarrierFlow,
    },
    Storage {
        carrier: Carrier,
        charge: Block,
        discharge: Block,
        /// `steps + 1` boundary points
        soc: Block,
        /// 1 while charging is allowed
        mode: Option<Block>,
    },
}

/// Largest flow a unit can produce or consume of one carrier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlowLimit {
    pub carrier: Carrier,
    pub produce: f64,
    pub consume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitLayout {
    pub node: NodeId,
    pub abbreviation: String,
    /// Index into [`ModelLayout::capacities`]
    pub capacity: usize,
    pub flows: UnitFlows,
    pub limits: Vec<FlowLimit>,
}

/// A node's connection to a bus or network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeLayout {
    pub node: NodeId,
    pub carrier: Carrier,
    /// Bus or network to node
    pub withdraw: Option<Block>,
    /// Node to bus or network
    pub inject: Option<Block>,
    /// 1 while withdrawing is allowed
    pub direction: Option<Block>,
}

/// Grid connection point of a bus carrier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridLayout {
    pub carrier: Carrier,
    pub import: Option<Block>,
    pub export: Option<Block>,
    /// 1 while importing is allowed
    pub direction: Option<Block>,
}

/// Fuel bought directly at a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryLayout {
    pub node: NodeId,
    pub carrier: Carrier,
    pub import: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakLayout {
    /// One variable per day of the period
    pub days: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodLayout {
    pub index: usize,
    pub steps: usize,
    pub dt_h: f64,
    pub weight: f64,
    pub units: Vec<UnitLayout>,
    pub exchanges: Vec<ExchangeLayout>,
    pub grid: Vec<GridLayout>,
    pub deliveries: Vec<DeliveryLayout>,
    pub peak: Option<PeakLayout>,
}

/// Registry from symbolic names to the variable blocks of a built model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelLayout {
    pub capacities: Vec<InstalledCapacity>,
    pub periods: Vec<PeriodLayout>,
    /// Fraction of a year covered by the optimised periods
    pub horizon_share: f64,
}

/// Inputs shared by every generator of one period.
pub struct PeriodContext<'a> {
    pub index: usize,
    pub data: &'a PeriodData,
    pub district: &'a District,
    pub market: &'a Market,
    pub settings: &'a DispatchSettings,
    /// Multiplier of this period's operating terms in the objective
    pub objective_weight: f64,
}

impl PeriodContext<'_> {
    pub fn key(&self, node: NodeId, carrier: Carrier) -> BalanceKey {
        BalanceKey {
            period: self.index,
            node,
            carrier,
        }
    }
}

/// One installed device inside one period.
pub struct UnitContext<'a> {
    pub period: &'a PeriodContext<'a>,
    pub node: NodeId,
    pub spec: &'a DeviceSpec,
    pub capacity_index: usize,
    pub capacity: CapacityRef,
}

impl UnitContext<'_> {
    pub fn label(&self) -> String {
        format!("{}@{}", self.spec.abbreviation, self.node)
    }

    pub fn steps(&self) -> usize {
        self.period.data.steps
    }

    pub fn key(&self, carrier: Carrier) -> BalanceKey {
        self.period.key(self.node, carrier)
    }

    /// Variable name prefix, e.g. `BOI@b0.in.gas.p0`.
    pub fn prefix(&self, what: &str) -> String {
        format!("{}.{what}.p{}", self.label(), self.period.index)
    }

    pub fn row_name(&self, family: &str, t: usize) -> String {
        format!("{family}[{},p{},t{t}]", self.label(), self.period.index)
    }

    pub fn layout(&self, flows: UnitFlows, limits: Vec<FlowLimit>) -> UnitLayout {
        UnitLayout {
            node: self.node,
            abbreviation: self.spec.abbreviation.clone(),
            capacity: self.capacity_index,
            flows,
            limits,
        }
    }
}

/// Per node and carrier: the largest possible consumption and production,
/// used to derive Big-M constants from the data.
#[derive(Debug, Clone, Default)]
pub struct NodeCapability {
    consume: [f64; Carrier::COUNT],
    produce: [f64; Carrier::COUNT],
}

impl NodeCapability {
    pub fn consume(&self, carrier: Carrier) -> f64 {
        self.consume[carrier.index()]
    }

    pub fn produce(&self, carrier: Carrier) -> f64 {
        self.produce[carrier.index()]
    }

    fn collect(period: &PeriodData, node: NodeId, units: &[UnitLayout]) -> Self {
        let mut capability = Self::default();
        if let Some(series) = period.node(node) {
            for (carrier, demand) in &series.demand {
                capability.consume[carrier.index()] += demand.iter().copied().fold(0.0, f64::max);
            }
        }
        for limit in units.iter().filter(|u| u.node == node).flat_map(|u| &u.limits) {
            capability.consume[limit.carrier.index()] += limit.consume;
            capability.produce[limit.carrier.index()] += limit.produce;
        }
        capability
    }
}

pub const HOURS_PER_YEAR: f64 = 8760.0;

pub struct EnergyBalanceModelBuilder<'a> {
    catalogue: &'a Catalogue,
    district: &'a District,
    market: &'a Market,
    settings: &'a DispatchSettings,
}

impl<'a> EnergyBalanceModelBuilder<'a> {
    pub fn new(
        catalogue: &'a Catalogue,
        district: &'a District,
        market: &'a Market,
        settings: &'a DispatchSettings,
    ) -> Self {
        Self {
            catalogue,
            district,
            market,
            settings,
        }
    }

    /// Build one model over `periods`. Hub sizing variables are shared by
    /// all periods of the model.
    pub fn build(&self, periods: &[PeriodData]) -> HubResult<(ModelContext, ModelLayout)> {
        if periods.is_empty() {
            return Err(HubError::data("periods", "nothing to optimise"));
        }
        self.district.validate(self.catalogue)?;
        self.market.validate()?;
        if !(self.settings.peak_price.is_finite() && self.settings.peak_price >= 0.0) {
            return Err(HubError::data(
                "optimization.peak_price",
                format!("must be non-negative, got {}", self.settings.peak_price),
            ));
        }
        for period in periods {
            period.validate(self.district)?;
        }

        let weight_of = |period: &PeriodData| match self.settings.horizon {
            HorizonMode::PerPeriod => 1.0,
            HorizonMode::Aggregate => period.weight,
        };
        let horizon_hours: f64 = periods
            .iter()
            .map(|p| weight_of(p) * p.steps as f64 * p.dt_h)
            .sum();
        let horizon_share = horizon_hours / HOURS_PER_YEAR;

        let (mut ctx, capacities) = self.add_capacities(ModelContext::new())?;
        let mut layouts = Vec::with_capacity(periods.len());
        for (index, data) in periods.iter().enumerate() {
            let period = PeriodContext {
                index,
                data,
                district: self.district,
                market: self.market,
                settings: self.settings,
                objective_weight: weight_of(data),
            };
            let (next, layout) = self.add_period(ctx, &period, &capacities)?;
            ctx = next;
            layouts.push(layout);
        }
        let ctx = objective::add_investment(ctx, &capacities, horizon_share, self.settings.objective);
        let ctx = ctx.close_balances();

        debug!(
            periods = periods.len(),
            variables = ctx.num_vars(),
            rows = ctx.num_rows(),
            binaries = ctx.num_binaries(),
            "Dispatch model built"
        );

        Ok((
            ctx,
            ModelLayout {
                capacities,
                periods: layouts,
                horizon_share,
            },
        ))
    }

    fn add_capacities(&self, mut ctx: ModelContext) -> HubResult<(ModelContext, Vec<InstalledCapacity>)> {
        let mut capacities = Vec::new();
        for node in self.district.nodes() {
            for device in self.district.devices_at(node) {
                let spec = self.catalogue.get(&device.abbreviation)?;
                let capacity = match device.capacity {
                    Capacity::Fixed(c) => CapacityRef::Fixed(c),
                    Capacity::Sizing => {
                        let economics = &spec.economics;
                        let label = format!("{}@{node}", spec.abbreviation);
                        let var = ctx.add_var(
                            format!("{label}.capacity"),
                            0.0,
                            f64::INFINITY,
                            VarKind::Continuous,
                        );
                        let group = format!("sizing[{label}]");
                        ctx.constrain(&group, format!("{group}.max"), vec![(var, 1.0)], Sense::Le, economics.max_cap);
                        if economics.min_cap > 0.0 {
                            ctx.constrain(&group, format!("{group}.min"), vec![(var, 1.0)], Sense::Ge, economics.min_cap);
                        }
                        CapacityRef::Sized {
                            var,
                            max: economics.max_cap,
                        }
                    }
                };
                capacities.push(InstalledCapacity {
                    node,
                    abbreviation: spec.abbreviation.clone(),
                    capacity,
                    annual_cost_per_w: spec.economics.annual_cost_per_w(),
                });
            }
        }
        Ok((ctx, capacities))
    }

    fn add_period(
        &self,
        mut ctx: ModelContext,
        period: &PeriodContext<'_>,
        capacities: &[InstalledCapacity],
    ) -> HubResult<(ModelContext, PeriodLayout)> {
        let mut units = Vec::with_capacity(capacities.len());
        for (capacity_index, installed) in capacities.iter().enumerate() {
            let unit = UnitContext {
                period,
                node: installed.node,
                spec: self.catalogue.get(&installed.abbreviation)?,
                capacity_index,
                capacity: installed.capacity,
            };
            let (next, layout) = match unit.spec.kind.role() {
                DeviceRole::Conversion => conversion::add_conversion(ctx, &unit)?,
                DeviceRole::Renewable => renewable::add_renewable(ctx, &unit)?,
                DeviceRole::Storage => storage::add_storage(ctx, &unit)?,
            };
            ctx = next;
            units.push(layout);
        }

        for node in self.district.nodes() {
            if let Some(series) = period.data.node(node) {
                for (carrier, demand) in &series.demand {
                    ctx.post_demand(period.key(node, *carrier), demand);
                }
            }
        }

        let capabilities: BTreeMap<NodeId, NodeCapability> = self
            .district
            .nodes()
            .into_iter()
            .map(|node| (node, NodeCapability::collect(period.data, node, &units)))
            .collect();

        let mut layout = PeriodLayout {
            index: period.index,
            steps: period.data.steps,
            dt_h: period.data.dt_h,
            weight: period.data.weight,
            units,
            exchanges: Vec::new(),
            grid: Vec::new(),
            deliveries: Vec::new(),
            peak: None,
        };
        for carrier in Carrier::iter() {
            ctx = exchange::link_carrier(ctx, period, carrier, &capabilities, &mut layout)?;
        }
        Ok((ctx, layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Building, DeviceEconomics, DeviceInstance, DeviceKind, Hub, NodeSeries};

    #[test]
    fn test_capacity_ref_rows() {
        let (terms, rhs) = CapacityRef::Fixed(100.0).relative(VarId(3), 0.5);
        assert_eq!(terms, vec![(VarId(3), 1.0)]);
        assert_eq!(rhs, 50.0);

        let sized = CapacityRef::Sized {
            var: VarId(0),
            max: 10.0,
        };
        let (terms, rhs) = sized.relative(VarId(3), 0.5);
        assert_eq!(terms, vec![(VarId(3), 1.0), (VarId(0), -0.5)]);
        assert_eq!(rhs, 0.0);
        assert_eq!(sized.upper(), 10.0);
        assert_eq!(sized.value(&[7.0]), 7.0);
    }

    #[test]
    fn test_hub_sizing_variable_is_bounded_by_rows() {
        let catalogue = Catalogue::new().with(DeviceSpec {
            abbreviation: "BOI".into(),
            kind: DeviceKind::Boiler {
                fuel: Carrier::Gas,
                eta_th: 0.9,
            },
            economics: DeviceEconomics {
                inv_var: 100.0,
                ann_factor: 0.1,
                min_cap: 1000.0,
                max_cap: 5000.0,
                ..Default::default()
            },
        })
        .unwrap();
        let district = District {
            buildings: vec![Building::default()],
            hub: Some(Hub {
                devices: vec![DeviceInstance::sizing("BOI")],
            }),
            ..Default::default()
        };
        let market = Market::new();
        let settings = DispatchSettings::default();
        let mut period = PeriodData::new(2, 1.0);
        period.buildings.push(NodeSeries::default());

        let builder = EnergyBalanceModelBuilder::new(&catalogue, &district, &market, &settings);
        let (ctx, layout) = builder.build(&[period]).unwrap();
        let sizing: Vec<_> = ctx.rows().iter().filter(|r| r.group == "sizing[BOI@hub]").collect();
        assert_eq!(sizing.len(), 2);
        assert_eq!(sizing[0].sense, Sense::Le);
        assert_eq!(sizing[0].rhs, 5000.0);
        assert!(matches!(layout.capacities[0].capacity, CapacityRef::Sized { max, .. } if max == 5000.0));
        assert!((layout.horizon_share - 2.0 / HOURS_PER_YEAR).abs() < 1e-15);
        // Investment is charged pro rata.
        let var = match layout.capacities[0].capacity {
            CapacityRef::Sized { var, .. } => var,
            CapacityRef::Fixed(_) => unreachable!(),
        };
        let expected = 100.0 * 0.1 / 1000.0 * 2.0 / HOURS_PER_YEAR;
        assert!((ctx.objective()[&var] - expected).abs() < 1e-15);
    }

    #[test]
    fn test_empty_period_list_rejected() {
        let catalogue = Catalogue::new();
        let district = District::default();
        let market = Market::new();
        let settings = DispatchSettings::default();
        let builder = EnergyBalanceModelBuilder::new(&catalogue, &district, &market, &settings);
        assert!(matches!(builder.build(&[]), Err(HubError::DataInconsistency { .. })));
    }
}
