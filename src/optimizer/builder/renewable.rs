//! Curtailable renewable generation (PV, wind, hydro, solar thermal).

use super::{CarrierFlow, FlowLimit, UnitContext, UnitFlows, UnitLayout};
use crate::domain::{DeviceKind, NodeId};
use crate::error::{HubError, HubResult};
use crate::optimizer::model::{ModelContext, Sense, VarKind};

/// Output bounded by availability. Building series are absolute (W); hub
/// series are per W of installed capacity.
pub fn add_renewable(mut ctx: ModelContext, unit: &UnitContext<'_>) -> HubResult<(ModelContext, UnitLayout)> {
    let label = unit.label();
    let DeviceKind::Renewable { output: carrier } = unit.spec.kind else {
        return Err(HubError::data(label, "not a renewable device"));
    };
    let key = format!("{}.generation.{}", unit.node, unit.spec.abbreviation);
    let availability = unit
        .period
        .data
        .node(unit.node)
        .and_then(|series| series.generation.get(&unit.spec.abbreviation))
        .ok_or_else(|| HubError::data(key, "renewable device has no generation series"))?;

    let output = ctx.add_block(
        &unit.prefix(&format!("out.{carrier}")),
        unit.steps(),
        0.0,
        f64::INFINITY,
        VarKind::Continuous,
    );
    ctx.inflow(unit.key(carrier), output);

    let group = format!("availability[{label}]");
    for (t, available) in availability.iter().enumerate() {
        let (terms, rhs) = match unit.node {
            NodeId::Building(_) => (vec![(output.at(t), 1.0)], *available),
            NodeId::Hub => unit.capacity.relative(output.at(t), *available),
        };
        ctx.constrain(&group, unit.row_name("availability", t), terms, Sense::Le, rhs);
    }

    let peak = availability.iter().copied().fold(0.0, f64::max);
    let produce = match unit.node {
        NodeId::Building(_) => peak,
        NodeId::Hub => peak * unit.capacity.upper(),
    };
    let limits = vec![FlowLimit {
        carrier,
        produce,
        consume: 0.0,
    }];
    Ok((
        ctx,
        unit.layout(
            UnitFlows::Renewable {
                output: CarrierFlow {
                    carrier,
                    block: output,
                },
            },
            limits,
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Building, Carrier, DeviceEconomics, DeviceSpec, District, Hub, Market, NodeSeries, PeriodData,
    };
    use crate::optimizer::builder::{CapacityRef, PeriodContext};
    use crate::optimizer::model::VarId;
    use crate::optimizer::types::DispatchSettings;

    fn pv() -> DeviceSpec {
        DeviceSpec {
            abbreviation: "PV".into(),
            kind: DeviceKind::Renewable {
                output: Carrier::Electricity,
            },
            economics: DeviceEconomics::default(),
        }
    }

    #[test]
    fn test_building_and_hub_availability() {
        let spec = pv();
        let district = District {
            buildings: vec![Building::default()],
            hub: Some(Hub::default()),
            ..Default::default()
        };
        let market = Market::new();
        let settings = DispatchSettings::default();
        let mut data = PeriodData::new(2, 1.0);
        let mut building = NodeSeries::default();
        building.generation.insert("PV".into(), vec![0.0, 800.0]);
        data.buildings.push(building);
        data.hub.generation.insert("PV".into(), vec![0.1, 0.6]);
        let period = PeriodContext {
            index: 0,
            data: &data,
            district: &district,
            market: &market,
            settings: &settings,
            objective_weight: 1.0,
        };

        let unit = UnitContext {
            period: &period,
            node: NodeId::Building(0),
            spec: &spec,
            capacity_index: 0,
            capacity: CapacityRef::Fixed(1000.0),
        };
        let (ctx, layout) = add_renewable(ModelContext::new(), &unit).unwrap();
        assert_eq!(ctx.rows()[1].rhs, 800.0);
        assert_eq!(layout.limits[0].produce, 800.0);

        let sized = CapacityRef::Sized {
            var: VarId(0),
            max: 5000.0,
        };
        let mut base = ModelContext::new();
        base.add_var("cap", 0.0, f64::INFINITY, VarKind::Continuous);
        let unit = UnitContext {
            node: NodeId::Hub,
            capacity: sized,
            ..unit
        };
        let (ctx, layout) = add_renewable(base, &unit).unwrap();
        assert_eq!(ctx.rows()[1].terms[1], (VarId(0), -0.6));
        assert!((layout.limits[0].produce - 3000.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_generation_series() {
        let spec = pv();
        let district = District {
            buildings: vec![Building::default()],
            ..Default::default()
        };
        let market = Market::new();
        let settings = DispatchSettings::default();
        let mut data = PeriodData::new(2, 1.0);
        data.buildings.push(NodeSeries::default());
        let period = PeriodContext {
            index: 0,
            data: &data,
            district: &district,
            market: &market,
            settings: &settings,
            objective_weight: 1.0,
        };
        let unit = UnitContext {
            period: &period,
            node: NodeId::Building(0),
            spec: &spec,
            capacity_index: 0,
            capacity: CapacityRef::Fixed(1000.0),
        };
        let err = add_renewable(ModelContext::new(), &unit).unwrap_err();
        assert!(matches!(err, HubError::DataInconsistency { ref key, .. } if key == "b0.generation.PV"));
    }
}
