//! Storage devices.
//!
//! State of charge lives on `steps + 1` boundary points:
//!
//! ```text
//! soc[t+1] = soc[t]·(1 − loss)^dt + ch[t]·η_ch·dt − dch[t]/η_dch·dt
//! soc[0]   = soc[T]
//! ```
//!
//! `soc` is in Wh, charge and discharge in W.

use super::{FlowLimit, UnitContext, UnitFlows, UnitLayout};
use crate::domain::DeviceKind;
use crate::error::{HubError, HubResult};
use crate::optimizer::model::{ModelContext, Sense, VarKind};

pub fn add_storage(mut ctx: ModelContext, unit: &UnitContext<'_>) -> HubResult<(ModelContext, UnitLayout)> {
    let label = unit.label();
    let DeviceKind::Storage(params) = &unit.spec.kind else {
        return Err(HubError::data(label, "not a storage device"));
    };
    let steps = unit.steps();
    let dt = unit.period.data.dt_h;
    let carrier = params.carrier;

    let charge = ctx.add_block(&unit.prefix("charge"), steps, 0.0, f64::INFINITY, VarKind::Continuous);
    let discharge = ctx.add_block(&unit.prefix("discharge"), steps, 0.0, f64::INFINITY, VarKind::Continuous);
    let soc = ctx.add_block(&unit.prefix("soc"), steps + 1, 0.0, f64::INFINITY, VarKind::Continuous);
    ctx.outflow(unit.key(carrier), charge);
    ctx.inflow(unit.key(carrier), discharge);

    let storage_group = format!("storage[{label}]");
    let retention = params.retention(dt);
    for t in 0..steps {
        ctx.constrain(
            &storage_group,
            unit.row_name("soc_recurrence", t),
            vec![
                (soc.at(t + 1), 1.0),
                (soc.at(t), -retention),
                (charge.at(t), -params.eta_ch * dt),
                (discharge.at(t), dt / params.eta_dch),
            ],
            Sense::Eq,
            0.0,
        );
    }
    ctx.constrain(
        &storage_group,
        unit.row_name("soc_cyclic", 0),
        vec![(soc.at(0), 1.0), (soc.at(steps), -1.0)],
        Sense::Eq,
        0.0,
    );
    if let Some(init) = params.soc_init {
        let (terms, rhs) = unit.capacity.relative(soc.at(0), init);
        ctx.constrain(&storage_group, unit.row_name("soc_init", 0), terms, Sense::Eq, rhs);
    }

    // soc[T] equals soc[0], so the last boundary point needs no own bounds.
    let bounds_group = format!("soc_bounds[{label}]");
    for t in 0..steps {
        let (terms, rhs) = unit.capacity.relative(soc.at(t), params.soc_max);
        ctx.constrain(&bounds_group, unit.row_name("soc_max", t), terms, Sense::Le, rhs);
        if params.soc_min > 0.0 {
            let (terms, rhs) = unit.capacity.relative(soc.at(t), params.soc_min);
            ctx.constrain(&bounds_group, unit.row_name("soc_min", t), terms, Sense::Ge, rhs);
        }
    }

    let capacity_group = format!("capacity[{label}]");
    for t in 0..steps {
        let (terms, rhs) = unit.capacity.relative(charge.at(t), params.coeff_ch);
        ctx.constrain(&capacity_group, unit.row_name("charge", t), terms, Sense::Le, rhs);
        let (terms, rhs) = unit.capacity.relative(discharge.at(t), params.coeff_dch);
        ctx.constrain(&capacity_group, unit.row_name("discharge", t), terms, Sense::Le, rhs);
    }

    let max_charge = params.coeff_ch * unit.capacity.upper();
    let max_discharge = params.coeff_dch * unit.capacity.upper();
    let mode = if unit.period.settings.exclusive_storage_operation && max_charge > 0.0 && max_discharge > 0.0 {
        let mode = ctx.add_block(&unit.prefix("mode"), steps, 0.0, 1.0, VarKind::Binary);
        let group = format!("exclusive[{label}]");
        for t in 0..steps {
            ctx.constrain(
                &group,
                unit.row_name("exclusive_charge", t),
                vec![(charge.at(t), 1.0), (mode.at(t), -max_charge)],
                Sense::Le,
                0.0,
            );
            ctx.constrain(
                &group,
                unit.row_name("exclusive_discharge", t),
                vec![(discharge.at(t), 1.0), (mode.at(t), max_discharge)],
                Sense::Le,
                max_discharge,
            );
        }
        Some(mode)
    } else {
        None
    };

    let limits = vec![FlowLimit {
        carrier,
        produce: max_discharge,
        consume: max_charge,
    }];
    let flows = UnitFlows::Storage {
        carrier,
        charge,
        discharge,
        soc,
        mode,
    };
    Ok((ctx, unit.layout(flows, limits)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Building, Carrier, DeviceEconomics, DeviceSpec, District, Market, NodeId, NodeSeries, PeriodData,
        StorageParams,
    };
    use crate::optimizer::builder::{CapacityRef, PeriodContext};
    use crate::optimizer::types::DispatchSettings;

    fn tes(soc_init: Option<f64>) -> DeviceSpec {
        DeviceSpec {
            abbreviation: "TES".into(),
            kind: DeviceKind::Storage(StorageParams {
                carrier: Carrier::Heat,
                soc_min: 0.1,
                soc_max: 0.9,
                eta_ch: 0.95,
                eta_dch: 0.9,
                coeff_ch: 0.5,
                coeff_dch: 0.25,
                standby_loss: 0.01,
                soc_init,
            }),
            economics: DeviceEconomics::default(),
        }
    }

    fn build(spec: &DeviceSpec, exclusive: bool) -> (ModelContext, UnitLayout) {
        let district = District {
            buildings: vec![Building::default()],
            ..Default::default()
        };
        let market = Market::new();
        let settings = DispatchSettings {
            exclusive_storage_operation: exclusive,
            ..Default::default()
        };
        let mut data = PeriodData::new(3, 0.5);
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
            spec,
            capacity_index: 0,
            capacity: CapacityRef::Fixed(2000.0),
        };
        add_storage(ModelContext::new(), &unit).unwrap()
    }

    #[test]
    fn test_recurrence_coefficients() {
        let (ctx, layout) = build(&tes(None), false);
        let UnitFlows::Storage { soc, mode, .. } = layout.flows else {
            panic!("expected storage flows");
        };
        assert_eq!(soc.len, 4);
        assert!(mode.is_none());

        let first = &ctx.rows()[0];
        assert_eq!(first.group, "storage[TES@b0]");
        assert!((first.terms[1].1 + 0.99f64.powf(0.5)).abs() < 1e-12);
        assert!((first.terms[2].1 + 0.95 * 0.5).abs() < 1e-12);
        assert!((first.terms[3].1 - 0.5 / 0.9).abs() < 1e-12);

        let cyclic = &ctx.rows()[3];
        assert_eq!(cyclic.terms, vec![(soc.at(0), 1.0), (soc.at(3), -1.0)]);
        assert_eq!(layout.limits[0].consume, 1000.0);
        assert_eq!(layout.limits[0].produce, 500.0);
    }

    #[test]
    fn test_soc_init_pins_first_point() {
        let (ctx, _) = build(&tes(Some(0.5)), false);
        let init: Vec<_> = ctx.rows().iter().filter(|r| r.name.starts_with("soc_init")).collect();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].rhs, 1000.0);
        assert_eq!(init[0].sense, Sense::Eq);
    }

    #[test]
    fn test_exclusive_operation_uses_derived_big_m() {
        let (ctx, layout) = build(&tes(None), true);
        assert_eq!(ctx.num_binaries(), 3);
        let rows: Vec<_> = ctx.rows().iter().filter(|r| r.group == "exclusive[TES@b0]").collect();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].terms[1].1, -1000.0);
        assert_eq!(rows[1].rhs, 500.0);
        assert!(matches!(layout.flows, UnitFlows::Storage { mode: Some(_), .. }));
    }
}
