//! Linear single-input conversion devices: boilers, CHPs, heat pumps,
//! chillers, fuel cells, electrolysers, Sabatier reactors.

use super::{CarrierFlow, FlowLimit, UnitContext, UnitFlows, UnitLayout};
use crate::domain::{Rating, Relation};
use crate::error::{HubError, HubResult};
use crate::optimizer::model::{ModelContext, Sense, VarKind};

/// `output_k[t] (=|≤) η_k[t] × input[t]`, with the rated flow bounded by
/// the installed capacity.
pub fn add_conversion(mut ctx: ModelContext, unit: &UnitContext<'_>) -> HubResult<(ModelContext, UnitLayout)> {
    let label = unit.label();
    let ambient = unit.period.data.ambient_c.as_deref();
    let conversion = unit.spec.kind.conversion(ambient).ok_or_else(|| {
        HubError::data(
            format!("{label}.ambient_c"),
            "device needs an ambient temperature series",
        )
    })?;
    let steps = unit.steps();

    let input = ctx.add_block(
        &unit.prefix(&format!("in.{}", conversion.input)),
        steps,
        0.0,
        f64::INFINITY,
        VarKind::Continuous,
    );
    ctx.outflow(unit.key(conversion.input), input);

    let conversion_group = format!("conversion[{label}]");
    let mut outputs = Vec::with_capacity(conversion.outputs.len());
    for output in &conversion.outputs {
        let block = ctx.add_block(
            &unit.prefix(&format!("out.{}", output.carrier)),
            steps,
            0.0,
            f64::INFINITY,
            VarKind::Continuous,
        );
        ctx.inflow(unit.key(output.carrier), block);
        let sense = match output.relation {
            Relation::Equal => Sense::Eq,
            Relation::AtMost => Sense::Le,
        };
        for t in 0..steps {
            ctx.constrain(
                &conversion_group,
                unit.row_name(&format!("conversion.{}", output.carrier), t),
                vec![(block.at(t), 1.0), (input.at(t), -output.efficiency.at(t))],
                sense,
                0.0,
            );
        }
        outputs.push(CarrierFlow {
            carrier: output.carrier,
            block,
        });
    }

    let rated = match conversion.rating {
        Rating::Input => input,
        Rating::Output(k) => outputs[k].block,
    };
    let capacity_group = format!("capacity[{label}]");
    for t in 0..steps {
        let (terms, rhs) = unit.capacity.relative(rated.at(t), 1.0);
        ctx.constrain(&capacity_group, unit.row_name("capacity", t), terms, Sense::Le, rhs);
    }

    let max_input = match conversion.rating {
        Rating::Input => unit.capacity.upper(),
        Rating::Output(k) => unit.capacity.upper() / conversion.outputs[k].efficiency.min(),
    };
    let mut limits = vec![FlowLimit {
        carrier: conversion.input,
        produce: 0.0,
        consume: max_input,
    }];
    limits.extend(conversion.outputs.iter().map(|o| FlowLimit {
        carrier: o.carrier,
        produce: max_input * o.efficiency.max(),
        consume: 0.0,
    }));

    let flows = UnitFlows::Conversion {
        input: CarrierFlow {
            carrier: conversion.input,
            block: input,
        },
        outputs,
    };
    Ok((ctx, unit.layout(flows, limits)))
}
