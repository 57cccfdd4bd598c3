//! Carrier exchange between nodes and with upstream markets.
//!
//! - bus carriers (electricity, gas): every node may withdraw from or inject
//!   into a district bus; the bus trades with the grid at the connection point
//! - network carriers (heat, cooling): the hub injects, buildings withdraw,
//!   and injection equals withdrawals plus the network losses
//! - delivered fuels: bought at the node from its market
//!
//! Every Big-M comes from the node capabilities, i.e. the largest flow the
//! node's demand and devices can actually absorb or produce.

use std::collections::BTreeMap;

use super::objective::{export_coefficient, import_coefficient, peak_coefficient};
use super::{
    DeliveryLayout, ExchangeLayout, GridLayout, NodeCapability, PeakLayout, PeriodContext, PeriodLayout,
};
use crate::domain::{Carrier, CarrierLink, NodeId};
use crate::error::HubResult;
use crate::optimizer::model::{Block, ModelContext, Sense, VarKind};

pub fn link_carrier(
    ctx: ModelContext,
    period: &PeriodContext<'_>,
    carrier: Carrier,
    capabilities: &BTreeMap<NodeId, NodeCapability>,
    layout: &mut PeriodLayout,
) -> HubResult<ModelContext> {
    let ctx = match CarrierLink::of(carrier, period.district, period.market) {
        CarrierLink::Bus => add_bus(ctx, period, carrier, capabilities, layout),
        CarrierLink::Network => add_network(ctx, period, carrier, capabilities, layout),
        CarrierLink::Delivered => add_deliveries(ctx, period, carrier, capabilities, layout),
        CarrierLink::Local => ctx,
    };
    Ok(ctx)
}

/// Binary `dir` with `a ≤ a_max·dir` and `b ≤ b_max·(1 − dir)`.
fn exclusive_pair(
    ctx: &mut ModelContext,
    group: &str,
    prefix: &str,
    (a, a_max): (Block, f64),
    (b, b_max): (Block, f64),
) -> Block {
    let dir = ctx.add_block(&format!("{prefix}.direction"), a.len, 0.0, 1.0, VarKind::Binary);
    for t in 0..a.len {
        ctx.constrain(
            group,
            format!("{group}.first[t{t}]"),
            vec![(a.at(t), 1.0), (dir.at(t), -a_max)],
            Sense::Le,
            0.0,
        );
        ctx.constrain(
            group,
            format!("{group}.second[t{t}]"),
            vec![(b.at(t), 1.0), (dir.at(t), b_max)],
            Sense::Le,
            b_max,
        );
    }
    dir
}

fn add_bus(
    mut ctx: ModelContext,
    period: &PeriodContext<'_>,
    carrier: Carrier,
    capabilities: &BTreeMap<NodeId, NodeCapability>,
    layout: &mut PeriodLayout,
) -> ModelContext {
    let steps = period.data.steps;
    let p = period.index;
    let mut withdrawals = Vec::new();
    let mut injections = Vec::new();
    let (mut total_withdraw, mut total_inject) = (0.0, 0.0);

    for (node, capability) in capabilities {
        let (max_withdraw, max_inject) = (capability.consume(carrier), capability.produce(carrier));
        if max_withdraw <= 0.0 && max_inject <= 0.0 {
            continue;
        }
        let prefix = format!("{carrier}@{node}.p{p}");
        let key = period.key(*node, carrier);
        let withdraw = (max_withdraw > 0.0).then(|| {
            let block = ctx.add_block(&format!("{prefix}.withdraw"), steps, 0.0, max_withdraw, VarKind::Continuous);
            ctx.inflow(key, block);
            block
        });
        let inject = (max_inject > 0.0).then(|| {
            let block = ctx.add_block(&format!("{prefix}.inject"), steps, 0.0, max_inject, VarKind::Continuous);
            ctx.outflow(key, block);
            block
        });
        let direction = match (withdraw, inject) {
            (Some(w), Some(i)) => Some(exclusive_pair(
                &mut ctx,
                &format!("exchange[{carrier}@{node}]"),
                &prefix,
                (w, max_withdraw),
                (i, max_inject),
            )),
            _ => None,
        };
        withdrawals.extend(withdraw);
        injections.extend(inject);
        total_withdraw += max_withdraw;
        total_inject += max_inject;
        layout.exchanges.push(ExchangeLayout {
            node: *node,
            carrier,
            withdraw,
            inject,
            direction,
        });
    }
    if withdrawals.is_empty() && injections.is_empty() {
        return ctx;
    }

    let market = period.market.get(carrier);
    let objective = period.settings.objective;
    let (dt, weight) = (period.data.dt_h, period.objective_weight);
    let prefix = format!("{carrier}@gcp.p{p}");

    let import = market.filter(|_| total_withdraw > 0.0).map(|m| {
        let block = ctx.add_block(&format!("{prefix}.import"), steps, 0.0, total_withdraw, VarKind::Continuous);
        let coefficient = import_coefficient(m, objective, dt, weight);
        for v in block.iter() {
            ctx.add_objective_term(v, coefficient);
        }
        if let Some(limit) = m.import_limit {
            let group = format!("import_limit[{carrier}]");
            for t in 0..steps {
                ctx.constrain(&group, format!("{group}[p{p},t{t}]"), vec![(block.at(t), 1.0)], Sense::Le, limit);
            }
        }
        block
    });
    let export = market
        .filter(|m| m.export_allowed && total_inject > 0.0)
        .map(|m| {
            let block = ctx.add_block(&format!("{prefix}.export"), steps, 0.0, total_inject, VarKind::Continuous);
            let coefficient = export_coefficient(m, objective, dt, weight);
            for v in block.iter() {
                ctx.add_objective_term(v, coefficient);
            }
            block
        });
    let direction = match (import, export) {
        (Some(i), Some(e)) => Some(exclusive_pair(
            &mut ctx,
            &format!("gcp[{carrier}]"),
            &prefix,
            (i, total_withdraw),
            (e, total_inject),
        )),
        _ => None,
    };

    let group = format!("bus.{carrier}");
    for t in 0..steps {
        let mut terms: Vec<_> = injections.iter().map(|b| (b.at(t), 1.0)).collect();
        terms.extend(withdrawals.iter().map(|b| (b.at(t), -1.0)));
        terms.extend(import.map(|b| (b.at(t), 1.0)));
        terms.extend(export.map(|b| (b.at(t), -1.0)));
        ctx.constrain(&group, format!("{group}[p{p},t{t}]"), terms, Sense::Eq, 0.0);
    }

    if carrier == Carrier::Electricity && period.settings.peak_price > 0.0 {
        if let Some(import) = import {
            let days = ctx.add_block(&format!("{prefix}.peak"), period.data.days(), 0.0, f64::INFINITY, VarKind::Continuous);
            let coefficient = peak_coefficient(period.settings.peak_price, weight);
            for v in days.iter() {
                ctx.add_objective_term(v, coefficient);
            }
            let group = format!("peak[{carrier}]");
            for t in 0..steps {
                ctx.constrain(
                    &group,
                    format!("{group}[p{p},t{t}]"),
                    vec![(import.at(t), 1.0), (days.at(period.data.day_of(t)), -1.0)],
                    Sense::Le,
                    0.0,
                );
            }
            layout.peak = Some(PeakLayout { days });
        }
    }

    layout.grid.push(GridLayout {
        carrier,
        import,
        export,
        direction,
    });
    ctx
}

fn add_network(
    mut ctx: ModelContext,
    period: &PeriodContext<'_>,
    carrier: Carrier,
    capabilities: &BTreeMap<NodeId, NodeCapability>,
    layout: &mut PeriodLayout,
) -> ModelContext {
    let steps = period.data.steps;
    let p = period.index;
    let losses = period.data.network_losses.get(&carrier);
    let mut withdrawals = Vec::new();
    for (node, capability) in capabilities {
        if *node == NodeId::Hub || capability.consume(carrier) <= 0.0 {
            continue;
        }
        let block = ctx.add_block(
            &format!("{carrier}@{node}.p{p}.withdraw"),
            steps,
            0.0,
            capability.consume(carrier),
            VarKind::Continuous,
        );
        ctx.inflow(period.key(*node, carrier), block);
        withdrawals.push(block);
        layout.exchanges.push(ExchangeLayout {
            node: *node,
            carrier,
            withdraw: Some(block),
            inject: None,
            direction: None,
        });
    }
    let has_losses = losses.is_some_and(|l| l.iter().any(|v| *v > 0.0));
    if withdrawals.is_empty() && !has_losses {
        return ctx;
    }

    let inject = ctx.add_block(
        &format!("{carrier}@hub.p{p}.inject"),
        steps,
        0.0,
        f64::INFINITY,
        VarKind::Continuous,
    );
    ctx.outflow(period.key(NodeId::Hub, carrier), inject);
    layout.exchanges.push(ExchangeLayout {
        node: NodeId::Hub,
        carrier,
        withdraw: None,
        inject: Some(inject),
        direction: None,
    });

    let group = format!("network.{carrier}");
    for t in 0..steps {
        let mut terms = vec![(inject.at(t), 1.0)];
        terms.extend(withdrawals.iter().map(|b| (b.at(t), -1.0)));
        let loss = losses.map_or(0.0, |l| l[t]);
        ctx.constrain(&group, format!("{group}[p{p},t{t}]"), terms, Sense::Eq, loss);
    }
    ctx
}

fn add_deliveries(
    mut ctx: ModelContext,
    period: &PeriodContext<'_>,
    carrier: Carrier,
    capabilities: &BTreeMap<NodeId, NodeCapability>,
    layout: &mut PeriodLayout,
) -> ModelContext {
    let Some(market) = period.market.get(carrier) else {
        return ctx;
    };
    let steps = period.data.steps;
    let p = period.index;
    let coefficient = import_coefficient(market, period.settings.objective, period.data.dt_h, period.objective_weight);
    for (node, capability) in capabilities {
        let max_import = capability.consume(carrier);
        if max_import <= 0.0 {
            continue;
        }
        let import = ctx.add_block(
            &format!("{carrier}@{node}.p{p}.delivery"),
            steps,
            0.0,
            max_import,
            VarKind::Continuous,
        );
        ctx.inflow(period.key(*node, carrier), import);
        for v in import.iter() {
            ctx.add_objective_term(v, coefficient);
        }
        if let Some(limit) = market.import_limit {
            let group = format!("import_limit[{carrier}@{node}]");
            for t in 0..steps {
                ctx.constrain(&group, format!("{group}[p{p},t{t}]"), vec![(import.at(t), 1.0)], Sense::Le, limit);
            }
        }
        layout.deliveries.push(DeliveryLayout {
            node: *node,
            carrier,
            import,
        });
    }
    ctx
}
