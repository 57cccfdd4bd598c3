//! Solver-independent MILP representation.
//!
//! Variables live in one contiguous column vector addressed by [`VarId`];
//! time-indexed families are allocated as [`Block`]s so `(unit, t)` lookups
//! are plain offsets. Constraint generators take a [`ModelContext`] by value
//! and hand it back, so every step can be built and tested in isolation.
//!
//! Carrier balances are not written by the generators directly. They post
//! inflow/outflow terms to the [`BalanceLedger`], and [`ModelContext::close_balances`]
//! turns the ledger into one equality row per `(period, node, carrier, t)`.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::domain::{Carrier, NodeId};

/// Feasibility tolerance used when checking solver incumbents.
pub const FEASIBILITY_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VarId(pub usize);

/// `len` consecutive variables starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Block {
    pub start: usize,
    pub len: usize,
}

impl Block {
    pub fn at(&self, t: usize) -> VarId {
        debug_assert!(t < self.len, "block index {t} out of {}", self.len);
        VarId(self.start + t)
    }

    pub fn iter(&self) -> impl Iterator<Item = VarId> {
        (self.start..self.start + self.len).map(VarId)
    }

    pub fn values<'a>(&self, solution: &'a [f64]) -> &'a [f64] {
        &solution[self.start..self.start + self.len]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Continuous,
    Binary,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub kind: VarKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone)]
pub struct Row {
    pub name: String,
    /// Diagnostic family, e.g. `balance.heat[b0]`. Infeasibility reports
    /// are expressed in groups rather than single rows.
    pub group: String,
    pub terms: Vec<(VarId, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

impl Row {
    pub fn activity(&self, values: &[f64]) -> f64 {
        self.terms.iter().map(|(v, c)| c * values[v.0]).sum()
    }

    /// Amount by which `values` violate this row (0 when satisfied).
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.activity(values);
        match self.sense {
            Sense::Le => (lhs - self.rhs).max(0.0),
            Sense::Ge => (self.rhs - lhs).max(0.0),
            Sense::Eq => (lhs - self.rhs).abs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BalanceKey {
    pub period: usize,
    pub node: NodeId,
    pub carrier: Carrier,
}

#[derive(Debug, Clone, Default)]
struct BalanceEntry {
    /// Signed terms per timestep: + inbound, - outbound
    terms: Vec<Vec<(VarId, f64)>>,
    /// External demand per timestep
    demand: Vec<f64>,
}

/// Inflow/outflow terms collected per node and carrier.
#[derive(Debug, Clone, Default)]
pub struct BalanceLedger {
    entries: BTreeMap<BalanceKey, BalanceEntry>,
}

impl BalanceLedger {
    fn entry(&mut self, key: BalanceKey, steps: usize) -> &mut BalanceEntry {
        let entry = self.entries.entry(key).or_default();
        if entry.terms.len() < steps {
            entry.terms.resize(steps, Vec::new());
            entry.demand.resize(steps, 0.0);
        }
        entry
    }

    pub fn contains(&self, key: &BalanceKey) -> bool {
        self.entries.contains_key(key)
    }
}

/// Worst violated constraint or bound of a candidate solution.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub amount: f64,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelContext {
    columns: Vec<Column>,
    rows: Vec<Row>,
    objective: BTreeMap<VarId, f64>,
    objective_constant: f64,
    ledger: BalanceLedger,
}

impl ModelContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, name: impl Into<String>, lower: f64, upper: f64, kind: VarKind) -> VarId {
        let id = VarId(self.columns.len());
        let (lower, upper) = match kind {
            VarKind::Binary => (0.0, 1.0),
            VarKind::Continuous => (lower, upper),
        };
        self.columns.push(Column {
            name: name.into(),
            lower,
            upper,
            kind,
        });
        id
    }

    /// Allocate `len` variables named `prefix[t]`.
    pub fn add_block(&mut self, prefix: &str, len: usize, lower: f64, upper: f64, kind: VarKind) -> Block {
        let start = self.columns.len();
        for t in 0..len {
            self.add_var(format!("{prefix}[{t}]"), lower, upper, kind);
        }
        Block { start, len }
    }

    pub fn constrain(
        &mut self,
        group: &str,
        name: impl Into<String>,
        terms: Vec<(VarId, f64)>,
        sense: Sense,
        rhs: f64,
    ) {
        self.rows.push(Row {
            name: name.into(),
            group: group.to_string(),
            terms,
            sense,
            rhs,
        });
    }

    pub fn add_objective_term(&mut self, var: VarId, coefficient: f64) {
        if coefficient != 0.0 {
            *self.objective.entry(var).or_insert(0.0) += coefficient;
        }
    }

    pub fn add_objective_constant(&mut self, value: f64) {
        self.objective_constant += value;
    }

    /// Post `coefficient × var` as an inflow (> 0) or outflow (< 0) of a balance.
    pub fn post_flow(&mut self, key: BalanceKey, steps: usize, t: usize, var: VarId, coefficient: f64) {
        self.ledger.entry(key, steps).terms[t].push((var, coefficient));
    }

    pub fn inflow(&mut self, key: BalanceKey, block: Block) {
        for t in 0..block.len {
            self.post_flow(key, block.len, t, block.at(t), 1.0);
        }
    }

    pub fn outflow(&mut self, key: BalanceKey, block: Block) {
        for t in 0..block.len {
            self.post_flow(key, block.len, t, block.at(t), -1.0);
        }
    }

    /// Add external demand to a balance (accumulates).
    pub fn post_demand(&mut self, key: BalanceKey, demand: &[f64]) {
        let entry = self.ledger.entry(key, demand.len());
        for (slot, d) in entry.demand.iter_mut().zip(demand) {
            *slot += d;
        }
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    /// Emit one equality row per ledger entry and timestep:
    /// `Σ inflows − Σ outflows = demand`.
    pub fn close_balances(mut self) -> Self {
        let ledger = std::mem::take(&mut self.ledger);
        for (key, entry) in ledger.entries {
            let group = format!("balance.{}[{}]", key.carrier, key.node);
            for (t, (terms, demand)) in entry.terms.into_iter().zip(entry.demand).enumerate() {
                let name = format!("balance.{}[{},p{},t{}]", key.carrier, key.node, key.period, t);
                self.constrain(&group, name, terms, Sense::Eq, demand);
            }
        }
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn objective(&self) -> &BTreeMap<VarId, f64> {
        &self.objective
    }

    pub fn num_vars(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_binaries(&self) -> usize {
        self.columns.iter().filter(|c| c.kind == VarKind::Binary).count()
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective_constant
            + self
                .objective
                .iter()
                .map(|(v, c)| c * values[v.0])
                .sum::<f64>()
    }

    /// Distinct row groups in insertion order.
    pub fn groups(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.group.as_str()))
            .map(|r| r.group.clone())
            .collect()
    }

    /// Copy of this model without the given row groups and with a zero
    /// objective, used for feasibility checks.
    pub fn feasibility_subproblem(&self, excluded: &HashSet<String>) -> ModelContext {
        ModelContext {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|r| !excluded.contains(&r.group))
                .cloned()
                .collect(),
            objective: BTreeMap::new(),
            objective_constant: 0.0,
            ledger: BalanceLedger::default(),
        }
    }

    /// Largest bound, integrality or row violation of `values`.
    pub fn max_violation(&self, values: &[f64]) -> Violation {
        let mut worst = Violation {
            amount: 0.0,
            location: None,
        };
        if values.len() != self.columns.len() {
            return Violation {
                amount: f64::INFINITY,
                location: Some(format!(
                    "solution has {} values for {} columns",
                    values.len(),
                    self.columns.len()
                )),
            };
        }
        let mut record = |amount: f64, location: &dyn Fn() -> String| {
            if !amount.is_finite() || amount > worst.amount {
                worst = Violation {
                    amount: if amount.is_finite() { amount } else { f64::INFINITY },
                    location: Some(location()),
                };
            }
        };
        for (column, value) in self.columns.iter().zip(values) {
            let bound = (column.lower - value).max(value - column.upper).max(0.0);
            record(bound, &|| format!("bounds of {}", column.name));
            if column.kind == VarKind::Binary {
                let integrality = (value - value.round()).abs();
                record(integrality, &|| format!("integrality of {}", column.name));
            }
            if !value.is_finite() {
                record(f64::INFINITY, &|| format!("non-finite value of {}", column.name));
            }
        }
        for row in &self.rows {
            record(row.violation(values), &|| row.name.clone());
        }
        worst
    }

    pub fn is_feasible(&self, values: &[f64]) -> bool {
        self.max_violation(values).amount <= FEASIBILITY_TOLERANCE * scale_of(values)
    }
}

/// Tolerance scale: absolute for small magnitudes, relative for large flows.
fn scale_of(values: &[f64]) -> f64 {
    let peak = values
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    peak.max(1.0)
}
