//! Disjunction constraint: the assignment must satisfy at least one of a
//! list of alternatives, each an arbitrary conjunction of bounds and
//! linear equations.

use crate::bounds::{BoundManager, Infeasible};
use crate::constraint::{ConstraintKind, ConstraintState, PhaseStatus, PiecewiseLinear};
use crate::context::Context;
use crate::cost::CostFunction;
use crate::equation::{parse_f64, parse_u32, Equation};
use crate::error::{Error, Result};
use crate::split::CaseSplit;
use crate::tightening::{BoundKind, Tightening};
use crate::EPSILON;

#[derive(Clone, Debug)]
pub struct DisjunctionConstraint {
    state: ConstraintState,
    disjuncts: Vec<CaseSplit>,
    obsolete: bool,
}

impl DisjunctionConstraint {
    pub fn new(id: u32, disjuncts: Vec<CaseSplit>) -> Self {
        Self {
            state: ConstraintState::new(id),
            disjuncts,
            obsolete: false,
        }
    }

    pub fn disjuncts(&self) -> &[CaseSplit] {
        &self.disjuncts
    }

    /// A disjunct stays feasible while each of its bounds still overlaps
    /// the variable's current interval. Equations are not interval-checked.
    fn disjunct_feasible(&self, ctx: &Context, bounds: &BoundManager, disjunct: &CaseSplit) -> bool {
        disjunct.bounds().iter().all(|t| match t.kind {
            BoundKind::Lower => t.value <= bounds.upper(ctx, t.variable) + EPSILON,
            BoundKind::Upper => t.value >= bounds.lower(ctx, t.variable) - EPSILON,
        })
    }

    fn feasible_indices(&self, ctx: &Context, bounds: &BoundManager) -> Vec<u32> {
        self.disjuncts
            .iter()
            .enumerate()
            .filter(|(_, d)| self.disjunct_feasible(ctx, bounds, d))
            .map(|(i, _)| i as u32)
            .collect()
    }

    fn check_phase(&mut self, ctx: &mut Context, bounds: &BoundManager) {
        if self.state.phase(ctx) != PhaseStatus::NotFixed {
            return;
        }
        let feasible = self.feasible_indices(ctx, bounds);
        if feasible.len() == 1 {
            self.state.fix_phase(ctx, PhaseStatus::Case(feasible[0]));
        }
    }

    pub fn parse(text: &str, id: u32) -> Result<Self> {
        let mut parts = text.split('|');
        let header = parts.next().unwrap_or("");
        let header_fields: Vec<&str> = header.split(',').collect();
        if header_fields.len() != 2 || header_fields[0] != "disj" {
            return Err(Error::MalformedQuery(format!("bad disj record `{text}`")));
        }
        let count = parse_u32(header_fields[1])? as usize;
        let mut disjuncts = Vec::with_capacity(count);
        for part in parts {
            let mut split = CaseSplit::new();
            for record in part.split(';').filter(|r| !r.is_empty()) {
                if let Some(rest) = record.strip_prefix("l:") {
                    let (var, val) = parse_bound(rest)?;
                    split.add_bound(Tightening::lower(var, val));
                } else if let Some(rest) = record.strip_prefix("u:") {
                    let (var, val) = parse_bound(rest)?;
                    split.add_bound(Tightening::upper(var, val));
                } else if let Some(rest) = record.strip_prefix("e:") {
                    split.add_equation(Equation::parse(rest)?);
                } else {
                    return Err(Error::MalformedQuery(format!(
                        "bad disjunct record `{record}`"
                    )));
                }
            }
            disjuncts.push(split);
        }
        if disjuncts.len() != count {
            return Err(Error::MalformedQuery(format!(
                "disj record promised {count} cases, found {}",
                disjuncts.len()
            )));
        }
        Ok(Self::new(id, disjuncts))
    }
}

fn parse_bound(text: &str) -> Result<(u32, f64)> {
    let mut fields = text.split(':');
    let var = parse_u32(
        fields
            .next()
            .ok_or_else(|| Error::MalformedQuery(format!("bad bound `{text}`")))?,
    )?;
    let val = parse_f64(
        fields
            .next()
            .ok_or_else(|| Error::MalformedQuery(format!("bad bound `{text}`")))?,
    )?;
    Ok((var, val))
}

impl PiecewiseLinear for DisjunctionConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Disjunction
    }

    fn state(&self) -> &ConstraintState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ConstraintState {
        &mut self.state
    }

    fn participating_variables(&self) -> Vec<u32> {
        let mut vars: Vec<u32> = self
            .disjuncts
            .iter()
            .flat_map(|d| d.variables().collect::<Vec<_>>())
            .collect();
        vars.sort_unstable();
        vars.dedup();
        vars
    }

    fn notify_lower_bound(
        &mut self,
        ctx: &mut Context,
        bounds: &BoundManager,
        _variable: u32,
        _value: f64,
    ) {
        self.check_phase(ctx, bounds);
    }

    fn notify_upper_bound(
        &mut self,
        ctx: &mut Context,
        bounds: &BoundManager,
        _variable: u32,
        _value: f64,
    ) {
        self.check_phase(ctx, bounds);
    }

    fn satisfied(&self, assignment: &[f64]) -> bool {
        self.disjuncts.iter().any(|d| d.holds(assignment, EPSILON))
    }

    fn case_splits(&self, ctx: &Context, bounds: &BoundManager) -> Vec<CaseSplit> {
        self.disjuncts
            .iter()
            .filter(|d| self.disjunct_feasible(ctx, bounds, d))
            .cloned()
            .collect()
    }

    fn valid_case_split(&self, ctx: &Context, _bounds: &BoundManager) -> Option<CaseSplit> {
        match self.state.phase(ctx) {
            PhaseStatus::Case(i) => self.disjuncts.get(i as usize).cloned(),
            _ => None,
        }
    }

    fn entailed_tightenings(
        &self,
        ctx: &Context,
        bounds: &BoundManager,
        out: &mut Vec<Tightening>,
    ) {
        // Interval hull: a bound entailed by every feasible disjunct is
        // entailed by the disjunction.
        let feasible: Vec<&CaseSplit> = self
            .disjuncts
            .iter()
            .filter(|d| self.disjunct_feasible(ctx, bounds, d))
            .collect();
        if feasible.is_empty() {
            return;
        }
        for variable in self.participating_variables() {
            let lowers: Vec<f64> = feasible
                .iter()
                .map(|d| {
                    d.bounds()
                        .iter()
                        .filter(|t| t.variable == variable && t.kind == BoundKind::Lower)
                        .map(|t| t.value)
                        .fold(f64::NEG_INFINITY, f64::max)
                })
                .collect();
            if lowers.iter().all(|v| v.is_finite()) {
                let hull = lowers.iter().copied().fold(f64::INFINITY, f64::min);
                out.push(Tightening::lower(variable, hull));
            }
            let uppers: Vec<f64> = feasible
                .iter()
                .map(|d| {
                    d.bounds()
                        .iter()
                        .filter(|t| t.variable == variable && t.kind == BoundKind::Upper)
                        .map(|t| t.value)
                        .fold(f64::INFINITY, f64::min)
                })
                .collect();
            if uppers.iter().all(|v| v.is_finite()) {
                let hull = uppers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                out.push(Tightening::upper(variable, hull));
            }
        }
    }

    fn auxiliary(&self, _equations: &mut Vec<Equation>, _tightenings: &mut Vec<Tightening>) {}

    fn eliminate_variable(
        &mut self,
        ctx: &mut Context,
        variable: u32,
        value: f64,
    ) -> std::result::Result<Vec<Tightening>, Infeasible> {
        let mut remaining = Vec::with_capacity(self.disjuncts.len());
        for disjunct in self.disjuncts.drain(..) {
            let consistent = disjunct.bounds().iter().all(|t| {
                t.variable != variable
                    || match t.kind {
                        BoundKind::Lower => value >= t.value - EPSILON,
                        BoundKind::Upper => value <= t.value + EPSILON,
                    }
            });
            if !consistent {
                continue;
            }
            let mut rebuilt = CaseSplit::new();
            for t in disjunct.bounds() {
                if t.variable != variable {
                    rebuilt.add_bound(*t);
                }
            }
            for eq in disjunct.equations() {
                let mut eq = eq.clone();
                eq.eliminate_variable(variable, value);
                rebuilt.add_equation(eq);
            }
            remaining.push(rebuilt);
        }
        if remaining.is_empty() {
            return Err(Infeasible);
        }
        self.disjuncts = remaining;
        if self.disjuncts.len() == 1 && self.disjuncts[0].equations().is_empty() {
            self.obsolete = true;
            self.state.set_phase(ctx, PhaseStatus::Case(0));
            return Ok(self.disjuncts[0].bounds().to_vec());
        }
        Ok(Vec::new())
    }

    fn update_variable_index(&mut self, old: u32, new: u32) {
        let mut rebuilt = Vec::with_capacity(self.disjuncts.len());
        for disjunct in &self.disjuncts {
            let mut split = CaseSplit::new();
            for t in disjunct.bounds() {
                let mut t = *t;
                if t.variable == old {
                    t.variable = new;
                }
                split.add_bound(t);
            }
            for eq in disjunct.equations() {
                let mut eq = eq.clone();
                eq.update_variable_index(old, new);
                split.add_equation(eq);
            }
            rebuilt.push(split);
        }
        self.disjuncts = rebuilt;
    }

    fn obsolete(&self) -> bool {
        self.obsolete
    }

    fn serialize_to_string(&self) -> String {
        let mut out = format!("disj,{}", self.disjuncts.len());
        for disjunct in &self.disjuncts {
            out.push('|');
            let mut records = Vec::new();
            for t in disjunct.bounds() {
                let tag = match t.kind {
                    BoundKind::Lower => 'l',
                    BoundKind::Upper => 'u',
                };
                records.push(format!("{tag}:{}:{}", t.variable, t.value));
            }
            for eq in disjunct.equations() {
                records.push(format!("e:{}", eq.serialize_to_string()));
            }
            out.push_str(&records.join(";"));
        }
        out
    }

    fn phase_candidates(&self, ctx: &Context, bounds: &BoundManager) -> Vec<PhaseStatus> {
        match self.state.phase(ctx) {
            PhaseStatus::NotFixed => self
                .feasible_indices(ctx, bounds)
                .into_iter()
                .map(PhaseStatus::Case)
                .collect(),
            fixed => vec![fixed],
        }
    }

    fn cost_function_component(
        &self,
        _ctx: &Context,
        _phase: PhaseStatus,
        _out: &mut CostFunction,
    ) {
        // Disjunctions do not contribute to the sum of infeasibilities;
        // they are resolved by case splitting only.
    }
}
