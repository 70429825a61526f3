//! Max constraint: `f = max(x_1, ..., x_n)`.
//!
//! Each case commits to one argmax candidate. Elements eliminated by
//! preprocessing fold into a single constant candidate; the sentinel
//! [`MAX_ELIMINATED_CASE`] names the case where that constant is the max.

use crate::bounds::{BoundManager, Infeasible};
use crate::constraint::{ConstraintKind, ConstraintState, PhaseStatus, PiecewiseLinear};
use crate::context::Context;
use crate::cost::CostFunction;
use crate::equation::{parse_f64, parse_u32, Equation, Relation};
use crate::error::{Error, Result};
use crate::split::CaseSplit;
use crate::tightening::Tightening;
use crate::EPSILON;

/// Case index meaning "the folded constant candidate is the max".
pub const MAX_ELIMINATED_CASE: u32 = u32::MAX;

#[derive(Clone, Debug)]
pub struct MaxConstraint {
    state: ConstraintState,
    f: u32,
    elements: Vec<u32>,
    eliminated_max: Option<f64>,
    obsolete: bool,
}

impl MaxConstraint {
    /// Creates `f = max(elements)`.
    pub fn new(id: u32, f: u32, elements: Vec<u32>) -> Self {
        Self {
            state: ConstraintState::new(id),
            f,
            elements,
            eliminated_max: None,
            obsolete: false,
        }
    }

    pub fn f(&self) -> u32 {
        self.f
    }

    pub fn elements(&self) -> &[u32] {
        &self.elements
    }

    /// Largest value among eliminated elements, if any were folded in.
    pub fn eliminated_max(&self) -> Option<f64> {
        self.eliminated_max
    }

    /// Largest lower bound any candidate guarantees.
    fn max_lower(&self, ctx: &Context, bounds: &BoundManager) -> f64 {
        let mut best = self.eliminated_max.unwrap_or(f64::NEG_INFINITY);
        for &x in &self.elements {
            best = best.max(bounds.lower(ctx, x));
        }
        best
    }

    /// Elements that can still be the max under the current bounds.
    fn viable_elements(&self, ctx: &Context, bounds: &BoundManager) -> Vec<u32> {
        let cutoff = self.max_lower(ctx, bounds) - EPSILON;
        self.elements
            .iter()
            .copied()
            .filter(|&x| bounds.upper(ctx, x) >= cutoff)
            .collect()
    }

    fn constant_viable(&self, ctx: &Context, bounds: &BoundManager) -> bool {
        match self.eliminated_max {
            Some(c) => c >= self.max_lower(ctx, bounds) - EPSILON,
            None => false,
        }
    }

    /// Fixes the phase when only one candidate remains viable.
    fn check_phase(&mut self, ctx: &mut Context, bounds: &BoundManager) {
        if self.state.phase(ctx) != PhaseStatus::NotFixed {
            return;
        }
        let viable = self.viable_elements(ctx, bounds);
        let constant = self.constant_viable(ctx, bounds);
        if viable.len() == 1 && !constant {
            self.state.fix_phase(ctx, PhaseStatus::Case(viable[0]));
        } else if viable.is_empty() && constant {
            self.state.fix_phase(ctx, PhaseStatus::Case(MAX_ELIMINATED_CASE));
        }
    }

    fn element_split(&self, winner: u32) -> CaseSplit {
        let mut split = CaseSplit::new();
        split.add_equation(Equation::with_terms(
            Relation::Eq,
            &[(1.0, self.f), (-1.0, winner)],
            0.0,
        ));
        for &other in &self.elements {
            if other != winner {
                split.add_equation(Equation::with_terms(
                    Relation::Ge,
                    &[(1.0, winner), (-1.0, other)],
                    0.0,
                ));
            }
        }
        if let Some(c) = self.eliminated_max {
            split.add_bound(Tightening::lower(winner, c));
        }
        split
    }

    fn constant_split(&self, c: f64) -> CaseSplit {
        let mut split = CaseSplit::new();
        split.add_bound(Tightening::lower(self.f, c));
        split.add_bound(Tightening::upper(self.f, c));
        for &x in &self.elements {
            split.add_bound(Tightening::upper(x, c));
        }
        split
    }

    pub fn parse(text: &str, id: u32) -> Result<Self> {
        let fields: Vec<&str> = text.split(',').collect();
        if fields.len() < 3 || fields[0] != "max" {
            return Err(Error::MalformedQuery(format!("bad max record `{text}`")));
        }
        let f = parse_u32(fields[1])?;
        let count = parse_u32(fields[2])? as usize;
        if fields.len() < 3 + count {
            return Err(Error::MalformedQuery(format!("truncated max record `{text}`")));
        }
        let elements = fields[3..3 + count]
            .iter()
            .map(|s| parse_u32(s))
            .collect::<Result<Vec<_>>>()?;
        let mut max = Self::new(id, f, elements);
        let rest = &fields[3 + count..];
        if rest.len() == 2 && rest[0] == "elim" {
            max.eliminated_max = Some(parse_f64(rest[1])?);
        } else if !rest.is_empty() {
            return Err(Error::MalformedQuery(format!("bad max record `{text}`")));
        }
        Ok(max)
    }
}

impl PiecewiseLinear for MaxConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Max
    }

    fn state(&self) -> &ConstraintState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ConstraintState {
        &mut self.state
    }

    fn participating_variables(&self) -> Vec<u32> {
        let mut vars = self.elements.clone();
        vars.push(self.f);
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
        let mut max = self.eliminated_max.unwrap_or(f64::NEG_INFINITY);
        for &x in &self.elements {
            max = max.max(assignment[x as usize]);
        }
        crate::fuzzy_eq(assignment[self.f as usize], max)
    }

    fn case_splits(&self, ctx: &Context, bounds: &BoundManager) -> Vec<CaseSplit> {
        let mut splits: Vec<CaseSplit> = self
            .viable_elements(ctx, bounds)
            .into_iter()
            .map(|x| self.element_split(x))
            .collect();
        if self.constant_viable(ctx, bounds) {
            if let Some(c) = self.eliminated_max {
                splits.push(self.constant_split(c));
            }
        }
        splits
    }

    fn valid_case_split(&self, ctx: &Context, _bounds: &BoundManager) -> Option<CaseSplit> {
        match self.state.phase(ctx) {
            PhaseStatus::Case(MAX_ELIMINATED_CASE) => {
                self.eliminated_max.map(|c| self.constant_split(c))
            }
            PhaseStatus::Case(winner) => Some(self.element_split(winner)),
            _ => None,
        }
    }

    fn entailed_tightenings(
        &self,
        ctx: &Context,
        bounds: &BoundManager,
        out: &mut Vec<Tightening>,
    ) {
        let ub_f = bounds.upper(ctx, self.f);
        let mut max_upper = self.eliminated_max.unwrap_or(f64::NEG_INFINITY);
        for &x in &self.elements {
            max_upper = max_upper.max(bounds.upper(ctx, x));
        }

        out.push(Tightening::lower(self.f, self.max_lower(ctx, bounds)));
        if max_upper.is_finite() {
            out.push(Tightening::upper(self.f, max_upper));
        }
        // Every element sits below the max.
        for &x in &self.elements {
            out.push(Tightening::upper(x, ub_f));
        }

        match self.state.phase(ctx) {
            PhaseStatus::Case(MAX_ELIMINATED_CASE) => {
                if let Some(c) = self.eliminated_max {
                    out.push(Tightening::lower(self.f, c));
                    out.push(Tightening::upper(self.f, c));
                }
            }
            PhaseStatus::Case(winner) => {
                out.push(Tightening::lower(self.f, bounds.lower(ctx, winner)));
                out.push(Tightening::upper(self.f, bounds.upper(ctx, winner)));
                out.push(Tightening::lower(winner, bounds.lower(ctx, self.f)));
            }
            _ => {}
        }
    }

    fn auxiliary(&self, equations: &mut Vec<Equation>, tightenings: &mut Vec<Tightening>) {
        // f >= x_i for every candidate.
        for &x in &self.elements {
            equations.push(Equation::with_terms(
                Relation::Ge,
                &[(1.0, self.f), (-1.0, x)],
                0.0,
            ));
        }
        if let Some(c) = self.eliminated_max {
            tightenings.push(Tightening::lower(self.f, c));
        }
    }

    fn eliminate_variable(
        &mut self,
        ctx: &mut Context,
        variable: u32,
        value: f64,
    ) -> std::result::Result<Vec<Tightening>, Infeasible> {
        if variable == self.f {
            // f pinned: every element sits below it; the constraint stays to
            // require that some element reaches it.
            return Ok(self
                .elements
                .iter()
                .map(|&x| Tightening::upper(x, value))
                .collect());
        }
        if !self.elements.contains(&variable) {
            return Ok(Vec::new());
        }
        self.elements.retain(|&x| x != variable);
        self.eliminated_max = Some(self.eliminated_max.map_or(value, |c| c.max(value)));
        if self.elements.is_empty() {
            self.obsolete = true;
            let c = self.eliminated_max.unwrap_or(value);
            self.state.set_phase(ctx, PhaseStatus::Case(MAX_ELIMINATED_CASE));
            return Ok(vec![Tightening::lower(self.f, c), Tightening::upper(self.f, c)]);
        }
        Ok(Vec::new())
    }

    fn update_variable_index(&mut self, old: u32, new: u32) {
        if self.f == old {
            self.f = new;
        }
        for x in &mut self.elements {
            if *x == old {
                *x = new;
            }
        }
    }

    fn obsolete(&self) -> bool {
        self.obsolete
    }

    fn serialize_to_string(&self) -> String {
        let mut out = format!("max,{},{}", self.f, self.elements.len());
        for &x in &self.elements {
            out.push_str(&format!(",{x}"));
        }
        if let Some(c) = self.eliminated_max {
            out.push_str(&format!(",elim,{c}"));
        }
        out
    }

    fn phase_candidates(&self, ctx: &Context, bounds: &BoundManager) -> Vec<PhaseStatus> {
        match self.state.phase(ctx) {
            PhaseStatus::NotFixed => {
                let mut candidates: Vec<PhaseStatus> = self
                    .viable_elements(ctx, bounds)
                    .into_iter()
                    .map(PhaseStatus::Case)
                    .collect();
                if self.constant_viable(ctx, bounds) {
                    candidates.push(PhaseStatus::Case(MAX_ELIMINATED_CASE));
                }
                candidates
            }
            fixed => vec![fixed],
        }
    }

    fn cost_function_component(&self, _ctx: &Context, phase: PhaseStatus, out: &mut CostFunction) {
        match phase {
            PhaseStatus::Case(MAX_ELIMINATED_CASE) => {
                if let Some(c) = self.eliminated_max {
                    // f - c, nonnegative under the auxiliary fact f >= c.
                    out.add_term(self.f, 1.0);
                    out.add_constant(-c);
                }
            }
            // f - x_winner, nonnegative under f >= x_i.
            PhaseStatus::Case(winner) => {
                out.add_term(self.f, 1.0);
                out.add_term(winner, -1.0);
            }
            _ => {}
        }
    }
}
