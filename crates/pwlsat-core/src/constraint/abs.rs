//! Absolute value constraint: `f = |b|`.

use crate::bounds::{BoundManager, Infeasible};
use crate::constraint::{ConstraintKind, ConstraintState, PhaseStatus, PiecewiseLinear};
use crate::context::Context;
use crate::cost::CostFunction;
use crate::equation::{parse_u32, Equation, Relation};
use crate::error::{Error, Result};
use crate::split::CaseSplit;
use crate::tightening::Tightening;
use crate::EPSILON;

#[derive(Clone, Debug)]
pub struct AbsConstraint {
    state: ConstraintState,
    b: u32,
    f: u32,
    obsolete: bool,
}

impl AbsConstraint {
    /// Creates `f = |b|`.
    pub fn new(id: u32, b: u32, f: u32) -> Self {
        Self {
            state: ConstraintState::new(id),
            b,
            f,
            obsolete: false,
        }
    }

    pub fn b(&self) -> u32 {
        self.b
    }

    pub fn f(&self) -> u32 {
        self.f
    }

    fn positive_split(&self) -> CaseSplit {
        let mut split = CaseSplit::new();
        split.add_bound(Tightening::lower(self.b, 0.0));
        split.add_equation(Equation::with_terms(
            Relation::Eq,
            &[(1.0, self.f), (-1.0, self.b)],
            0.0,
        ));
        split
    }

    fn negative_split(&self) -> CaseSplit {
        let mut split = CaseSplit::new();
        split.add_bound(Tightening::upper(self.b, 0.0));
        split.add_equation(Equation::with_terms(
            Relation::Eq,
            &[(1.0, self.f), (1.0, self.b)],
            0.0,
        ));
        split
    }

    pub fn parse(text: &str, id: u32) -> Result<Self> {
        let fields: Vec<&str> = text.split(',').collect();
        if fields.len() != 3 || fields[0] != "abs" {
            return Err(Error::MalformedQuery(format!("bad abs record `{text}`")));
        }
        let f = parse_u32(fields[1])?;
        let b = parse_u32(fields[2])?;
        Ok(Self::new(id, b, f))
    }
}

impl PiecewiseLinear for AbsConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::AbsoluteValue
    }

    fn state(&self) -> &ConstraintState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ConstraintState {
        &mut self.state
    }

    fn participating_variables(&self) -> Vec<u32> {
        vec![self.b, self.f]
    }

    fn notify_lower_bound(
        &mut self,
        ctx: &mut Context,
        bounds: &BoundManager,
        variable: u32,
        value: f64,
    ) {
        if variable == self.b && value >= 0.0 {
            self.state.fix_phase(ctx, PhaseStatus::AbsPositive);
        } else if variable == self.f && value > EPSILON {
            // A positive output rules out whichever piece the input interval
            // can no longer reach.
            if bounds.upper(ctx, self.b) < value - EPSILON {
                self.state.fix_phase(ctx, PhaseStatus::AbsNegative);
            } else if bounds.lower(ctx, self.b) > -value + EPSILON {
                self.state.fix_phase(ctx, PhaseStatus::AbsPositive);
            }
        }
    }

    fn notify_upper_bound(
        &mut self,
        ctx: &mut Context,
        _bounds: &BoundManager,
        variable: u32,
        value: f64,
    ) {
        if variable == self.b && value <= 0.0 {
            self.state.fix_phase(ctx, PhaseStatus::AbsNegative);
        }
    }

    fn satisfied(&self, assignment: &[f64]) -> bool {
        let b = assignment[self.b as usize];
        let f = assignment[self.f as usize];
        crate::fuzzy_eq(f, b.abs())
    }

    fn case_splits(&self, ctx: &Context, bounds: &BoundManager) -> Vec<CaseSplit> {
        let leaning_positive = self.polarity(ctx, bounds).unwrap_or(1.0) >= 0.0;
        if leaning_positive {
            vec![self.positive_split(), self.negative_split()]
        } else {
            vec![self.negative_split(), self.positive_split()]
        }
    }

    fn valid_case_split(&self, ctx: &Context, _bounds: &BoundManager) -> Option<CaseSplit> {
        match self.state.phase(ctx) {
            PhaseStatus::AbsPositive => Some(self.positive_split()),
            PhaseStatus::AbsNegative => Some(self.negative_split()),
            _ => None,
        }
    }

    fn entailed_tightenings(
        &self,
        ctx: &Context,
        bounds: &BoundManager,
        out: &mut Vec<Tightening>,
    ) {
        let lb_b = bounds.lower(ctx, self.b);
        let ub_b = bounds.upper(ctx, self.b);
        let lb_f = bounds.lower(ctx, self.f);
        let ub_f = bounds.upper(ctx, self.f);

        out.push(Tightening::lower(self.f, 0.0));
        out.push(Tightening::lower(self.f, lb_b.max(-ub_b)));
        out.push(Tightening::upper(self.f, ub_b.max(-lb_b)));
        // |b| <= ub_f boxes the input.
        out.push(Tightening::lower(self.b, -ub_f));
        out.push(Tightening::upper(self.b, ub_f));

        match self.state.phase(ctx) {
            PhaseStatus::AbsPositive => {
                out.push(Tightening::lower(self.f, lb_b));
                out.push(Tightening::upper(self.f, ub_b));
                out.push(Tightening::lower(self.b, lb_f));
            }
            PhaseStatus::AbsNegative => {
                out.push(Tightening::lower(self.f, -ub_b));
                out.push(Tightening::upper(self.f, -lb_b));
                out.push(Tightening::upper(self.b, -lb_f));
            }
            _ => {}
        }
    }

    fn auxiliary(&self, equations: &mut Vec<Equation>, tightenings: &mut Vec<Tightening>) {
        // f >= b, f >= -b and f >= 0 hold on both pieces.
        equations.push(Equation::with_terms(
            Relation::Ge,
            &[(1.0, self.f), (-1.0, self.b)],
            0.0,
        ));
        equations.push(Equation::with_terms(
            Relation::Ge,
            &[(1.0, self.f), (1.0, self.b)],
            0.0,
        ));
        tightenings.push(Tightening::lower(self.f, 0.0));
    }

    fn eliminate_variable(
        &mut self,
        _ctx: &mut Context,
        variable: u32,
        value: f64,
    ) -> std::result::Result<Vec<Tightening>, Infeasible> {
        if variable == self.b {
            self.obsolete = true;
            let f_value = value.abs();
            Ok(vec![
                Tightening::lower(self.f, f_value),
                Tightening::upper(self.f, f_value),
            ])
        } else if variable == self.f {
            if value < -EPSILON {
                return Err(Infeasible);
            }
            if value <= EPSILON {
                self.obsolete = true;
                return Ok(vec![
                    Tightening::lower(self.b, 0.0),
                    Tightening::upper(self.b, 0.0),
                ]);
            }
            // b = +value or b = -value; only the interval hull is linear, so
            // the constraint stays alive to decide the sign.
            Ok(vec![
                Tightening::lower(self.b, -value),
                Tightening::upper(self.b, value),
            ])
        } else {
            Ok(Vec::new())
        }
    }

    fn update_variable_index(&mut self, old: u32, new: u32) {
        if self.b == old {
            self.b = new;
        }
        if self.f == old {
            self.f = new;
        }
    }

    fn obsolete(&self) -> bool {
        self.obsolete
    }

    fn serialize_to_string(&self) -> String {
        format!("abs,{},{}", self.f, self.b)
    }

    fn supports_polarity(&self) -> bool {
        true
    }

    fn polarity(&self, ctx: &Context, bounds: &BoundManager) -> Option<f64> {
        let lb = bounds.lower(ctx, self.b);
        let ub = bounds.upper(ctx, self.b);
        if lb < 0.0 && ub > 0.0 && lb.is_finite() && ub.is_finite() {
            Some((ub + lb) / (ub - lb))
        } else {
            None
        }
    }

    fn phase_candidates(&self, ctx: &Context, bounds: &BoundManager) -> Vec<PhaseStatus> {
        match self.state.phase(ctx) {
            PhaseStatus::NotFixed => {
                let mut candidates = Vec::with_capacity(2);
                if bounds.upper(ctx, self.b) >= -EPSILON {
                    candidates.push(PhaseStatus::AbsPositive);
                }
                if bounds.lower(ctx, self.b) <= EPSILON {
                    candidates.push(PhaseStatus::AbsNegative);
                }
                candidates
            }
            fixed => vec![fixed],
        }
    }

    fn cost_function_component(&self, _ctx: &Context, phase: PhaseStatus, out: &mut CostFunction) {
        match phase {
            // f - b, nonnegative under f >= b.
            PhaseStatus::AbsPositive => {
                out.add_term(self.f, 1.0);
                out.add_term(self.b, -1.0);
            }
            // f + b, nonnegative under f >= -b.
            PhaseStatus::AbsNegative => {
                out.add_term(self.f, 1.0);
                out.add_term(self.b, 1.0);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(lb_b: f64, ub_b: f64, lb_f: f64, ub_f: f64) -> (Context, BoundManager, AbsConstraint) {
        let mut ctx = Context::new();
        let mut bounds = BoundManager::new();
        let b = bounds.register_variable(&mut ctx, lb_b, ub_b);
        let f = bounds.register_variable(&mut ctx, lb_f, ub_f);
        let mut abs = AbsConstraint::new(0, b, f);
        abs.state_mut().register(&mut ctx);
        (ctx, bounds, abs)
    }

    #[test]
    fn test_satisfied() {
        let (_, _, abs) = setup(-2.0, 2.0, 0.0, 2.0);
        assert!(abs.satisfied(&[1.5, 1.5]));
        assert!(abs.satisfied(&[-1.5, 1.5]));
        assert!(abs.satisfied(&[0.0, 0.0]));
        assert!(!abs.satisfied(&[1.0, 0.5]));
        assert!(!abs.satisfied(&[-1.0, -1.0]));
    }

    #[test]
    fn test_sign_of_input_fixes_phase() {
        let (mut ctx, mut bounds, mut abs) = setup(-2.0, 2.0, 0.0, 2.0);
        bounds.set_upper(&mut ctx, abs.b(), -0.1).unwrap();
        abs.notify_upper_bound(&mut ctx, &bounds, abs.b(), -0.1);
        assert_eq!(abs.state().phase(&ctx), PhaseStatus::AbsNegative);
    }

    #[test]
    fn test_large_output_bound_rules_out_positive() {
        // b in [-2, 0.5], f >= 1: the positive piece needs b = f >= 1 > 0.5.
        let (mut ctx, mut bounds, mut abs) = setup(-2.0, 0.5, 0.0, 2.0);
        bounds.set_lower(&mut ctx, abs.f(), 1.0).unwrap();
        abs.notify_lower_bound(&mut ctx, &bounds, abs.f(), 1.0);
        assert_eq!(abs.state().phase(&ctx), PhaseStatus::AbsNegative);
    }

    #[test]
    fn test_entailed_tightenings_box_input() {
        let (ctx, bounds, abs) = setup(-5.0, 5.0, 0.0, 1.5);
        let mut out = Vec::new();
        abs.entailed_tightenings(&ctx, &bounds, &mut out);
        assert!(out.contains(&Tightening::lower(abs.b(), -1.5)));
        assert!(out.contains(&Tightening::upper(abs.b(), 1.5)));
        assert!(out.contains(&Tightening::upper(abs.f(), 5.0)));
    }

    #[test]
    fn test_entailed_lower_from_shifted_interval() {
        // b in [1, 3] means |b| >= 1.
        let (ctx, bounds, abs) = setup(1.0, 3.0, 0.0, 10.0);
        let mut out = Vec::new();
        abs.entailed_tightenings(&ctx, &bounds, &mut out);
        assert!(out.contains(&Tightening::lower(abs.f(), 1.0)));
    }

    #[test]
    fn test_case_splits_cover_graph() {
        let (ctx, bounds, abs) = setup(-2.0, 2.0, 0.0, 2.0);
        let splits = abs.case_splits(&ctx, &bounds);
        assert_eq!(splits.len(), 2);
        assert_eq!(splits.iter().filter(|s| s.holds(&[1.0, 1.0], EPSILON)).count(), 1);
        assert_eq!(splits.iter().filter(|s| s.holds(&[-1.0, 1.0], EPSILON)).count(), 1);
    }

    #[test]
    fn test_eliminate_input() {
        let (mut ctx, _, mut abs) = setup(-2.0, 2.0, 0.0, 2.0);
        let implied = abs.eliminate_variable(&mut ctx, abs.b(), -1.5).unwrap();
        assert!(abs.obsolete());
        assert_eq!(
            implied,
            vec![Tightening::lower(abs.f(), 1.5), Tightening::upper(abs.f(), 1.5)]
        );
    }

    #[test]
    fn test_eliminate_positive_output_keeps_constraint() {
        let (mut ctx, _, mut abs) = setup(-2.0, 2.0, 0.0, 2.0);
        let implied = abs.eliminate_variable(&mut ctx, abs.f(), 1.0).unwrap();
        assert!(!abs.obsolete());
        assert_eq!(
            implied,
            vec![Tightening::lower(abs.b(), -1.0), Tightening::upper(abs.b(), 1.0)]
        );
    }

    #[test]
    fn test_serialize_round_trip() {
        let abs = AbsConstraint::new(1, 2, 5);
        assert_eq!(abs.serialize_to_string(), "abs,5,2");
        let parsed = AbsConstraint::parse("abs,5,2", 1).unwrap();
        assert_eq!(parsed.b(), 2);
        assert_eq!(parsed.f(), 5);
    }
}
