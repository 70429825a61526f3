//! Rectified linear unit constraint: `f = relu(b) = max(0, b)`.
//!
//! Both branches are closed: the active piece is `b >= 0, f = b` and the
//! inactive piece is `b <= 0, f = 0`, with the boundary point shared.
//! Satisfaction checks carry an epsilon slack consistent with LP
//! feasibility tolerances.

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
pub struct ReluConstraint {
    state: ConstraintState,
    b: u32,
    f: u32,
    obsolete: bool,
}

impl ReluConstraint {
    /// Creates `f = relu(b)`.
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

    pub fn score(&self) -> f64 {
        self.state.score()
    }

    fn active_split(&self) -> CaseSplit {
        let mut split = CaseSplit::new();
        split.add_bound(Tightening::lower(self.b, 0.0));
        split.add_equation(Equation::with_terms(
            Relation::Eq,
            &[(1.0, self.f), (-1.0, self.b)],
            0.0,
        ));
        split
    }

    fn inactive_split(&self) -> CaseSplit {
        let mut split = CaseSplit::new();
        split.add_bound(Tightening::upper(self.b, 0.0));
        split.add_bound(Tightening::lower(self.f, 0.0));
        split.add_bound(Tightening::upper(self.f, 0.0));
        split
    }

    pub fn parse(text: &str, id: u32) -> Result<Self> {
        let fields: Vec<&str> = text.split(',').collect();
        if fields.len() != 3 || fields[0] != "relu" {
            return Err(Error::MalformedQuery(format!("bad relu record `{text}`")));
        }
        let f = parse_u32(fields[1])?;
        let b = parse_u32(fields[2])?;
        Ok(Self::new(id, b, f))
    }
}

impl PiecewiseLinear for ReluConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Relu
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
        _bounds: &BoundManager,
        variable: u32,
        value: f64,
    ) {
        if variable == self.b && value >= 0.0 {
            self.state.fix_phase(ctx, PhaseStatus::ReluActive);
        } else if variable == self.f && value > EPSILON {
            // f must be strictly positive, so the inactive piece is gone.
            self.state.fix_phase(ctx, PhaseStatus::ReluActive);
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
            self.state.fix_phase(ctx, PhaseStatus::ReluInactive);
        }
    }

    fn satisfied(&self, assignment: &[f64]) -> bool {
        let b = assignment[self.b as usize];
        let f = assignment[self.f as usize];
        crate::fuzzy_eq(f, b.max(0.0))
    }

    fn case_splits(&self, ctx: &Context, bounds: &BoundManager) -> Vec<CaseSplit> {
        // Try the branch the interval midpoint leans toward first.
        let leaning_active = self.polarity(ctx, bounds).unwrap_or(1.0) >= 0.0;
        if leaning_active {
            vec![self.active_split(), self.inactive_split()]
        } else {
            vec![self.inactive_split(), self.active_split()]
        }
    }

    fn valid_case_split(&self, ctx: &Context, _bounds: &BoundManager) -> Option<CaseSplit> {
        match self.state.phase(ctx) {
            PhaseStatus::ReluActive => Some(self.active_split()),
            PhaseStatus::ReluInactive => Some(self.inactive_split()),
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
        out.push(Tightening::upper(self.f, ub_b.max(0.0)));
        // b <= f holds in both pieces.
        out.push(Tightening::upper(self.b, ub_f));
        if lb_b > 0.0 {
            out.push(Tightening::lower(self.f, lb_b));
        }
        if lb_f > EPSILON {
            // A positive output forces the active piece, where b = f.
            out.push(Tightening::lower(self.b, lb_f));
        }

        match self.state.phase(ctx) {
            PhaseStatus::ReluActive => {
                out.push(Tightening::lower(self.f, lb_b));
                out.push(Tightening::upper(self.f, ub_b));
                out.push(Tightening::lower(self.b, lb_f));
            }
            PhaseStatus::ReluInactive => {
                out.push(Tightening::upper(self.f, 0.0));
                out.push(Tightening::upper(self.b, 0.0));
            }
            _ => {}
        }
    }

    fn auxiliary(&self, equations: &mut Vec<Equation>, tightenings: &mut Vec<Tightening>) {
        // f >= b and f >= 0 hold on both pieces.
        equations.push(Equation::with_terms(
            Relation::Ge,
            &[(1.0, self.f), (-1.0, self.b)],
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
            let f_value = value.max(0.0);
            Ok(vec![
                Tightening::lower(self.f, f_value),
                Tightening::upper(self.f, f_value),
            ])
        } else if variable == self.f {
            if value < -EPSILON {
                return Err(Infeasible);
            }
            self.obsolete = true;
            if value > EPSILON {
                Ok(vec![
                    Tightening::lower(self.b, value),
                    Tightening::upper(self.b, value),
                ])
            } else {
                Ok(vec![Tightening::upper(self.b, 0.0)])
            }
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
        format!("relu,{},{}", self.f, self.b)
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
                    candidates.push(PhaseStatus::ReluActive);
                }
                if bounds.lower(ctx, self.b) <= EPSILON {
                    candidates.push(PhaseStatus::ReluInactive);
                }
                candidates
            }
            fixed => vec![fixed],
        }
    }

    fn cost_function_component(&self, _ctx: &Context, phase: PhaseStatus, out: &mut CostFunction) {
        match phase {
            // f - b, nonnegative under the auxiliary fact f >= b.
            PhaseStatus::ReluActive => {
                out.add_term(self.f, 1.0);
                out.add_term(self.b, -1.0);
            }
            // f, nonnegative under f >= 0; zero forces b <= 0 through f >= b.
            PhaseStatus::ReluInactive => {
                out.add_term(self.f, 1.0);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(lb_b: f64, ub_b: f64, lb_f: f64, ub_f: f64) -> (Context, BoundManager, ReluConstraint) {
        let mut ctx = Context::new();
        let mut bounds = BoundManager::new();
        let b = bounds.register_variable(&mut ctx, lb_b, ub_b);
        let f = bounds.register_variable(&mut ctx, lb_f, ub_f);
        let mut relu = ReluConstraint::new(0, b, f);
        relu.state_mut().register(&mut ctx);
        (ctx, bounds, relu)
    }

    #[test]
    fn test_satisfied() {
        let (_, _, relu) = setup(-1.0, 1.0, 0.0, 1.0);
        assert!(relu.satisfied(&[0.5, 0.5]));
        assert!(relu.satisfied(&[-0.5, 0.0]));
        assert!(relu.satisfied(&[0.0, 0.0]));
        assert!(!relu.satisfied(&[0.5, 0.0]));
        assert!(!relu.satisfied(&[-0.5, 0.3]));
    }

    #[test]
    fn test_positive_input_bound_fixes_active() {
        let (mut ctx, mut bounds, mut relu) = setup(-1.0, 1.0, 0.0, 1.0);
        ctx.push();
        bounds.set_lower(&mut ctx, relu.b(), 0.25).unwrap();
        relu.notify_lower_bound(&mut ctx, &bounds, relu.b(), 0.25);
        assert_eq!(relu.state().phase(&ctx), PhaseStatus::ReluActive);

        ctx.pop();
        assert_eq!(relu.state().phase(&ctx), PhaseStatus::NotFixed);
    }

    #[test]
    fn test_negative_input_bound_fixes_inactive() {
        let (mut ctx, mut bounds, mut relu) = setup(-1.0, 1.0, 0.0, 1.0);
        bounds.set_upper(&mut ctx, relu.b(), -0.5).unwrap();
        relu.notify_upper_bound(&mut ctx, &bounds, relu.b(), -0.5);
        assert_eq!(relu.state().phase(&ctx), PhaseStatus::ReluInactive);
    }

    #[test]
    fn test_case_splits_are_complementary() {
        let (ctx, bounds, relu) = setup(-1.0, 1.0, 0.0, 1.0);
        let splits = relu.case_splits(&ctx, &bounds);
        assert_eq!(splits.len(), 2);

        // Any point of the relu graph satisfies exactly one branch, except
        // the shared boundary point.
        let on_active = [0.5, 0.5];
        let on_inactive = [-0.5, 0.0];
        let boundary = [0.0, 0.0];
        assert_eq!(splits.iter().filter(|s| s.holds(&on_active, EPSILON)).count(), 1);
        assert_eq!(
            splits.iter().filter(|s| s.holds(&on_inactive, EPSILON)).count(),
            1
        );
        assert_eq!(splits.iter().filter(|s| s.holds(&boundary, EPSILON)).count(), 2);
    }

    #[test]
    fn test_entailed_tightenings_cap_output() {
        let (ctx, bounds, relu) = setup(-1.0, 0.4, 0.0, 10.0);
        let mut out = Vec::new();
        relu.entailed_tightenings(&ctx, &bounds, &mut out);
        assert!(out.contains(&Tightening::upper(relu.f(), 0.4)));
        assert!(out.contains(&Tightening::lower(relu.f(), 0.0)));
    }

    #[test]
    fn test_positive_output_forces_input() {
        let (ctx, bounds, relu) = setup(-1.0, 1.0, 0.3, 1.0);
        let mut out = Vec::new();
        relu.entailed_tightenings(&ctx, &bounds, &mut out);
        assert!(out.contains(&Tightening::lower(relu.b(), 0.3)));
    }

    #[test]
    fn test_polarity_and_score() {
        let (ctx, bounds, mut relu) = setup(-1.0, 3.0, 0.0, 3.0);
        assert_eq!(relu.polarity(&ctx, &bounds), Some(0.5));
        relu.update_score_based_on_polarity(&ctx, &bounds);
        assert_eq!(relu.score(), 0.5);
    }

    #[test]
    fn test_eliminate_input_variable() {
        let (mut ctx, _, mut relu) = setup(-1.0, 1.0, 0.0, 1.0);
        let implied = relu.eliminate_variable(&mut ctx, relu.b(), -0.5).unwrap();
        assert!(relu.obsolete());
        assert_eq!(
            implied,
            vec![Tightening::lower(relu.f(), 0.0), Tightening::upper(relu.f(), 0.0)]
        );
    }

    #[test]
    fn test_eliminate_negative_output_is_infeasible() {
        let (mut ctx, _, mut relu) = setup(-1.0, 1.0, -1.0, 1.0);
        assert!(relu.eliminate_variable(&mut ctx, relu.f(), -0.5).is_err());
    }

    #[test]
    fn test_serialize_round_trip() {
        let relu = ReluConstraint::new(3, 1, 4);
        let text = relu.serialize_to_string();
        assert_eq!(text, "relu,4,1");
        let parsed = ReluConstraint::parse(&text, 3).unwrap();
        assert_eq!(parsed.b(), 1);
        assert_eq!(parsed.f(), 4);
    }

    #[test]
    fn test_cost_components() {
        let (ctx, _, relu) = setup(-1.0, 1.0, 0.0, 1.0);

        let mut active = CostFunction::new();
        relu.cost_function_component(&ctx, PhaseStatus::ReluActive, &mut active);
        // f - b is 0.7 at (b, f) = (-0.2, 0.5).
        assert!((active.evaluate(&[-0.2, 0.5]) - 0.7).abs() < 1e-12);

        let mut inactive = CostFunction::new();
        relu.cost_function_component(&ctx, PhaseStatus::ReluInactive, &mut inactive);
        assert!((inactive.evaluate(&[-0.2, 0.5]) - 0.5).abs() < 1e-12);
    }
}
