//! Sign constraint: `f = sign(b)`, with `sign(b) = 1` for `b >= 0` and
//! `-1` otherwise. The output only ever takes the two values -1 and 1.

use crate::bounds::{BoundManager, Infeasible};
use crate::constraint::{ConstraintKind, ConstraintState, PhaseStatus, PiecewiseLinear};
use crate::context::Context;
use crate::cost::CostFunction;
use crate::equation::{parse_u32, Equation};
use crate::error::{Error, Result};
use crate::split::CaseSplit;
use crate::tightening::Tightening;
use crate::EPSILON;

#[derive(Clone, Debug)]
pub struct SignConstraint {
    state: ConstraintState,
    b: u32,
    f: u32,
    obsolete: bool,
}

impl SignConstraint {
    /// Creates `f = sign(b)`.
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
        split.add_bound(Tightening::lower(self.f, 1.0));
        split.add_bound(Tightening::upper(self.f, 1.0));
        split
    }

    fn negative_split(&self) -> CaseSplit {
        let mut split = CaseSplit::new();
        split.add_bound(Tightening::upper(self.b, 0.0));
        split.add_bound(Tightening::lower(self.f, -1.0));
        split.add_bound(Tightening::upper(self.f, -1.0));
        split
    }

    pub fn parse(text: &str, id: u32) -> Result<Self> {
        let fields: Vec<&str> = text.split(',').collect();
        if fields.len() != 3 || fields[0] != "sign" {
            return Err(Error::MalformedQuery(format!("bad sign record `{text}`")));
        }
        let f = parse_u32(fields[1])?;
        let b = parse_u32(fields[2])?;
        Ok(Self::new(id, b, f))
    }
}

impl PiecewiseLinear for SignConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Sign
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
            self.state.fix_phase(ctx, PhaseStatus::SignPositive);
        } else if variable == self.f && value > -1.0 + EPSILON {
            // f can only be -1 or 1, so anything above -1 means 1.
            self.state.fix_phase(ctx, PhaseStatus::SignPositive);
        }
    }

    fn notify_upper_bound(
        &mut self,
        ctx: &mut Context,
        _bounds: &BoundManager,
        variable: u32,
        value: f64,
    ) {
        if variable == self.b && value < 0.0 {
            self.state.fix_phase(ctx, PhaseStatus::SignNegative);
        } else if variable == self.f && value < 1.0 - EPSILON {
            self.state.fix_phase(ctx, PhaseStatus::SignNegative);
        }
    }

    fn satisfied(&self, assignment: &[f64]) -> bool {
        let b = assignment[self.b as usize];
        let f = assignment[self.f as usize];
        if b >= 0.0 {
            crate::fuzzy_eq(f, 1.0)
        } else {
            crate::fuzzy_eq(f, -1.0)
        }
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
            PhaseStatus::SignPositive => Some(self.positive_split()),
            PhaseStatus::SignNegative => Some(self.negative_split()),
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

        out.push(Tightening::lower(self.f, -1.0));
        out.push(Tightening::upper(self.f, 1.0));
        if lb_b >= 0.0 || lb_f > -1.0 + EPSILON {
            out.push(Tightening::lower(self.f, 1.0));
            out.push(Tightening::lower(self.b, 0.0));
        }
        if ub_b < 0.0 || ub_f < 1.0 - EPSILON {
            out.push(Tightening::upper(self.f, -1.0));
            out.push(Tightening::upper(self.b, 0.0));
        }
    }

    fn auxiliary(&self, _equations: &mut Vec<Equation>, tightenings: &mut Vec<Tightening>) {
        tightenings.push(Tightening::lower(self.f, -1.0));
        tightenings.push(Tightening::upper(self.f, 1.0));
    }

    fn eliminate_variable(
        &mut self,
        _ctx: &mut Context,
        variable: u32,
        value: f64,
    ) -> std::result::Result<Vec<Tightening>, Infeasible> {
        if variable == self.b {
            self.obsolete = true;
            let f_value = if value >= 0.0 { 1.0 } else { -1.0 };
            Ok(vec![
                Tightening::lower(self.f, f_value),
                Tightening::upper(self.f, f_value),
            ])
        } else if variable == self.f {
            self.obsolete = true;
            if (value - 1.0).abs() <= EPSILON {
                Ok(vec![Tightening::lower(self.b, 0.0)])
            } else if (value + 1.0).abs() <= EPSILON {
                Ok(vec![Tightening::upper(self.b, 0.0)])
            } else {
                Err(Infeasible)
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
        format!("sign,{},{}", self.f, self.b)
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
                if bounds.upper(ctx, self.b) >= 0.0 {
                    candidates.push(PhaseStatus::SignPositive);
                }
                if bounds.lower(ctx, self.b) < 0.0 {
                    candidates.push(PhaseStatus::SignNegative);
                }
                candidates
            }
            fixed => vec![fixed],
        }
    }

    fn cost_function_component(&self, _ctx: &Context, phase: PhaseStatus, out: &mut CostFunction) {
        match phase {
            // (1 - f) / 2: zero exactly when f = 1, at most 1 on [-1, 1].
            PhaseStatus::SignPositive => {
                out.add_term(self.f, -0.5);
                out.add_constant(0.5);
            }
            // (1 + f) / 2.
            PhaseStatus::SignNegative => {
                out.add_term(self.f, 0.5);
                out.add_constant(0.5);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(lb_b: f64, ub_b: f64) -> (Context, BoundManager, SignConstraint) {
        let mut ctx = Context::new();
        let mut bounds = BoundManager::new();
        let b = bounds.register_variable(&mut ctx, lb_b, ub_b);
        let f = bounds.register_variable(&mut ctx, -1.0, 1.0);
        let mut sign = SignConstraint::new(0, b, f);
        sign.state_mut().register(&mut ctx);
        (ctx, bounds, sign)
    }

    #[test]
    fn test_satisfied() {
        let (_, _, sign) = setup(-1.0, 1.0);
        assert!(sign.satisfied(&[0.5, 1.0]));
        assert!(sign.satisfied(&[0.0, 1.0]));
        assert!(sign.satisfied(&[-0.5, -1.0]));
        assert!(!sign.satisfied(&[0.5, -1.0]));
        assert!(!sign.satisfied(&[0.5, 0.0]));
    }

    #[test]
    fn test_output_bound_fixes_phase() {
        let (mut ctx, mut bounds, mut sign) = setup(-1.0, 1.0);
        bounds.set_upper(&mut ctx, sign.f(), 0.5).unwrap();
        sign.notify_upper_bound(&mut ctx, &bounds, sign.f(), 0.5);
        assert_eq!(sign.state().phase(&ctx), PhaseStatus::SignNegative);
    }

    #[test]
    fn test_nonnegative_input_fixes_positive() {
        let (mut ctx, mut bounds, mut sign) = setup(-1.0, 1.0);
        bounds.set_lower(&mut ctx, sign.b(), 0.0).unwrap();
        sign.notify_lower_bound(&mut ctx, &bounds, sign.b(), 0.0);
        assert_eq!(sign.state().phase(&ctx), PhaseStatus::SignPositive);
    }

    #[test]
    fn test_entailed_tightenings_pin_output() {
        let (ctx, bounds, sign) = setup(0.2, 1.0);
        let mut out = Vec::new();
        sign.entailed_tightenings(&ctx, &bounds, &mut out);
        assert!(out.contains(&Tightening::lower(sign.f(), 1.0)));
    }

    #[test]
    fn test_case_splits() {
        let (ctx, bounds, sign) = setup(-1.0, 1.0);
        let splits = sign.case_splits(&ctx, &bounds);
        assert_eq!(splits.len(), 2);
        assert_eq!(splits.iter().filter(|s| s.holds(&[0.5, 1.0], EPSILON)).count(), 1);
        assert_eq!(
            splits.iter().filter(|s| s.holds(&[-0.5, -1.0], EPSILON)).count(),
            1
        );
    }

    #[test]
    fn test_cost_components_bounded_by_one() {
        let (ctx, _, sign) = setup(-1.0, 1.0);
        let mut cost = CostFunction::new();
        sign.cost_function_component(&ctx, PhaseStatus::SignPositive, &mut cost);
        assert!((cost.evaluate(&[0.0, 1.0]) - 0.0).abs() < 1e-12);
        assert!((cost.evaluate(&[0.0, -1.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_eliminate_output() {
        let (mut ctx, _, mut sign) = setup(-1.0, 1.0);
        let implied = sign.eliminate_variable(&mut ctx, sign.f(), 1.0).unwrap();
        assert!(sign.obsolete());
        assert_eq!(implied, vec![Tightening::lower(sign.b(), 0.0)]);
    }

    #[test]
    fn test_eliminate_fractional_output_is_infeasible() {
        let (mut ctx, _, mut sign) = setup(-1.0, 1.0);
        assert!(sign.eliminate_variable(&mut ctx, sign.f(), 0.3).is_err());
    }

    #[test]
    fn test_serialize_round_trip() {
        let sign = SignConstraint::new(0, 3, 9);
        assert_eq!(sign.serialize_to_string(), "sign,9,3");
        let parsed = SignConstraint::parse("sign,9,3", 0).unwrap();
        assert_eq!(parsed.b(), 3);
        assert_eq!(parsed.f(), 9);
    }
}
