//! Piecewise-linear constraints.
//!
//! Every constraint relates an output variable to one or more input
//! variables through a piecewise-linear function. A constraint carries a
//! phase: the label of the linear piece the search currently commits to.
//! Phases start out `NotFixed` and are driven by bound notifications,
//! variable elimination, or an applied case split; phase and the active
//! flag are context-scoped, so backtracking reverts them.

mod abs;
mod disjunction;
mod max;
mod relu;
mod sign;

pub use abs::AbsConstraint;
pub use disjunction::DisjunctionConstraint;
pub use max::MaxConstraint;
pub use relu::ReluConstraint;
pub use sign::SignConstraint;

use crate::bounds::{BoundManager, Infeasible};
use crate::context::{Cdo, Context};
use crate::cost::CostFunction;
use crate::equation::Equation;
use crate::error::{Error, Result};
use crate::split::CaseSplit;
use crate::tightening::Tightening;

/// The linear piece a constraint currently commits to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseStatus {
    NotFixed,
    ReluActive,
    ReluInactive,
    AbsPositive,
    AbsNegative,
    SignPositive,
    SignNegative,
    /// Indexed case of a max or disjunction constraint.
    Case(u32),
}

/// Constraint kind discriminant, also the serialization tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Relu,
    AbsoluteValue,
    Sign,
    Max,
    Disjunction,
}

impl ConstraintKind {
    pub fn tag(self) -> &'static str {
        match self {
            ConstraintKind::Relu => "relu",
            ConstraintKind::AbsoluteValue => "abs",
            ConstraintKind::Sign => "sign",
            ConstraintKind::Max => "max",
            ConstraintKind::Disjunction => "disj",
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct StateCells {
    active: Cdo<bool>,
    phase: Cdo<PhaseStatus>,
}

/// State shared by all constraint kinds: identity, the context-scoped
/// active flag and phase, the transient branching score, and the phase
/// currently feeding the sum-of-infeasibilities cost.
///
/// Until [`ConstraintState::register`] is called the active flag and phase
/// live in plain fields; registration moves them into the context so they
/// version with the search.
#[derive(Clone, Debug)]
pub struct ConstraintState {
    id: u32,
    score: f64,
    soi_phase: PhaseStatus,
    initial_active: bool,
    initial_phase: PhaseStatus,
    cells: Option<StateCells>,
}

impl ConstraintState {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            score: 0.0,
            soi_phase: PhaseStatus::NotFixed,
            initial_active: true,
            initial_phase: PhaseStatus::NotFixed,
            cells: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Moves the active flag and phase into `ctx`.
    pub fn register(&mut self, ctx: &mut Context) {
        if self.cells.is_none() {
            self.cells = Some(StateCells {
                active: ctx.register(self.initial_active),
                phase: ctx.register(self.initial_phase),
            });
        }
    }

    pub fn is_registered(&self) -> bool {
        self.cells.is_some()
    }

    /// Forgets the context registration, falling back to plain fields.
    /// Used when duplicating a constraint into a fresh query.
    pub fn reset_registration(&mut self) {
        self.cells = None;
        self.initial_active = true;
        self.initial_phase = PhaseStatus::NotFixed;
    }

    pub fn is_active(&self, ctx: &Context) -> bool {
        match self.cells {
            Some(cells) => ctx.get(cells.active),
            None => self.initial_active,
        }
    }

    pub fn set_active(&mut self, ctx: &mut Context, active: bool) {
        match self.cells {
            Some(cells) => ctx.set(cells.active, active),
            None => self.initial_active = active,
        }
    }

    pub fn phase(&self, ctx: &Context) -> PhaseStatus {
        match self.cells {
            Some(cells) => ctx.get(cells.phase),
            None => self.initial_phase,
        }
    }

    pub fn set_phase(&mut self, ctx: &mut Context, phase: PhaseStatus) {
        match self.cells {
            Some(cells) => ctx.set(cells.phase, phase),
            None => self.initial_phase = phase,
        }
    }

    /// Fixes the phase only if it is currently `NotFixed`.
    fn fix_phase(&mut self, ctx: &mut Context, phase: PhaseStatus) {
        if self.phase(ctx) == PhaseStatus::NotFixed {
            tracing::debug!(id = self.id, ?phase, "phase fixed");
            self.set_phase(ctx, phase);
        }
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn set_score(&mut self, score: f64) {
        self.score = score;
    }

    pub fn soi_phase(&self) -> PhaseStatus {
        self.soi_phase
    }

    pub fn set_soi_phase(&mut self, phase: PhaseStatus) {
        self.soi_phase = phase;
    }
}

/// The contract every piecewise-linear constraint kind implements.
pub trait PiecewiseLinear {
    fn kind(&self) -> ConstraintKind;

    fn state(&self) -> &ConstraintState;

    fn state_mut(&mut self) -> &mut ConstraintState;

    fn participating_variables(&self) -> Vec<u32>;

    fn participates(&self, variable: u32) -> bool {
        self.participating_variables().contains(&variable)
    }

    /// Called after the lower bound of `variable` moved to `value`; may fix
    /// the phase if the new bounds entail it.
    fn notify_lower_bound(
        &mut self,
        ctx: &mut Context,
        bounds: &BoundManager,
        variable: u32,
        value: f64,
    );

    /// Called after the upper bound of `variable` moved to `value`.
    fn notify_upper_bound(
        &mut self,
        ctx: &mut Context,
        bounds: &BoundManager,
        variable: u32,
        value: f64,
    );

    /// True iff `assignment` lies in the graph of the constraint's function.
    fn satisfied(&self, assignment: &[f64]) -> bool;

    /// Complementary, exhaustive case splits under the current bounds.
    fn case_splits(&self, ctx: &Context, bounds: &BoundManager) -> Vec<CaseSplit>;

    /// When the phase is fixed, the single split it collapsed to.
    fn valid_case_split(&self, ctx: &Context, bounds: &BoundManager) -> Option<CaseSplit>;

    /// Bound implications of the current bounds, appended to `out`.
    fn entailed_tightenings(&self, ctx: &Context, bounds: &BoundManager, out: &mut Vec<Tightening>);

    /// Valid linear facts added once at registration; they make the LP
    /// relaxation sound for the sum-of-infeasibilities objective.
    fn auxiliary(&self, equations: &mut Vec<Equation>, tightenings: &mut Vec<Tightening>);

    /// A participating variable was fixed to `value` and eliminated.
    /// Returns the bound implications of the elimination; the constraint
    /// marks itself obsolete when a single phase is forced.
    fn eliminate_variable(
        &mut self,
        ctx: &mut Context,
        variable: u32,
        value: f64,
    ) -> std::result::Result<Vec<Tightening>, Infeasible>;

    fn update_variable_index(&mut self, old: u32, new: u32);

    /// True iff no piecewise-linear behavior remains.
    fn obsolete(&self) -> bool;

    fn serialize_to_string(&self) -> String;

    fn supports_polarity(&self) -> bool {
        false
    }

    /// Normalized midpoint `(ub + lb) / (ub - lb)` of the driving variable,
    /// when the metric applies.
    fn polarity(&self, _ctx: &Context, _bounds: &BoundManager) -> Option<f64> {
        None
    }

    /// Phases the constraint could take under the current bounds.
    fn phase_candidates(&self, ctx: &Context, bounds: &BoundManager) -> Vec<PhaseStatus>;

    /// Adds the linear cost of being in `phase` to `out`; empty for kinds
    /// that do not participate in the sum of infeasibilities.
    fn cost_function_component(&self, ctx: &Context, phase: PhaseStatus, out: &mut CostFunction);

    /// Re-derives the branching score from polarity: a constraint whose
    /// driving interval straddles zero symmetrically scores highest.
    fn update_score_based_on_polarity(&mut self, ctx: &Context, bounds: &BoundManager) {
        if let Some(p) = self.polarity(ctx, bounds) {
            self.state_mut().set_score(1.0 - p.abs());
        }
    }

    /// The best alternative phase for the sum-of-infeasibilities cost and
    /// the change it would cause, negative when the alternative is cheaper.
    fn reduced_heuristic_cost(
        &self,
        ctx: &Context,
        bounds: &BoundManager,
        assignment: &[f64],
    ) -> Option<(f64, PhaseStatus)> {
        let current = self.state().soi_phase();
        if current == PhaseStatus::NotFixed {
            return None;
        }
        let mut current_cost = CostFunction::new();
        self.cost_function_component(ctx, current, &mut current_cost);
        let current_value = current_cost.evaluate(assignment);

        let mut best: Option<(f64, PhaseStatus)> = None;
        for candidate in self.phase_candidates(ctx, bounds) {
            if candidate == current {
                continue;
            }
            let mut cost = CostFunction::new();
            self.cost_function_component(ctx, candidate, &mut cost);
            let delta = cost.evaluate(assignment) - current_value;
            if best.map_or(true, |(d, _)| delta < d) {
                best = Some((delta, candidate));
            }
        }
        best
    }
}

/// Tagged dispatch over the concrete constraint kinds.
#[derive(Clone, Debug)]
pub enum PlConstraint {
    Relu(ReluConstraint),
    Abs(AbsConstraint),
    Sign(SignConstraint),
    Max(MaxConstraint),
    Disjunction(DisjunctionConstraint),
}

macro_rules! dispatch {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            PlConstraint::Relu($c) => $body,
            PlConstraint::Abs($c) => $body,
            PlConstraint::Sign($c) => $body,
            PlConstraint::Max($c) => $body,
            PlConstraint::Disjunction($c) => $body,
        }
    };
}

impl PiecewiseLinear for PlConstraint {
    fn kind(&self) -> ConstraintKind {
        dispatch!(self, c => c.kind())
    }

    fn state(&self) -> &ConstraintState {
        dispatch!(self, c => c.state())
    }

    fn state_mut(&mut self) -> &mut ConstraintState {
        dispatch!(self, c => c.state_mut())
    }

    fn participating_variables(&self) -> Vec<u32> {
        dispatch!(self, c => c.participating_variables())
    }

    fn notify_lower_bound(
        &mut self,
        ctx: &mut Context,
        bounds: &BoundManager,
        variable: u32,
        value: f64,
    ) {
        dispatch!(self, c => c.notify_lower_bound(ctx, bounds, variable, value))
    }

    fn notify_upper_bound(
        &mut self,
        ctx: &mut Context,
        bounds: &BoundManager,
        variable: u32,
        value: f64,
    ) {
        dispatch!(self, c => c.notify_upper_bound(ctx, bounds, variable, value))
    }

    fn satisfied(&self, assignment: &[f64]) -> bool {
        dispatch!(self, c => c.satisfied(assignment))
    }

    fn case_splits(&self, ctx: &Context, bounds: &BoundManager) -> Vec<CaseSplit> {
        dispatch!(self, c => c.case_splits(ctx, bounds))
    }

    fn valid_case_split(&self, ctx: &Context, bounds: &BoundManager) -> Option<CaseSplit> {
        dispatch!(self, c => c.valid_case_split(ctx, bounds))
    }

    fn entailed_tightenings(
        &self,
        ctx: &Context,
        bounds: &BoundManager,
        out: &mut Vec<Tightening>,
    ) {
        dispatch!(self, c => c.entailed_tightenings(ctx, bounds, out))
    }

    fn auxiliary(&self, equations: &mut Vec<Equation>, tightenings: &mut Vec<Tightening>) {
        dispatch!(self, c => c.auxiliary(equations, tightenings))
    }

    fn eliminate_variable(
        &mut self,
        ctx: &mut Context,
        variable: u32,
        value: f64,
    ) -> std::result::Result<Vec<Tightening>, Infeasible> {
        dispatch!(self, c => c.eliminate_variable(ctx, variable, value))
    }

    fn update_variable_index(&mut self, old: u32, new: u32) {
        dispatch!(self, c => c.update_variable_index(old, new))
    }

    fn obsolete(&self) -> bool {
        dispatch!(self, c => c.obsolete())
    }

    fn serialize_to_string(&self) -> String {
        dispatch!(self, c => c.serialize_to_string())
    }

    fn supports_polarity(&self) -> bool {
        dispatch!(self, c => c.supports_polarity())
    }

    fn polarity(&self, ctx: &Context, bounds: &BoundManager) -> Option<f64> {
        dispatch!(self, c => c.polarity(ctx, bounds))
    }

    fn phase_candidates(&self, ctx: &Context, bounds: &BoundManager) -> Vec<PhaseStatus> {
        dispatch!(self, c => c.phase_candidates(ctx, bounds))
    }

    fn cost_function_component(&self, ctx: &Context, phase: PhaseStatus, out: &mut CostFunction) {
        dispatch!(self, c => c.cost_function_component(ctx, phase, out))
    }
}

impl PlConstraint {
    pub fn id(&self) -> u32 {
        self.state().id()
    }

    pub fn register(&mut self, ctx: &mut Context) {
        self.state_mut().register(ctx);
    }

    pub fn is_active(&self, ctx: &Context) -> bool {
        self.state().is_active(ctx)
    }

    pub fn set_active(&mut self, ctx: &mut Context, active: bool) {
        self.state_mut().set_active(ctx, active);
    }

    pub fn phase(&self, ctx: &Context) -> PhaseStatus {
        self.state().phase(ctx)
    }

    pub fn phase_fixed(&self, ctx: &Context) -> bool {
        self.phase(ctx) != PhaseStatus::NotFixed
    }

    pub fn score(&self) -> f64 {
        self.state().score()
    }

    pub fn set_score(&mut self, score: f64) {
        self.state_mut().set_score(score);
    }

    /// A duplicate detached from any context, suitable for a fresh query.
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.state_mut().reset_registration();
        copy
    }

    /// Parses the canonical text form produced by `serialize_to_string`.
    pub fn parse(text: &str, id: u32) -> Result<Self> {
        let tag = text.split(',').next().unwrap_or("");
        match tag {
            "relu" => Ok(PlConstraint::Relu(ReluConstraint::parse(text, id)?)),
            "abs" => Ok(PlConstraint::Abs(AbsConstraint::parse(text, id)?)),
            "sign" => Ok(PlConstraint::Sign(SignConstraint::parse(text, id)?)),
            "max" => Ok(PlConstraint::Max(MaxConstraint::parse(text, id)?)),
            "disj" => Ok(PlConstraint::Disjunction(DisjunctionConstraint::parse(
                text, id,
            )?)),
            other => Err(Error::MalformedQuery(format!(
                "unknown constraint tag `{other}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_registration_moves_into_context() {
        let mut ctx = Context::new();
        let mut state = ConstraintState::new(7);
        assert!(state.is_active(&ctx));
        assert_eq!(state.phase(&ctx), PhaseStatus::NotFixed);

        state.register(&mut ctx);
        ctx.push();
        state.set_active(&mut ctx, false);
        state.set_phase(&mut ctx, PhaseStatus::ReluActive);
        assert!(!state.is_active(&ctx));

        ctx.pop();
        assert!(state.is_active(&ctx));
        assert_eq!(state.phase(&ctx), PhaseStatus::NotFixed);
    }

    #[test]
    fn test_fix_phase_only_overwrites_not_fixed() {
        let mut ctx = Context::new();
        let mut state = ConstraintState::new(0);
        state.register(&mut ctx);

        state.fix_phase(&mut ctx, PhaseStatus::AbsPositive);
        assert_eq!(state.phase(&ctx), PhaseStatus::AbsPositive);
        state.fix_phase(&mut ctx, PhaseStatus::AbsNegative);
        assert_eq!(state.phase(&ctx), PhaseStatus::AbsPositive);
    }
}
