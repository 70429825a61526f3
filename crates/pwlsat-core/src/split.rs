//! Case splits.

use crate::equation::Equation;
use crate::tightening::Tightening;

/// One branch of a piecewise-linear case analysis: a set of bound
/// tightenings and equations applied atomically on entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CaseSplit {
    bounds: Vec<Tightening>,
    equations: Vec<Equation>,
}

impl CaseSplit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bound(&mut self, tightening: Tightening) -> &mut Self {
        self.bounds.push(tightening);
        self
    }

    pub fn add_equation(&mut self, equation: Equation) -> &mut Self {
        self.equations.push(equation);
        self
    }

    pub fn bounds(&self) -> &[Tightening] {
        &self.bounds
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty() && self.equations.is_empty()
    }

    /// True iff `assignment` satisfies every bound and equation of this
    /// branch within `epsilon`.
    pub fn holds(&self, assignment: &[f64], epsilon: f64) -> bool {
        self.bounds.iter().all(|b| b.holds(assignment, epsilon))
            && self.equations.iter().all(|e| e.holds(assignment, epsilon))
    }

    pub fn variables(&self) -> impl Iterator<Item = u32> + '_ {
        self.bounds
            .iter()
            .map(|b| b.variable)
            .chain(self.equations.iter().flat_map(|e| e.variables()))
    }
}
