//! Core types for PWLSAT
//!
//! This crate provides the building blocks of the search engine:
//! - The [`Context`] versioned store that makes every piece of search state
//!   revertible on backtracking
//! - The [`BoundManager`] tracking per-variable intervals
//! - The data model: [`Equation`], [`Tightening`], [`CaseSplit`],
//!   [`InputQuery`]
//! - The piecewise-linear constraint kinds (ReLU, absolute value, sign, max,
//!   disjunction) behind the [`PlConstraint`] dispatch enum

pub mod bounds;
pub mod constraint;
pub mod context;
pub mod cost;
pub mod equation;
pub mod error;
pub mod query;
pub mod split;
pub mod tightening;

pub use bounds::{BoundManager, Infeasible};
pub use constraint::{
    AbsConstraint, ConstraintState, DisjunctionConstraint, MaxConstraint, PhaseStatus,
    PiecewiseLinear, PlConstraint, ReluConstraint, SignConstraint,
};
pub use context::{Cdo, Context, ScopedVec};
pub use cost::CostFunction;
pub use equation::{Equation, Relation, Term};
pub use error::{Error, Result};
pub use query::InputQuery;
pub use split::CaseSplit;
pub use tightening::{BoundKind, Tightening};

/// Comparison tolerance used throughout the engine.
///
/// Two values within `EPSILON` of each other are considered equal; an
/// interval is considered empty only when it is inverted by more than
/// `EPSILON`.
pub const EPSILON: f64 = 1e-6;

/// Returns true iff `a` and `b` are equal within [`EPSILON`].
pub fn fuzzy_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

/// Returns true iff `a` is greater than `b` by more than [`EPSILON`].
pub fn fuzzy_gt(a: f64, b: f64) -> bool {
    a > b + EPSILON
}

/// Returns true iff `a` is less than `b` by more than [`EPSILON`].
pub fn fuzzy_lt(a: f64, b: f64) -> bool {
    a < b - EPSILON
}
