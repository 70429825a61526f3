//! The LP solving facade.
//!
//! Mirrors the operation set of the commercial wrappers the engine was
//! designed against: build a model incrementally, solve, then read one of
//! the status predicates. Any outcome outside the predicate set is a
//! backend failure, surfaced as [`LpError`].

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use thiserror::Error;

/// Backend failure.
#[derive(Debug, Error)]
pub enum LpError {
    #[error("unknown LP variable `{0}`")]
    UnknownVariable(String),

    #[error("duplicate LP variable `{0}`")]
    DuplicateVariable(String),

    #[error("no solution available")]
    NoSolution,

    #[error("unexpected LP backend state: {0}")]
    Unexpected(String),
}

/// Continuous or binary decision variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableKind {
    Continuous,
    Binary,
}

/// A term has the form `coefficient * variable`.
#[derive(Clone, Debug, PartialEq)]
pub struct Term {
    pub coefficient: f64,
    pub variable: String,
}

impl Term {
    pub fn new(coefficient: f64, variable: impl Into<String>) -> Self {
        Self {
            coefficient,
            variable: variable.into(),
        }
    }
}

/// Uniform facade over an LP/MILP backend.
pub trait LpSolver {
    /// Clears solution state, keeping the model.
    fn reset(&mut self);

    /// Clears the model and creates a fresh one.
    fn reset_model(&mut self);

    fn add_variable(
        &mut self,
        name: &str,
        lb: f64,
        ub: f64,
        kind: VariableKind,
    ) -> Result<(), LpError>;

    fn set_lower_bound(&mut self, name: &str, lb: f64) -> Result<(), LpError>;

    fn set_upper_bound(&mut self, name: &str, ub: f64) -> Result<(), LpError>;

    /// Adds `terms <= scalar`.
    fn add_leq_constraint(&mut self, terms: &[Term], scalar: f64) -> Result<(), LpError>;

    /// Adds `terms >= scalar`.
    fn add_geq_constraint(&mut self, terms: &[Term], scalar: f64) -> Result<(), LpError>;

    /// Adds `terms = scalar`.
    fn add_eq_constraint(&mut self, terms: &[Term], scalar: f64) -> Result<(), LpError>;

    /// Sets a cost function to minimize.
    fn set_cost(&mut self, terms: &[Term]) -> Result<(), LpError>;

    /// Sets an objective function to maximize.
    fn set_objective(&mut self, terms: &[Term]) -> Result<(), LpError>;

    /// Stops the solve early once the objective crosses `cutoff`.
    fn set_cutoff(&mut self, cutoff: f64);

    /// Wall-clock budget for the next solve, in seconds.
    fn set_time_limit(&mut self, seconds: f64);

    fn set_verbosity(&mut self, verbosity: u32);

    /// Installs the cooperative interrupt the backend polls while solving.
    fn set_interrupt_flag(&mut self, flag: Arc<AtomicBool>);

    /// Solves the model; the outcome is read through the predicates below.
    fn solve(&mut self) -> Result<(), LpError>;

    fn optimal(&self) -> bool;

    fn infeasible(&self) -> bool;

    fn cutoff_occurred(&self) -> bool;

    fn timed_out(&self) -> bool;

    /// True iff some feasible assignment is available, optimal or not.
    fn have_feasible_solution(&self) -> bool;

    fn get_value(&self, name: &str) -> Result<f64, LpError>;

    fn get_objective(&self) -> f64;

    /// Copies the solution into `values`; returns the cost or objective.
    fn extract_solution(&self, values: &mut HashMap<String, f64>) -> Result<f64, LpError>;

    fn num_simplex_iterations(&self) -> u64;
}
