//! Dense two-phase primal simplex backend.
//!
//! The model is kept in the facade's incremental form and compiled to
//! standard form (`Ax = b`, `x >= 0`) per solve: finite lower bounds are
//! shifted out, upper bounds become explicit rows, free variables split
//! into positive and negative parts, and every row receives an artificial
//! variable for the phase-1 basis. Bland's rule keeps the iteration finite.
//!
//! Binary variables route the solve through the branch-and-bound layer in
//! `milp.rs`, which calls back into the relaxation solver here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::milp;
use crate::solver::{LpError, LpSolver, Term, VariableKind};

const PIVOT_TOL: f64 = 1e-9;
const FEAS_TOL: f64 = 1e-7;

#[derive(Clone, Debug)]
pub(crate) struct ModelVar {
    pub(crate) name: String,
    pub(crate) lb: f64,
    pub(crate) ub: f64,
    pub(crate) kind: VariableKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RowSense {
    Le,
    Ge,
    Eq,
}

#[derive(Clone, Debug)]
pub(crate) struct Row {
    pub(crate) terms: Vec<(usize, f64)>,
    pub(crate) scalar: f64,
    pub(crate) sense: RowSense,
}

/// The incremental model the facade builds up.
#[derive(Clone, Debug, Default)]
pub(crate) struct Model {
    pub(crate) variables: Vec<ModelVar>,
    pub(crate) by_name: HashMap<String, usize>,
    pub(crate) rows: Vec<Row>,
    pub(crate) objective: Vec<f64>,
    pub(crate) minimize: bool,
}

impl Model {
    pub(crate) fn binaries(&self) -> Vec<usize> {
        self.variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.kind == VariableKind::Binary)
            .map(|(i, _)| i)
            .collect()
    }

    /// Objective coefficients in minimization space.
    fn min_objective(&self) -> Vec<f64> {
        if self.minimize {
            self.objective.clone()
        } else {
            self.objective.iter().map(|c| -c).collect()
        }
    }
}

/// Stop conditions shared by the simplex iteration and branch-and-bound.
pub(crate) struct LimitState {
    deadline: Option<Instant>,
    interrupt: Option<Arc<AtomicBool>>,
    pub(crate) iterations: u64,
    max_iterations: u64,
    stopped_by_time: bool,
    stopped_by_interrupt: bool,
}

impl LimitState {
    pub(crate) fn new(
        time_limit: Option<f64>,
        interrupt: Option<Arc<AtomicBool>>,
        max_iterations: u64,
    ) -> Self {
        Self {
            deadline: time_limit.map(|s| Instant::now() + std::time::Duration::from_secs_f64(s)),
            interrupt,
            iterations: 0,
            max_iterations,
            stopped_by_time: false,
            stopped_by_interrupt: false,
        }
    }

    /// Accounts one iteration; true means keep going.
    pub(crate) fn tick(&mut self) -> bool {
        self.iterations += 1;
        if self.iterations % 64 == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.stopped_by_time = true;
                    return false;
                }
            }
            if let Some(flag) = &self.interrupt {
                if flag.load(Ordering::Relaxed) {
                    self.stopped_by_interrupt = true;
                    return false;
                }
            }
        }
        if self.iterations > self.max_iterations {
            self.stopped_by_time = true;
            return false;
        }
        true
    }

    /// Non-counting check, used between branch-and-bound nodes.
    pub(crate) fn expired(&mut self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.stopped_by_time = true;
                return true;
            }
        }
        if let Some(flag) = &self.interrupt {
            if flag.load(Ordering::Relaxed) {
                self.stopped_by_interrupt = true;
                return true;
            }
        }
        false
    }

    pub(crate) fn stop_status(&self) -> SolveStatus {
        if self.stopped_by_interrupt {
            SolveStatus::Interrupted
        } else {
            SolveStatus::TimedOut
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SolveStatus {
    NotSolved,
    Optimal,
    Infeasible,
    Unbounded,
    TimedOut,
    Interrupted,
}

#[derive(Clone, Debug)]
pub(crate) struct Relaxation {
    pub(crate) status: SolveStatus,
    pub(crate) x: Vec<f64>,
    pub(crate) objective: f64,
}

enum StepResult {
    Optimal,
    Unbounded,
    Stopped,
}

struct Tableau {
    m: usize,
    n: usize,
    a: Vec<f64>,
    b: Vec<f64>,
    cost: Vec<f64>,
    cost_value: f64,
    basis: Vec<usize>,
    artificial_start: usize,
}

impl Tableau {
    #[inline]
    fn at(&self, r: usize, c: usize) -> f64 {
        self.a[r * self.n + c]
    }

    fn pivot(&mut self, r: usize, e: usize) {
        let n = self.n;
        let p = self.a[r * n + e];
        for j in 0..n {
            self.a[r * n + j] /= p;
        }
        self.b[r] /= p;

        for i in 0..self.m {
            if i == r {
                continue;
            }
            let factor = self.a[i * n + e];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                self.a[i * n + j] -= factor * self.a[r * n + j];
            }
            self.b[i] -= factor * self.b[r];
            if self.b[i].abs() < 1e-11 {
                self.b[i] = 0.0;
            }
        }

        let factor = self.cost[e];
        if factor != 0.0 {
            self.cost_value += factor * self.b[r];
            for j in 0..n {
                self.cost[j] -= factor * self.a[r * n + j];
            }
        }
        self.basis[r] = e;
    }

    /// Runs primal iterations to optimality with Bland's rule. Artificial
    /// columns never enter the basis.
    fn iterate(&mut self, limits: &mut LimitState) -> StepResult {
        loop {
            if !limits.tick() {
                return StepResult::Stopped;
            }

            // Entering: smallest index with a negative reduced cost.
            let enter = (0..self.artificial_start).find(|&j| self.cost[j] < -PIVOT_TOL);
            let Some(e) = enter else {
                return StepResult::Optimal;
            };

            // Leaving: minimum ratio, ties by smallest basis variable.
            let mut leave: Option<usize> = None;
            let mut best_ratio = f64::INFINITY;
            for r in 0..self.m {
                let a_re = self.at(r, e);
                if a_re <= PIVOT_TOL {
                    continue;
                }
                let ratio = self.b[r] / a_re;
                let better = match leave {
                    None => true,
                    Some(current) => {
                        ratio < best_ratio - PIVOT_TOL
                            || ((ratio - best_ratio).abs() <= PIVOT_TOL
                                && self.basis[r] < self.basis[current])
                    }
                };
                if better {
                    leave = Some(r);
                    best_ratio = ratio;
                }
            }
            let Some(r) = leave else {
                return StepResult::Unbounded;
            };
            self.pivot(r, e);
        }
    }
}

#[derive(Clone, Copy)]
enum ColMap {
    /// `x = l + x'` with `x' >= 0`.
    Shift { col: usize, l: f64 },
    /// `x = u - x'` with `x' >= 0` (no finite lower bound).
    NegShift { col: usize, u: f64 },
    /// `x = pos - neg`.
    Free { pos: usize, neg: usize },
}

/// Solves the continuous relaxation of `model`, with per-variable bound
/// `overrides` applied on top (used by branch-and-bound to fix binaries).
pub(crate) fn solve_relaxation(
    model: &Model,
    overrides: &[(usize, f64, f64)],
    limits: &mut LimitState,
) -> Relaxation {
    let n_vars = model.variables.len();
    let infeasible = Relaxation {
        status: SolveStatus::Infeasible,
        x: Vec::new(),
        objective: 0.0,
    };

    // Effective bounds.
    let mut lb: Vec<f64> = model.variables.iter().map(|v| v.lb).collect();
    let mut ub: Vec<f64> = model.variables.iter().map(|v| v.ub).collect();
    for &(var, l, u) in overrides {
        lb[var] = lb[var].max(l);
        ub[var] = ub[var].min(u);
    }
    for j in 0..n_vars {
        if lb[j] > ub[j] + FEAS_TOL {
            return infeasible;
        }
    }

    // Column mappings into standard form.
    let mut maps = Vec::with_capacity(n_vars);
    let mut n_struct = 0usize;
    let mut upper_rows: Vec<(usize, f64)> = Vec::new();
    for j in 0..n_vars {
        if lb[j].is_finite() {
            let col = n_struct;
            n_struct += 1;
            maps.push(ColMap::Shift { col, l: lb[j] });
            if ub[j].is_finite() {
                upper_rows.push((col, ub[j] - lb[j]));
            }
        } else if ub[j].is_finite() {
            let col = n_struct;
            n_struct += 1;
            maps.push(ColMap::NegShift { col, u: ub[j] });
        } else {
            let pos = n_struct;
            let neg = n_struct + 1;
            n_struct += 2;
            maps.push(ColMap::Free { pos, neg });
        }
    }

    // Objective in minimization space over structural columns.
    let c_user = model.min_objective();
    let mut c_struct = vec![0.0; n_struct];
    let mut obj_const = 0.0;
    for j in 0..n_vars {
        let c = c_user.get(j).copied().unwrap_or(0.0);
        if c == 0.0 {
            continue;
        }
        match maps[j] {
            ColMap::Shift { col, l } => {
                c_struct[col] += c;
                obj_const += c * l;
            }
            ColMap::NegShift { col, u } => {
                c_struct[col] -= c;
                obj_const += c * u;
            }
            ColMap::Free { pos, neg } => {
                c_struct[pos] += c;
                c_struct[neg] -= c;
            }
        }
    }

    // Densified rows: model rows then upper-bound rows.
    struct DenseRow {
        coeffs: Vec<f64>,
        rhs: f64,
        sense: RowSense,
    }
    let mut dense_rows = Vec::with_capacity(model.rows.len() + upper_rows.len());
    for row in &model.rows {
        let mut coeffs = vec![0.0; n_struct];
        let mut rhs = row.scalar;
        for &(var, coeff) in &row.terms {
            match maps[var] {
                ColMap::Shift { col, l } => {
                    coeffs[col] += coeff;
                    rhs -= coeff * l;
                }
                ColMap::NegShift { col, u } => {
                    coeffs[col] -= coeff;
                    rhs -= coeff * u;
                }
                ColMap::Free { pos, neg } => {
                    coeffs[pos] += coeff;
                    coeffs[neg] -= coeff;
                }
            }
        }
        dense_rows.push(DenseRow {
            coeffs,
            rhs,
            sense: row.sense,
        });
    }
    for &(col, range) in &upper_rows {
        let mut coeffs = vec![0.0; n_struct];
        coeffs[col] = 1.0;
        dense_rows.push(DenseRow {
            coeffs,
            rhs: range,
            sense: RowSense::Le,
        });
    }

    let m = dense_rows.len();
    let n_slack = dense_rows
        .iter()
        .filter(|r| r.sense != RowSense::Eq)
        .count();
    let artificial_start = n_struct + n_slack;
    let n = artificial_start + m;

    let mut tableau = Tableau {
        m,
        n,
        a: vec![0.0; m * n],
        b: vec![0.0; m],
        cost: vec![0.0; n],
        cost_value: 0.0,
        basis: (0..m).map(|i| artificial_start + i).collect(),
        artificial_start,
    };

    let mut slack_col = n_struct;
    for (i, row) in dense_rows.iter().enumerate() {
        let base = i * n;
        for (j, &coeff) in row.coeffs.iter().enumerate() {
            tableau.a[base + j] = coeff;
        }
        match row.sense {
            RowSense::Le => {
                tableau.a[base + slack_col] = 1.0;
                slack_col += 1;
            }
            RowSense::Ge => {
                tableau.a[base + slack_col] = -1.0;
                slack_col += 1;
            }
            RowSense::Eq => {}
        }
        tableau.b[i] = row.rhs;
        if tableau.b[i] < 0.0 {
            for j in 0..artificial_start {
                tableau.a[base + j] = -tableau.a[base + j];
            }
            tableau.b[i] = -tableau.b[i];
        }
        tableau.a[base + artificial_start + i] = 1.0;
    }

    // Phase 1: minimize the sum of artificials. Reduced against the
    // all-artificial basis, that is -(column sum) per structural column.
    for j in 0..artificial_start {
        let mut sum = 0.0;
        for i in 0..m {
            sum += tableau.at(i, j);
        }
        tableau.cost[j] = -sum;
    }
    tableau.cost_value = tableau.b.iter().sum();

    match tableau.iterate(limits) {
        StepResult::Stopped => {
            return Relaxation {
                status: limits.stop_status(),
                x: Vec::new(),
                objective: 0.0,
            };
        }
        StepResult::Unbounded => {
            // Phase 1 is bounded below by zero; this cannot happen.
            return Relaxation {
                status: SolveStatus::Infeasible,
                x: Vec::new(),
                objective: 0.0,
            };
        }
        StepResult::Optimal => {}
    }
    if tableau.cost_value > FEAS_TOL {
        return infeasible;
    }

    // Drive leftover artificials out of the basis where possible; rows
    // where that fails are redundant and keep a zero-valued artificial.
    for r in 0..m {
        if tableau.basis[r] >= artificial_start {
            if let Some(j) = (0..artificial_start).find(|&j| tableau.at(r, j).abs() > PIVOT_TOL) {
                tableau.pivot(r, j);
            }
        }
    }

    // Phase 2: the real objective, reduced against the current basis.
    tableau.cost = vec![0.0; n];
    tableau.cost[..n_struct].copy_from_slice(&c_struct);
    tableau.cost_value = 0.0;
    for r in 0..m {
        let k = tableau.basis[r];
        let factor = tableau.cost[k];
        if factor != 0.0 {
            tableau.cost_value += factor * tableau.b[r];
            for j in 0..n {
                tableau.cost[j] -= factor * tableau.at(r, j);
            }
        }
    }

    match tableau.iterate(limits) {
        StepResult::Stopped => {
            return Relaxation {
                status: limits.stop_status(),
                x: Vec::new(),
                objective: 0.0,
            };
        }
        StepResult::Unbounded => {
            return Relaxation {
                status: SolveStatus::Unbounded,
                x: Vec::new(),
                objective: 0.0,
            };
        }
        StepResult::Optimal => {}
    }

    // Read the structural solution and map it back to model variables.
    let mut x_struct = vec![0.0; n_struct];
    for r in 0..m {
        if tableau.basis[r] < n_struct {
            x_struct[tableau.basis[r]] = tableau.b[r];
        }
    }
    let mut x = vec![0.0; n_vars];
    for j in 0..n_vars {
        x[j] = match maps[j] {
            ColMap::Shift { col, l } => l + x_struct[col],
            ColMap::NegShift { col, u } => u - x_struct[col],
            ColMap::Free { pos, neg } => x_struct[pos] - x_struct[neg],
        };
    }

    let objective_min = tableau.cost_value + obj_const;
    Relaxation {
        status: SolveStatus::Optimal,
        x,
        objective: if model.minimize {
            objective_min
        } else {
            -objective_min
        },
    }
}

/// The built-in LP/MILP backend.
pub struct SimplexLp {
    model: Model,
    cutoff: Option<f64>,
    time_limit: Option<f64>,
    verbosity: u32,
    interrupt: Option<Arc<AtomicBool>>,
    status: SolveStatus,
    solution: Option<Vec<f64>>,
    objective: f64,
    cutoff_hit: bool,
    iterations: u64,
}

impl SimplexLp {
    pub fn new() -> Self {
        Self {
            model: Model {
                minimize: true,
                ..Model::default()
            },
            cutoff: None,
            time_limit: None,
            verbosity: 0,
            interrupt: None,
            status: SolveStatus::NotSolved,
            solution: None,
            objective: 0.0,
            cutoff_hit: false,
            iterations: 0,
        }
    }

    fn var_index(&self, name: &str) -> Result<usize, LpError> {
        self.model
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| LpError::UnknownVariable(name.to_string()))
    }

    fn densify(&self, terms: &[Term]) -> Result<Vec<(usize, f64)>, LpError> {
        let mut out: Vec<(usize, f64)> = Vec::with_capacity(terms.len());
        for term in terms {
            let var = self.var_index(&term.variable)?;
            match out.iter_mut().find(|(v, _)| *v == var) {
                Some((_, c)) => *c += term.coefficient,
                None => out.push((var, term.coefficient)),
            }
        }
        Ok(out)
    }

    fn add_row(&mut self, terms: &[Term], scalar: f64, sense: RowSense) -> Result<(), LpError> {
        let terms = self.densify(terms)?;
        self.model.rows.push(Row {
            terms,
            scalar,
            sense,
        });
        self.status = SolveStatus::NotSolved;
        Ok(())
    }

    fn set_objective_terms(&mut self, terms: &[Term], minimize: bool) -> Result<(), LpError> {
        let dense = self.densify(terms)?;
        self.model.objective = vec![0.0; self.model.variables.len()];
        for (var, coeff) in dense {
            self.model.objective[var] += coeff;
        }
        self.model.minimize = minimize;
        Ok(())
    }
}

impl Default for SimplexLp {
    fn default() -> Self {
        Self::new()
    }
}

impl LpSolver for SimplexLp {
    fn reset(&mut self) {
        self.status = SolveStatus::NotSolved;
        self.solution = None;
        self.objective = 0.0;
        self.cutoff_hit = false;
    }

    fn reset_model(&mut self) {
        self.model = Model {
            minimize: true,
            ..Model::default()
        };
        self.cutoff = None;
        self.reset();
    }

    fn add_variable(
        &mut self,
        name: &str,
        lb: f64,
        ub: f64,
        kind: VariableKind,
    ) -> Result<(), LpError> {
        if self.model.by_name.contains_key(name) {
            return Err(LpError::DuplicateVariable(name.to_string()));
        }
        let (lb, ub) = match kind {
            VariableKind::Continuous => (lb, ub),
            VariableKind::Binary => (lb.max(0.0), ub.min(1.0)),
        };
        let index = self.model.variables.len();
        self.model.variables.push(ModelVar {
            name: name.to_string(),
            lb,
            ub,
            kind,
        });
        self.model.by_name.insert(name.to_string(), index);
        self.model.objective.push(0.0);
        Ok(())
    }

    fn set_lower_bound(&mut self, name: &str, lb: f64) -> Result<(), LpError> {
        let index = self.var_index(name)?;
        self.model.variables[index].lb = lb;
        self.status = SolveStatus::NotSolved;
        Ok(())
    }

    fn set_upper_bound(&mut self, name: &str, ub: f64) -> Result<(), LpError> {
        let index = self.var_index(name)?;
        self.model.variables[index].ub = ub;
        self.status = SolveStatus::NotSolved;
        Ok(())
    }

    fn add_leq_constraint(&mut self, terms: &[Term], scalar: f64) -> Result<(), LpError> {
        self.add_row(terms, scalar, RowSense::Le)
    }

    fn add_geq_constraint(&mut self, terms: &[Term], scalar: f64) -> Result<(), LpError> {
        self.add_row(terms, scalar, RowSense::Ge)
    }

    fn add_eq_constraint(&mut self, terms: &[Term], scalar: f64) -> Result<(), LpError> {
        self.add_row(terms, scalar, RowSense::Eq)
    }

    fn set_cost(&mut self, terms: &[Term]) -> Result<(), LpError> {
        self.set_objective_terms(terms, true)
    }

    fn set_objective(&mut self, terms: &[Term]) -> Result<(), LpError> {
        self.set_objective_terms(terms, false)
    }

    fn set_cutoff(&mut self, cutoff: f64) {
        self.cutoff = Some(cutoff);
    }

    fn set_time_limit(&mut self, seconds: f64) {
        self.time_limit = Some(seconds);
    }

    fn set_verbosity(&mut self, verbosity: u32) {
        self.verbosity = verbosity;
    }

    fn set_interrupt_flag(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    fn solve(&mut self) -> Result<(), LpError> {
        let mut limits = LimitState::new(self.time_limit, self.interrupt.clone(), 1_000_000);
        self.cutoff_hit = false;

        let binaries = self.model.binaries();
        if binaries.is_empty() {
            let relax = solve_relaxation(&self.model, &[], &mut limits);
            self.iterations = limits.iterations;
            self.status = relax.status;
            self.objective = relax.objective;
            self.solution = match relax.status {
                SolveStatus::Optimal => Some(relax.x),
                _ => None,
            };
            if let (SolveStatus::Optimal, Some(cutoff)) = (self.status, self.cutoff) {
                self.cutoff_hit = if self.model.minimize {
                    self.objective <= cutoff + FEAS_TOL
                } else {
                    self.objective >= cutoff - FEAS_TOL
                };
            }
        } else {
            let result = milp::branch_and_bound(&self.model, &binaries, self.cutoff, &mut limits);
            self.iterations = limits.iterations;
            self.status = result.status;
            self.objective = result.objective;
            self.solution = result.solution;
            self.cutoff_hit = result.cutoff_hit;
        }

        if self.verbosity > 1 {
            tracing::debug!(
                status = ?self.status,
                objective = self.objective,
                iterations = self.iterations,
                "lp solve finished"
            );
        }
        Ok(())
    }

    fn optimal(&self) -> bool {
        self.status == SolveStatus::Optimal
    }

    fn infeasible(&self) -> bool {
        self.status == SolveStatus::Infeasible
    }

    fn cutoff_occurred(&self) -> bool {
        self.cutoff_hit
    }

    fn timed_out(&self) -> bool {
        matches!(self.status, SolveStatus::TimedOut | SolveStatus::Interrupted)
    }

    fn have_feasible_solution(&self) -> bool {
        self.solution.is_some()
    }

    fn get_value(&self, name: &str) -> Result<f64, LpError> {
        let index = self.var_index(name)?;
        let solution = self.solution.as_ref().ok_or(LpError::NoSolution)?;
        Ok(solution[index])
    }

    fn get_objective(&self) -> f64 {
        self.objective
    }

    fn extract_solution(&self, values: &mut HashMap<String, f64>) -> Result<f64, LpError> {
        let solution = self.solution.as_ref().ok_or(LpError::NoSolution)?;
        values.clear();
        for (index, var) in self.model.variables.iter().enumerate() {
            values.insert(var.name.clone(), solution[index]);
        }
        Ok(self.objective)
    }

    fn num_simplex_iterations(&self) -> u64 {
        self.iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(pairs: &[(f64, &str)]) -> Vec<Term> {
        pairs.iter().map(|&(c, v)| Term::new(c, v)).collect()
    }

    #[test]
    fn test_optimize() {
        let mut lp = SimplexLp::new();
        lp.add_variable("x", 0.0, 3.0, VariableKind::Continuous).unwrap();
        lp.add_variable("y", 0.0, 3.0, VariableKind::Continuous).unwrap();
        lp.add_variable("z", 0.0, 3.0, VariableKind::Continuous).unwrap();

        // x + y + z <= 5
        lp.add_leq_constraint(&terms(&[(1.0, "x"), (1.0, "y"), (1.0, "z")]), 5.0)
            .unwrap();

        // Cost: -x - 2y + z
        lp.set_cost(&terms(&[(-1.0, "x"), (-2.0, "y"), (1.0, "z")])).unwrap();
        lp.solve().unwrap();

        assert!(lp.optimal());
        let mut solution = HashMap::new();
        let cost = lp.extract_solution(&mut solution).unwrap();
        assert!((solution["x"] - 2.0).abs() < 1e-6);
        assert!((solution["y"] - 3.0).abs() < 1e-6);
        assert!(solution["z"].abs() < 1e-6);
        assert!((cost + 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_incremental_bound_change() {
        let mut lp = SimplexLp::new();
        lp.add_variable("x", 2.0, 4.0, VariableKind::Continuous).unwrap();
        lp.add_variable("y", 3.0, 5.0, VariableKind::Continuous).unwrap();

        // x + y <= 5
        lp.add_leq_constraint(&terms(&[(1.0, "x"), (1.0, "y")]), 5.0).unwrap();
        lp.solve().unwrap();
        assert!(lp.have_feasible_solution());

        lp.set_lower_bound("y", 4.0).unwrap();
        lp.solve().unwrap();
        assert!(lp.infeasible());
        assert!(!lp.have_feasible_solution());

        lp.set_lower_bound("y", 2.0).unwrap();
        lp.solve().unwrap();
        assert!(lp.have_feasible_solution());
    }

    #[test]
    fn test_equality_and_maximize() {
        let mut lp = SimplexLp::new();
        lp.add_variable("x", 0.0, 10.0, VariableKind::Continuous).unwrap();
        lp.add_variable("y", 0.0, 10.0, VariableKind::Continuous).unwrap();

        // x + y = 6, maximize x - y  =>  x = 6, y = 0.
        lp.add_eq_constraint(&terms(&[(1.0, "x"), (1.0, "y")]), 6.0).unwrap();
        lp.set_objective(&terms(&[(1.0, "x"), (-1.0, "y")])).unwrap();
        lp.solve().unwrap();

        assert!(lp.optimal());
        assert!((lp.get_value("x").unwrap() - 6.0).abs() < 1e-6);
        assert!(lp.get_value("y").unwrap().abs() < 1e-6);
        assert!((lp.get_objective() - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_free_variable() {
        let mut lp = SimplexLp::new();
        lp.add_variable("x", f64::NEG_INFINITY, f64::INFINITY, VariableKind::Continuous)
            .unwrap();

        // x >= -4 and x <= -1, minimize x  =>  x = -4.
        lp.add_geq_constraint(&terms(&[(1.0, "x")]), -4.0).unwrap();
        lp.add_leq_constraint(&terms(&[(1.0, "x")]), -1.0).unwrap();
        lp.set_cost(&terms(&[(1.0, "x")])).unwrap();
        lp.solve().unwrap();

        assert!(lp.optimal());
        assert!((lp.get_value("x").unwrap() + 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_unbounded_reports_no_predicate() {
        let mut lp = SimplexLp::new();
        lp.add_variable("x", 0.0, f64::INFINITY, VariableKind::Continuous).unwrap();
        lp.set_objective(&terms(&[(1.0, "x")])).unwrap();
        lp.solve().unwrap();

        assert!(!lp.optimal());
        assert!(!lp.infeasible());
        assert!(!lp.timed_out());
        assert!(!lp.have_feasible_solution());
    }

    #[test]
    fn test_feasibility_only_solve() {
        let mut lp = SimplexLp::new();
        lp.add_variable("a", -1.0, 1.0, VariableKind::Continuous).unwrap();
        lp.add_variable("b", -1.0, 1.0, VariableKind::Continuous).unwrap();
        lp.add_eq_constraint(&terms(&[(1.0, "a"), (1.0, "b")]), 1.5).unwrap();
        lp.solve().unwrap();

        assert!(lp.optimal());
        let a = lp.get_value("a").unwrap();
        let b = lp.get_value("b").unwrap();
        assert!((a + b - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_binary_knapsack() {
        // maximize 3a + 4b + 2c subject to 2a + 3b + c <= 4, binaries.
        let mut lp = SimplexLp::new();
        for name in ["a", "b", "c"] {
            lp.add_variable(name, 0.0, 1.0, VariableKind::Binary).unwrap();
        }
        lp.add_leq_constraint(&terms(&[(2.0, "a"), (3.0, "b"), (1.0, "c")]), 4.0)
            .unwrap();
        lp.set_objective(&terms(&[(3.0, "a"), (4.0, "b"), (2.0, "c")])).unwrap();
        lp.solve().unwrap();

        assert!(lp.optimal());
        // b + c fits (weight 4, value 6); a + c ties weight 3 value 5.
        assert!((lp.get_objective() - 6.0).abs() < 1e-6);
        assert!(lp.get_value("a").unwrap().abs() < 1e-6);
        assert!((lp.get_value("b").unwrap() - 1.0).abs() < 1e-6);
        assert!((lp.get_value("c").unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_binary_infeasible() {
        let mut lp = SimplexLp::new();
        lp.add_variable("a", 0.0, 1.0, VariableKind::Binary).unwrap();
        lp.add_variable("b", 0.0, 1.0, VariableKind::Binary).unwrap();
        // a + b = 1 and a - b = 0 has only the fractional solution 0.5/0.5.
        lp.add_eq_constraint(&terms(&[(1.0, "a"), (1.0, "b")]), 1.0).unwrap();
        lp.add_eq_constraint(&terms(&[(1.0, "a"), (-1.0, "b")]), 0.0).unwrap();
        lp.solve().unwrap();

        assert!(lp.infeasible());
    }

    #[test]
    fn test_cutoff_on_minimization() {
        let mut lp = SimplexLp::new();
        lp.add_variable("x", 0.0, 10.0, VariableKind::Continuous).unwrap();
        lp.add_geq_constraint(&terms(&[(1.0, "x")]), 2.0).unwrap();
        lp.set_cost(&terms(&[(1.0, "x")])).unwrap();
        lp.set_cutoff(3.0);
        lp.solve().unwrap();

        assert!(lp.optimal());
        assert!(lp.cutoff_occurred());
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let mut lp = SimplexLp::new();
        lp.add_variable("x", 0.0, 1.0, VariableKind::Continuous).unwrap();
        assert!(matches!(
            lp.add_variable("x", 0.0, 1.0, VariableKind::Continuous),
            Err(LpError::DuplicateVariable(_))
        ));
    }

    #[test]
    fn test_reset_model_clears_variables() {
        let mut lp = SimplexLp::new();
        lp.add_variable("x", 0.0, 1.0, VariableKind::Continuous).unwrap();
        lp.reset_model();
        assert!(lp.add_variable("x", 0.0, 1.0, VariableKind::Continuous).is_ok());
    }

    #[test]
    fn test_fixed_variable() {
        let mut lp = SimplexLp::new();
        lp.add_variable("x", 2.5, 2.5, VariableKind::Continuous).unwrap();
        lp.add_variable("y", 0.0, 10.0, VariableKind::Continuous).unwrap();
        lp.add_eq_constraint(&terms(&[(1.0, "x"), (1.0, "y")]), 4.0).unwrap();
        lp.set_cost(&terms(&[(1.0, "y")])).unwrap();
        lp.solve().unwrap();

        assert!(lp.optimal());
        assert!((lp.get_value("y").unwrap() - 1.5).abs() < 1e-6);
    }
}
