//! The search engine.
//!
//! One engine owns one query: a context, the bound manager, the registered
//! piecewise-linear constraints, an LP backend and the SMT core. The main
//! loop solves the current LP relaxation, and either accepts a satisfying
//! assignment, tightens bounds, splits on a constraint, or backtracks when
//! the relaxation goes infeasible. An optional local-search mode drives
//! the LP by the sum-of-infeasibilities objective and walks phase flips
//! instead of splitting eagerly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use pwlsat_config::{DivideStrategy, Options};
use pwlsat_core::{
    BoundManager, CaseSplit, Context, CostFunction, Equation, Infeasible, InputQuery,
    PiecewiseLinear, PlConstraint, ScopedVec, EPSILON,
};
use pwlsat_lp::{LpSolver, SimplexLp, Term};

use crate::cost_tracker::PseudoCostTracker;
use crate::error::{EngineError, Result};
use crate::milp_encoder::{self, variable_name};
use crate::smt::SmtCore;
use crate::soi::SoiManager;
use crate::statistics::{Statistics, TimeCategory};

/// Terminal state of an engine run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCode {
    Sat,
    Unsat,
    Timeout,
    Error,
    Unknown,
    QuitRequested,
}

enum LpOutcome {
    Feasible,
    Infeasible,
    Timeout,
}

enum LocalSearchAction {
    Flipped,
    NeedSplit,
    Stuck,
}

pub struct Engine<L: LpSolver = SimplexLp> {
    options: Options,
    branching: DivideStrategy,
    lp: L,
    context: Context,
    bounds: BoundManager,
    constraints: Vec<PlConstraint>,
    base_equations: Vec<Equation>,
    split_equations: ScopedVec<Equation>,
    smt: SmtCore,
    tracker: PseudoCostTracker,
    soi: SoiManager,
    rng: ChaCha8Rng,
    stats: Statistics,
    assignment: Vec<f64>,
    exit_code: ExitCode,
    done: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
    processed: bool,
    last_soi_cost: f64,
}

impl Engine<SimplexLp> {
    pub fn new(options: Options) -> Self {
        Self::with_lp(SimplexLp::new(), options)
    }
}

impl<L: LpSolver> Engine<L> {
    pub fn with_lp(lp: L, options: Options) -> Self {
        let mut context = Context::new();
        let split_equations = ScopedVec::new(&mut context);
        let seed = options.seed;
        let threshold = options.constraint_violation_threshold;
        let branching = options.branching;
        Self {
            options,
            branching,
            lp,
            context,
            bounds: BoundManager::new(),
            constraints: Vec::new(),
            base_equations: Vec::new(),
            split_equations,
            smt: SmtCore::new(threshold),
            tracker: PseudoCostTracker::new(),
            soi: SoiManager::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            stats: Statistics::new(),
            assignment: Vec::new(),
            exit_code: ExitCode::Unknown,
            done: None,
            deadline: None,
            processed: false,
            last_soi_cost: f64::INFINITY,
        }
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn set_branching_heuristic(&mut self, branching: DivideStrategy) {
        self.branching = branching;
    }

    /// Installs the shared portfolio stop flag; the engine polls it between
    /// LP calls and hands it to the backend as its interrupt hook.
    pub fn set_done_flag(&mut self, done: Arc<AtomicBool>) {
        self.lp.set_interrupt_flag(done.clone());
        self.done = Some(done);
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    pub fn assignment(&self) -> &[f64] {
        &self.assignment
    }

    pub fn smt_stack_depth(&self) -> usize {
        self.smt.stack_depth()
    }

    pub fn context_level(&self) -> usize {
        self.context.level()
    }

    /// Writes the found assignment back into `query`.
    pub fn extract_solution(&self, query: &mut InputQuery) {
        query.set_solution(self.assignment.clone());
    }

    /// Registers `query` with the engine: variables and bounds, watchers,
    /// auxiliary facts, then a root-level tightening fixpoint and a pass of
    /// fixed-variable elimination.
    ///
    /// Returns `Ok(false)` when preprocessing already refutes the query;
    /// the exit code is then `Unsat`.
    pub fn process_query(&mut self, query: &InputQuery) -> Result<bool> {
        if self.processed {
            return Err(EngineError::Internal(
                "engine already holds a query".into(),
            ));
        }
        self.processed = true;
        self.lp.set_verbosity(self.options.verbosity);

        for v in 0..query.num_variables() {
            self.bounds.register_variable(
                &mut self.context,
                query.lower_bound(v),
                query.upper_bound(v),
            );
        }
        self.assignment = vec![0.0; query.num_variables() as usize];
        self.base_equations = query.equations().to_vec();

        self.constraints = query.constraints().iter().map(|c| c.duplicate()).collect();
        let mut aux_equations = Vec::new();
        let mut aux_tightenings = Vec::new();
        for (index, constraint) in self.constraints.iter_mut().enumerate() {
            constraint.register(&mut self.context);
            for v in constraint.participating_variables() {
                self.bounds.register_watcher(v, index as u32);
            }
            constraint.auxiliary(&mut aux_equations, &mut aux_tightenings);
        }
        self.base_equations.extend(aux_equations);

        for t in &aux_tightenings {
            if self.bounds.apply(&mut self.context, t).is_err() {
                return Ok(self.refuted_by_preprocessing());
            }
        }
        // Wake every constraint once so initial bounds can fix phases.
        for v in 0..self.bounds.num_variables() {
            self.bounds.mark_dirty(v);
        }
        if self.propagate().is_err() {
            return Ok(self.refuted_by_preprocessing());
        }
        if self.eliminate_fixed_variables().is_err() {
            return Ok(self.refuted_by_preprocessing());
        }
        if self.propagate().is_err() {
            return Ok(self.refuted_by_preprocessing());
        }

        self.tracker.initialize(
            self.constraints
                .iter()
                .map(|c| (c.id(), c.score()))
                .collect::<Vec<_>>(),
        );
        tracing::info!(
            variables = query.num_variables(),
            equations = self.base_equations.len(),
            constraints = self.constraints.len(),
            "query processed"
        );
        Ok(true)
    }

    fn refuted_by_preprocessing(&mut self) -> bool {
        tracing::info!("query refuted by preprocessing");
        self.exit_code = ExitCode::Unsat;
        false
    }

    /// Runs the main search loop under a timeout (0 disables it).
    pub fn solve(&mut self, timeout_secs: u64) -> ExitCode {
        if !self.processed {
            self.exit_code = ExitCode::Error;
            return self.exit_code;
        }
        if self.exit_code == ExitCode::Unsat {
            return self.exit_code;
        }
        self.stats.start_solving();
        self.deadline =
            (timeout_secs > 0).then(|| Instant::now() + Duration::from_secs(timeout_secs));

        let code = match self.search() {
            Ok(code) => code,
            Err(error) => {
                tracing::error!(%error, "engine error");
                ExitCode::Error
            }
        };
        self.exit_code = code;
        tracing::info!(?code, states = self.stats.visited_tree_states(), "search finished");
        code
    }

    fn search(&mut self) -> Result<ExitCode> {
        loop {
            if self.quit_requested() {
                return Ok(ExitCode::QuitRequested);
            }
            if self.out_of_time() {
                return Ok(ExitCode::Timeout);
            }

            if self.propagate().is_err() {
                self.stats.inc_visited_tree_states();
                if !self.backtrack() {
                    return Ok(ExitCode::Unsat);
                }
                continue;
            }

            let cost = if self.options.local_search && self.soi.initialized() {
                Some(self.soi.cost_function(&self.context, &self.constraints))
            } else {
                None
            };
            match self.solve_lp(cost.as_ref())? {
                LpOutcome::Infeasible => {
                    self.stats.inc_visited_tree_states();
                    if !self.backtrack() {
                        return Ok(ExitCode::Unsat);
                    }
                    continue;
                }
                LpOutcome::Timeout => {
                    return Ok(if self.quit_requested() {
                        ExitCode::QuitRequested
                    } else {
                        ExitCode::Timeout
                    });
                }
                LpOutcome::Feasible => {}
            }

            if self.options.local_search && !self.soi.initialized() {
                self.soi.initialize(
                    &self.context,
                    &self.bounds,
                    &mut self.constraints,
                    &self.assignment,
                );
                continue;
            }

            if self.first_violated().is_none() {
                self.stats.inc_visited_tree_states();
                self.check_solution();
                return Ok(ExitCode::Sat);
            }

            if self.options.local_search {
                // Improving flips are only trusted while the optimal cost
                // keeps strictly falling; a plateau switches to the random
                // walk so the split threshold can fire.
                let making_progress = match &cost {
                    Some(cost) => {
                        let value = self.lp.get_objective() + cost.constant();
                        let progress = value < self.last_soi_cost - EPSILON;
                        if progress {
                            self.last_soi_cost = value;
                        }
                        progress
                    }
                    None => true,
                };
                if let LocalSearchAction::Flipped = self.local_search_step(making_progress) {
                    continue;
                }
                // Split threshold crossed or nothing left to flip.
            } else {
                match self.tighten_from_violated() {
                    Err(Infeasible) => {
                        self.stats.inc_visited_tree_states();
                        if !self.backtrack() {
                            return Ok(ExitCode::Unsat);
                        }
                        continue;
                    }
                    Ok(true) => continue,
                    Ok(false) => {}
                }
            }

            let Some(pick) = self.pick_split_constraint() else {
                // Violated constraints remain but none is splittable under
                // the current bounds.
                self.stats.inc_visited_tree_states();
                if !self.backtrack() {
                    return Ok(ExitCode::Unsat);
                }
                continue;
            };
            self.smt.request_split(pick as u32);
            if self.perform_split().is_err() {
                self.stats.inc_visited_tree_states();
                if !self.backtrack() {
                    return Ok(ExitCode::Unsat);
                }
            }
        }
    }

    /// One local-search move: the best improving flip if any, otherwise a
    /// seeded random flip reported to the SMT core.
    fn local_search_step(&mut self, allow_improving: bool) -> LocalSearchAction {
        let start = Instant::now();
        if allow_improving {
            if let Some(flip) = self.soi.propose_flip(
                &self.context,
                &self.bounds,
                &self.constraints,
                &self.assignment,
            ) {
                if flip.delta < -EPSILON {
                    self.stats.record_flip(true);
                    self.constraints[flip.constraint]
                        .state_mut()
                        .set_soi_phase(flip.phase);
                    self.stats.add_time(TimeCategory::Branching, start.elapsed());
                    return LocalSearchAction::Flipped;
                }
            }
        }

        let flip = self
            .soi
            .random_flip(&self.context, &self.bounds, &self.constraints, &mut self.rng);
        let action = match flip {
            None => LocalSearchAction::Stuck,
            Some(flip) => {
                self.stats.record_flip(false);
                self.constraints[flip.constraint]
                    .state_mut()
                    .set_soi_phase(flip.phase);
                if self.smt.report_random_flip() {
                    LocalSearchAction::NeedSplit
                } else {
                    LocalSearchAction::Flipped
                }
            }
        };
        self.stats.add_time(TimeCategory::Branching, start.elapsed());
        action
    }

    /// Collects entailed tightenings of violated constraints; true if any
    /// bound actually moved.
    fn tighten_from_violated(&mut self) -> std::result::Result<bool, Infeasible> {
        let start = Instant::now();
        let mut progress = false;
        for index in 0..self.constraints.len() {
            let constraint = &self.constraints[index];
            if !constraint.is_active(&self.context) || constraint.satisfied(&self.assignment) {
                continue;
            }
            let mut tightenings = Vec::new();
            constraint.entailed_tightenings(&self.context, &self.bounds, &mut tightenings);
            for t in &tightenings {
                match self.bounds.apply(&mut self.context, t) {
                    Ok(moved) => progress |= moved,
                    Err(Infeasible) => {
                        self.stats.add_time(TimeCategory::Tightening, start.elapsed());
                        return Err(Infeasible);
                    }
                }
            }
        }
        self.stats.add_time(TimeCategory::Tightening, start.elapsed());
        Ok(progress)
    }

    fn quit_requested(&self) -> bool {
        self.done
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn out_of_time(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn remaining_seconds(&self) -> Option<f64> {
        self.deadline
            .map(|deadline| (deadline - Instant::now().min(deadline)).as_secs_f64())
    }

    /// Tightening fixpoint: apply valid splits of phase-fixed constraints,
    /// notify watchers of dirty bounds, collect and apply their entailed
    /// tightenings, repeat until quiet.
    fn propagate(&mut self) -> std::result::Result<(), Infeasible> {
        let start = Instant::now();
        let result = self.propagate_inner();
        self.stats.add_time(TimeCategory::Tightening, start.elapsed());
        result
    }

    fn propagate_inner(&mut self) -> std::result::Result<(), Infeasible> {
        let mut rounds = 0u32;
        loop {
            self.apply_valid_splits()?;
            if !self.bounds.has_dirty() {
                return Ok(());
            }
            rounds += 1;
            if rounds > 64 {
                tracing::warn!("bound tightening fixpoint cap reached");
                return Ok(());
            }

            let dirty = self.bounds.take_dirty();
            let mut touched = Vec::new();
            for v in dirty {
                let watchers = self.bounds.watchers(v).to_vec();
                let lower = self.bounds.lower(&self.context, v);
                let upper = self.bounds.upper(&self.context, v);
                for cid in watchers {
                    let constraint = &mut self.constraints[cid as usize];
                    constraint.notify_lower_bound(&mut self.context, &self.bounds, v, lower);
                    constraint.notify_upper_bound(&mut self.context, &self.bounds, v, upper);
                    touched.push(cid);
                }
            }
            touched.sort_unstable();
            touched.dedup();
            for cid in touched {
                if !self.constraints[cid as usize].is_active(&self.context) {
                    continue;
                }
                let mut tightenings = Vec::new();
                self.constraints[cid as usize].entailed_tightenings(
                    &self.context,
                    &self.bounds,
                    &mut tightenings,
                );
                for t in &tightenings {
                    self.bounds.apply(&mut self.context, t)?;
                }
            }
        }
    }

    /// A constraint whose phase the bounds have fixed collapses to its
    /// valid split: apply it and retire the constraint from the active set.
    fn apply_valid_splits(&mut self) -> std::result::Result<(), Infeasible> {
        for index in 0..self.constraints.len() {
            if !self.constraints[index].is_active(&self.context)
                || !self.constraints[index].phase_fixed(&self.context)
            {
                continue;
            }
            let Some(split) =
                self.constraints[index].valid_case_split(&self.context, &self.bounds)
            else {
                continue;
            };
            tracing::debug!(constraint = index, "applying valid case split");
            self.constraints[index].set_active(&mut self.context, false);
            self.apply_split(&split)?;
        }
        Ok(())
    }

    /// Applies a case split: bounds through the bound manager, equations
    /// into the context-scoped LP extension list.
    fn apply_split(&mut self, split: &CaseSplit) -> std::result::Result<(), Infeasible> {
        for t in split.bounds() {
            self.bounds.apply(&mut self.context, t)?;
        }
        for eq in split.equations() {
            self.split_equations.push(&mut self.context, eq.clone());
        }
        Ok(())
    }

    /// Root-level pass folding variables pinned to a point value into their
    /// constraints.
    fn eliminate_fixed_variables(&mut self) -> std::result::Result<(), Infeasible> {
        for v in 0..self.bounds.num_variables() {
            if !self.bounds.fixed(&self.context, v) {
                continue;
            }
            let value = self.bounds.lower(&self.context, v);
            let watchers = self.bounds.watchers(v).to_vec();
            for cid in watchers {
                if !self.constraints[cid as usize].is_active(&self.context) {
                    continue;
                }
                let implied = self.constraints[cid as usize].eliminate_variable(
                    &mut self.context,
                    v,
                    value,
                )?;
                for t in &implied {
                    self.bounds.apply(&mut self.context, t)?;
                }
                if self.constraints[cid as usize].obsolete() {
                    tracing::debug!(constraint = cid, "constraint obsolete after elimination");
                    self.constraints[cid as usize].set_active(&mut self.context, false);
                }
            }
        }
        Ok(())
    }

    fn encode_lp(&mut self, cost: Option<&CostFunction>) -> Result<()> {
        self.lp.reset_model();
        for v in 0..self.bounds.num_variables() {
            self.lp.add_variable(
                &variable_name(v),
                self.bounds.lower(&self.context, v),
                self.bounds.upper(&self.context, v),
                pwlsat_lp::VariableKind::Continuous,
            )?;
        }
        for eq in &self.base_equations {
            add_equation(&mut self.lp, eq)?;
        }
        for eq in self.split_equations.iter(&self.context) {
            add_equation(&mut self.lp, eq)?;
        }

        let terms: Vec<Term> = cost
            .map(|c| {
                c.terms()
                    .map(|(v, coeff)| Term::new(coeff, variable_name(v)))
                    .collect()
            })
            .unwrap_or_default();
        self.lp.set_cost(&terms)?;

        if let Some(remaining) = self.remaining_seconds() {
            self.lp.set_time_limit(remaining.max(0.01));
        }
        Ok(())
    }

    fn solve_lp(&mut self, cost: Option<&CostFunction>) -> Result<LpOutcome> {
        let start = Instant::now();
        self.encode_lp(cost)?;
        self.lp.solve()?;
        self.stats.record_lp_solve(self.lp.num_simplex_iterations());
        self.stats.add_time(TimeCategory::LpSolve, start.elapsed());

        if self.lp.infeasible() {
            return Ok(LpOutcome::Infeasible);
        }
        if self.lp.optimal() || self.lp.have_feasible_solution() {
            for v in 0..self.bounds.num_variables() {
                self.assignment[v as usize] = self.lp.get_value(&variable_name(v))?;
            }
            return Ok(LpOutcome::Feasible);
        }
        if self.lp.timed_out() {
            return Ok(LpOutcome::Timeout);
        }
        Err(EngineError::Internal("unexpected LP backend status".into()))
    }

    /// Index of the first active constraint the assignment violates.
    fn first_violated(&self) -> Option<usize> {
        self.constraints.iter().enumerate().find_map(|(index, c)| {
            (c.is_active(&self.context) && !c.satisfied(&self.assignment)).then_some(index)
        })
    }

    fn check_solution(&self) {
        for (index, constraint) in self.constraints.iter().enumerate() {
            if !constraint.satisfied(&self.assignment) {
                tracing::warn!(constraint = index, "solution violates a retired constraint");
            }
        }
        for eq in &self.base_equations {
            if !eq.holds(&self.assignment, EPSILON * 10.0) {
                tracing::warn!("solution violates a linear equation");
            }
        }
    }

    /// Chooses the constraint to split on, preferring violated ones.
    fn pick_split_constraint(&mut self) -> Option<usize> {
        let start = Instant::now();
        let candidates: Vec<usize> = (0..self.constraints.len())
            .filter(|&i| {
                self.constraints[i].is_active(&self.context)
                    && !self.constraints[i].phase_fixed(&self.context)
            })
            .collect();
        let violated: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| !self.constraints[i].satisfied(&self.assignment))
            .collect();
        let pool = if violated.is_empty() { candidates } else { violated };

        let pick = if pool.is_empty() {
            None
        } else {
            match self.branching {
                DivideStrategy::Polarity => self.pick_by_polarity(&pool),
                DivideStrategy::PseudoCost => {
                    let in_pool = |c: u32| pool.contains(&(c as usize));
                    self.tracker
                        .top_matching(in_pool)
                        .map(|c| c as usize)
                        .or_else(|| self.pick_by_polarity(&pool))
                }
                DivideStrategy::Soi | DivideStrategy::SoiPolarity => self.pick_by_violation(&pool),
            }
        };
        self.stats.add_time(TimeCategory::Branching, start.elapsed());
        pick
    }

    fn pick_by_polarity(&mut self, pool: &[usize]) -> Option<usize> {
        for &index in pool {
            let constraint = &mut self.constraints[index];
            constraint.update_score_based_on_polarity(&self.context, &self.bounds);
        }
        let best = pool
            .iter()
            .map(|&i| self.constraints[i].score())
            .fold(f64::NEG_INFINITY, f64::max);
        let ties: Vec<usize> = pool
            .iter()
            .copied()
            .filter(|&i| (self.constraints[i].score() - best).abs() <= 1e-9)
            .collect();
        match ties.len() {
            0 => None,
            1 => Some(ties[0]),
            n => Some(ties[self.rng.random_range(0..n)]),
        }
    }

    /// Deepest violation: the constraint whose nearest phase is farthest
    /// from the current assignment.
    fn pick_by_violation(&mut self, pool: &[usize]) -> Option<usize> {
        let mut best: Option<(f64, usize)> = None;
        for &index in pool {
            let constraint = &self.constraints[index];
            let mut distance = f64::INFINITY;
            for phase in constraint.phase_candidates(&self.context, &self.bounds) {
                let mut cost = CostFunction::new();
                constraint.cost_function_component(&self.context, phase, &mut cost);
                if cost.is_empty() {
                    continue;
                }
                distance = distance.min(cost.evaluate(&self.assignment));
            }
            if !distance.is_finite() {
                distance = 0.0;
            }
            if best.map_or(true, |(d, _)| distance > d) {
                best = Some((distance, index));
            }
        }
        best.map(|(_, index)| index)
    }

    /// Performs the requested split: deactivates the chosen constraint,
    /// pushes a level, applies the first case.
    fn perform_split(&mut self) -> std::result::Result<(), Infeasible> {
        let start = Instant::now();
        let Some(cid) = self.smt.constraint_for_splitting() else {
            return Ok(());
        };
        let index = cid as usize;
        let splits = self.constraints[index].case_splits(&self.context, &self.bounds);
        if splits.is_empty() {
            // Every piece is already ruled out by the bounds.
            self.stats.add_time(TimeCategory::SmtCore, start.elapsed());
            return Err(Infeasible);
        }
        self.constraints[index].set_active(&mut self.context, false);
        let split = self.smt.perform_split(&mut self.context, cid, splits);
        self.stats.inc_splits();
        self.stats.observe_stack_depth(self.smt.stack_depth() as u64);
        self.last_soi_cost = f64::INFINITY;
        let result = self.apply_split(&split);
        self.stats.add_time(TimeCategory::SmtCore, start.elapsed());
        result
    }

    /// Backtracks to the next unexplored branch; false when the tree is
    /// exhausted.
    fn backtrack(&mut self) -> bool {
        let start = Instant::now();
        let mut resumed = false;
        loop {
            if let Some(constraint) = self.smt.top_constraint() {
                // The branch under this constraint just closed.
                self.tracker.reward(constraint, 1.0);
            }
            match self.smt.pop_split(&mut self.context) {
                None => break,
                Some(split) => {
                    self.stats.inc_pops();
                    match self.apply_split(&split) {
                        Ok(()) => {
                            self.last_soi_cost = f64::INFINITY;
                            resumed = true;
                            break;
                        }
                        Err(Infeasible) => {
                            // Dead on arrival; keep backtracking.
                            self.stats.inc_visited_tree_states();
                            continue;
                        }
                    }
                }
            }
        }
        self.stats.add_time(TimeCategory::SmtCore, start.elapsed());
        resumed
    }

    /// Encodes the whole query as a MILP and hands it to the backend in
    /// one shot.
    pub fn solve_with_milp_encoding(&mut self, timeout_secs: u64) -> ExitCode {
        if !self.processed {
            self.exit_code = ExitCode::Error;
            return self.exit_code;
        }
        if self.exit_code == ExitCode::Unsat {
            return self.exit_code;
        }
        self.stats.start_solving();
        self.deadline =
            (timeout_secs > 0).then(|| Instant::now() + Duration::from_secs(timeout_secs));

        let split_equations: Vec<Equation> =
            self.split_equations.iter(&self.context).cloned().collect();
        let mut equations = self.base_equations.clone();
        equations.extend(split_equations);

        let encode_result = milp_encoder::encode(
            &mut self.lp,
            &self.context,
            &self.bounds,
            &equations,
            &self.constraints,
        );
        if let Err(error) = encode_result {
            tracing::error!(%error, "MILP encoding failed");
            self.exit_code = ExitCode::Error;
            return self.exit_code;
        }
        if let Some(remaining) = self.remaining_seconds() {
            self.lp.set_time_limit(remaining.max(0.01));
        }
        if self.lp.solve().is_err() {
            self.exit_code = ExitCode::Error;
            return self.exit_code;
        }
        self.stats.record_lp_solve(self.lp.num_simplex_iterations());

        self.exit_code = if self.lp.infeasible() {
            ExitCode::Unsat
        } else if self.lp.optimal() || self.lp.have_feasible_solution() {
            let mut ok = true;
            for v in 0..self.bounds.num_variables() {
                match self.lp.get_value(&variable_name(v)) {
                    Ok(value) => self.assignment[v as usize] = value,
                    Err(_) => ok = false,
                }
            }
            self.stats.inc_visited_tree_states();
            if ok {
                ExitCode::Sat
            } else {
                ExitCode::Error
            }
        } else if self.lp.timed_out() {
            if self.quit_requested() {
                ExitCode::QuitRequested
            } else {
                ExitCode::Timeout
            }
        } else {
            ExitCode::Error
        };
        self.exit_code
    }
}

pub(crate) fn add_equation<L: LpSolver>(lp: &mut L, equation: &Equation) -> Result<()> {
    let terms: Vec<Term> = equation
        .terms
        .iter()
        .map(|t| Term::new(t.coefficient, variable_name(t.variable)))
        .collect();
    match equation.relation {
        pwlsat_core::Relation::Eq => lp.add_eq_constraint(&terms, equation.scalar)?,
        pwlsat_core::Relation::Le => lp.add_leq_constraint(&terms, equation.scalar)?,
        pwlsat_core::Relation::Ge => lp.add_geq_constraint(&terms, equation.scalar)?,
    }
    Ok(())
}
