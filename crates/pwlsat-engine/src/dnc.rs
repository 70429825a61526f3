//! Divide-and-conquer solving.
//!
//! A manager partitions one query into leaf subqueries by repeatedly
//! bisecting its top-ranked constraint (or the widest input interval) and
//! dispatches each leaf to a fresh worker engine. The strategy index
//! varies the ranking, the workers' branching heuristic and their seeds so
//! that differently-configured managers explore different regions first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pwlsat_config::{DivideStrategy, Options};
use pwlsat_core::{
    BoundKind, BoundManager, Context, InputQuery, PiecewiseLinear, PlConstraint,
};

use crate::engine::{Engine, ExitCode};
use crate::statistics::StatisticsSnapshot;

struct WorkerReport {
    code: ExitCode,
    solution: Option<Vec<f64>>,
    stats: StatisticsSnapshot,
}

pub struct DnCManager {
    options: Options,
    query: InputQuery,
    exit_code: ExitCode,
    solution: Option<Vec<f64>>,
    stats: StatisticsSnapshot,
    done: Option<Arc<AtomicBool>>,
}

impl DnCManager {
    pub fn new(options: Options, query: InputQuery) -> Self {
        Self {
            options,
            query,
            exit_code: ExitCode::Unknown,
            solution: None,
            stats: StatisticsSnapshot::default(),
            done: None,
        }
    }

    pub fn set_done_flag(&mut self, done: Arc<AtomicBool>) {
        self.done = Some(done);
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn solution(&self) -> Option<&[f64]> {
        self.solution.as_deref()
    }

    pub fn statistics(&self) -> &StatisticsSnapshot {
        &self.stats
    }

    /// Partitions the query into up to `num_partitions` leaves and solves
    /// them in parallel. The whole query is UNSAT iff every leaf is.
    pub fn solve(&mut self, num_partitions: usize, strategy: u32) -> ExitCode {
        let partitions = partition_query(&self.query, num_partitions.max(1), strategy);
        tracing::info!(leaves = partitions.len(), strategy, "dnc dispatching");

        // Leaf workers stop on this manager's own flag; the portfolio-wide
        // flag (if any) is forwarded into it by the collection loop below.
        let local_done = Arc::new(AtomicBool::new(false));
        let parent_done = self.done.clone();
        let (tx, rx) = crossbeam::channel::unbounded::<WorkerReport>();

        let mut sat: Option<WorkerReport> = None;
        let mut all_unsat = true;
        let mut saw_timeout = false;
        let mut saw_error = false;
        let mut merged = StatisticsSnapshot::default();

        rayon::scope(|scope| {
            for (index, leaf) in partitions.iter().enumerate() {
                let tx = tx.clone();
                let local_done = local_done.clone();
                let options = self
                    .options
                    .with_seed(self.options.seed.wrapping_add(31 * (strategy as u64 + 1) + index as u64))
                    .with_branching(strategy_branching(strategy));
                scope.spawn(move |_| {
                    if local_done.load(Ordering::Relaxed) {
                        return;
                    }
                    let timeout = options.timeout;
                    let mut engine = Engine::new(options);
                    engine.set_done_flag(local_done);
                    let code = match engine.process_query(leaf) {
                        Ok(true) => engine.solve(timeout),
                        Ok(false) => ExitCode::Unsat,
                        Err(error) => {
                            tracing::error!(%error, "dnc worker failed");
                            ExitCode::Error
                        }
                    };
                    let solution =
                        (code == ExitCode::Sat).then(|| engine.assignment().to_vec());
                    let _ = tx.send(WorkerReport {
                        code,
                        solution,
                        stats: engine.statistics().snapshot(),
                    });
                });
            }
            drop(tx);

            loop {
                let report = match rx.recv_timeout(std::time::Duration::from_millis(50)) {
                    Ok(report) => report,
                    Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                        if parent_done
                            .as_ref()
                            .is_some_and(|flag| flag.load(Ordering::Relaxed))
                        {
                            local_done.store(true, Ordering::SeqCst);
                        }
                        continue;
                    }
                    Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                };
                merge_stats(&mut merged, &report.stats);
                match report.code {
                    ExitCode::Sat => {
                        // First witness wins; stop the siblings.
                        local_done.store(true, Ordering::SeqCst);
                        if sat.is_none() {
                            sat = Some(report);
                        }
                    }
                    ExitCode::Unsat => {}
                    ExitCode::Timeout | ExitCode::Unknown => {
                        all_unsat = false;
                        saw_timeout = true;
                    }
                    ExitCode::QuitRequested => {
                        all_unsat = false;
                    }
                    ExitCode::Error => {
                        all_unsat = false;
                        saw_error = true;
                    }
                }
            }
        });

        self.stats = merged;
        self.exit_code = if let Some(report) = sat {
            self.solution = report.solution;
            ExitCode::Sat
        } else if all_unsat {
            ExitCode::Unsat
        } else if saw_error {
            ExitCode::Error
        } else if saw_timeout {
            ExitCode::Timeout
        } else {
            ExitCode::Unknown
        };
        tracing::info!(code = ?self.exit_code, "dnc finished");
        self.exit_code
    }
}

fn merge_stats(into: &mut StatisticsSnapshot, from: &StatisticsSnapshot) {
    into.elapsed = into.elapsed.max(from.elapsed);
    into.visited_tree_states += from.visited_tree_states;
    into.num_splits += from.num_splits;
    into.num_pops += from.num_pops;
    into.num_proposed_flips += from.num_proposed_flips;
    into.num_accepted_flips += from.num_accepted_flips;
    into.num_rejected_flips += from.num_rejected_flips;
    into.num_lp_solves += from.num_lp_solves;
    into.num_simplex_iterations += from.num_simplex_iterations;
    into.max_stack_depth = into.max_stack_depth.max(from.max_stack_depth);
    into.time_lp += from.time_lp;
    into.time_tightening += from.time_tightening;
    into.time_smt += from.time_smt;
    into.time_branching += from.time_branching;
}

fn strategy_branching(strategy: u32) -> DivideStrategy {
    match strategy % 4 {
        0 => DivideStrategy::Polarity,
        1 => DivideStrategy::PseudoCost,
        2 => DivideStrategy::Soi,
        _ => DivideStrategy::SoiPolarity,
    }
}

/// Splits `query` into up to `target` leaves, breadth-first.
pub(crate) fn partition_query(query: &InputQuery, target: usize, strategy: u32) -> Vec<InputQuery> {
    let mut leaves: VecDeque<InputQuery> = VecDeque::new();
    leaves.push_back(query.duplicate());
    while leaves.len() < target {
        let Some(next) = leaves.pop_front() else {
            break;
        };
        match split_query_once(&next, strategy) {
            Some(children) => leaves.extend(children),
            None => {
                // Nothing left to split on.
                leaves.push_back(next);
                break;
            }
        }
    }
    leaves.into_iter().collect()
}

/// One bisection step: by the strategy-ranked constraint, falling back to
/// the widest input interval.
fn split_query_once(query: &InputQuery, strategy: u32) -> Option<Vec<InputQuery>> {
    if strategy == 2 {
        // This strategy prefers carving the input box directly.
        if let Some(children) = bisect_widest_input(query) {
            return Some(children);
        }
    }

    let mut ctx = Context::new();
    let mut bounds = BoundManager::new();
    for v in 0..query.num_variables() {
        bounds.register_variable(&mut ctx, query.lower_bound(v), query.upper_bound(v));
    }
    let mut constraints: Vec<PlConstraint> =
        query.constraints().iter().map(|c| c.duplicate()).collect();

    let mut ranked: Vec<(f64, usize)> = Vec::new();
    for (index, constraint) in constraints.iter_mut().enumerate() {
        constraint.register(&mut ctx);
        if constraint.polarity(&ctx, &bounds).is_some() {
            constraint.update_score_based_on_polarity(&ctx, &bounds);
            ranked.push((constraint.score(), index));
        } else if constraint.case_splits(&ctx, &bounds).len() >= 2 {
            ranked.push((0.0, index));
        }
    }
    if ranked.is_empty() {
        return bisect_widest_input(query);
    }
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    let position = match strategy {
        1 => 1usize.min(ranked.len() - 1),
        3 => ranked.len() - 1,
        _ => 0,
    };
    let chosen = ranked[position].1;

    let splits = constraints[chosen].case_splits(&ctx, &bounds);
    if splits.len() < 2 {
        return bisect_widest_input(query);
    }

    let mut children = Vec::with_capacity(splits.len());
    for split in splits {
        let mut child = query.duplicate();
        for t in split.bounds() {
            match t.kind {
                BoundKind::Lower => {
                    if t.value > child.lower_bound(t.variable) {
                        let _ = child.set_lower_bound(t.variable, t.value);
                    }
                }
                BoundKind::Upper => {
                    if t.value < child.upper_bound(t.variable) {
                        let _ = child.set_upper_bound(t.variable, t.value);
                    }
                }
            }
        }
        for eq in split.equations() {
            child.add_equation(eq.clone());
        }
        children.push(child);
    }
    Some(children)
}

/// Halves the widest finite input interval (any variable if no inputs are
/// designated).
fn bisect_widest_input(query: &InputQuery) -> Option<Vec<InputQuery>> {
    let candidates: Vec<u32> = if query.input_variables().is_empty() {
        (0..query.num_variables()).collect()
    } else {
        query.input_variables().to_vec()
    };
    let widest = candidates
        .into_iter()
        .filter_map(|v| {
            let width = query.upper_bound(v) - query.lower_bound(v);
            (width.is_finite() && width > 1e-4).then_some((width, v))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))?;

    let v = widest.1;
    let mid = (query.lower_bound(v) + query.upper_bound(v)) / 2.0;
    let mut low = query.duplicate();
    let _ = low.set_upper_bound(v, mid);
    let mut high = query.duplicate();
    let _ = high.set_lower_bound(v, mid);
    Some(vec![low, high])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwlsat_core::ReluConstraint;

    fn query_with_relus(n: u32) -> InputQuery {
        let mut query = InputQuery::new(2 * n);
        for i in 0..n {
            let b = 2 * i;
            let f = 2 * i + 1;
            query.set_lower_bound(b, -1.0 - i as f64).unwrap();
            query.set_upper_bound(b, 1.0).unwrap();
            query.set_lower_bound(f, 0.0).unwrap();
            query.set_upper_bound(f, 2.0).unwrap();
            let id = query.next_constraint_id();
            query.add_constraint(PlConstraint::Relu(ReluConstraint::new(id, b, f)));
        }
        query
    }

    #[test]
    fn test_partition_count() {
        let query = query_with_relus(3);
        let leaves = partition_query(&query, 4, 0);
        assert_eq!(leaves.len(), 4);
    }

    #[test]
    fn test_partitions_tighten_bounds() {
        let query = query_with_relus(1);
        let leaves = partition_query(&query, 2, 0);
        assert_eq!(leaves.len(), 2);
        // One leaf commits the input to the nonnegative side, the other to
        // the nonpositive side.
        let nonneg = leaves.iter().any(|l| l.lower_bound(0) == 0.0);
        let nonpos = leaves.iter().any(|l| l.upper_bound(0) == 0.0);
        assert!(nonneg && nonpos);
    }

    #[test]
    fn test_input_bisection_strategy() {
        let mut query = InputQuery::new(1);
        query.set_lower_bound(0, 0.0).unwrap();
        query.set_upper_bound(0, 8.0).unwrap();
        query.mark_input_variable(0).unwrap();
        let leaves = partition_query(&query, 4, 2);
        assert_eq!(leaves.len(), 4);
        assert!(leaves.iter().any(|l| l.upper_bound(0) == 2.0));
        assert!(leaves.iter().any(|l| l.lower_bound(0) == 6.0));
    }
}
