//! Depth-first branch-and-bound over binary variables.
//!
//! Nodes carry the set of fixed binaries; each node solves the continuous
//! relaxation through the simplex layer and branches on the first
//! fractional binary, nearest rounding explored first. Pruning is by
//! incumbent objective; an optional cutoff stops the search as soon as a
//! good-enough incumbent appears.

use crate::simplex::{solve_relaxation, LimitState, Model, Relaxation, SolveStatus};

const INT_TOL: f64 = 1e-6;

pub(crate) struct MilpResult {
    pub(crate) status: SolveStatus,
    pub(crate) solution: Option<Vec<f64>>,
    pub(crate) objective: f64,
    pub(crate) cutoff_hit: bool,
}

/// Objective value in minimization space.
fn min_space(model: &Model, objective: f64) -> f64 {
    if model.minimize {
        objective
    } else {
        -objective
    }
}

pub(crate) fn branch_and_bound(
    model: &Model,
    binaries: &[usize],
    cutoff: Option<f64>,
    limits: &mut LimitState,
) -> MilpResult {
    let cutoff_min = cutoff.map(|c| min_space(model, c));
    let mut incumbent: Option<(f64, Vec<f64>, f64)> = None; // (obj_min, x, obj_user)
    let mut cutoff_hit = false;
    let mut nodes: u64 = 0;

    let mut stack: Vec<Vec<(usize, f64, f64)>> = vec![Vec::new()];
    while let Some(fixes) = stack.pop() {
        if limits.expired() {
            return finish(limits.stop_status(), incumbent, cutoff_hit);
        }
        nodes += 1;

        let relax: Relaxation = solve_relaxation(model, &fixes, limits);
        match relax.status {
            SolveStatus::Infeasible => continue,
            SolveStatus::Unbounded => {
                // A restriction of the problem is unbounded, so the whole
                // mixed problem is.
                return MilpResult {
                    status: SolveStatus::Unbounded,
                    solution: None,
                    objective: 0.0,
                    cutoff_hit: false,
                };
            }
            SolveStatus::TimedOut | SolveStatus::Interrupted => {
                return finish(relax.status, incumbent, cutoff_hit);
            }
            SolveStatus::NotSolved => {
                return finish(SolveStatus::NotSolved, incumbent, cutoff_hit);
            }
            SolveStatus::Optimal => {}
        }

        let obj_min = min_space(model, relax.objective);
        if let Some((best, _, _)) = &incumbent {
            if obj_min >= best - 1e-9 {
                continue;
            }
        }

        let fractional = binaries
            .iter()
            .copied()
            .find(|&j| (relax.x[j] - relax.x[j].round()).abs() > INT_TOL);
        match fractional {
            None => {
                tracing::trace!(nodes, objective = relax.objective, "milp incumbent");
                incumbent = Some((obj_min, relax.x, relax.objective));
                if let Some(c) = cutoff_min {
                    if obj_min <= c + 1e-7 {
                        cutoff_hit = true;
                        break;
                    }
                }
            }
            Some(j) => {
                let near = relax.x[j].round().clamp(0.0, 1.0);
                let far = 1.0 - near;
                let mut near_fixes = fixes.clone();
                near_fixes.push((j, near, near));
                let mut far_fixes = fixes;
                far_fixes.push((j, far, far));
                // LIFO: push the far branch first so the near one pops next.
                stack.push(far_fixes);
                stack.push(near_fixes);
            }
        }
    }

    let status = if incumbent.is_some() {
        SolveStatus::Optimal
    } else {
        SolveStatus::Infeasible
    };
    finish(status, incumbent, cutoff_hit)
}

fn finish(
    status: SolveStatus,
    incumbent: Option<(f64, Vec<f64>, f64)>,
    cutoff_hit: bool,
) -> MilpResult {
    match incumbent {
        Some((_, x, objective)) => MilpResult {
            status,
            solution: Some(x),
            objective,
            cutoff_hit,
        },
        None => MilpResult {
            status,
            solution: None,
            objective: 0.0,
            cutoff_hit,
        },
    }
}
