//! Sum-of-infeasibilities management.
//!
//! Every active, unfixed constraint that supports the metric contributes a
//! linear cost component for one chosen phase; the sum is handed to the LP
//! as the objective. A cost of zero at an LP-feasible point means the
//! chosen phases are all realized. Local search walks the space of phase
//! choices: improving flips (negative reduced cost) are taken greedily,
//! otherwise a seeded random flip keeps the walk moving.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use pwlsat_core::{
    BoundManager, Context, CostFunction, PhaseStatus, PiecewiseLinear, PlConstraint,
};

/// A phase flip proposed by local search.
#[derive(Clone, Copy, Debug)]
pub struct FlipProposal {
    pub constraint: usize,
    pub phase: PhaseStatus,
    /// Cost change if taken; negative is an improvement.
    pub delta: f64,
}

#[derive(Debug, Default)]
pub struct SoiManager {
    initialized: bool,
}

impl SoiManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        self.initialized = false;
    }

    /// True iff `constraint` takes part in the cost function right now.
    fn participates(ctx: &Context, constraint: &PlConstraint) -> bool {
        if !constraint.is_active(ctx) || constraint.phase_fixed(ctx) {
            return false;
        }
        let mut probe = CostFunction::new();
        for phase in [
            PhaseStatus::ReluActive,
            PhaseStatus::AbsPositive,
            PhaseStatus::SignPositive,
            PhaseStatus::Case(0),
        ] {
            constraint.cost_function_component(ctx, phase, &mut probe);
            if !probe.is_empty() {
                return true;
            }
        }
        false
    }

    /// Seeds every participating constraint with the phase closest to the
    /// current assignment.
    pub fn initialize(
        &mut self,
        ctx: &Context,
        bounds: &BoundManager,
        constraints: &mut [PlConstraint],
        assignment: &[f64],
    ) {
        for constraint in constraints.iter_mut() {
            if !Self::participates(ctx, constraint) {
                continue;
            }
            let mut best: Option<(f64, PhaseStatus)> = None;
            for phase in constraint.phase_candidates(ctx, bounds) {
                let mut cost = CostFunction::new();
                constraint.cost_function_component(ctx, phase, &mut cost);
                if cost.is_empty() {
                    continue;
                }
                let value = cost.evaluate(assignment);
                if best.map_or(true, |(v, _)| value < v) {
                    best = Some((value, phase));
                }
            }
            if let Some((_, phase)) = best {
                constraint.state_mut().set_soi_phase(phase);
            }
        }
        self.initialized = true;
    }

    /// The current total cost function.
    pub fn cost_function(&self, ctx: &Context, constraints: &[PlConstraint]) -> CostFunction {
        let mut cost = CostFunction::new();
        for constraint in constraints {
            if Self::participates(ctx, constraint) {
                let phase = constraint.state().soi_phase();
                if phase != PhaseStatus::NotFixed {
                    constraint.cost_function_component(ctx, phase, &mut cost);
                }
            }
        }
        cost
    }

    /// The best improving flip under `assignment`, if any.
    pub fn propose_flip(
        &self,
        ctx: &Context,
        bounds: &BoundManager,
        constraints: &[PlConstraint],
        assignment: &[f64],
    ) -> Option<FlipProposal> {
        let mut best: Option<FlipProposal> = None;
        for (index, constraint) in constraints.iter().enumerate() {
            if !Self::participates(ctx, constraint) {
                continue;
            }
            if let Some((delta, phase)) = constraint.reduced_heuristic_cost(ctx, bounds, assignment)
            {
                if best.map_or(true, |b| delta < b.delta) {
                    best = Some(FlipProposal {
                        constraint: index,
                        phase,
                        delta,
                    });
                }
            }
        }
        best
    }

    /// A uniformly random flip among participating constraints.
    pub fn random_flip(
        &self,
        ctx: &Context,
        bounds: &BoundManager,
        constraints: &[PlConstraint],
        rng: &mut ChaCha8Rng,
    ) -> Option<FlipProposal> {
        let candidates: Vec<usize> = constraints
            .iter()
            .enumerate()
            .filter(|(_, c)| Self::participates(ctx, c))
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let index = candidates[rng.random_range(0..candidates.len())];
        let constraint = &constraints[index];
        let current = constraint.state().soi_phase();
        let phases: Vec<PhaseStatus> = constraint
            .phase_candidates(ctx, bounds)
            .into_iter()
            .filter(|&p| p != current)
            .collect();
        if phases.is_empty() {
            return None;
        }
        let phase = phases[rng.random_range(0..phases.len())];
        Some(FlipProposal {
            constraint: index,
            phase,
            delta: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwlsat_core::ReluConstraint;
    use rand::SeedableRng;

    fn setup() -> (Context, BoundManager, Vec<PlConstraint>) {
        let mut ctx = Context::new();
        let mut bounds = BoundManager::new();
        let b = bounds.register_variable(&mut ctx, -1.0, 1.0);
        let f = bounds.register_variable(&mut ctx, 0.0, 1.0);
        let mut relu = PlConstraint::Relu(ReluConstraint::new(0, b, f));
        relu.register(&mut ctx);
        (ctx, bounds, vec![relu])
    }

    #[test]
    fn test_initialize_picks_nearest_phase() {
        let (ctx, bounds, mut constraints) = setup();
        let mut soi = SoiManager::new();

        // At (b, f) = (-0.8, 0.1) the inactive phase costs 0.1, the active
        // phase 0.9.
        soi.initialize(&ctx, &bounds, &mut constraints, &[-0.8, 0.1]);
        assert_eq!(
            constraints[0].state().soi_phase(),
            PhaseStatus::ReluInactive
        );

        let cost = soi.cost_function(&ctx, &constraints);
        assert!((cost.evaluate(&[-0.8, 0.1]) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_propose_flip_improves() {
        let (ctx, bounds, mut constraints) = setup();
        let mut soi = SoiManager::new();
        // Force the worse phase, then expect a flip toward the better one.
        soi.initialize(&ctx, &bounds, &mut constraints, &[-0.8, 0.1]);
        constraints[0]
            .state_mut()
            .set_soi_phase(PhaseStatus::ReluActive);

        let flip = soi
            .propose_flip(&ctx, &bounds, &constraints, &[-0.8, 0.1])
            .unwrap();
        assert_eq!(flip.phase, PhaseStatus::ReluInactive);
        assert!(flip.delta < 0.0);
    }

    #[test]
    fn test_random_flip_changes_phase() {
        let (ctx, bounds, mut constraints) = setup();
        let mut soi = SoiManager::new();
        soi.initialize(&ctx, &bounds, &mut constraints, &[0.5, 0.5]);

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let flip = soi
            .random_flip(&ctx, &bounds, &constraints, &mut rng)
            .unwrap();
        assert_ne!(flip.phase, constraints[0].state().soi_phase());
    }

    #[test]
    fn test_fixed_constraints_do_not_participate() {
        let (mut ctx, mut bounds, mut constraints) = setup();
        bounds.set_lower(&mut ctx, 0, 0.2).unwrap();
        constraints[0].notify_lower_bound(&mut ctx, &bounds, 0, 0.2);
        assert!(constraints[0].phase_fixed(&ctx));

        let soi = SoiManager::new();
        let cost = soi.cost_function(&ctx, &constraints);
        assert!(cost.is_empty());
    }
}
