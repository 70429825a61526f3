//! Variable bound management.

use crate::context::{Cdo, Context};
use crate::tightening::{BoundKind, Tightening};
use crate::EPSILON;

/// Marker returned when a tightening collapses an interval.
///
/// An empty interval is a normal search outcome (the current branch is
/// dead), not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Infeasible;

/// Context-scoped lower/upper bounds for every variable, plus the watcher
/// registry used to re-tighten constraints when a bound moves.
///
/// Tightenings are monotone: a call that would widen an interval is a
/// silent no-op. Variables touched by a successful tightening are queued in
/// a dirty set; the engine drains it and notifies the registered watchers.
#[derive(Debug, Default)]
pub struct BoundManager {
    lowers: Vec<Cdo<f64>>,
    uppers: Vec<Cdo<f64>>,
    watchers: Vec<Vec<u32>>,
    dirty: Vec<u32>,
}

impl BoundManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new variable with initial interval `[lower, upper]` and
    /// returns its index.
    pub fn register_variable(&mut self, ctx: &mut Context, lower: f64, upper: f64) -> u32 {
        let index = self.lowers.len() as u32;
        self.lowers.push(ctx.register(lower));
        self.uppers.push(ctx.register(upper));
        self.watchers.push(Vec::new());
        index
    }

    pub fn num_variables(&self) -> u32 {
        self.lowers.len() as u32
    }

    pub fn lower(&self, ctx: &Context, variable: u32) -> f64 {
        ctx.get(self.lowers[variable as usize])
    }

    pub fn upper(&self, ctx: &Context, variable: u32) -> f64 {
        ctx.get(self.uppers[variable as usize])
    }

    /// Raises the lower bound of `variable` to `value` if that narrows the
    /// interval. Returns `Ok(true)` iff the bound moved.
    pub fn set_lower(
        &mut self,
        ctx: &mut Context,
        variable: u32,
        value: f64,
    ) -> Result<bool, Infeasible> {
        let cell = self.lowers[variable as usize];
        if value <= ctx.get(cell) {
            return Ok(false);
        }
        ctx.set(cell, value);
        self.dirty.push(variable);
        if value > self.upper(ctx, variable) + EPSILON {
            tracing::debug!(variable, value, "lower bound crossed upper bound");
            return Err(Infeasible);
        }
        Ok(true)
    }

    /// Lowers the upper bound of `variable` to `value` if that narrows the
    /// interval. Returns `Ok(true)` iff the bound moved.
    pub fn set_upper(
        &mut self,
        ctx: &mut Context,
        variable: u32,
        value: f64,
    ) -> Result<bool, Infeasible> {
        let cell = self.uppers[variable as usize];
        if value >= ctx.get(cell) {
            return Ok(false);
        }
        ctx.set(cell, value);
        self.dirty.push(variable);
        if value < self.lower(ctx, variable) - EPSILON {
            tracing::debug!(variable, value, "upper bound crossed lower bound");
            return Err(Infeasible);
        }
        Ok(true)
    }

    /// Applies a [`Tightening`].
    pub fn apply(&mut self, ctx: &mut Context, t: &Tightening) -> Result<bool, Infeasible> {
        match t.kind {
            BoundKind::Lower => self.set_lower(ctx, t.variable, t.value),
            BoundKind::Upper => self.set_upper(ctx, t.variable, t.value),
        }
    }

    /// True iff `variable` is pinned to a single value.
    pub fn fixed(&self, ctx: &Context, variable: u32) -> bool {
        self.upper(ctx, variable) - self.lower(ctx, variable) <= EPSILON
    }

    /// Registers `watcher` (a constraint index) for bound changes of
    /// `variable`.
    pub fn register_watcher(&mut self, variable: u32, watcher: u32) {
        let list = &mut self.watchers[variable as usize];
        if !list.contains(&watcher) {
            list.push(watcher);
        }
    }

    pub fn unregister_watcher(&mut self, variable: u32, watcher: u32) {
        self.watchers[variable as usize].retain(|&w| w != watcher);
    }

    pub fn watchers(&self, variable: u32) -> &[u32] {
        &self.watchers[variable as usize]
    }

    /// Queues `variable` for watcher notification without a bound change.
    /// Used to wake every watcher once after registration.
    pub fn mark_dirty(&mut self, variable: u32) {
        self.dirty.push(variable);
    }

    /// Drains the set of variables whose bounds changed since the last
    /// drain, deduplicated.
    pub fn take_dirty(&mut self) -> Vec<u32> {
        let mut dirty = std::mem::take(&mut self.dirty);
        dirty.sort_unstable();
        dirty.dedup();
        dirty
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Context, BoundManager, u32) {
        let mut ctx = Context::new();
        let mut bounds = BoundManager::new();
        let v = bounds.register_variable(&mut ctx, -1.0, 1.0);
        (ctx, bounds, v)
    }

    #[test]
    fn test_tighten_narrows() {
        let (mut ctx, mut bounds, v) = setup();
        assert_eq!(bounds.set_lower(&mut ctx, v, -0.5), Ok(true));
        assert_eq!(bounds.set_upper(&mut ctx, v, 0.5), Ok(true));
        assert_eq!(bounds.lower(&ctx, v), -0.5);
        assert_eq!(bounds.upper(&ctx, v), 0.5);
    }

    #[test]
    fn test_widening_is_noop() {
        let (mut ctx, mut bounds, v) = setup();
        assert_eq!(bounds.set_lower(&mut ctx, v, -2.0), Ok(false));
        assert_eq!(bounds.set_upper(&mut ctx, v, 2.0), Ok(false));
        assert_eq!(bounds.lower(&ctx, v), -1.0);
        assert_eq!(bounds.upper(&ctx, v), 1.0);
    }

    #[test]
    fn test_empty_interval_reported() {
        let (mut ctx, mut bounds, v) = setup();
        assert_eq!(bounds.set_lower(&mut ctx, v, 0.5), Ok(true));
        assert_eq!(bounds.set_upper(&mut ctx, v, 0.2), Err(Infeasible));
    }

    #[test]
    fn test_bounds_revert_on_pop() {
        let (mut ctx, mut bounds, v) = setup();
        ctx.push();
        bounds.set_lower(&mut ctx, v, 0.0).unwrap();
        bounds.set_upper(&mut ctx, v, 0.25).unwrap();
        ctx.pop();
        assert_eq!(bounds.lower(&ctx, v), -1.0);
        assert_eq!(bounds.upper(&ctx, v), 1.0);
    }

    #[test]
    fn test_dirty_set_drains_deduplicated() {
        let (mut ctx, mut bounds, v) = setup();
        bounds.set_lower(&mut ctx, v, -0.5).unwrap();
        bounds.set_lower(&mut ctx, v, 0.0).unwrap();
        assert_eq!(bounds.take_dirty(), vec![v]);
        assert!(bounds.take_dirty().is_empty());
    }

    #[test]
    fn test_watcher_registry() {
        let (_, mut bounds, v) = setup();
        bounds.register_watcher(v, 3);
        bounds.register_watcher(v, 3);
        bounds.register_watcher(v, 5);
        assert_eq!(bounds.watchers(v), &[3, 5]);
        bounds.unregister_watcher(v, 3);
        assert_eq!(bounds.watchers(v), &[5]);
    }
}
