//! The SMT core: the case-split stack and the backtracking discipline.
//!
//! Every performed split opens one context level holding the split's
//! bounds and equations; the entry on the stack remembers the untried
//! alternatives. Backtracking drains exhausted entries (popping their
//! levels), then replaces the deepest live entry's active split by one of
//! its alternatives under a fresh level. At all times the stack depth
//! equals the context level minus the root level.

use pwlsat_core::{CaseSplit, Context};

/// One level of the search tree: the constraint that was split, the split
/// currently applied and the complementary splits not yet tried.
#[derive(Clone, Debug)]
pub struct SmtStackEntry {
    pub constraint: u32,
    pub active_split: CaseSplit,
    pub alternative_splits: Vec<CaseSplit>,
}

#[derive(Debug)]
pub struct SmtCore {
    stack: Vec<SmtStackEntry>,
    need_to_split: bool,
    constraint_for_splitting: Option<u32>,
    constraint_violation_threshold: u32,
    random_flips: u32,
}

impl SmtCore {
    pub fn new(constraint_violation_threshold: u32) -> Self {
        Self {
            stack: Vec::new(),
            need_to_split: false,
            constraint_for_splitting: None,
            constraint_violation_threshold,
            random_flips: 0,
        }
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn needs_split(&self) -> bool {
        self.need_to_split
    }

    pub fn constraint_for_splitting(&self) -> Option<u32> {
        self.constraint_for_splitting
    }

    /// Called by local search on every random walk step. Returns true when
    /// the accumulated flips crossed the threshold and a split is due.
    pub fn report_random_flip(&mut self) -> bool {
        self.random_flips += 1;
        if self.random_flips >= self.constraint_violation_threshold {
            self.need_to_split = true;
        }
        self.need_to_split
    }

    /// Requests a split on `constraint`, chosen by the engine's branching
    /// heuristic.
    pub fn request_split(&mut self, constraint: u32) {
        self.need_to_split = true;
        self.constraint_for_splitting = Some(constraint);
    }

    fn reset_reported_violations(&mut self) {
        self.random_flips = 0;
        self.need_to_split = false;
    }

    /// Opens a new level and commits to the first of `splits`, keeping the
    /// rest as alternatives. The caller has already deactivated the split
    /// constraint and must apply the returned split.
    pub fn perform_split(
        &mut self,
        ctx: &mut Context,
        constraint: u32,
        splits: Vec<CaseSplit>,
    ) -> CaseSplit {
        debug_assert!(self.need_to_split);
        debug_assert!(!splits.is_empty());
        self.reset_reported_violations();

        ctx.push();
        tracing::debug!(level = ctx.level(), constraint, "performing case split");

        let mut splits = splits.into_iter();
        let first = splits.next().expect("case splits must be non-empty");
        self.stack.push(SmtStackEntry {
            constraint,
            active_split: first.clone(),
            alternative_splits: splits.collect(),
        });
        self.constraint_for_splitting = None;
        first
    }

    /// Constraint owning the deepest stack entry.
    pub fn top_constraint(&self) -> Option<u32> {
        self.stack.last().map(|entry| entry.constraint)
    }

    /// Backtracks to the deepest entry with an untried alternative and
    /// returns that alternative for the caller to apply. `None` means the
    /// search tree is exhausted.
    pub fn pop_split(&mut self, ctx: &mut Context) -> Option<CaseSplit> {
        if self.stack.is_empty() {
            return None;
        }
        self.reset_reported_violations();
        tracing::debug!(level = ctx.level(), "backtracking");

        // Drop entries whose alternatives are exhausted, closing their
        // levels.
        while self
            .stack
            .last()
            .map_or(false, |entry| entry.alternative_splits.is_empty())
        {
            self.stack.pop();
            ctx.pop();
            if self.stack.is_empty() {
                return None;
            }
        }

        // Undo the active split of the deepest live entry, then re-enter
        // it under a fresh level with the next alternative.
        ctx.pop();
        ctx.push();
        let entry = self.stack.last_mut().expect("live entry after drain");
        let split = entry.alternative_splits.remove(0);
        entry.active_split = split.clone();
        Some(split)
    }

    /// Discards all levels and resets to the root.
    pub fn reset(&mut self, ctx: &mut Context) {
        ctx.pop_to(0);
        self.stack.clear();
        self.reset_reported_violations();
        self.constraint_for_splitting = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwlsat_core::Tightening;

    fn split_with_lower(variable: u32, value: f64) -> CaseSplit {
        let mut split = CaseSplit::new();
        split.add_bound(Tightening::lower(variable, value));
        split
    }

    fn two_way(variable: u32) -> Vec<CaseSplit> {
        vec![split_with_lower(variable, 0.0), split_with_lower(variable, 1.0)]
    }

    #[test]
    fn test_stack_depth_tracks_context_level() {
        let mut ctx = Context::new();
        let mut smt = SmtCore::new(20);

        smt.request_split(0);
        smt.perform_split(&mut ctx, 0, two_way(0));
        assert_eq!(smt.stack_depth(), 1);
        assert_eq!(ctx.level(), 1);

        smt.request_split(1);
        smt.perform_split(&mut ctx, 1, two_way(1));
        assert_eq!(smt.stack_depth(), 2);
        assert_eq!(ctx.level(), 2);

        assert!(smt.pop_split(&mut ctx).is_some());
        assert_eq!(smt.stack_depth(), 2);
        assert_eq!(ctx.level(), 2);

        // Both alternatives of the deep entry are spent now; the next pop
        // drains it and flips the shallow entry.
        assert!(smt.pop_split(&mut ctx).is_some());
        assert_eq!(smt.stack_depth(), 1);
        assert_eq!(ctx.level(), 1);

        assert!(smt.pop_split(&mut ctx).is_none());
        assert_eq!(smt.stack_depth(), 0);
        assert_eq!(ctx.level(), 0);
    }

    #[test]
    fn test_perform_split_returns_first_and_keeps_rest() {
        let mut ctx = Context::new();
        let mut smt = SmtCore::new(20);
        smt.request_split(0);
        let splits = vec![
            split_with_lower(0, 0.0),
            split_with_lower(0, 1.0),
            split_with_lower(0, 2.0),
        ];
        let first = smt.perform_split(&mut ctx, 0, splits);
        assert_eq!(first, split_with_lower(0, 0.0));

        let second = smt.pop_split(&mut ctx).unwrap();
        assert_eq!(second, split_with_lower(0, 1.0));
        let third = smt.pop_split(&mut ctx).unwrap();
        assert_eq!(third, split_with_lower(0, 2.0));
        assert!(smt.pop_split(&mut ctx).is_none());
    }

    #[test]
    fn test_pop_on_empty_stack() {
        let mut ctx = Context::new();
        let mut smt = SmtCore::new(20);
        assert!(smt.pop_split(&mut ctx).is_none());
        assert_eq!(ctx.level(), 0);
    }

    #[test]
    fn test_random_flip_threshold() {
        let mut smt = SmtCore::new(3);
        assert!(!smt.report_random_flip());
        assert!(!smt.report_random_flip());
        assert!(smt.report_random_flip());
        assert!(smt.needs_split());
    }

    #[test]
    fn test_deactivation_reverts_across_alternatives() {
        // A value written before the split-level push survives alternative
        // switches and reverts only when the entry itself is drained.
        let mut ctx = Context::new();
        let active = ctx.register(true);
        let mut smt = SmtCore::new(20);

        ctx.push(); // parent level owning the deactivation
        ctx.set(active, false);
        smt.request_split(0);
        smt.perform_split(&mut ctx, 0, two_way(0));
        assert!(!ctx.get(active));

        smt.pop_split(&mut ctx).unwrap();
        assert!(!ctx.get(active));

        assert!(smt.pop_split(&mut ctx).is_none());
        assert!(!ctx.get(active));
        ctx.pop();
        assert!(ctx.get(active));
    }
}
