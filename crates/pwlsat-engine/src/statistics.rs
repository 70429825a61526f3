//! Search statistics collection.
//!
//! Each engine is single-threaded and owns one `Statistics` value; the
//! portfolio reads a [`StatisticsSnapshot`] from whichever worker wins.
//!
//! *Visited tree states* counts terminal evaluations of the search tree:
//! every dead end (an LP or propagation infeasibility) and every found
//! witness. A chain of n binary splits explored exhaustively therefore
//! visits `2^n` states.

use std::time::{Duration, Instant};

/// Micro-phase a slice of wall-clock time is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeCategory {
    LpSolve,
    Tightening,
    SmtCore,
    Branching,
}

#[derive(Debug)]
pub struct Statistics {
    start: Option<Instant>,
    visited_tree_states: u64,
    num_splits: u64,
    num_pops: u64,
    num_proposed_flips: u64,
    num_accepted_flips: u64,
    num_rejected_flips: u64,
    num_lp_solves: u64,
    num_simplex_iterations: u64,
    max_stack_depth: u64,
    time_lp: Duration,
    time_tightening: Duration,
    time_smt: Duration,
    time_branching: Duration,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            start: None,
            visited_tree_states: 0,
            num_splits: 0,
            num_pops: 0,
            num_proposed_flips: 0,
            num_accepted_flips: 0,
            num_rejected_flips: 0,
            num_lp_solves: 0,
            num_simplex_iterations: 0,
            max_stack_depth: 0,
            time_lp: Duration::ZERO,
            time_tightening: Duration::ZERO,
            time_smt: Duration::ZERO,
            time_branching: Duration::ZERO,
        }
    }

    pub fn start_solving(&mut self) {
        if self.start.is_none() {
            self.start = Some(Instant::now());
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    pub fn inc_visited_tree_states(&mut self) {
        self.visited_tree_states += 1;
    }

    pub fn visited_tree_states(&self) -> u64 {
        self.visited_tree_states
    }

    pub fn inc_splits(&mut self) {
        self.num_splits += 1;
    }

    pub fn inc_pops(&mut self) {
        self.num_pops += 1;
    }

    pub fn record_flip(&mut self, accepted: bool) {
        self.num_proposed_flips += 1;
        if accepted {
            self.num_accepted_flips += 1;
        } else {
            self.num_rejected_flips += 1;
        }
    }

    pub fn record_lp_solve(&mut self, simplex_iterations: u64) {
        self.num_lp_solves += 1;
        self.num_simplex_iterations += simplex_iterations;
    }

    pub fn observe_stack_depth(&mut self, depth: u64) {
        self.max_stack_depth = self.max_stack_depth.max(depth);
    }

    pub fn add_time(&mut self, category: TimeCategory, duration: Duration) {
        match category {
            TimeCategory::LpSolve => self.time_lp += duration,
            TimeCategory::Tightening => self.time_tightening += duration,
            TimeCategory::SmtCore => self.time_smt += duration,
            TimeCategory::Branching => self.time_branching += duration,
        }
    }

    /// Runs `f`, attributing its wall time to `category`.
    pub fn timed<T>(&mut self, category: TimeCategory, f: impl FnOnce(&mut Self) -> T) -> T {
        let start = Instant::now();
        let result = f(self);
        self.add_time(category, start.elapsed());
        result
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            elapsed: self.elapsed(),
            visited_tree_states: self.visited_tree_states,
            num_splits: self.num_splits,
            num_pops: self.num_pops,
            num_proposed_flips: self.num_proposed_flips,
            num_accepted_flips: self.num_accepted_flips,
            num_rejected_flips: self.num_rejected_flips,
            num_lp_solves: self.num_lp_solves,
            num_simplex_iterations: self.num_simplex_iterations,
            max_stack_depth: self.max_stack_depth,
            time_lp: self.time_lp,
            time_tightening: self.time_tightening,
            time_smt: self.time_smt,
            time_branching: self.time_branching,
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen copy of the counters, cheap to send across workers.
#[derive(Clone, Debug, Default)]
pub struct StatisticsSnapshot {
    pub elapsed: Duration,
    pub visited_tree_states: u64,
    pub num_splits: u64,
    pub num_pops: u64,
    pub num_proposed_flips: u64,
    pub num_accepted_flips: u64,
    pub num_rejected_flips: u64,
    pub num_lp_solves: u64,
    pub num_simplex_iterations: u64,
    pub max_stack_depth: u64,
    pub time_lp: Duration,
    pub time_tightening: Duration,
    pub time_smt: Duration,
    pub time_branching: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = Statistics::new();
        stats.inc_visited_tree_states();
        stats.inc_visited_tree_states();
        stats.record_flip(true);
        stats.record_flip(false);
        stats.record_lp_solve(17);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.visited_tree_states, 2);
        assert_eq!(snapshot.num_proposed_flips, 2);
        assert_eq!(snapshot.num_accepted_flips, 1);
        assert_eq!(snapshot.num_rejected_flips, 1);
        assert_eq!(snapshot.num_simplex_iterations, 17);
    }

    #[test]
    fn test_timed_attributes_duration() {
        let mut stats = Statistics::new();
        let value = stats.timed(TimeCategory::LpSolve, |_| 42);
        assert_eq!(value, 42);
        assert!(stats.snapshot().time_lp >= Duration::ZERO);
    }

    #[test]
    fn test_stack_depth_watermark() {
        let mut stats = Statistics::new();
        stats.observe_stack_depth(3);
        stats.observe_stack_depth(1);
        assert_eq!(stats.snapshot().max_stack_depth, 3);
    }
}
