//! Portfolio orchestration.
//!
//! Runs heterogeneous workers over the same query and reports the first
//! conclusive answer. With a single top-level disjunction the portfolio is
//! four differently-seeded divide-and-conquer managers plus one MILP
//! engine; otherwise one manager, a band of single-thread engines mixing
//! sum-of-infeasibilities and polarity search, plus the MILP engine.
//!
//! Workers share exactly one atomic `done` flag (raised by the first
//! conclusive worker, polled by everyone between LP calls) and a mutex
//! serializing the summary-file write. Every worker is joined before the
//! portfolio returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pwlsat_config::{DivideStrategy, Options};
use pwlsat_core::InputQuery;

use crate::dnc::DnCManager;
use crate::engine::{Engine, ExitCode};
use crate::statistics::StatisticsSnapshot;
use crate::summary::write_summary;

/// What the portfolio concluded.
#[derive(Clone, Debug)]
pub struct PortfolioResult {
    pub exit_code: ExitCode,
    pub stats: StatisticsSnapshot,
    pub solution: Option<Vec<f64>>,
}

impl PortfolioResult {
    /// The property-style summary token.
    pub fn token(&self) -> &'static str {
        match self.exit_code {
            ExitCode::Sat => "violated",
            ExitCode::Unsat => "holds",
            _ => "unknown",
        }
    }
}

struct WorkerReport {
    name: &'static str,
    code: ExitCode,
    winner: bool,
    stats: StatisticsSnapshot,
    solution: Option<Vec<f64>>,
}

pub struct Portfolio {
    options: Options,
}

impl Portfolio {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn run(&self, query: &InputQuery) -> PortfolioResult {
        // Preprocessing alone may settle the query.
        let mut probe = Engine::new(self.options.clone());
        match probe.process_query(query) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("solved by preprocessing");
                let result = PortfolioResult {
                    exit_code: ExitCode::Unsat,
                    stats: probe.statistics().snapshot(),
                    solution: None,
                };
                self.write_if_configured(&result);
                return result;
            }
            Err(error) => {
                tracing::error!(%error, "portfolio preprocessing failed");
                let result = PortfolioResult {
                    exit_code: ExitCode::Error,
                    stats: StatisticsSnapshot::default(),
                    solution: None,
                };
                self.write_if_configured(&result);
                return result;
            }
        }
        drop(probe);

        let done = Arc::new(AtomicBool::new(false));
        let summary_lock = Arc::new(Mutex::new(()));
        let (tx, rx) = crossbeam::channel::unbounded::<WorkerReport>();
        let single_disjunction = query.num_disjunctions() == 1;

        let mut winner: Option<WorkerReport> = None;
        let mut all_unsat = true;
        let mut any_conclusive = false;

        rayon::scope(|scope| {
            // Divide-and-conquer managers.
            let dnc_strategies: &[u32] = if single_disjunction { &[0, 1, 2, 3] } else { &[0] };
            for &strategy in dnc_strategies {
                let tx = tx.clone();
                let done = done.clone();
                let options = self.options.clone();
                let lock = summary_lock.clone();
                let num_partitions = self.options.num_partitions;
                scope.spawn(move |_| {
                    let mut manager = DnCManager::new(options.clone(), query.duplicate());
                    manager.set_done_flag(done.clone());
                    let code = manager.solve(num_partitions, strategy);
                    let report = WorkerReport {
                        name: "dnc",
                        code,
                        winner: conclude(&done, &lock, &options, code, manager.statistics(), manager.solution()),
                        stats: manager.statistics().clone(),
                        solution: manager.solution().map(|s| s.to_vec()),
                    };
                    let _ = tx.send(report);
                });
            }

            // Single-thread engines with diverse seeds and heuristics.
            if !single_disjunction {
                for index in 0..self.options.num_workers {
                    let tx = tx.clone();
                    let done = done.clone();
                    let lock = summary_lock.clone();
                    let mut options = self.options.with_seed(self.options.seed + 1 + index as u64);
                    if index % 2 == 0 {
                        options.local_search = true;
                        options.branching = DivideStrategy::Soi;
                    } else {
                        options.local_search = false;
                        options.branching = DivideStrategy::Polarity;
                    }
                    scope.spawn(move |_| {
                        let timeout = options.timeout;
                        let mut engine = Engine::new(options.clone());
                        engine.set_done_flag(done.clone());
                        let code = match engine.process_query(query) {
                            Ok(true) => engine.solve(timeout),
                            Ok(false) => ExitCode::Unsat,
                            Err(error) => {
                                tracing::error!(%error, "portfolio worker failed");
                                ExitCode::Error
                            }
                        };
                        let stats = engine.statistics().snapshot();
                        let solution =
                            (code == ExitCode::Sat).then(|| engine.assignment().to_vec());
                        let report = WorkerReport {
                            name: "single",
                            code,
                            winner: conclude(&done, &lock, &options, code, &stats, solution.as_deref()),
                            stats,
                            solution,
                        };
                        let _ = tx.send(report);
                    });
                }
            }

            // The MILP engine takes the whole query in one shot.
            {
                let tx = tx.clone();
                let done = done.clone();
                let lock = summary_lock.clone();
                let options = self.options.clone();
                scope.spawn(move |_| {
                    let timeout = options.timeout;
                    let mut engine = Engine::new(options.clone());
                    engine.set_done_flag(done.clone());
                    let code = match engine.process_query(query) {
                        Ok(true) => engine.solve_with_milp_encoding(timeout),
                        Ok(false) => ExitCode::Unsat,
                        Err(error) => {
                            tracing::error!(%error, "milp worker failed");
                            ExitCode::Error
                        }
                    };
                    let stats = engine.statistics().snapshot();
                    let solution = (code == ExitCode::Sat).then(|| engine.assignment().to_vec());
                    let report = WorkerReport {
                        name: "milp",
                        code,
                        winner: conclude(&done, &lock, &options, code, &stats, solution.as_deref()),
                        stats,
                        solution,
                    };
                    let _ = tx.send(report);
                });
            }
            drop(tx);

            for report in rx.iter() {
                tracing::info!(worker = report.name, code = ?report.code, "worker finished");
                match report.code {
                    ExitCode::Sat | ExitCode::Unsat => any_conclusive = true,
                    _ => all_unsat = false,
                }
                if report.code == ExitCode::Sat {
                    all_unsat = false;
                }
                if report.winner && winner.is_none() {
                    winner = Some(report);
                }
            }
        });

        let result = match winner {
            Some(report) => PortfolioResult {
                exit_code: report.code,
                stats: report.stats,
                solution: report.solution,
            },
            None => PortfolioResult {
                exit_code: if any_conclusive && all_unsat {
                    ExitCode::Unsat
                } else {
                    ExitCode::Timeout
                },
                stats: StatisticsSnapshot::default(),
                solution: None,
            },
        };
        if !done.load(Ordering::SeqCst) {
            // Nobody concluded; leave a summary anyway.
            self.write_if_configured(&result);
        }
        result
    }

    fn write_if_configured(&self, result: &PortfolioResult) {
        if let Some(path) = &self.options.summary_file {
            if let Err(error) =
                write_summary(path, result.token(), &result.stats, result.solution.as_deref())
            {
                tracing::error!(%error, "failed to write summary file");
            }
        }
    }
}

/// First conclusive worker wins: raises `done`, takes the summary lock and
/// writes the file. Returns whether this worker was the winner.
fn conclude(
    done: &AtomicBool,
    lock: &Mutex<()>,
    options: &Options,
    code: ExitCode,
    stats: &StatisticsSnapshot,
    solution: Option<&[f64]>,
) -> bool {
    if !matches!(code, ExitCode::Sat | ExitCode::Unsat) {
        return false;
    }
    if done.swap(true, Ordering::SeqCst) {
        return false;
    }
    if let Some(path) = &options.summary_file {
        let token = if code == ExitCode::Sat { "violated" } else { "holds" };
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(error) = write_summary(path, token, stats, solution) {
            tracing::error!(%error, "failed to write summary file");
        }
    }
    true
}
