//! Single-engine runs.
//!
//! The straightforward path: one engine, one query, one answer. Also hosts
//! the classification harness, which checks a network's label robustness
//! by trying every adversarial target in turn.

use pwlsat_config::Options;
use pwlsat_core::{Equation, InputQuery, Relation};

use crate::engine::{Engine, ExitCode};
use crate::statistics::StatisticsSnapshot;

/// Outcome of a single run.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub exit_code: ExitCode,
    pub stats: StatisticsSnapshot,
    pub solution: Option<Vec<f64>>,
}

/// Summary token of a single-engine result.
pub fn result_token(code: ExitCode) -> &'static str {
    match code {
        ExitCode::Sat => "sat",
        ExitCode::Unsat => "unsat",
        ExitCode::Timeout => "TIMEOUT",
        ExitCode::Error => "ERROR",
        ExitCode::Unknown | ExitCode::QuitRequested => "UNKNOWN",
    }
}

/// Solves `query` with one engine; dispatches to the classification
/// harness when a correct output label is configured.
pub fn run_single(query: &InputQuery, options: &Options) -> RunOutcome {
    if options.correct_output >= 0 {
        run_classification(query, options)
    } else {
        run_one(query, options)
    }
}

fn run_one(query: &InputQuery, options: &Options) -> RunOutcome {
    let mut engine = Engine::new(options.clone());
    let code = match engine.process_query(query) {
        Ok(true) => engine.solve(options.timeout),
        Ok(false) => ExitCode::Unsat,
        Err(error) => {
            tracing::error!(%error, "engine failed to take the query");
            ExitCode::Error
        }
    };
    RunOutcome {
        exit_code: code,
        stats: engine.statistics().snapshot(),
        solution: (code == ExitCode::Sat).then(|| engine.assignment().to_vec()),
    }
}

/// Tries each adversarial target label: the query is augmented with
/// `out[target] >= out[other]` for every other output, and the first
/// target admitting a witness decides SAT.
fn run_classification(query: &InputQuery, options: &Options) -> RunOutcome {
    let outputs = query.output_variables().to_vec();
    let correct = options.correct_output as usize;
    let mut last = RunOutcome {
        exit_code: ExitCode::Unsat,
        stats: StatisticsSnapshot::default(),
        solution: None,
    };
    let mut saw_timeout = false;

    for target in 0..outputs.len() {
        if target == correct {
            continue;
        }
        let mut adversarial = query.duplicate();
        for other in 0..outputs.len() {
            if other == target {
                continue;
            }
            adversarial.add_equation(Equation::with_terms(
                Relation::Ge,
                &[(1.0, outputs[target]), (-1.0, outputs[other])],
                0.0,
            ));
        }

        tracing::info!(target, "trying adversarial target");
        let outcome = run_one(&adversarial, options);
        match outcome.exit_code {
            ExitCode::Sat => return outcome,
            ExitCode::Timeout => saw_timeout = true,
            _ => {}
        }
        last = outcome;
    }

    if saw_timeout {
        last.exit_code = ExitCode::Timeout;
    } else if last.exit_code != ExitCode::Error {
        last.exit_code = ExitCode::Unsat;
    }
    last
}
