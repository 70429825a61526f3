//! The `pwlsat` binary.
//!
//! Loads a dumped query, runs the portfolio (or a single engine with
//! `--single`), prints a human-readable trace and writes the single-line
//! result summary. Exit code 0 means the query was decided either way;
//! anything else is an error.

use std::path::PathBuf;
use std::process::ExitCode as ProcessExit;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pwlsat_config::{DivideStrategy, Options};
use pwlsat_core::InputQuery;
use pwlsat_engine::{result_token, run_single, write_summary, ExitCode, Portfolio};

#[derive(Parser, Debug)]
#[command(name = "pwlsat", version, about = "Piecewise-linear constraint verifier")]
struct Args {
    /// Dumped query file to solve.
    #[arg(long, value_name = "FILE")]
    input_query: Option<PathBuf>,

    /// Network file in ACAS format (requires an external parser build).
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Property file (requires an external parser build).
    #[arg(long, value_name = "FILE")]
    property: Option<PathBuf>,

    /// Dump the parsed query to this file and exit.
    #[arg(long, value_name = "FILE")]
    query_dump_file: Option<PathBuf>,

    /// Write the single-line result summary here.
    #[arg(long, value_name = "FILE")]
    summary_file: Option<PathBuf>,

    /// TOML options file; command-line flags override it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-worker timeout in seconds (0 disables).
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable sum-of-infeasibilities local search.
    #[arg(long)]
    local_search: bool,

    /// Branching heuristic: polarity, pseudo_cost, soi or soi_polarity.
    #[arg(long)]
    branching: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// 0 = quiet, 1 = info, 2 = debug, 3+ = trace.
    #[arg(long)]
    verbosity: Option<u32>,

    #[arg(long)]
    num_workers: Option<usize>,

    #[arg(long)]
    num_partitions: Option<usize>,

    /// Output index that should dominate (classification encoding).
    #[arg(long)]
    max_output: Option<i32>,

    /// Correct label for classification robustness queries.
    #[arg(long)]
    correct_output: Option<i32>,

    /// Run a single engine instead of the portfolio.
    #[arg(long)]
    single: bool,
}

fn merge_options(args: &Args) -> Result<Options, String> {
    let mut options = match &args.config {
        Some(path) => Options::load(path).map_err(|e| e.to_string())?,
        None => Options::default(),
    };
    if let Some(path) = &args.input_query {
        options.input_query_path = Some(path.clone());
    }
    if let Some(path) = &args.query_dump_file {
        options.query_dump_file = Some(path.clone());
    }
    if let Some(path) = &args.summary_file {
        options.summary_file = Some(path.clone());
    }
    if let Some(timeout) = args.timeout {
        options.timeout = timeout;
    }
    if args.local_search {
        options.local_search = true;
    }
    if let Some(branching) = &args.branching {
        options.branching = match branching.as_str() {
            "polarity" => DivideStrategy::Polarity,
            "pseudo_cost" => DivideStrategy::PseudoCost,
            "soi" => DivideStrategy::Soi,
            "soi_polarity" => DivideStrategy::SoiPolarity,
            other => return Err(format!("unknown branching heuristic `{other}`")),
        };
    }
    if let Some(seed) = args.seed {
        options.seed = seed;
    }
    if let Some(verbosity) = args.verbosity {
        options.verbosity = verbosity;
    }
    if let Some(workers) = args.num_workers {
        options.num_workers = workers;
    }
    if let Some(partitions) = args.num_partitions {
        options.num_partitions = partitions;
    }
    if let Some(max_output) = args.max_output {
        options.max_output = max_output;
    }
    if let Some(correct_output) = args.correct_output {
        options.correct_output = correct_output;
    }
    options.validate().map_err(|e| e.to_string())?;
    Ok(options)
}

fn init_tracing(verbosity: u32) {
    let level = match verbosity {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn main() -> ProcessExit {
    let args = Args::parse();
    let options = match merge_options(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("Error: {message}");
            return ProcessExit::FAILURE;
        }
    };
    init_tracing(options.verbosity);

    match run(args, options) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("Error: {message}");
            ProcessExit::FAILURE
        }
    }
}

fn run(args: Args, options: Options) -> Result<ProcessExit, String> {
    // An existing summary means a previous run already decided this query.
    if let Some(path) = &options.summary_file {
        if path.exists() {
            println!("Summary file already exists, nothing to do");
            return Ok(ProcessExit::SUCCESS);
        }
    }

    if args.input.is_some() || args.property.is_some() {
        return Err(
            "network/property parsing is not built in; dump a query with an external \
             front end and pass it via --input-query"
                .to_string(),
        );
    }

    let query_path = options
        .input_query_path
        .as_ref()
        .ok_or_else(|| "no input query given (use --input-query)".to_string())?;
    println!("InputQuery: {}", query_path.display());
    let query = InputQuery::load(query_path).map_err(|e| e.to_string())?;

    if let Some(dump_path) = &options.query_dump_file {
        query.save(dump_path).map_err(|e| e.to_string())?;
        println!("Input query successfully dumped to file");
        return Ok(ProcessExit::SUCCESS);
    }

    if args.single {
        run_single_engine(&query, &options)
    } else {
        run_portfolio(&query, &options)
    }
}

fn run_single_engine(query: &InputQuery, options: &Options) -> Result<ProcessExit, String> {
    let outcome = run_single(query, options);
    let token = result_token(outcome.exit_code);

    match outcome.exit_code {
        ExitCode::Sat => {
            println!("Input assignment:");
            if let Some(assignment) = &outcome.solution {
                for &v in query.input_variables() {
                    println!("x{v} = {:.6}", assignment[v as usize]);
                }
                println!("Output:");
                for &v in query.output_variables() {
                    println!("y{v} = {:.6}", assignment[v as usize]);
                }
                if options.max_output >= 0 {
                    // Sanity-check the claimed dominant output on the witness.
                    let expected = options.max_output as usize;
                    let argmax = query
                        .output_variables()
                        .iter()
                        .enumerate()
                        .max_by(|a, b| {
                            assignment[*a.1 as usize].total_cmp(&assignment[*b.1 as usize])
                        })
                        .map(|(i, _)| i);
                    if argmax != Some(expected) {
                        println!("warning: witness argmax differs from --max-output");
                    }
                }
            }
            println!("sat");
        }
        ExitCode::Unsat => println!("unsat"),
        ExitCode::Timeout => println!("Timeout"),
        _ => println!("Error"),
    }

    if let Some(path) = &options.summary_file {
        write_summary(path, token, &outcome.stats, outcome.solution.as_deref())
            .map_err(|e| e.to_string())?;
    }

    Ok(match outcome.exit_code {
        ExitCode::Sat | ExitCode::Unsat => ProcessExit::SUCCESS,
        _ => ProcessExit::FAILURE,
    })
}

fn run_portfolio(query: &InputQuery, options: &Options) -> Result<ProcessExit, String> {
    let result = Portfolio::new(options.clone()).run(query);
    println!("{}", result.token());

    Ok(match result.exit_code {
        ExitCode::Sat | ExitCode::Unsat => ProcessExit::SUCCESS,
        _ => ProcessExit::FAILURE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_defaults() {
        let args = Args::parse_from([
            "pwlsat",
            "--input-query",
            "query.txt",
            "--timeout",
            "42",
            "--local-search",
            "--branching",
            "soi",
            "--seed",
            "9",
        ]);
        let options = merge_options(&args).unwrap();
        assert_eq!(options.input_query_path, Some(PathBuf::from("query.txt")));
        assert_eq!(options.timeout, 42);
        assert!(options.local_search);
        assert_eq!(options.branching, DivideStrategy::Soi);
        assert_eq!(options.seed, 9);
    }

    #[test]
    fn test_unknown_branching_rejected() {
        let args = Args::parse_from(["pwlsat", "--branching", "clairvoyant"]);
        assert!(merge_options(&args).is_err());
    }
}
