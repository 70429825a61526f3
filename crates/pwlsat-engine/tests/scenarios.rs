//! End-to-end solving scenarios.

use pwlsat_config::Options;
use pwlsat_core::{
    AbsConstraint, CaseSplit, DisjunctionConstraint, Equation, InputQuery, MaxConstraint,
    PiecewiseLinear, PlConstraint, Relation, ReluConstraint, Tightening, EPSILON,
};
use pwlsat_engine::{DnCManager, Engine, ExitCode, Portfolio};

fn quiet_options() -> Options {
    Options {
        verbosity: 0,
        ..Options::default()
    }
}

fn solve(query: &InputQuery) -> (ExitCode, Engine) {
    let mut engine = Engine::new(quiet_options());
    let code = match engine.process_query(query).expect("query must register") {
        true => engine.solve(60),
        false => engine.exit_code(),
    };
    (code, engine)
}

/// Independently re-checks a witness against the original query.
fn assert_witness(query: &InputQuery, assignment: &[f64]) {
    for v in 0..query.num_variables() {
        let value = assignment[v as usize];
        assert!(
            value >= query.lower_bound(v) - 1e-5 && value <= query.upper_bound(v) + 1e-5,
            "x{v} = {value} escapes its bounds"
        );
    }
    for eq in query.equations() {
        assert!(eq.holds(assignment, 1e-5), "equation violated: {eq:?}");
    }
    for constraint in query.constraints() {
        assert!(
            constraint.satisfied(assignment),
            "constraint violated: {}",
            constraint.serialize_to_string()
        );
    }
}

/// y = relu(x), x in [-1, 1], property x >= 0.5 and y >= 0.25.
#[test]
fn test_relu_active_branch_sat() {
    let mut query = InputQuery::new(2);
    query.set_lower_bound(0, 0.5).unwrap();
    query.set_upper_bound(0, 1.0).unwrap();
    query.set_lower_bound(1, 0.25).unwrap();
    query.set_upper_bound(1, 1.0).unwrap();
    query.add_constraint(PlConstraint::Relu(ReluConstraint::new(0, 0, 1)));

    let (code, engine) = solve(&query);
    assert_eq!(code, ExitCode::Sat);
    let witness = engine.assignment();
    assert_witness(&query, witness);
    assert!((witness[1] - witness[0]).abs() <= 1e-5);
    assert!(witness[0] >= 0.5 - 1e-5);
}

/// y = relu(x) with x in [-1, -0.5] and y >= 0.1 is infeasible both ways.
#[test]
fn test_relu_infeasible_both_branches_unsat() {
    let mut query = InputQuery::new(2);
    query.set_lower_bound(0, -1.0).unwrap();
    query.set_upper_bound(0, -0.5).unwrap();
    query.set_lower_bound(1, 0.1).unwrap();
    query.set_upper_bound(1, 1.0).unwrap();
    query.add_constraint(PlConstraint::Relu(ReluConstraint::new(0, 0, 1)));

    let (code, _) = solve(&query);
    assert_eq!(code, ExitCode::Unsat);
}

/// b = |a|, c = |b - 1|, c <= 0.3: satisfiable with |a| in [0.7, 1.3].
#[test]
fn test_abs_chain_sat() {
    // Variables: a, b, d = b - 1, c.
    let mut query = InputQuery::new(4);
    query.set_lower_bound(0, -2.0).unwrap();
    query.set_upper_bound(0, 2.0).unwrap();
    query.set_lower_bound(1, 0.0).unwrap();
    query.set_upper_bound(1, 5.0).unwrap();
    query.set_lower_bound(2, -5.0).unwrap();
    query.set_upper_bound(2, 5.0).unwrap();
    query.set_lower_bound(3, 0.0).unwrap();
    query.set_upper_bound(3, 0.3).unwrap();

    query.add_equation(Equation::with_terms(Relation::Eq, &[(1.0, 2), (-1.0, 1)], -1.0));
    query.add_constraint(PlConstraint::Abs(AbsConstraint::new(0, 0, 1)));
    query.add_constraint(PlConstraint::Abs(AbsConstraint::new(1, 2, 3)));

    let (code, engine) = solve(&query);
    assert_eq!(code, ExitCode::Sat);
    let witness = engine.assignment();
    assert_witness(&query, witness);
    let a = witness[0].abs();
    assert!((0.7 - 1e-4..=1.3 + 1e-4).contains(&a), "|a| = {a}");
}

/// Disjunction {x <= 3, x in [4, 6], x >= 7} with x = 5: the middle case.
#[test]
fn test_disjunction_middle_case_sat() {
    let mut query = InputQuery::new(1);
    query.set_lower_bound(0, 0.0).unwrap();
    query.set_upper_bound(0, 10.0).unwrap();
    query.add_equation(Equation::with_terms(Relation::Eq, &[(1.0, 0)], 5.0));

    let mut low = CaseSplit::new();
    low.add_bound(Tightening::upper(0, 3.0));
    let mut mid = CaseSplit::new();
    mid.add_bound(Tightening::lower(0, 4.0));
    mid.add_bound(Tightening::upper(0, 6.0));
    let mut high = CaseSplit::new();
    high.add_bound(Tightening::lower(0, 7.0));
    query.add_constraint(PlConstraint::Disjunction(DisjunctionConstraint::new(
        0,
        vec![low, mid, high],
    )));

    let (code, engine) = solve(&query);
    assert_eq!(code, ExitCode::Sat);
    let witness = engine.assignment();
    assert_witness(&query, witness);
    assert!((witness[0] - 5.0).abs() <= 1e-5);
}

/// y = max(x1, x2, x3) with x2 in [2, 3] and y <= 2.5.
#[test]
fn test_max_constraint_sat() {
    let mut query = InputQuery::new(4);
    query.set_lower_bound(0, 0.0).unwrap();
    query.set_upper_bound(0, 1.0).unwrap();
    query.set_lower_bound(1, 2.0).unwrap();
    query.set_upper_bound(1, 3.0).unwrap();
    query.set_lower_bound(2, 0.0).unwrap();
    query.set_upper_bound(2, 4.0).unwrap();
    query.set_lower_bound(3, 0.0).unwrap();
    query.set_upper_bound(3, 2.5).unwrap();
    query.add_constraint(PlConstraint::Max(MaxConstraint::new(0, 3, vec![0, 1, 2])));

    let (code, engine) = solve(&query);
    assert_eq!(code, ExitCode::Sat);
    let witness = engine.assignment();
    assert_witness(&query, witness);
    let max = witness[0].max(witness[1]).max(witness[2]);
    assert!((witness[3] - max).abs() <= 1e-5);
    assert!(witness[3] <= 2.5 + 1e-5);
}

/// A chain of relus where every full phase assignment is infeasible but no
/// partial one is: the search must visit all 2^n leaves.
fn exhaustive_chain(n: u32) -> InputQuery {
    let mut query = InputQuery::new(2 * n);
    let mut budget = Equation::new(Relation::Eq);
    for i in 0..n {
        let x = 2 * i;
        let y = 2 * i + 1;
        query.set_lower_bound(x, -1.0).unwrap();
        query.set_upper_bound(x, 1.0).unwrap();
        query.set_lower_bound(y, 0.0).unwrap();
        query.set_upper_bound(y, 1.0).unwrap();
        let id = query.next_constraint_id();
        query.add_constraint(PlConstraint::Relu(ReluConstraint::new(id, x, y)));
        // In either relu phase 2y - x stays within [0, 1]; relaxed it
        // reaches 3. The sum can only hit n + 0.5 while some relu is
        // unresolved.
        budget.add_term(2.0, y);
        budget.add_term(-1.0, x);
    }
    budget.set_scalar(n as f64 + 0.5);
    query.add_equation(budget);
    query
}

#[test]
fn test_backtrack_budget_visits_all_leaves() {
    for n in [1u32, 2, 3] {
        let query = exhaustive_chain(n);
        let (code, engine) = solve(&query);
        assert_eq!(code, ExitCode::Unsat, "n = {n}");
        assert_eq!(
            engine.statistics().visited_tree_states(),
            1u64 << n,
            "n = {n}"
        );
    }
}

#[test]
fn test_stack_and_context_return_to_root() {
    let (code, engine) = solve(&exhaustive_chain(3));
    assert_eq!(code, ExitCode::Unsat);
    assert_eq!(engine.smt_stack_depth(), 0);
    assert_eq!(engine.context_level(), 0);
}

#[test]
fn test_local_search_finds_witness() {
    let mut options = quiet_options();
    options.local_search = true;

    // Two open relus tied together; the sum-of-infeasibilities walk has to
    // land both phases.
    let mut query = InputQuery::new(4);
    for v in [0u32, 2] {
        query.set_lower_bound(v, -1.0).unwrap();
        query.set_upper_bound(v, 1.0).unwrap();
    }
    for v in [1u32, 3] {
        query.set_lower_bound(v, 0.0).unwrap();
        query.set_upper_bound(v, 1.0).unwrap();
    }
    query.add_constraint(PlConstraint::Relu(ReluConstraint::new(0, 0, 1)));
    query.add_constraint(PlConstraint::Relu(ReluConstraint::new(1, 2, 3)));
    query.add_equation(Equation::with_terms(
        Relation::Eq,
        &[(1.0, 0), (1.0, 1), (1.0, 3)],
        1.4,
    ));

    let mut engine = Engine::new(options);
    assert!(engine.process_query(&query).unwrap());
    assert_eq!(engine.solve(60), ExitCode::Sat);
    assert_witness(&query, engine.assignment());
}

#[test]
fn test_milp_encoding_matches_search() {
    let sat_query = exhaustive_chain(2);
    let mut engine = Engine::new(quiet_options());
    assert!(engine.process_query(&sat_query).unwrap());
    assert_eq!(engine.solve_with_milp_encoding(60), ExitCode::Unsat);

    let mut query = InputQuery::new(2);
    query.set_lower_bound(0, 0.5).unwrap();
    query.set_upper_bound(0, 1.0).unwrap();
    query.set_lower_bound(1, 0.25).unwrap();
    query.set_upper_bound(1, 1.0).unwrap();
    query.add_constraint(PlConstraint::Relu(ReluConstraint::new(0, 0, 1)));
    let mut engine = Engine::new(quiet_options());
    assert!(engine.process_query(&query).unwrap());
    assert_eq!(engine.solve_with_milp_encoding(60), ExitCode::Sat);
    assert_witness(&query, engine.assignment());
}

#[test]
fn test_milp_encoding_unfixed_relu() {
    // The relu phase is genuinely open here, so the encoder must emit an
    // indicator binary. x + relu(x) = 0.9 pins the witness to x = 0.45.
    let mut query = InputQuery::new(2);
    query.set_lower_bound(0, -1.0).unwrap();
    query.set_upper_bound(0, 1.0).unwrap();
    query.set_lower_bound(1, 0.0).unwrap();
    query.set_upper_bound(1, 1.0).unwrap();
    query.add_constraint(PlConstraint::Relu(ReluConstraint::new(0, 0, 1)));
    query.add_equation(Equation::with_terms(Relation::Eq, &[(1.0, 0), (1.0, 1)], 0.9));

    let mut engine = Engine::new(quiet_options());
    assert!(engine.process_query(&query).unwrap());
    assert_eq!(engine.solve_with_milp_encoding(60), ExitCode::Sat);
    assert_witness(&query, engine.assignment());
    assert!((engine.assignment()[0] - 0.45).abs() <= 1e-5);
}

#[test]
fn test_dnc_manager_agrees_with_plain_search() {
    let query = exhaustive_chain(3);
    let mut manager = DnCManager::new(quiet_options(), query.duplicate());
    assert_eq!(manager.solve(4, 0), ExitCode::Unsat);

    let mut sat_query = InputQuery::new(2);
    sat_query.set_lower_bound(0, -1.0).unwrap();
    sat_query.set_upper_bound(0, 1.0).unwrap();
    sat_query.set_lower_bound(1, 0.25).unwrap();
    sat_query.set_upper_bound(1, 1.0).unwrap();
    sat_query.add_constraint(PlConstraint::Relu(ReluConstraint::new(0, 0, 1)));
    let mut manager = DnCManager::new(quiet_options(), sat_query.duplicate());
    assert_eq!(manager.solve(2, 1), ExitCode::Sat);
    let solution = manager.solution().expect("sat must carry a witness");
    assert_witness(&sat_query, solution);
}

#[test]
fn test_portfolio_writes_summary() {
    let dir = tempfile::tempdir().unwrap();
    let summary = dir.path().join("summary.txt");

    let mut options = quiet_options();
    options.summary_file = Some(summary.clone());
    options.num_workers = 2;
    options.timeout = 30;

    let mut query = InputQuery::new(1);
    query.set_lower_bound(0, 0.0).unwrap();
    query.set_upper_bound(0, 10.0).unwrap();
    query.add_equation(Equation::with_terms(Relation::Eq, &[(1.0, 0)], 5.0));
    let mut low = CaseSplit::new();
    low.add_bound(Tightening::upper(0, 3.0));
    let mut mid = CaseSplit::new();
    mid.add_bound(Tightening::lower(0, 4.0));
    mid.add_bound(Tightening::upper(0, 6.0));
    query.add_constraint(PlConstraint::Disjunction(DisjunctionConstraint::new(
        0,
        vec![low, mid],
    )));

    let result = Portfolio::new(options).run(&query);
    assert_eq!(result.exit_code, ExitCode::Sat);
    assert_eq!(result.token(), "violated");

    let text = std::fs::read_to_string(&summary).unwrap();
    assert!(text.starts_with("violated "), "summary was: {text}");
}

#[test]
fn test_portfolio_reports_holds_on_unsat() {
    let dir = tempfile::tempdir().unwrap();
    let summary = dir.path().join("summary.txt");

    let mut options = quiet_options();
    options.summary_file = Some(summary.clone());
    options.num_workers = 2;
    options.timeout = 30;

    let result = Portfolio::new(options).run(&exhaustive_chain(2));
    assert_eq!(result.exit_code, ExitCode::Unsat);
    assert_eq!(result.token(), "holds");
    let text = std::fs::read_to_string(&summary).unwrap();
    assert!(text.starts_with("holds "), "summary was: {text}");
}

#[test]
fn test_tightening_is_confluent() {
    // Solving permutations of the same query reaches the same verdict and
    // the same witness value set.
    let mut query = InputQuery::new(4);
    for v in 0..4 {
        query.set_lower_bound(v, -2.0).unwrap();
        query.set_upper_bound(v, 2.0).unwrap();
    }
    query.set_lower_bound(1, 0.0).unwrap();
    query.set_lower_bound(3, 0.0).unwrap();
    query.add_constraint(PlConstraint::Relu(ReluConstraint::new(0, 0, 1)));
    query.add_constraint(PlConstraint::Relu(ReluConstraint::new(1, 2, 3)));
    query.add_equation(Equation::with_terms(Relation::Eq, &[(1.0, 1), (1.0, 3)], 1.5));

    let (code_a, _) = solve(&query);

    let mut reordered = InputQuery::new(4);
    for v in 0..4 {
        reordered.set_lower_bound(v, query.lower_bound(v)).unwrap();
        reordered.set_upper_bound(v, query.upper_bound(v)).unwrap();
    }
    reordered.add_equation(Equation::with_terms(Relation::Eq, &[(1.0, 1), (1.0, 3)], 1.5));
    reordered.add_constraint(PlConstraint::Relu(ReluConstraint::new(0, 2, 3)));
    reordered.add_constraint(PlConstraint::Relu(ReluConstraint::new(1, 0, 1)));
    let (code_b, _) = solve(&reordered);

    assert_eq!(code_a, ExitCode::Sat);
    assert_eq!(code_a, code_b);
}

#[test]
fn test_solved_query_round_trips_through_dump() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("query.txt");

    let query = exhaustive_chain(2);
    query.save(&path).unwrap();
    let reloaded = InputQuery::load(&path).unwrap();

    let (original, _) = solve(&query);
    let (reloaded_code, _) = solve(&reloaded);
    assert_eq!(original, reloaded_code);
}

#[test]
fn test_sat_epsilon_soundness() {
    let (code, engine) = solve(&{
        let mut query = InputQuery::new(2);
        query.set_lower_bound(0, -1.0).unwrap();
        query.set_upper_bound(0, 1.0).unwrap();
        query.set_lower_bound(1, 0.0).unwrap();
        query.set_upper_bound(1, 1.0).unwrap();
        query.add_constraint(PlConstraint::Relu(ReluConstraint::new(0, 0, 1)));
        query.add_equation(Equation::with_terms(Relation::Eq, &[(1.0, 0), (1.0, 1)], 0.9));
        query
    });
    assert_eq!(code, ExitCode::Sat);
    let witness = engine.assignment();
    // x + relu(x) = 0.9 forces x = 0.45.
    assert!((witness[0] - 0.45).abs() <= 10.0 * EPSILON);
}
