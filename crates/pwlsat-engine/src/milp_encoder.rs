//! Mixed-integer encoding of a whole query.
//!
//! Each unfixed piecewise-linear constraint gets indicator binaries tying
//! its output to the committed piece, with big-M coefficients derived from
//! the current variable bounds; the entire problem is then handed to the
//! backend in one shot. Requires finite bounds on every participating
//! variable.

use pwlsat_core::{
    BoundKind, BoundManager, Context, Equation, PiecewiseLinear, PlConstraint, Relation,
    Tightening,
};
use pwlsat_lp::{LpSolver, Term, VariableKind};

use crate::error::{EngineError, Result};

pub(crate) fn variable_name(variable: u32) -> String {
    format!("x{variable}")
}

fn finite(value: f64, what: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::Unsupported(format!(
            "MILP encoding requires finite bounds ({what} is {value})"
        )))
    }
}

fn equation_terms(equation: &Equation) -> Vec<Term> {
    equation
        .terms
        .iter()
        .map(|t| Term::new(t.coefficient, variable_name(t.variable)))
        .collect()
}

fn add_equation<L: LpSolver>(lp: &mut L, equation: &Equation) -> Result<()> {
    let terms = equation_terms(equation);
    match equation.relation {
        Relation::Eq => lp.add_eq_constraint(&terms, equation.scalar)?,
        Relation::Le => lp.add_leq_constraint(&terms, equation.scalar)?,
        Relation::Ge => lp.add_geq_constraint(&terms, equation.scalar)?,
    }
    Ok(())
}

fn add_tightening_row<L: LpSolver>(lp: &mut L, t: &Tightening) -> Result<()> {
    let terms = [Term::new(1.0, variable_name(t.variable))];
    match t.kind {
        BoundKind::Lower => lp.add_geq_constraint(&terms, t.value)?,
        BoundKind::Upper => lp.add_leq_constraint(&terms, t.value)?,
    }
    Ok(())
}

/// Interval radius used as a big-M base for `variable`.
fn magnitude(ctx: &Context, bounds: &BoundManager, variable: u32) -> Result<f64> {
    let lb = finite(bounds.lower(ctx, variable), "lower bound")?;
    let ub = finite(bounds.upper(ctx, variable), "upper bound")?;
    Ok(lb.abs().max(ub.abs()))
}

/// Builds the MILP model for the engine's current state on `lp`.
pub(crate) fn encode<L: LpSolver>(
    lp: &mut L,
    ctx: &Context,
    bounds: &BoundManager,
    equations: &[Equation],
    constraints: &[PlConstraint],
) -> Result<()> {
    lp.reset_model();

    for v in 0..bounds.num_variables() {
        lp.add_variable(
            &variable_name(v),
            bounds.lower(ctx, v),
            bounds.upper(ctx, v),
            VariableKind::Continuous,
        )?;
    }
    for equation in equations {
        add_equation(lp, equation)?;
    }

    for constraint in constraints {
        if !constraint.is_active(ctx) {
            // Already enforced by an applied split.
            continue;
        }
        if constraint.phase_fixed(ctx) {
            if let Some(split) = constraint.valid_case_split(ctx, bounds) {
                for t in split.bounds() {
                    add_tightening_row(lp, t)?;
                }
                for eq in split.equations() {
                    add_equation(lp, eq)?;
                }
            }
            continue;
        }
        encode_constraint(lp, ctx, bounds, constraint)?;
    }
    Ok(())
}

fn encode_constraint<L: LpSolver>(
    lp: &mut L,
    ctx: &Context,
    bounds: &BoundManager,
    constraint: &PlConstraint,
) -> Result<()> {
    let id = constraint.id();
    match constraint {
        PlConstraint::Relu(relu) => {
            let b = variable_name(relu.b());
            let f = variable_name(relu.f());
            let l = finite(bounds.lower(ctx, relu.b()), "relu input lower")?.min(0.0);
            let u = finite(bounds.upper(ctx, relu.b()), "relu input upper")?.max(0.0);
            let z = format!("c{id}_z");
            lp.add_variable(&z, 0.0, 1.0, VariableKind::Binary)?;
            // Active (z = 1): f <= b; inactive (z = 0): f <= 0.
            lp.add_leq_constraint(
                &[
                    Term::new(1.0, &*f),
                    Term::new(-1.0, &*b),
                    Term::new(-l, &*z),
                ],
                -l,
            )?;
            lp.add_leq_constraint(&[Term::new(1.0, &*f), Term::new(-u, &*z)], 0.0)?;
        }
        PlConstraint::Abs(abs) => {
            let b = variable_name(abs.b());
            let f = variable_name(abs.f());
            let l = finite(bounds.lower(ctx, abs.b()), "abs input lower")?.min(0.0);
            let u = finite(bounds.upper(ctx, abs.b()), "abs input upper")?.max(0.0);
            let ub_f = finite(bounds.upper(ctx, abs.f()), "abs output upper")?;
            let z = format!("c{id}_z");
            lp.add_variable(&z, 0.0, 1.0, VariableKind::Binary)?;
            let m_pos = ub_f - l;
            let m_neg = ub_f + u;
            // Positive piece (z = 1): f <= b and b >= 0.
            lp.add_leq_constraint(
                &[
                    Term::new(1.0, &*f),
                    Term::new(-1.0, &*b),
                    Term::new(m_pos, &*z),
                ],
                m_pos,
            )?;
            lp.add_geq_constraint(&[Term::new(1.0, &*b), Term::new(l, &*z)], l)?;
            // Negative piece (z = 0): f <= -b and b <= 0.
            lp.add_leq_constraint(
                &[
                    Term::new(1.0, &*f),
                    Term::new(1.0, &*b),
                    Term::new(-m_neg, &*z),
                ],
                0.0,
            )?;
            lp.add_leq_constraint(&[Term::new(1.0, &*b), Term::new(-u, &*z)], 0.0)?;
        }
        PlConstraint::Sign(sign) => {
            let b = variable_name(sign.b());
            let f = variable_name(sign.f());
            let l = finite(bounds.lower(ctx, sign.b()), "sign input lower")?.min(0.0);
            let u = finite(bounds.upper(ctx, sign.b()), "sign input upper")?.max(0.0);
            let z = format!("c{id}_z");
            lp.add_variable(&z, 0.0, 1.0, VariableKind::Binary)?;
            // f = 2z - 1.
            lp.add_eq_constraint(&[Term::new(1.0, &*f), Term::new(-2.0, &*z)], -1.0)?;
            lp.add_geq_constraint(&[Term::new(1.0, &*b), Term::new(l, &*z)], l)?;
            lp.add_leq_constraint(&[Term::new(1.0, &*b), Term::new(-u, &*z)], 0.0)?;
        }
        PlConstraint::Max(max) => {
            let f = variable_name(max.f());
            let ub_f = finite(bounds.upper(ctx, max.f()), "max output upper")?;
            let mut selector = Vec::new();
            for (k, &x) in max.elements().iter().enumerate() {
                let lb_x = finite(bounds.lower(ctx, x), "max element lower")?;
                let z = format!("c{id}_z{k}");
                lp.add_variable(&z, 0.0, 1.0, VariableKind::Binary)?;
                let m = ub_f - lb_x;
                // Winner (z_k = 1): f <= x_k.
                lp.add_leq_constraint(
                    &[
                        Term::new(1.0, &*f),
                        Term::new(-1.0, variable_name(x)),
                        Term::new(m, &*z),
                    ],
                    m,
                )?;
                selector.push(Term::new(1.0, z));
            }
            if let Some(c) = max.eliminated_max() {
                // The folded constant can also be the winner.
                let z = format!("c{id}_zc");
                lp.add_variable(&z, 0.0, 1.0, VariableKind::Binary)?;
                lp.add_leq_constraint(&[Term::new(1.0, &*f), Term::new(ub_f - c, &*z)], ub_f)?;
                selector.push(Term::new(1.0, z));
            }
            lp.add_eq_constraint(&selector, 1.0)?;
        }
        PlConstraint::Disjunction(disj) => {
            let mut selector = Vec::new();
            for (k, case) in disj.disjuncts().iter().enumerate() {
                let z = format!("c{id}_z{k}");
                lp.add_variable(&z, 0.0, 1.0, VariableKind::Binary)?;
                for t in case.bounds() {
                    let lb_v = finite(bounds.lower(ctx, t.variable), "disjunct variable lower")?;
                    let ub_v = finite(bounds.upper(ctx, t.variable), "disjunct variable upper")?;
                    let v = variable_name(t.variable);
                    match t.kind {
                        BoundKind::Lower => {
                            // v >= lb_v + (value - lb_v) z_k
                            lp.add_geq_constraint(
                                &[Term::new(1.0, &*v), Term::new(-(t.value - lb_v), &*z)],
                                lb_v,
                            )?;
                        }
                        BoundKind::Upper => {
                            // v <= ub_v - (ub_v - value) z_k
                            lp.add_leq_constraint(
                                &[Term::new(1.0, &*v), Term::new(ub_v - t.value, &*z)],
                                ub_v,
                            )?;
                        }
                    }
                }
                for eq in case.equations() {
                    let mut m = eq.scalar.abs() + 1.0;
                    for term in &eq.terms {
                        m += term.coefficient.abs() * magnitude(ctx, bounds, term.variable)?;
                    }
                    let mut upper = equation_terms(eq);
                    upper.push(Term::new(m, &*z));
                    let mut lower = equation_terms(eq);
                    lower.push(Term::new(-m, &*z));
                    match eq.relation {
                        Relation::Le => lp.add_leq_constraint(&upper, eq.scalar + m)?,
                        Relation::Ge => lp.add_geq_constraint(&lower, eq.scalar - m)?,
                        Relation::Eq => {
                            lp.add_leq_constraint(&upper, eq.scalar + m)?;
                            lp.add_geq_constraint(&lower, eq.scalar - m)?;
                        }
                    }
                }
                selector.push(Term::new(1.0, z));
            }
            lp.add_eq_constraint(&selector, 1.0)?;
        }
    }
    Ok(())
}
