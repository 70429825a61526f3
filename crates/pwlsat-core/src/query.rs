//! Input queries.
//!
//! An [`InputQuery`] is the unit of work handed to the engine: variables
//! with initial bounds, linear equations, piecewise-linear constraints, and
//! the designated input/output variables. Queries can be saved to and
//! loaded from a line-oriented text format:
//!
//! ```text
//! pwlsat v1
//! vars <count>
//! inputs <v>...
//! outputs <v>...
//! bound <v> <lower> <upper>
//! eq <relation>,<scalar>,<nterms>,<coeff>,<var>,...
//! constraint <kind-tagged record>
//! ```

use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::constraint::{ConstraintKind, PiecewiseLinear, PlConstraint};
use crate::equation::{parse_f64, parse_u32, Equation};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct InputQuery {
    num_variables: u32,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
    equations: Vec<Equation>,
    constraints: Vec<PlConstraint>,
    input_variables: Vec<u32>,
    output_variables: Vec<u32>,
    solution: Vec<f64>,
}

impl InputQuery {
    pub fn new(num_variables: u32) -> Self {
        Self {
            num_variables,
            lower_bounds: vec![f64::NEG_INFINITY; num_variables as usize],
            upper_bounds: vec![f64::INFINITY; num_variables as usize],
            equations: Vec::new(),
            constraints: Vec::new(),
            input_variables: Vec::new(),
            output_variables: Vec::new(),
            solution: vec![0.0; num_variables as usize],
        }
    }

    pub fn num_variables(&self) -> u32 {
        self.num_variables
    }

    fn check_variable(&self, variable: u32) -> Result<()> {
        if variable < self.num_variables {
            Ok(())
        } else {
            Err(Error::UnknownVariable(variable))
        }
    }

    pub fn set_lower_bound(&mut self, variable: u32, bound: f64) -> Result<()> {
        self.check_variable(variable)?;
        self.lower_bounds[variable as usize] = bound;
        Ok(())
    }

    pub fn set_upper_bound(&mut self, variable: u32, bound: f64) -> Result<()> {
        self.check_variable(variable)?;
        self.upper_bounds[variable as usize] = bound;
        Ok(())
    }

    pub fn lower_bound(&self, variable: u32) -> f64 {
        self.lower_bounds[variable as usize]
    }

    pub fn upper_bound(&self, variable: u32) -> f64 {
        self.upper_bounds[variable as usize]
    }

    pub fn add_equation(&mut self, equation: Equation) {
        self.equations.push(equation);
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    /// The id the next added constraint should carry.
    pub fn next_constraint_id(&self) -> u32 {
        self.constraints.len() as u32
    }

    pub fn add_constraint(&mut self, constraint: PlConstraint) {
        self.constraints.push(constraint);
    }

    pub fn constraints(&self) -> &[PlConstraint] {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut Vec<PlConstraint> {
        &mut self.constraints
    }

    pub fn num_disjunctions(&self) -> usize {
        self.constraints
            .iter()
            .filter(|c| c.kind() == ConstraintKind::Disjunction)
            .count()
    }

    pub fn contains_max(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| c.kind() == ConstraintKind::Max)
    }

    pub fn mark_input_variable(&mut self, variable: u32) -> Result<()> {
        self.check_variable(variable)?;
        self.input_variables.push(variable);
        Ok(())
    }

    pub fn mark_output_variable(&mut self, variable: u32) -> Result<()> {
        self.check_variable(variable)?;
        self.output_variables.push(variable);
        Ok(())
    }

    pub fn input_variables(&self) -> &[u32] {
        &self.input_variables
    }

    pub fn output_variables(&self) -> &[u32] {
        &self.output_variables
    }

    pub fn output_variable_by_index(&self, index: usize) -> Option<u32> {
        self.output_variables.get(index).copied()
    }

    pub fn set_solution_value(&mut self, variable: u32, value: f64) -> Result<()> {
        self.check_variable(variable)?;
        self.solution[variable as usize] = value;
        Ok(())
    }

    pub fn solution_value(&self, variable: u32) -> f64 {
        self.solution[variable as usize]
    }

    pub fn set_solution(&mut self, solution: Vec<f64>) {
        self.solution = solution;
    }

    pub fn solution(&self) -> &[f64] {
        &self.solution
    }

    /// Deep copy with constraints detached from any context, safe to hand
    /// to another engine.
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.constraints = self.constraints.iter().map(|c| c.duplicate()).collect();
        copy
    }

    /// Writes the query to `path` in the dumped text format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "pwlsat v1")?;
        writeln!(file, "vars {}", self.num_variables)?;
        writeln!(file, "inputs {}", join_indices(&self.input_variables))?;
        writeln!(file, "outputs {}", join_indices(&self.output_variables))?;
        for v in 0..self.num_variables {
            writeln!(
                file,
                "bound {} {} {}",
                v,
                self.lower_bounds[v as usize],
                self.upper_bounds[v as usize]
            )?;
        }
        for eq in &self.equations {
            writeln!(file, "eq {}", eq.serialize_to_string())?;
        }
        for constraint in &self.constraints {
            writeln!(file, "constraint {}", constraint.serialize_to_string())?;
        }
        Ok(())
    }

    /// Reads a query from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header = lines
            .next()
            .transpose()?
            .ok_or_else(|| Error::MalformedQuery("empty query file".into()))?;
        if header.trim() != "pwlsat v1" {
            return Err(Error::MalformedQuery(format!("bad header `{header}`")));
        }

        let mut query: Option<InputQuery> = None;
        for line in lines {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
            match keyword {
                "vars" => {
                    query = Some(InputQuery::new(parse_u32(rest)?));
                }
                _ => {
                    let query = query
                        .as_mut()
                        .ok_or_else(|| Error::MalformedQuery("missing vars line".into()))?;
                    match keyword {
                        "inputs" => {
                            for field in rest.split_whitespace() {
                                query.mark_input_variable(parse_u32(field)?)?;
                            }
                        }
                        "outputs" => {
                            for field in rest.split_whitespace() {
                                query.mark_output_variable(parse_u32(field)?)?;
                            }
                        }
                        "bound" => {
                            let fields: Vec<&str> = rest.split_whitespace().collect();
                            if fields.len() != 3 {
                                return Err(Error::MalformedQuery(format!(
                                    "bad bound line `{line}`"
                                )));
                            }
                            let v = parse_u32(fields[0])?;
                            query.set_lower_bound(v, parse_f64(fields[1])?)?;
                            query.set_upper_bound(v, parse_f64(fields[2])?)?;
                        }
                        "eq" => query.add_equation(Equation::parse(rest)?),
                        "constraint" => {
                            let id = query.next_constraint_id();
                            query.add_constraint(PlConstraint::parse(rest, id)?);
                        }
                        other => {
                            return Err(Error::MalformedQuery(format!(
                                "unknown keyword `{other}`"
                            )));
                        }
                    }
                }
            }
        }
        query.ok_or_else(|| Error::MalformedQuery("missing vars line".into()))
    }
}

fn join_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ReluConstraint;
    use crate::equation::Relation;

    fn sample_query() -> InputQuery {
        let mut query = InputQuery::new(3);
        query.set_lower_bound(0, -1.0).unwrap();
        query.set_upper_bound(0, 1.0).unwrap();
        query.set_lower_bound(1, 0.0).unwrap();
        query.set_upper_bound(1, 2.0).unwrap();
        query.mark_input_variable(0).unwrap();
        query.mark_output_variable(1).unwrap();
        query.add_equation(Equation::with_terms(Relation::Le, &[(1.0, 0), (1.0, 2)], 4.0));
        let id = query.next_constraint_id();
        query.add_constraint(PlConstraint::Relu(ReluConstraint::new(id, 0, 1)));
        query
    }

    #[test]
    fn test_save_load_round_trip() {
        let query = sample_query();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.txt");

        query.save(&path).unwrap();
        let loaded = InputQuery::load(&path).unwrap();

        assert_eq!(loaded.num_variables(), 3);
        assert_eq!(loaded.lower_bound(0), -1.0);
        assert_eq!(loaded.upper_bound(1), 2.0);
        assert_eq!(loaded.upper_bound(2), f64::INFINITY);
        assert_eq!(loaded.input_variables(), &[0]);
        assert_eq!(loaded.output_variables(), &[1]);
        assert_eq!(loaded.equations(), query.equations());
        assert_eq!(loaded.constraints().len(), 1);
        assert_eq!(
            loaded.constraints()[0].serialize_to_string(),
            query.constraints()[0].serialize_to_string()
        );
    }

    #[test]
    fn test_load_rejects_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "not a query\n").unwrap();
        assert!(InputQuery::load(&path).is_err());
    }

    #[test]
    fn test_out_of_range_variable_rejected() {
        let mut query = InputQuery::new(2);
        assert!(query.set_lower_bound(5, 0.0).is_err());
        assert!(query.mark_input_variable(2).is_err());
    }

    #[test]
    fn test_duplicate_detaches_constraints() {
        let query = sample_query();
        let copy = query.duplicate();
        assert!(!copy.constraints()[0].state().is_registered());
    }
}
