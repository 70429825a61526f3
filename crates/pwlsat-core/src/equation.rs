//! Linear equations and inequalities.

use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Comparator of an [`Equation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    Eq,
    Le,
    Ge,
}

impl Relation {
    fn tag(self) -> &'static str {
        match self {
            Relation::Eq => "eq",
            Relation::Le => "le",
            Relation::Ge => "ge",
        }
    }

    fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "eq" => Ok(Relation::Eq),
            "le" => Ok(Relation::Le),
            "ge" => Ok(Relation::Ge),
            other => Err(Error::MalformedQuery(format!("bad relation `{other}`"))),
        }
    }
}

/// One addend of an equation: `coefficient * variable`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Term {
    pub coefficient: f64,
    pub variable: u32,
}

/// An ordered sum of terms compared against a scalar:
/// `sum(coefficient_i * x_i) <relation> scalar`.
#[derive(Clone, Debug, PartialEq)]
pub struct Equation {
    pub terms: SmallVec<[Term; 4]>,
    pub scalar: f64,
    pub relation: Relation,
}

impl Equation {
    pub fn new(relation: Relation) -> Self {
        Self {
            terms: SmallVec::new(),
            scalar: 0.0,
            relation,
        }
    }

    /// Builds an equation from `(coefficient, variable)` pairs.
    pub fn with_terms(relation: Relation, terms: &[(f64, u32)], scalar: f64) -> Self {
        let mut eq = Self::new(relation);
        for &(coefficient, variable) in terms {
            eq.add_term(coefficient, variable);
        }
        eq.scalar = scalar;
        eq
    }

    pub fn add_term(&mut self, coefficient: f64, variable: u32) -> &mut Self {
        self.terms.push(Term {
            coefficient,
            variable,
        });
        self
    }

    pub fn set_scalar(&mut self, scalar: f64) -> &mut Self {
        self.scalar = scalar;
        self
    }

    /// Left-hand-side value under `assignment`.
    pub fn evaluate(&self, assignment: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|t| t.coefficient * assignment[t.variable as usize])
            .sum()
    }

    /// True iff `assignment` satisfies the equation within `epsilon`.
    pub fn holds(&self, assignment: &[f64], epsilon: f64) -> bool {
        let lhs = self.evaluate(assignment);
        match self.relation {
            Relation::Eq => (lhs - self.scalar).abs() <= epsilon,
            Relation::Le => lhs <= self.scalar + epsilon,
            Relation::Ge => lhs >= self.scalar - epsilon,
        }
    }

    pub fn variables(&self) -> impl Iterator<Item = u32> + '_ {
        self.terms.iter().map(|t| t.variable)
    }

    /// Replaces `variable` by a fixed value, folding it into the scalar.
    pub fn eliminate_variable(&mut self, variable: u32, value: f64) {
        let mut folded = 0.0;
        self.terms.retain(|t| {
            if t.variable == variable {
                folded += t.coefficient * value;
                false
            } else {
                true
            }
        });
        self.scalar -= folded;
    }

    pub fn update_variable_index(&mut self, old: u32, new: u32) {
        for term in &mut self.terms {
            if term.variable == old {
                term.variable = new;
            }
        }
    }

    /// Canonical text form: `rel,scalar,nterms,coeff,var,...`
    pub fn serialize_to_string(&self) -> String {
        let mut out = format!("{},{},{}", self.relation.tag(), self.scalar, self.terms.len());
        for term in &self.terms {
            out.push_str(&format!(",{},{}", term.coefficient, term.variable));
        }
        out
    }

    /// Inverse of [`Equation::serialize_to_string`].
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = text.split(',');
        let mut next = || {
            fields
                .next()
                .ok_or_else(|| Error::MalformedQuery(format!("truncated equation `{text}`")))
        };
        let relation = Relation::from_tag(next()?)?;
        let scalar = parse_f64(next()?)?;
        let count = parse_u32(next()?)? as usize;
        let mut eq = Equation::new(relation);
        eq.scalar = scalar;
        for _ in 0..count {
            let coefficient = parse_f64(next()?)?;
            let variable = parse_u32(next()?)?;
            eq.add_term(coefficient, variable);
        }
        Ok(eq)
    }
}

pub(crate) fn parse_f64(text: &str) -> Result<f64> {
    text.trim()
        .parse()
        .map_err(|_| Error::MalformedQuery(format!("bad number `{text}`")))
}

pub(crate) fn parse_u32(text: &str) -> Result<u32> {
    text.trim()
        .parse()
        .map_err(|_| Error::MalformedQuery(format!("bad index `{text}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_and_holds() {
        // 2x0 - x1 <= 3
        let eq = Equation::with_terms(Relation::Le, &[(2.0, 0), (-1.0, 1)], 3.0);
        let assignment = vec![1.0, 0.5];
        assert_eq!(eq.evaluate(&assignment), 1.5);
        assert!(eq.holds(&assignment, 1e-6));

        let tight = vec![2.0, 1.0];
        assert_eq!(eq.evaluate(&tight), 3.0);
        assert!(eq.holds(&tight, 1e-6));

        let violating = vec![3.0, 0.0];
        assert!(!eq.holds(&violating, 1e-6));
    }

    #[test]
    fn test_eliminate_variable() {
        // x0 + 2x1 = 4, eliminate x1 = 1  =>  x0 = 2
        let mut eq = Equation::with_terms(Relation::Eq, &[(1.0, 0), (2.0, 1)], 4.0);
        eq.eliminate_variable(1, 1.0);
        assert_eq!(eq.terms.len(), 1);
        assert_eq!(eq.scalar, 2.0);
    }

    #[test]
    fn test_serialize_round_trip() {
        let eq = Equation::with_terms(Relation::Ge, &[(1.5, 3), (-0.25, 7)], -2.0);
        let text = eq.serialize_to_string();
        let parsed = Equation::parse(&text).unwrap();
        assert_eq!(parsed, eq);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Equation::parse("gt,0,0").is_err());
        assert!(Equation::parse("eq,0").is_err());
        assert!(Equation::parse("eq,x,1,1,0").is_err());
    }
}
