//! Categorical data matrices.

use ndarray::{Array2, ArrayView2, Axis};

use crate::domain::{Domain, Value, Variable};
use crate::{BayesNetError, ClassVal, Result};

/// Missing-value sentinel in [`Dataset`] codes.
pub const MISSING: ClassVal = ClassVal::MAX;

/// A matrix of categorical observations, one column per variable.
///
/// Cells are stored as positions in the column's domain, [`MISSING`] marking unobserved cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    variables: Vec<Variable>,
    codes: Array2<ClassVal>,
}

impl Dataset {
    pub fn from_codes(variables: Vec<Variable>, codes: Array2<ClassVal>) -> Result<Self> {
        if codes.ncols() != variables.len() {
            return Err(BayesNetError::Shape {
                expected: vec![codes.nrows(), variables.len()],
                got: codes.shape().to_vec(),
            });
        }
        for (var, column) in variables.iter().zip(codes.axis_iter(Axis(1))) {
            if let Some(c) = column
                .iter()
                .find(|c| **c != MISSING && **c as usize >= var.cardinality())
            {
                return Err(BayesNetError::Domain {
                    value: c.to_string(),
                    variable: var.name.clone(),
                });
            }
        }
        Ok(Self { variables, codes })
    }

    /// Builds a dataset from rows of optional values, inferring each domain as the sorted set
    /// of observed values of its column.
    ///
    /// Rows with missing cells are kept; learning drops them later (listwise deletion).
    /// A column without any observed value has no domain to infer and fails with
    /// [`BayesNetError::EmptyDomain`]: use [`Dataset::with_variables`] when the domains are
    /// known up front.
    pub fn from_rows<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
        rows: &[Vec<Option<Value>>],
    ) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        check_rectangular(names.len(), rows)?;
        let variables = names
            .into_iter()
            .enumerate()
            .map(|(j, name)| {
                let mut values: Vec<Value> =
                    rows.iter().filter_map(|row| row[j].clone()).collect();
                values.sort();
                values.dedup();
                Ok(Variable::new(name, Domain::new(values)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::with_variables(variables, rows)
    }

    /// Builds a dataset from rows of optional values over known variables.
    pub fn with_variables(variables: Vec<Variable>, rows: &[Vec<Option<Value>>]) -> Result<Self> {
        check_rectangular(variables.len(), rows)?;
        let mut codes = Array2::from_elem((rows.len(), variables.len()), MISSING);
        for (mut dest, row) in codes.outer_iter_mut().zip(rows.iter()) {
            for ((d, var), v) in dest.iter_mut().zip(variables.iter()).zip(row.iter()) {
                if let Some(v) = v {
                    *d = var.class_of(v)?;
                }
            }
        }
        Ok(Self { variables, codes })
    }

    pub fn n_rows(&self) -> usize {
        self.codes.nrows()
    }
    pub fn n_vars(&self) -> usize {
        self.variables.len()
    }
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }
    pub fn codes(&self) -> ArrayView2<ClassVal> {
        self.codes.view()
    }
    pub fn value(&self, row: usize, var: usize) -> Option<&Value> {
        self.variables[var].domain.value(self.codes[(row, var)])
    }
    pub fn is_complete(&self) -> bool {
        !self.codes.iter().any(|c| *c == MISSING)
    }
    /// Rows without any missing cell.
    pub fn complete_rows(&self) -> Array2<ClassVal> {
        let kept: Vec<usize> = self
            .codes
            .outer_iter()
            .enumerate()
            .filter(|(_, row)| !row.iter().any(|c| *c == MISSING))
            .map(|(i, _)| i)
            .collect();
        self.codes.select(Axis(0), &kept)
    }
}

fn check_rectangular(n_vars: usize, rows: &[Vec<Option<Value>>]) -> Result<()> {
    if let Some(row) = rows.iter().find(|row| row.len() != n_vars) {
        return Err(BayesNetError::Shape {
            expected: vec![n_vars],
            got: vec![row.len()],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_sorted_domains() {
        let rows = vec![
            vec![Some("b".into()), Some(Value::Int(3))],
            vec![None, Some(Value::Int(1))],
            vec![Some("a".into()), None],
        ];
        let data = Dataset::from_rows(["x", "y"], &rows).unwrap();
        assert_eq!(
            data.variables()[0].domain.values(),
            &[Value::from("a"), Value::from("b")]
        );
        assert_eq!(data.codes()[(0, 0)], 1);
        assert_eq!(data.codes()[(1, 0)], MISSING);
        assert_eq!(data.value(0, 1), Some(&Value::Int(3)));
        assert!(!data.is_complete());
        assert_eq!(data.complete_rows().nrows(), 1);
    }

    #[test]
    fn unobserved_column_needs_a_domain() {
        let rows = vec![vec![Some(Value::from(true)), None], vec![None, None]];
        assert_eq!(
            Dataset::from_rows(["x", "y"], &rows),
            Err(BayesNetError::EmptyDomain)
        );
        let variables = vec![
            Variable::new("x", Domain::boolean()),
            Variable::new("y", Domain::boolean()),
        ];
        let data = Dataset::with_variables(variables, &rows).unwrap();
        assert!(data.codes().column(1).iter().all(|c| *c == MISSING));
        assert_eq!(data.complete_rows().nrows(), 0);
    }

    #[test]
    fn rejects_codes_outside_domain() {
        let var = Variable::new("x", Domain::boolean());
        let codes = Array2::from_shape_vec((2, 1), vec![1, 2]).unwrap();
        assert!(matches!(
            Dataset::from_codes(vec![var], codes),
            Err(BayesNetError::Domain { .. })
        ));
    }
}
