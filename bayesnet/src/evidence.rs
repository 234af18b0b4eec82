use std::collections::BTreeMap;

use crate::domain::{Value, Variable};
use crate::{BayesNetError, ClassVal, Result, VarId};

/// Partial assignment of observed values to variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    observed: BTreeMap<VarId, ClassVal>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evidence from a vector aligned with the variables, `None` marking unobserved slots.
    pub fn from_vector<'a>(
        variables: impl IntoIterator<Item = &'a Variable>,
        values: &[Option<Value>],
    ) -> Result<Self> {
        let variables: Vec<&Variable> = variables.into_iter().collect();
        if variables.len() != values.len() {
            return Err(BayesNetError::Shape {
                expected: vec![variables.len()],
                got: vec![values.len()],
            });
        }
        let mut evidence = Self::new();
        for (id, (var, value)) in variables.iter().zip(values.iter()).enumerate() {
            if let Some(value) = value {
                evidence.observe(id, var.class_of(value)?);
            }
        }
        Ok(evidence)
    }

    /// Evidence from `(variable name, value)` pairs.
    pub fn from_pairs<'a, S: AsRef<str>, V: Into<Value>>(
        variables: impl IntoIterator<Item = &'a Variable>,
        pairs: impl IntoIterator<Item = (S, V)>,
    ) -> Result<Self> {
        let variables: Vec<&Variable> = variables.into_iter().collect();
        let mut evidence = Self::new();
        for (name, value) in pairs {
            let name = name.as_ref();
            let id = variables
                .iter()
                .position(|v| v.name == name)
                .ok_or_else(|| BayesNetError::UnknownVariable(name.to_owned()))?;
            evidence.observe(id, variables[id].class_of(&value.into())?);
        }
        Ok(evidence)
    }

    /// Observes `var` at the value of index `class`, replacing a previous observation.
    pub fn observe(&mut self, var: VarId, class: ClassVal) {
        self.observed.insert(var, class);
    }
    pub fn get(&self, var: VarId) -> Option<ClassVal> {
        self.observed.get(&var).copied()
    }
    pub fn len(&self) -> usize {
        self.observed.len()
    }
    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (VarId, ClassVal)> + '_ {
        self.observed.iter().map(|(v, c)| (*v, *c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    #[test]
    fn vector_and_pairs_agree() {
        let vars = vec![
            Variable::new("guest", Domain::new(["A", "B", "C"]).unwrap()),
            Variable::new("monty", Domain::new(["A", "B", "C"]).unwrap()),
        ];
        let from_vec = Evidence::from_vector(&vars, &[None, Some("B".into())]).unwrap();
        let from_pairs = Evidence::from_pairs(&vars, [("monty", "B")]).unwrap();
        assert_eq!(from_vec, from_pairs);
        assert_eq!(from_vec.get(1), Some(1));
        assert_eq!(from_vec.get(0), None);
        assert!(matches!(
            Evidence::from_pairs(&vars, [("prize", "B")]),
            Err(BayesNetError::UnknownVariable(_))
        ));
        assert!(matches!(
            Evidence::from_pairs(&vars, [("guest", "D")]),
            Err(BayesNetError::Domain { .. })
        ));
    }
}
