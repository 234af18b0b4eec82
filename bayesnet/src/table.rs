//! Conditional probability tables.
//!
//! A table over parents `(P0, ..., Pk-1)` and a child `X` is stored as a dense
//! `(n_configs, |X|)` array. The row of a parent configuration is its mixed-radix encoding,
//! `P0` being the most significant digit.

use itertools::Itertools;
use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::distribution::{check_probabilities, CategoricalDistribution};
use crate::domain::{Domain, Value, Variable};
use crate::{BayesNetError, ClassVal, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalTable {
    parents: Vec<Variable>,
    child: Domain,
    probs: Array2<f64>,
}

/// Mixed-radix encoding of `classes`, `None` if a digit is out of range or the arity is wrong.
pub(crate) fn encode_config(cards: &[usize], classes: &[ClassVal]) -> Option<usize> {
    if cards.len() != classes.len() {
        return None;
    }
    let mut idx = 0;
    for (card, class) in cards.iter().zip(classes.iter()) {
        let class = *class as usize;
        if class >= *card {
            return None;
        }
        idx = idx * card + class;
    }
    Some(idx)
}

pub(crate) fn decode_config(cards: &[usize], mut idx: usize) -> Vec<ClassVal> {
    let mut classes = vec![0; cards.len()];
    for (class, card) in classes.iter_mut().zip(cards.iter()).rev() {
        *class = (idx % card) as ClassVal;
        idx /= card;
    }
    classes
}

fn format_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> String {
    values.into_iter().map(|v| v.to_string()).join(", ")
}

impl ConditionalTable {
    pub fn new(parents: Vec<Variable>, child: Domain, probs: Array2<f64>) -> Result<Self> {
        let n_configs = parents.iter().map(Variable::cardinality).product::<usize>();
        if probs.dim() != (n_configs, child.len()) {
            return Err(BayesNetError::Shape {
                expected: vec![n_configs, child.len()],
                got: probs.shape().to_vec(),
            });
        }
        for row in probs.axis_iter(Axis(0)) {
            check_probabilities(row)?;
        }
        Ok(Self {
            parents,
            child,
            probs,
        })
    }

    /// Builds a table from rows `([parent values..., child value], probability)`.
    ///
    /// Child values that are not listed for a parent configuration get probability 0.
    /// Every parent configuration must appear in at least one row.
    pub fn from_rows<V: Into<Value>>(
        parents: Vec<Variable>,
        child: Domain,
        rows: impl IntoIterator<Item = (Vec<V>, f64)>,
    ) -> Result<Self> {
        Self::build_from_rows(parents, child, rows, false)
    }

    /// Like [`Self::from_rows`], parent configurations without any row are uniform.
    pub fn from_rows_or_uniform<V: Into<Value>>(
        parents: Vec<Variable>,
        child: Domain,
        rows: impl IntoIterator<Item = (Vec<V>, f64)>,
    ) -> Result<Self> {
        Self::build_from_rows(parents, child, rows, true)
    }

    fn build_from_rows<V: Into<Value>>(
        parents: Vec<Variable>,
        child: Domain,
        rows: impl IntoIterator<Item = (Vec<V>, f64)>,
        fill_uniform: bool,
    ) -> Result<Self> {
        let cards: Vec<usize> = parents.iter().map(Variable::cardinality).collect();
        let n_configs = cards.iter().product::<usize>();
        let mut probs = Array2::zeros((n_configs, child.len()));
        let mut defined = Array2::from_elem((n_configs, child.len()), false);
        for (values, p) in rows {
            let values: Vec<Value> = values.into_iter().map(Into::into).collect();
            if values.len() != parents.len() + 1 {
                return Err(BayesNetError::Shape {
                    expected: vec![parents.len() + 1],
                    got: vec![values.len()],
                });
            }
            let (child_value, parent_values) = values.split_last().expect("non-empty row");
            let classes = parents
                .iter()
                .zip(parent_values.iter())
                .map(|(var, v)| var.class_of(v))
                .collect::<Result<Vec<_>>>()?;
            let config = encode_config(&cards, &classes).expect("classes checked against domains");
            let class = child
                .index_of(child_value)
                .ok_or_else(|| BayesNetError::DomainValue {
                    value: child_value.to_string(),
                    domain: child.to_string(),
                })? as usize;
            if defined[(config, class)] {
                return Err(BayesNetError::InvalidConfig(format!(
                    "duplicate row for ({})",
                    format_values(values.iter())
                )));
            }
            defined[(config, class)] = true;
            probs[(config, class)] = p;
        }
        let uniform = 1.0 / child.len() as f64;
        for (config, (mut row, def)) in probs
            .axis_iter_mut(Axis(0))
            .zip(defined.axis_iter(Axis(0)))
            .enumerate()
        {
            if def.iter().any(|d| *d) {
                continue;
            }
            if fill_uniform {
                row.fill(uniform);
            } else {
                let classes = decode_config(&cards, config);
                let values = parents
                    .iter()
                    .zip(classes.iter())
                    .filter_map(|(var, c)| var.domain.value(*c));
                return Err(BayesNetError::Lookup(format_values(values)));
            }
        }
        Self::new(parents, child, probs)
    }

    pub fn parents(&self) -> &[Variable] {
        &self.parents
    }
    pub fn child_domain(&self) -> &Domain {
        &self.child
    }
    pub fn parent_cards(&self) -> Vec<usize> {
        self.parents.iter().map(Variable::cardinality).collect()
    }
    pub fn n_configs(&self) -> usize {
        self.probs.nrows()
    }
    /// Table rows, one per parent configuration.
    pub fn probabilities(&self) -> ArrayView2<f64> {
        self.probs.view()
    }

    pub(crate) fn row(&self, parent_classes: &[ClassVal]) -> Option<ArrayView1<f64>> {
        encode_config(&self.parent_cards(), parent_classes).map(|i| self.probs.row(i))
    }

    /// Distribution of the child given the values of all parents, in table order.
    pub fn conditional(&self, parent_values: &[Value]) -> Result<CategoricalDistribution> {
        let lookup_err = || BayesNetError::Lookup(format_values(parent_values.iter()));
        if parent_values.len() != self.parents.len() {
            return Err(lookup_err());
        }
        let classes = self
            .parents
            .iter()
            .zip(parent_values.iter())
            .map(|(var, v)| var.domain.index_of(v))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(lookup_err)?;
        let row = self.row(&classes).ok_or_else(lookup_err)?;
        CategoricalDistribution::new(self.child.clone(), row.to_owned())
    }

    /// `P(child = value | parents = parent_values)`.
    pub fn probability(&self, parent_values: &[Value], value: &Value) -> Result<f64> {
        self.conditional(parent_values)?.probability(value)
    }

    /// The table as a joint potential over `[parents..., child]`.
    pub fn potential(&self) -> ArrayD<f64> {
        let mut shape = self.parent_cards();
        shape.push(self.child.len());
        ArrayD::from_shape_vec(IxDyn(&shape), self.probs.iter().cloned().collect())
            .expect("table size is the product of the cardinalities")
    }
}
