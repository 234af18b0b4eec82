use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::domain::{Domain, Value};
use crate::{BayesNetError, ClassVal, Result, NORMALIZATION_TOLERANCE};

/// Probability table over the domain of a single variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalDistribution {
    domain: Domain,
    probs: Array1<f64>,
}

/// Checks that all entries are probabilities and that they sum to 1.
pub(crate) fn check_probabilities(probs: ArrayView1<f64>) -> Result<()> {
    if let Some(p) = probs
        .iter()
        .find(|p| !(0.0..=1.0).contains(*p) || !p.is_finite())
    {
        return Err(BayesNetError::InvalidProbability(*p));
    }
    let sum = probs.sum();
    if (sum - 1.0).abs() > NORMALIZATION_TOLERANCE {
        return Err(BayesNetError::NotNormalized { sum });
    }
    Ok(())
}

impl CategoricalDistribution {
    pub fn new(domain: Domain, probs: Array1<f64>) -> Result<Self> {
        if probs.len() != domain.len() {
            return Err(BayesNetError::Shape {
                expected: vec![domain.len()],
                got: vec![probs.len()],
            });
        }
        check_probabilities(probs.view())?;
        Ok(Self { domain, probs })
    }
    /// Builds a distribution from `(value, probability)` pairs, the domain order being the
    /// order of the pairs.
    pub fn from_pairs<V: Into<Value>>(pairs: impl IntoIterator<Item = (V, f64)>) -> Result<Self> {
        let (values, probs): (Vec<Value>, Vec<f64>) =
            pairs.into_iter().map(|(v, p)| (v.into(), p)).unzip();
        Self::new(Domain::new(values)?, Array1::from(probs))
    }
    pub fn uniform(domain: Domain) -> Self {
        let n = domain.len();
        Self {
            domain,
            probs: Array1::from_elem(n, 1.0 / n as f64),
        }
    }
    /// Normalizes non-negative weights. Returns `None` if they sum to zero.
    pub(crate) fn from_weights(domain: Domain, mut weights: Array1<f64>) -> Option<Self> {
        let sum = weights.sum();
        if sum <= 0.0 || !sum.is_finite() {
            return None;
        }
        weights /= sum;
        Some(Self {
            domain,
            probs: weights,
        })
    }
    pub fn domain(&self) -> &Domain {
        &self.domain
    }
    pub fn probabilities(&self) -> ArrayView1<f64> {
        self.probs.view()
    }
    pub fn probability(&self, value: &Value) -> Result<f64> {
        let class = self
            .domain
            .index_of(value)
            .ok_or_else(|| BayesNetError::DomainValue {
                value: value.to_string(),
                domain: self.domain.to_string(),
            })?;
        Ok(self.probs[class as usize])
    }
    /// Probability of the value at position `class`, 0 if out of the domain.
    pub fn probability_of(&self, class: ClassVal) -> f64 {
        self.probs.get(class as usize).copied().unwrap_or(0.0)
    }
    /// Most probable value (the first one on ties).
    pub fn most_likely(&self) -> &Value {
        let best = self
            .probs
            .iter()
            .enumerate()
            .fold(0, |best, (i, p)| if *p > self.probs[best] { i } else { best });
        &self.domain.values()[best]
    }
}
