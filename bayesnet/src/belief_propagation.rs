//! Loopy belief propagation (sum-product) on compiled factor graphs.
//!
//! Messages live on the edges of the factor graph: `belief_from_var[e]` goes from the
//! variable of edge `e` to its factor, `belief_to_var[e]` the other way. A sweep first
//! recomputes every factor-to-variable message from the committed variable-to-factor
//! messages, then every variable-to-factor message from the new factor messages. Within a
//! half-sweep all updates are independent and run in parallel.
//!
//! Observed variables always send a one-hot message on their observed value.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Zip};
use rayon::prelude::*;

use crate::dataset::{Dataset, MISSING};
use crate::distribution::CategoricalDistribution;
use crate::domain::Value;
use crate::evidence::Evidence;
use crate::factor_graph::{EdgeId, FactorGraph, FactorId};
use crate::{BayesNetError, ClassVal, Result, VarId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BPConfig {
    /// Maximum number of sweeps.
    pub max_iterations: usize,
    /// Convergence threshold on the largest total variation change of a message in a sweep.
    pub tolerance: f64,
}

impl Default for BPConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

impl BPConfig {
    pub fn validate(self) -> Result<Self> {
        if self.max_iterations == 0 {
            return Err(BayesNetError::InvalidConfig(
                "max_iterations must be > 0".to_owned(),
            ));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(BayesNetError::InvalidConfig(
                "tolerance must be finite and > 0".to_owned(),
            ));
        }
        Ok(self)
    }
}

/// Result of inference for one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Posterior {
    /// The variable is observed, its value is echoed.
    Observed(Value),
    Hidden(CategoricalDistribution),
}

impl Posterior {
    pub fn distribution(&self) -> Option<&CategoricalDistribution> {
        match self {
            Posterior::Observed(_) => None,
            Posterior::Hidden(d) => Some(d),
        }
    }
    pub fn probability(&self, value: &Value) -> Result<f64> {
        match self {
            Posterior::Observed(v) => Ok(if v == value { 1.0 } else { 0.0 }),
            Posterior::Hidden(d) => d.probability(value),
        }
    }
    pub fn most_likely(&self) -> &Value {
        match self {
            Posterior::Observed(v) => v,
            Posterior::Hidden(d) => d.most_likely(),
        }
    }
}

/// Iteration cap reached before the message changes fell below the tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceWarning {
    pub iterations: usize,
    pub max_delta: f64,
    pub tolerance: f64,
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "belief propagation did not converge after {} iterations (max message change {:e}, tolerance {:e})",
            self.iterations, self.max_delta, self.tolerance
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    /// One posterior per variable, in registration order.
    pub posteriors: Vec<Posterior>,
    /// Number of sweeps run.
    pub iterations: usize,
    /// Largest message change in the last sweep.
    pub max_delta: f64,
    pub converged: bool,
    tolerance: f64,
}

impl Inference {
    pub fn posterior(&self, var: VarId) -> &Posterior {
        &self.posteriors[var]
    }
    pub fn warning(&self) -> Option<ConvergenceWarning> {
        (!self.converged).then_some(ConvergenceWarning {
            iterations: self.iterations,
            max_delta: self.max_delta,
            tolerance: self.tolerance,
        })
    }
}

/// Message buffers of one inference run over a shared factor graph.
#[derive(Debug, Clone)]
pub struct BPState {
    graph: Arc<FactorGraph>,
    evidence: Evidence,
    belief_from_var: Vec<Array1<f64>>,
    belief_to_var: Vec<Array1<f64>>,
    iterations: usize,
    max_delta: f64,
}

fn uniform(card: usize) -> Array1<f64> {
    Array1::from_elem(card, 1.0 / card as f64)
}

/// Scales to a unit sum; all-zero messages are left as they are.
fn normalize(msg: &mut Array1<f64>) {
    let sum = msg.sum();
    if sum > 0.0 {
        *msg /= sum;
    }
}

fn total_variation(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    0.5 * Zip::from(a).and(b).fold(0.0, |acc, x, y| acc + (x - y).abs())
}

impl BPState {
    pub fn new(graph: Arc<FactorGraph>, evidence: Evidence) -> Result<Self> {
        for (var, class) in evidence.iter() {
            if var >= graph.n_vars() {
                return Err(BayesNetError::UnknownVariable(var.to_string()));
            }
            if class as usize >= graph.card(var) {
                return Err(BayesNetError::Domain {
                    value: class.to_string(),
                    variable: graph.variable(var).name.clone(),
                });
            }
        }
        let belief_to_var = graph.edges.iter().map(|e| uniform(graph.card(e.var))).collect();
        let belief_from_var = graph
            .edges
            .iter()
            .map(|e| match evidence.get(e.var) {
                Some(class) => one_hot(graph.card(e.var), class),
                None => uniform(graph.card(e.var)),
            })
            .collect();
        Ok(Self {
            graph,
            evidence,
            belief_from_var,
            belief_to_var,
            iterations: 0,
            max_delta: f64::INFINITY,
        })
    }
    pub fn get_graph(&self) -> &Arc<FactorGraph> {
        &self.graph
    }
    pub fn iterations(&self) -> usize {
        self.iterations
    }
    pub fn get_belief_to_var(&self, edge: EdgeId) -> &Array1<f64> {
        &self.belief_to_var[edge]
    }
    pub fn get_belief_from_var(&self, edge: EdgeId) -> &Array1<f64> {
        &self.belief_from_var[edge]
    }

    /// Sum-product messages from a factor to every variable of its scope, in scope order.
    fn factor_messages(&self, factor_id: FactorId) -> Vec<Array1<f64>> {
        let factor = self.graph.factor(factor_id);
        let incoming: Vec<&Array1<f64>> = factor
            .edges
            .values()
            .map(|e| &self.belief_from_var[*e])
            .collect();
        let mut res: Vec<Array1<f64>> = incoming.iter().map(|m| Array1::zeros(m.len())).collect();
        for (idx, p) in factor.potential.indexed_iter() {
            if *p == 0.0 {
                continue;
            }
            for (t, out) in res.iter_mut().enumerate() {
                let w = incoming
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != t)
                    .fold(*p, |acc, (j, m)| acc * m[idx[j]]);
                out[idx[t]] += w;
            }
        }
        res.iter_mut().for_each(normalize);
        res
    }

    /// Messages from a variable to each of its factors, in the variable edge order.
    fn var_messages(&self, var_id: VarId) -> Vec<Array1<f64>> {
        let var = self.graph.var(var_id);
        let card = var.variable.cardinality();
        if let Some(class) = self.evidence.get(var_id) {
            return vec![one_hot(card, class); var.edges.len()];
        }
        let incoming: Vec<&Array1<f64>> = var
            .edges
            .values()
            .map(|e| &self.belief_to_var[*e])
            .collect();
        (0..incoming.len())
            .map(|t| {
                let mut msg = Array1::ones(card);
                for (_, m) in incoming.iter().enumerate().filter(|(j, _)| *j != t) {
                    msg *= *m;
                }
                normalize(&mut msg);
                msg
            })
            .collect()
    }

    /// Recomputes all factor-to-variable messages. Returns the largest change.
    pub fn propagate_factors(&mut self) -> f64 {
        let new: Vec<Vec<Array1<f64>>> = (0..self.graph.n_factors())
            .into_par_iter()
            .map(|f| self.factor_messages(f))
            .collect();
        let mut delta: f64 = 0.0;
        for (factor, msgs) in self.graph.factors.iter().zip(new.into_iter()) {
            for (e, msg) in factor.edges.values().zip(msgs.into_iter()) {
                delta = delta.max(total_variation(&self.belief_to_var[*e], &msg));
                self.belief_to_var[*e] = msg;
            }
        }
        delta
    }

    /// Recomputes all variable-to-factor messages. Returns the largest change.
    pub fn propagate_vars(&mut self) -> f64 {
        let new: Vec<Vec<Array1<f64>>> = (0..self.graph.n_vars())
            .into_par_iter()
            .map(|v| self.var_messages(v))
            .collect();
        let mut delta: f64 = 0.0;
        for (var, msgs) in self.graph.vars.values().zip(new.into_iter()) {
            for (e, msg) in var.edges.values().zip(msgs.into_iter()) {
                delta = delta.max(total_variation(&self.belief_from_var[*e], &msg));
                self.belief_from_var[*e] = msg;
            }
        }
        delta
    }

    /// One full synchronous sweep. Returns the largest message change.
    pub fn propagate_loopy_step(&mut self) -> f64 {
        let delta = self.propagate_factors().max(self.propagate_vars());
        self.iterations += 1;
        self.max_delta = delta;
        delta
    }

    /// Sweeps until convergence or until the iteration cap.
    pub fn run(&mut self, config: &BPConfig) -> Result<Inference> {
        let config = config.validate()?;
        let mut converged = false;
        for _ in 0..config.max_iterations {
            let delta = self.propagate_loopy_step();
            tracing::debug!(iteration = self.iterations, delta, "bp sweep");
            if delta < config.tolerance {
                converged = true;
                break;
            }
        }
        let inference = Inference {
            posteriors: self.posteriors()?,
            iterations: self.iterations,
            max_delta: self.max_delta,
            converged,
            tolerance: config.tolerance,
        };
        if let Some(warning) = inference.warning() {
            tracing::warn!("{}", warning);
        }
        Ok(inference)
    }

    /// Current belief on `var`: the observed value, or the normalized product of all incoming
    /// factor messages.
    pub fn posterior(&self, var_id: VarId) -> Result<Posterior> {
        let var = self.graph.var(var_id);
        let domain = &var.variable.domain;
        if let Some(class) = self.evidence.get(var_id) {
            return domain
                .value(class)
                .cloned()
                .map(Posterior::Observed)
                .ok_or_else(|| BayesNetError::Domain {
                    value: class.to_string(),
                    variable: var.variable.name.clone(),
                });
        }
        let mut belief = Array1::ones(domain.len());
        for e in var.edges.values() {
            belief *= &self.belief_to_var[*e];
        }
        CategoricalDistribution::from_weights(domain.clone(), belief)
            .map(Posterior::Hidden)
            .ok_or(BayesNetError::InconsistentEvidence)
    }

    pub fn posteriors(&self) -> Result<Vec<Posterior>> {
        (0..self.graph.n_vars()).map(|v| self.posterior(v)).collect()
    }
}

fn one_hot(card: usize, class: ClassVal) -> Array1<f64> {
    let mut msg = Array1::zeros(card);
    msg[class as usize] = 1.0;
    msg
}

/// Posteriors of every variable of `graph` given `evidence`.
///
/// Never fails on non-convergence: the result carries the iteration count, the last message
/// change and a [`ConvergenceWarning`] when the cap was hit.
pub fn infer(
    graph: Arc<FactorGraph>,
    evidence: &Evidence,
    max_iterations: usize,
    tolerance: f64,
) -> Result<Inference> {
    let config = BPConfig {
        max_iterations,
        tolerance,
    };
    BPState::new(graph, evidence.clone())?.run(&config)
}

/// Fills the missing cells of `data` with their most probable value given the observed cells
/// of the same row.
pub fn predict(graph: Arc<FactorGraph>, data: &Dataset, config: &BPConfig) -> Result<Dataset> {
    if data.variables().len() != graph.n_vars()
        || data
            .variables()
            .iter()
            .zip(graph.variables())
            .any(|(a, b)| a != b)
    {
        return Err(BayesNetError::InvalidConfig(
            "dataset variables do not match the factor graph".to_owned(),
        ));
    }
    let codes = data.codes();
    let rows = codes
        .outer_iter()
        .into_par_iter()
        .map(|row| -> Result<Array1<ClassVal>> {
            let mut row = row.to_owned();
            if !row.iter().any(|c| *c == MISSING) {
                return Ok(row);
            }
            let mut evidence = Evidence::new();
            for (var, c) in row.iter().enumerate().filter(|(_, c)| **c != MISSING) {
                evidence.observe(var, *c);
            }
            let mut state = BPState::new(graph.clone(), evidence)?;
            state.run(config)?;
            for (var, c) in row.iter_mut().enumerate() {
                if *c == MISSING {
                    let most_likely = state.posterior(var)?.most_likely().clone();
                    *c = graph.variable(var).class_of(&most_likely)?;
                }
            }
            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;
    let mut codes = codes.to_owned();
    for (mut dest, row) in codes.outer_iter_mut().zip(rows.iter()) {
        dest.assign(row);
    }
    Dataset::from_codes(data.variables().to_vec(), codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::graph::DependencyGraphBuilder;
    use crate::table::ConditionalTable;
    use approx::assert_abs_diff_eq;

    // rain -> wet grass
    fn sprinkler() -> Arc<FactorGraph> {
        let mut b = DependencyGraphBuilder::new();
        b.add_node(
            "rain",
            CategoricalDistribution::from_pairs([(false, 0.8), (true, 0.2)]).unwrap(),
        )
        .unwrap();
        let rain = b.variable("rain").unwrap();
        let wet = ConditionalTable::from_rows(
            vec![rain],
            Domain::boolean(),
            vec![
                (vec![false, false], 0.9),
                (vec![false, true], 0.1),
                (vec![true, false], 0.2),
                (vec![true, true], 0.8),
            ],
        )
        .unwrap();
        b.add_node("wet", wet).unwrap();
        b.add_edge("rain", "wet").unwrap();
        Arc::new(b.finalize().unwrap().compile())
    }

    #[test]
    fn bayes_rule_on_two_nodes() {
        let fg = sprinkler();
        let evidence = Evidence::from_pairs(fg.variables(), [("wet", true)]).unwrap();
        let res = infer(fg, &evidence, 10, 1e-10).unwrap();
        assert!(res.converged);
        assert!(res.warning().is_none());
        // P(rain | wet) = 0.2 * 0.8 / (0.2 * 0.8 + 0.8 * 0.1)
        assert_abs_diff_eq!(
            res.posterior(0).probability(&true.into()).unwrap(),
            0.16 / 0.24,
            epsilon = 1e-12
        );
        assert_eq!(res.posterior(1), &Posterior::Observed(true.into()));
    }

    #[test]
    fn iteration_cap_is_reported() {
        let fg = sprinkler();
        let res = infer(fg, &Evidence::new(), 1, 1e-10).unwrap();
        assert!(!res.converged);
        let warning = res.warning().unwrap();
        assert_eq!(warning.iterations, 1);
        assert!(warning.to_string().contains("did not converge"));
    }

    #[test]
    fn invalid_config() {
        let fg = sprinkler();
        assert!(matches!(
            infer(fg.clone(), &Evidence::new(), 0, 1e-10),
            Err(BayesNetError::InvalidConfig(_))
        ));
        assert!(matches!(
            infer(fg, &Evidence::new(), 10, f64::NAN),
            Err(BayesNetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn evidence_out_of_range() {
        let fg = sprinkler();
        let mut evidence = Evidence::new();
        evidence.observe(0, 2);
        assert!(matches!(
            BPState::new(fg, evidence),
            Err(BayesNetError::Domain { .. })
        ));
    }
}
