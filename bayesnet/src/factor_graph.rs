//! Bipartite factor graphs compiled from dependency graphs.
//!
//! Every node of the dependency graph gives one variable and one factor. The scope of a
//! factor is `[parents..., child]` and its potential is the node table reshaped over that
//! scope.

use indexmap::IndexMap;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::domain::Variable;
use crate::graph::{DependencyGraph, NodeDistribution};
use crate::{BayesNetError, NamedList, Result, VarId};

pub type FactorId = usize;
pub type EdgeId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Var {
    pub(crate) variable: Variable,
    pub(crate) edges: IndexMap<FactorId, EdgeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Factor {
    // scope, child last
    pub(crate) edges: IndexMap<VarId, EdgeId>,
    pub(crate) potential: ArrayD<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Edge {
    pub(crate) var: VarId,
    pub(crate) pos_var: usize,
    pub(crate) factor: FactorId,
    pub(crate) pos_factor: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorGraph {
    pub(crate) vars: NamedList<Var>,
    pub(crate) factors: Vec<Factor>,
    pub(crate) edges: Vec<Edge>,
}

impl FactorGraph {
    fn build() -> Self {
        Self {
            vars: NamedList::new(),
            factors: Vec::new(),
            edges: Vec::new(),
        }
    }
    fn add_var(&mut self, variable: Variable) {
        self.vars.insert(
            variable.name.clone(),
            Var {
                variable,
                edges: IndexMap::new(),
            },
        );
    }
    fn add_factor(&mut self, scope: impl Iterator<Item = VarId>, potential: ArrayD<f64>) {
        let factor_id = self.factors.len();
        let mut edges = IndexMap::new();
        for var_id in scope {
            let edge_id = self.edges.len();
            let var = &mut self.vars[var_id];
            var.edges.insert(factor_id, edge_id);
            edges.insert(var_id, edge_id);
            self.edges.push(Edge {
                var: var_id,
                pos_var: var.edges.len() - 1,
                factor: factor_id,
                pos_factor: edges.len() - 1,
            });
        }
        debug_assert_eq!(potential.ndim(), edges.len());
        self.factors.push(Factor { edges, potential });
    }

    pub fn n_vars(&self) -> usize {
        self.vars.len()
    }
    pub fn n_factors(&self) -> usize {
        self.factors.len()
    }
    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }
    pub fn get_varid(&self, var: &str) -> Result<VarId> {
        self.vars
            .get_index_of(var)
            .ok_or_else(|| BayesNetError::UnknownVariable(var.to_owned()))
    }
    pub fn variable(&self, var: VarId) -> &Variable {
        &self.vars[var].variable
    }
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values().map(|v| &v.variable)
    }
    /// Variables in the scope of a factor, the node variable last.
    pub fn scope(&self, factor: FactorId) -> impl Iterator<Item = VarId> + '_ {
        self.factors[factor].edges.keys().copied()
    }
    pub fn edge(&self, var: VarId, factor: FactorId) -> Option<EdgeId> {
        self.vars[var].edges.get(&factor).copied()
    }
    pub(crate) fn var(&self, var: VarId) -> &Var {
        &self.vars[var]
    }
    pub(crate) fn factor(&self, factor: FactorId) -> &Factor {
        &self.factors[factor]
    }
    pub(crate) fn card(&self, var: VarId) -> usize {
        self.vars[var].variable.cardinality()
    }

    /// Does the graph contain a cycle (as an undirected bipartite graph)?
    pub fn is_cyclic(&self) -> bool {
        // union-find over variables (0..n_vars) and factors (n_vars..)
        let mut repr: Vec<usize> = (0..self.n_vars() + self.n_factors()).collect();
        fn find(repr: &mut [usize], mut x: usize) -> usize {
            while repr[x] != x {
                repr[x] = repr[repr[x]];
                x = repr[x];
            }
            x
        }
        for e in &self.edges {
            let a = find(&mut repr, e.var);
            let b = find(&mut repr, self.n_vars() + e.factor);
            if a == b {
                return true;
            }
            repr[a] = b;
        }
        false
    }
}

/// Compiles a dependency graph into its factor graph.
pub fn compile(graph: &DependencyGraph) -> FactorGraph {
    let mut fg = FactorGraph::build();
    for var in graph.variables() {
        fg.add_var(var.clone());
    }
    for (id, node) in graph.nodes().enumerate() {
        let potential = match &node.distribution {
            NodeDistribution::Root(d) => d.probabilities().to_owned().into_dyn(),
            NodeDistribution::Conditional(t) => t.potential(),
        };
        let scope = graph.parents(id).iter().copied().chain(std::iter::once(id));
        fg.add_factor(scope, potential);
    }
    fg
}
