//! Directed acyclic dependency graphs.
//!
//! Graphs are assembled with [`DependencyGraphBuilder`] and frozen by
//! [`DependencyGraphBuilder::finalize`], which is the only validation gate: every
//! [`DependencyGraph`] is acyclic and its tables agree with its edges.

use itertools::Itertools;
use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::Dataset;
use crate::distribution::CategoricalDistribution;
use crate::domain::{Domain, Value, Variable};
use crate::factor_graph::FactorGraph;
use crate::table::ConditionalTable;
use crate::{BayesNetError, ClassVal, NamedList, Result, VarId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructureError {
    #[error("A node named {0} already exists.")]
    DuplicateNode(String),
    #[error("No node named {0}.")]
    UnknownNode(String),
    #[error("Edge {parent} -> {child} already exists.")]
    DuplicateEdge { parent: String, child: String },
    #[error("Edge {parent} -> {child} would create a cycle.")]
    Cycle { parent: String, child: String },
    #[error("Table of {node} declares parents [{declared}], incoming edges are [{edges}].")]
    ParentMismatch {
        node: String,
        declared: String,
        edges: String,
    },
    #[error("Domain of {parent} does not match the one declared in the table of {node}.")]
    DomainMismatch { node: String, parent: String },
}

/// Distribution held by a node: a prior for roots, a table for the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeDistribution {
    Root(CategoricalDistribution),
    Conditional(ConditionalTable),
}

impl NodeDistribution {
    pub fn domain(&self) -> &Domain {
        match self {
            NodeDistribution::Root(d) => d.domain(),
            NodeDistribution::Conditional(t) => t.child_domain(),
        }
    }
    /// Parents declared by the distribution, in table order.
    pub fn declared_parents(&self) -> &[Variable] {
        match self {
            NodeDistribution::Root(_) => &[],
            NodeDistribution::Conditional(t) => t.parents(),
        }
    }
    /// `P(class | parent_classes)`.
    pub(crate) fn probability_of(&self, parent_classes: &[ClassVal], class: ClassVal) -> f64 {
        match self {
            NodeDistribution::Root(d) => d.probability_of(class),
            NodeDistribution::Conditional(t) => t
                .row(parent_classes)
                .and_then(|row| row.get(class as usize).copied())
                .unwrap_or(0.0),
        }
    }
}

impl From<CategoricalDistribution> for NodeDistribution {
    fn from(d: CategoricalDistribution) -> Self {
        NodeDistribution::Root(d)
    }
}
impl From<ConditionalTable> for NodeDistribution {
    fn from(t: ConditionalTable) -> Self {
        NodeDistribution::Conditional(t)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub variable: Variable,
    pub distribution: NodeDistribution,
}

/// Mutable graph under construction.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraphBuilder {
    nodes: NamedList<NodeDistribution>,
    // incoming edges, in insertion order
    parents: Vec<Vec<VarId>>,
    children: Vec<Vec<VarId>>,
}

impl DependencyGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        distribution: impl Into<NodeDistribution>,
    ) -> std::result::Result<VarId, StructureError> {
        let name = name.into();
        if self.nodes.contains_key(&name) {
            return Err(StructureError::DuplicateNode(name));
        }
        self.nodes.insert(name, distribution.into());
        self.parents.push(Vec::new());
        self.children.push(Vec::new());
        Ok(self.nodes.len() - 1)
    }
    /// The variable of a node, to be used as a parent in the tables of other nodes.
    pub fn variable(&self, name: &str) -> std::result::Result<Variable, StructureError> {
        let (name, dist) = self
            .nodes
            .get_key_value(name)
            .ok_or_else(|| StructureError::UnknownNode(name.to_owned()))?;
        Ok(Variable::new(name.clone(), dist.domain().clone()))
    }
    fn get_id(&self, name: &str) -> std::result::Result<VarId, StructureError> {
        self.nodes
            .get_index_of(name)
            .ok_or_else(|| StructureError::UnknownNode(name.to_owned()))
    }
    fn name(&self, id: VarId) -> &str {
        self.nodes.get_index(id).map(|(n, _)| n.as_str()).unwrap_or("?")
    }
    pub fn add_edge(&mut self, parent: &str, child: &str) -> std::result::Result<(), StructureError> {
        let parent = self.get_id(parent)?;
        let child = self.get_id(child)?;
        self.add_edge_ids(parent, child)
    }
    pub fn add_edge_ids(
        &mut self,
        parent: VarId,
        child: VarId,
    ) -> std::result::Result<(), StructureError> {
        for id in [parent, child] {
            if id >= self.nodes.len() {
                return Err(StructureError::UnknownNode(id.to_string()));
            }
        }
        if self.parents[child].contains(&parent) {
            return Err(StructureError::DuplicateEdge {
                parent: self.name(parent).to_owned(),
                child: self.name(child).to_owned(),
            });
        }
        if reachable(&self.children, child, parent) {
            return Err(StructureError::Cycle {
                parent: self.name(parent).to_owned(),
                child: self.name(child).to_owned(),
            });
        }
        self.parents[child].push(parent);
        self.children[parent].push(child);
        Ok(())
    }

    /// Validates the graph and freezes it.
    pub fn finalize(self) -> std::result::Result<DependencyGraph, StructureError> {
        for (id, (name, dist)) in self.nodes.iter().enumerate() {
            let declared = dist.declared_parents();
            let edges = &self.parents[id];
            let names_match = declared.len() == edges.len()
                && declared
                    .iter()
                    .zip(edges.iter())
                    .all(|(var, e)| var.name == self.name(*e));
            if !names_match {
                return Err(StructureError::ParentMismatch {
                    node: name.clone(),
                    declared: declared.iter().map(|v| v.name.as_str()).join(", "),
                    edges: edges.iter().map(|e| self.name(*e)).join(", "),
                });
            }
            for (var, e) in declared.iter().zip(edges.iter()) {
                if &var.domain != self.nodes[*e].domain() {
                    return Err(StructureError::DomainMismatch {
                        node: name.clone(),
                        parent: var.name.clone(),
                    });
                }
            }
        }
        let topological_order = topological_order(&self.parents, &self.children);
        let nodes = self
            .nodes
            .into_iter()
            .map(|(name, distribution)| {
                let variable = Variable::new(name.clone(), distribution.domain().clone());
                (
                    name,
                    Node {
                        variable,
                        distribution,
                    },
                )
            })
            .collect();
        Ok(DependencyGraph {
            nodes,
            parents: self.parents,
            children: self.children,
            topological_order,
        })
    }
}

/// Is `to` reachable from `from` following `children` edges?
fn reachable(children: &[Vec<VarId>], from: VarId, to: VarId) -> bool {
    let mut seen = vec![false; children.len()];
    let mut stack = vec![from];
    while let Some(v) = stack.pop() {
        if v == to {
            return true;
        }
        if !std::mem::replace(&mut seen[v], true) {
            stack.extend(children[v].iter().copied());
        }
    }
    false
}

/// Kahn's algorithm, always picking the lowest ready index.
///
/// The edges must be acyclic, which `add_edge_ids` enforces.
fn topological_order(parents: &[Vec<VarId>], children: &[Vec<VarId>]) -> Vec<VarId> {
    let mut in_degree: Vec<usize> = parents.iter().map(Vec::len).collect();
    let mut ready: std::collections::BTreeSet<VarId> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(parents.len());
    while let Some(v) = ready.pop_first() {
        order.push(v);
        for c in &children[v] {
            in_degree[*c] -= 1;
            if in_degree[*c] == 0 {
                ready.insert(*c);
            }
        }
    }
    debug_assert_eq!(order.len(), parents.len());
    order
}

/// Finalized, immutable dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    nodes: NamedList<Node>,
    parents: Vec<Vec<VarId>>,
    children: Vec<Vec<VarId>>,
    topological_order: Vec<VarId>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    /// Nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }
    pub fn node(&self, var: VarId) -> &Node {
        &self.nodes[var]
    }
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.nodes.values().map(|n| &n.variable)
    }
    pub fn variable(&self, var: VarId) -> &Variable {
        &self.nodes[var].variable
    }
    pub fn get_varid(&self, name: &str) -> Result<VarId> {
        self.nodes
            .get_index_of(name)
            .ok_or_else(|| BayesNetError::UnknownVariable(name.to_owned()))
    }
    pub fn parents(&self, var: VarId) -> &[VarId] {
        &self.parents[var]
    }
    pub fn children(&self, var: VarId) -> &[VarId] {
        &self.children[var]
    }
    pub fn topological_order(&self) -> &[VarId] {
        &self.topological_order
    }
    /// Parent indices of every node, in table order.
    pub fn structure(&self) -> Vec<Vec<VarId>> {
        self.parents.clone()
    }

    fn classes_of(&self, assignment: &[Value]) -> Result<Vec<ClassVal>> {
        if assignment.len() != self.len() {
            return Err(BayesNetError::Shape {
                expected: vec![self.len()],
                got: vec![assignment.len()],
            });
        }
        self.variables()
            .zip(assignment.iter())
            .map(|(var, v)| var.class_of(v))
            .collect()
    }

    /// Joint probability of a complete assignment, given in registration order.
    pub fn probability(&self, assignment: &[Value]) -> Result<f64> {
        Ok(self.probability_classes(&self.classes_of(assignment)?))
    }

    pub fn log_probability(&self, assignment: &[Value]) -> Result<f64> {
        Ok(self.probability(assignment)?.ln())
    }

    pub(crate) fn probability_classes(&self, classes: &[ClassVal]) -> f64 {
        self.nodes
            .values()
            .enumerate()
            .map(|(id, node)| {
                let parent_classes: Vec<ClassVal> =
                    self.parents[id].iter().map(|p| classes[*p]).collect();
                node.distribution.probability_of(&parent_classes, classes[id])
            })
            .product()
    }

    /// Draws `n` complete samples by ancestral sampling.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Dataset {
        let mut codes = Array2::<ClassVal>::zeros((n, self.len()));
        for mut row in codes.outer_iter_mut() {
            for &id in &self.topological_order {
                let parent_classes: Vec<ClassVal> =
                    self.parents[id].iter().map(|p| row[*p]).collect();
                let dist = &self.nodes[id].distribution;
                let card = dist.domain().len() as ClassVal;
                let u: f64 = rng.gen();
                let mut acc = 0.0;
                let mut class = card - 1;
                for c in 0..card {
                    acc += dist.probability_of(&parent_classes, c);
                    if u < acc {
                        class = c;
                        break;
                    }
                }
                row[id] = class;
            }
        }
        Dataset::from_codes(self.variables().cloned().collect(), codes)
            .expect("sampled classes are within their domains")
    }

    pub fn compile(&self) -> FactorGraph {
        crate::factor_graph::compile(self)
    }
}
