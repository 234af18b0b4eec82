//! Discrete Bayesian networks: construction, compilation to factor graphs, loopy belief
//! propagation and structure learning from categorical data.
//!
//! Typical flow:
//! - build a [`DependencyGraph`] through [`DependencyGraphBuilder`] (or learn one with
//!   [`structure::StructureLearner`]),
//! - compile it with [`factor_graph::compile`],
//! - run [`belief_propagation::infer`] with some [`Evidence`].

pub mod belief_propagation;
pub mod dataset;
pub mod distribution;
pub mod domain;
pub mod evidence;
pub mod factor_graph;
pub mod graph;
pub mod information;
pub mod structure;
pub mod table;
pub(crate) mod utils;

/// Index of a value in a variable domain.
pub type ClassVal = u32;
/// Index of a variable, equal to its registration order in the graph.
pub type VarId = usize;

type NamedList<T> = indexmap::IndexMap<String, T>;

/// Tolerance on the sum of a probability vector.
pub const NORMALIZATION_TOLERANCE: f64 = 1e-6;

pub use belief_propagation::{infer, predict, BPConfig, BPState, ConvergenceWarning, Inference, Posterior};
pub use dataset::{Dataset, MISSING};
pub use distribution::CategoricalDistribution;
pub use domain::{Domain, Value, Variable};
pub use evidence::Evidence;
pub use factor_graph::{compile, FactorGraph};
pub use graph::{DependencyGraph, DependencyGraphBuilder, Node, NodeDistribution, StructureError};
pub use structure::{learn, LearnConfig, LearnedNetwork, RootChoice, Score, StructureLearner};
pub use table::ConditionalTable;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BayesNetError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BayesNetError {
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error("Value {value} is not in the domain of {variable}.")]
    Domain { value: String, variable: String },
    #[error("Value {value} is not in the domain [{domain}].")]
    DomainValue { value: String, domain: String },
    #[error("No table entry for parent values ({0}).")]
    Lookup(String),
    #[error("Probabilities sum to {sum} (expected 1.0).")]
    NotNormalized { sum: f64 },
    #[error("Invalid probability {0}, must be in [0, 1].")]
    InvalidProbability(f64),
    #[error("Empty domain.")]
    EmptyDomain,
    #[error("Value {0} appears twice in a domain.")]
    DuplicateValue(String),
    #[error("Incorrect shape: expected {expected:?}, got {got:?}.")]
    Shape {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("No variable named {0}.")]
    UnknownVariable(String),
    #[error(
        "Not enough data: {rows} usable rows, at least {required} needed to estimate every table."
    )]
    InsufficientData { rows: usize, required: usize },
    #[error("Evidence has zero probability under the model.")]
    InconsistentEvidence,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Show a progress bar for long computations.
    pub show_progress: bool,
    /// Computation time after which a progress bar is displayed.
    /// This avoids showing progress bars for negligible amounts of time.
    pub progress_min_time: std::time::Duration,
}

impl Config {
    pub fn with_default_timing() -> Self {
        Self {
            show_progress: true,
            progress_min_time: std::time::Duration::from_millis(500),
        }
    }
    pub fn no_progress() -> Self {
        Self {
            show_progress: false,
            ..Self::with_default_timing()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_default_timing()
    }
}
