//! Structure learning and parameter fitting from categorical data.
//!
//! Rows with a missing cell are dropped before anything is estimated (listwise deletion).
//!
//! - `max_parents == 0`: independent roots.
//! - `max_parents == 1`: Chow-Liu tree. Maximum spanning tree of the pairwise mutual
//!   information (Prim's algorithm), edges oriented away from the root.
//! - `max_parents > 1`: greedy hill climbing over single edge additions, scored by the local
//!   (penalized) log-likelihood of the child.
//!
//! Ties are broken towards the lowest child index, then the lowest parent index. Tables are
//! fitted with additive smoothing.

use hytra::TrAdder;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use rayon::prelude::*;

use crate::dataset::Dataset;
use crate::distribution::CategoricalDistribution;
use crate::domain::Variable;
use crate::graph::{DependencyGraph, DependencyGraphBuilder, NodeDistribution};
use crate::information::pairwise_mutual_information;
use crate::table::{encode_config, ConditionalTable};
use crate::{BayesNetError, ClassVal, Config, Result, VarId};

/// Score differences below this are ties.
const TIE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    /// Maximum log-likelihood. Never decreases when a parent is added.
    LogLikelihood,
    /// Log-likelihood minus `ln(n)/2` per free parameter.
    Bic,
}

/// Root of the Chow-Liu tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootChoice {
    Index(VarId),
    /// Uniformly drawn from a generator seeded with this value.
    Seeded(u64),
}

#[derive(Debug, Clone)]
pub struct LearnConfig {
    pub max_parents: usize,
    /// Added to every count before normalizing a table.
    pub pseudocount: f64,
    pub score: Score,
    pub root: RootChoice,
    pub progress: Config,
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            max_parents: 1,
            pseudocount: 1.0,
            score: Score::Bic,
            root: RootChoice::Index(0),
            progress: Config::no_progress(),
        }
    }
}

impl LearnConfig {
    pub fn with_max_parents(max_parents: usize) -> Self {
        Self {
            max_parents,
            ..Self::default()
        }
    }
}

/// A learned network with its parent lists.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnedNetwork {
    pub graph: DependencyGraph,
    /// Parent indices of every node, in table order.
    pub structure: Vec<Vec<VarId>>,
}

#[derive(Debug, Clone)]
pub struct StructureLearner {
    config: LearnConfig,
}

/// Counts of `(parent configuration, child value)` over complete rows.
fn family_counts(
    data: ArrayView2<ClassVal>,
    child: VarId,
    parents: &[VarId],
    cards: &[usize],
) -> Array2<f64> {
    let parent_cards: Vec<usize> = parents.iter().map(|p| cards[*p]).collect();
    let n_configs = parent_cards.iter().product::<usize>();
    let mut counts = Array2::zeros((n_configs, cards[child]));
    let mut config = Vec::with_capacity(parents.len());
    for row in data.outer_iter() {
        config.clear();
        config.extend(parents.iter().map(|p| row[*p]));
        if let Some(i) = encode_config(&parent_cards, &config) {
            counts[(i, row[child] as usize)] += 1.0;
        }
    }
    counts
}

fn n_configs(parents: &[VarId], cards: &[usize]) -> usize {
    parents.iter().map(|p| cards[*p]).product()
}

/// Is `ancestor` equal to `node` or one of its ancestors?
fn is_ancestor(parents: &[Vec<VarId>], ancestor: VarId, node: VarId) -> bool {
    let mut stack = vec![node];
    let mut seen = vec![false; parents.len()];
    while let Some(v) = stack.pop() {
        if v == ancestor {
            return true;
        }
        if !std::mem::replace(&mut seen[v], true) {
            stack.extend(parents[v].iter().copied());
        }
    }
    false
}

impl StructureLearner {
    pub fn new(config: LearnConfig) -> Result<Self> {
        if !(config.pseudocount >= 0.0 && config.pseudocount.is_finite()) {
            return Err(BayesNetError::InvalidConfig(
                "pseudocount must be finite and >= 0".to_owned(),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &LearnConfig {
        &self.config
    }

    /// Learns a structure from `data` and fits its tables.
    pub fn learn(&self, data: &Dataset) -> Result<LearnedNetwork> {
        let complete = data.complete_rows();
        if complete.nrows() == 0 {
            return Err(BayesNetError::InsufficientData {
                rows: 0,
                required: 1,
            });
        }
        let cards: Vec<usize> = data.variables().iter().map(Variable::cardinality).collect();
        let structure = match self.config.max_parents {
            0 => vec![Vec::new(); cards.len()],
            1 => self.chow_liu(complete.view(), &cards)?,
            _ => self.greedy_search(complete.view(), &cards),
        };
        tracing::info!(
            rows = complete.nrows(),
            dropped = data.n_rows() - complete.nrows(),
            edges = structure.iter().map(Vec::len).sum::<usize>(),
            "structure learned"
        );
        self.fit_complete(data.variables(), complete.view(), structure)
    }

    /// Fits the tables of a given structure (parent indices of every node, in table order).
    pub fn fit(&self, data: &Dataset, structure: Vec<Vec<VarId>>) -> Result<LearnedNetwork> {
        self.fit_complete(data.variables(), data.complete_rows().view(), structure)
    }

    fn fit_complete(
        &self,
        variables: &[Variable],
        data: ArrayView2<ClassVal>,
        structure: Vec<Vec<VarId>>,
    ) -> Result<LearnedNetwork> {
        if structure.len() != variables.len() {
            return Err(BayesNetError::Shape {
                expected: vec![variables.len()],
                got: vec![structure.len()],
            });
        }
        let cards: Vec<usize> = variables.iter().map(Variable::cardinality).collect();
        if let Some(p) = structure.iter().flatten().find(|p| **p >= variables.len()) {
            return Err(BayesNetError::UnknownVariable(p.to_string()));
        }
        let required = structure
            .iter()
            .map(|parents| n_configs(parents, &cards))
            .max()
            .unwrap_or(1)
            .max(1);
        if data.nrows() < required {
            return Err(BayesNetError::InsufficientData {
                rows: data.nrows(),
                required,
            });
        }
        let mut builder = DependencyGraphBuilder::new();
        for (id, (var, parents)) in variables.iter().zip(structure.iter()).enumerate() {
            let mut probs = family_counts(data, id, parents, &cards);
            probs += self.config.pseudocount;
            for mut row in probs.axis_iter_mut(Axis(0)) {
                let sum = row.sum();
                if sum > 0.0 {
                    row /= sum;
                } else {
                    row.fill(1.0 / var.cardinality() as f64);
                }
            }
            let distribution: NodeDistribution = if parents.is_empty() {
                CategoricalDistribution::new(var.domain.clone(), probs.row(0).to_owned())?.into()
            } else {
                let parent_vars = parents.iter().map(|p| variables[*p].clone()).collect();
                ConditionalTable::new(parent_vars, var.domain.clone(), probs)?.into()
            };
            builder.add_node(var.name.clone(), distribution)?;
        }
        for (child, parents) in structure.iter().enumerate() {
            for parent in parents {
                builder.add_edge_ids(*parent, child)?;
            }
        }
        Ok(LearnedNetwork {
            graph: builder.finalize()?,
            structure,
        })
    }

    fn chow_liu(&self, data: ArrayView2<ClassVal>, cards: &[usize]) -> Result<Vec<Vec<VarId>>> {
        let n = cards.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let root = match self.config.root {
            RootChoice::Index(root) if root < n => root,
            RootChoice::Index(root) => return Err(BayesNetError::UnknownVariable(root.to_string())),
            RootChoice::Seeded(seed) => Xoshiro256StarStar::seed_from_u64(seed).gen_range(0..n),
        };
        let mi = pairwise_mutual_information(data, cards);
        let mut in_tree = vec![false; n];
        in_tree[root] = true;
        let mut parents = vec![Vec::new(); n];
        for _ in 1..n {
            let mut best: Option<(f64, VarId, VarId)> = None;
            for v in (0..n).filter(|v| !in_tree[*v]) {
                for u in (0..n).filter(|u| in_tree[*u]) {
                    let w = mi[(u, v)];
                    if best.map_or(true, |(bw, _, _)| w > bw + TIE_EPSILON) {
                        best = Some((w, u, v));
                    }
                }
            }
            let Some((w, u, v)) = best else {
                break;
            };
            tracing::debug!(parent = u, child = v, mutual_information = w, "chow-liu edge");
            parents[v].push(u);
            in_tree[v] = true;
        }
        Ok(parents)
    }

    /// Local score of `child` with the given parents.
    fn local_score(
        &self,
        data: ArrayView2<ClassVal>,
        child: VarId,
        parents: &[VarId],
        cards: &[usize],
    ) -> f64 {
        let counts = family_counts(data, child, parents, cards);
        let totals: Array1<f64> = counts.sum_axis(Axis(1));
        let mut ll = 0.0;
        for ((config, _), c) in counts.indexed_iter() {
            if *c > 0.0 {
                ll += c * (c / totals[config]).ln();
            }
        }
        match self.config.score {
            Score::LogLikelihood => ll,
            Score::Bic => {
                let n_params = (counts.nrows() * (cards[child] - 1)) as f64;
                ll - 0.5 * (data.nrows() as f64).ln() * n_params
            }
        }
    }

    fn greedy_search(&self, data: ArrayView2<ClassVal>, cards: &[usize]) -> Vec<Vec<VarId>> {
        let n = cards.len();
        let max_edges = (n * self.config.max_parents.min(n.saturating_sub(1))) as u64;
        crate::utils::with_progress(
            |it_cnt| self.greedy_search_internal(data, cards, it_cnt),
            max_edges,
            "Structure search",
            &self.config.progress,
        )
    }

    fn greedy_search_internal(
        &self,
        data: ArrayView2<ClassVal>,
        cards: &[usize],
        it_cnt: &TrAdder<u64>,
    ) -> Vec<Vec<VarId>> {
        let n = cards.len();
        let mut parents: Vec<Vec<VarId>> = vec![Vec::new(); n];
        let mut scores: Vec<f64> = (0..n)
            .map(|v| self.local_score(data, v, &[], cards))
            .collect();
        loop {
            let candidates: Vec<(VarId, VarId)> = (0..n)
                .filter(|c| parents[*c].len() < self.config.max_parents)
                .flat_map(|c| (0..n).map(move |p| (c, p)))
                .filter(|(c, p)| {
                    c != p
                        && !parents[*c].contains(p)
                        && !is_ancestor(&parents, *c, *p)
                        && n_configs(&parents[*c], cards) * cards[*p] <= data.nrows()
                })
                .collect();
            let gains: Vec<(f64, f64)> = candidates
                .par_iter()
                .map(|(c, p)| {
                    let mut family = parents[*c].clone();
                    family.push(*p);
                    let score = self.local_score(data, *c, &family, cards);
                    (score - scores[*c], score)
                })
                .collect();
            let mut best: Option<(f64, f64, VarId, VarId)> = None;
            for ((c, p), (gain, score)) in candidates.iter().zip(gains.iter()) {
                if *gain > TIE_EPSILON && best.map_or(true, |(bg, _, _, _)| *gain > bg + TIE_EPSILON)
                {
                    best = Some((*gain, *score, *c, *p));
                }
            }
            let Some((gain, score, c, p)) = best else {
                break;
            };
            tracing::debug!(parent = p, child = c, gain, "greedy edge");
            parents[c].push(p);
            scores[c] = score;
            it_cnt.inc(1);
        }
        for p in parents.iter_mut() {
            p.sort_unstable();
        }
        parents
    }
}

/// Learns a network from `data` with at most `max_parents` parents per node and the default
/// settings of [`LearnConfig`].
pub fn learn(data: &Dataset, max_parents: usize) -> Result<LearnedNetwork> {
    StructureLearner::new(LearnConfig::with_max_parents(max_parents))?.learn(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn family_counts_by_configuration() {
        let data = array![[0, 1, 1], [1, 1, 0], [1, 1, 0], [0, 0, 1]];
        let counts = family_counts(data.view(), 2, &[0, 1], &[2, 2, 2]);
        assert_eq!(counts.dim(), (4, 2));
        // (0, 1) -> 1
        assert_eq!(counts[(1, 1)], 1.0);
        // (1, 1) -> 0 twice
        assert_eq!(counts[(3, 0)], 2.0);
        assert_eq!(counts.sum(), 4.0);
    }

    #[test]
    fn ancestors() {
        let parents = vec![vec![], vec![0], vec![1]];
        assert!(is_ancestor(&parents, 0, 2));
        assert!(!is_ancestor(&parents, 2, 0));
    }

    #[test]
    fn invalid_pseudocount() {
        let config = LearnConfig {
            pseudocount: -1.0,
            ..LearnConfig::default()
        };
        assert!(matches!(
            StructureLearner::new(config),
            Err(BayesNetError::InvalidConfig(_))
        ));
    }
}
