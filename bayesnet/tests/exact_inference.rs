use std::collections::VecDeque;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use bayesnet::{
    infer, BPConfig, BPState, CategoricalDistribution, ConditionalTable, DependencyGraph,
    DependencyGraphBuilder, Domain, Evidence, FactorGraph, Value, Variable,
};
use itertools::Itertools;
use ndarray::{Array1, Array2};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

fn random_weights<R: Rng>(rng: &mut R, n: usize) -> Array1<f64> {
    let w: Array1<f64> = (0..n).map(|_| rng.gen_range(0.05..1.0)).collect();
    let s = w.sum();
    w / s
}

/// Random network in which node `i > 0` has parents drawn among nodes `< i`.
///
/// With `max_parents == 1` the network is a tree.
fn random_network(seed: u64, n: usize, max_parents: usize) -> DependencyGraph {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let mut b = DependencyGraphBuilder::new();
    let mut vars: Vec<Variable> = Vec::new();
    for i in 0..n {
        let card = rng.gen_range(2..4);
        let domain = Domain::new(0..card as i64).unwrap();
        let n_parents = rng.gen_range(0..=max_parents.min(i));
        let parents: Vec<usize> = rand::seq::index::sample(&mut rng, i.max(1), n_parents)
            .into_iter()
            .sorted()
            .collect();
        let name = format!("x{i}");
        if parents.is_empty() {
            let dist = CategoricalDistribution::new(domain, random_weights(&mut rng, card)).unwrap();
            b.add_node(name.clone(), dist).unwrap();
        } else {
            let parent_vars: Vec<Variable> = parents.iter().map(|p| vars[*p].clone()).collect();
            let n_configs = parent_vars.iter().map(Variable::cardinality).product::<usize>();
            let mut probs = Array2::zeros((n_configs, card));
            for mut row in probs.outer_iter_mut() {
                row.assign(&random_weights(&mut rng, card));
            }
            let table = ConditionalTable::new(parent_vars, domain, probs).unwrap();
            b.add_node(name.clone(), table).unwrap();
            for p in &parents {
                b.add_edge_ids(*p, i).unwrap();
            }
        }
        vars.push(b.variable(&name).unwrap());
    }
    b.finalize().unwrap()
}

/// x0 -> x1 -> ... -> x(n-1), with random tables.
fn chain_network(seed: u64, n: usize) -> DependencyGraph {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let mut b = DependencyGraphBuilder::new();
    let domain = Domain::new(0..3i64).unwrap();
    let prior = CategoricalDistribution::new(domain.clone(), random_weights(&mut rng, 3)).unwrap();
    b.add_node("x0", prior).unwrap();
    for i in 1..n {
        let parent = b.variable(&format!("x{}", i - 1)).unwrap();
        let mut probs = Array2::zeros((3, 3));
        for mut row in probs.outer_iter_mut() {
            row.assign(&random_weights(&mut rng, 3));
        }
        let table = ConditionalTable::new(vec![parent], domain.clone(), probs).unwrap();
        b.add_node(format!("x{i}"), table).unwrap();
        b.add_edge_ids(i - 1, i).unwrap();
    }
    b.finalize().unwrap()
}

/// A root with `k` children.
fn star_network(seed: u64, k: usize) -> DependencyGraph {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let mut b = DependencyGraphBuilder::new();
    let prior = CategoricalDistribution::new(Domain::boolean(), random_weights(&mut rng, 2)).unwrap();
    b.add_node("root", prior).unwrap();
    for i in 1..=k {
        let mut probs = Array2::zeros((2, 2));
        for mut row in probs.outer_iter_mut() {
            row.assign(&random_weights(&mut rng, 2));
        }
        let table =
            ConditionalTable::new(vec![b.variable("root").unwrap()], Domain::boolean(), probs)
                .unwrap();
        b.add_node(format!("leaf{i}"), table).unwrap();
        b.add_edge_ids(0, i).unwrap();
    }
    b.finalize().unwrap()
}

/// Longest shortest path, in edges, between two connected nodes of the bipartite graph.
fn diameter(fg: &FactorGraph) -> usize {
    let nv = fg.n_vars();
    let n = nv + fg.n_factors();
    let mut adj = vec![Vec::new(); n];
    for f in 0..fg.n_factors() {
        for v in fg.scope(f) {
            adj[v].push(nv + f);
            adj[nv + f].push(v);
        }
    }
    (0..n)
        .map(|src| {
            let mut dist = vec![usize::MAX; n];
            dist[src] = 0;
            let mut queue = VecDeque::from([src]);
            let mut far = 0;
            while let Some(u) = queue.pop_front() {
                far = far.max(dist[u]);
                for &w in &adj[u] {
                    if dist[w] == usize::MAX {
                        dist[w] = dist[u] + 1;
                        queue.push_back(w);
                    }
                }
            }
            far
        })
        .max()
        .unwrap_or(0)
}

/// A sweep moves every message two edges further, one more sweep sees no change.
fn sweep_bound(fg: &FactorGraph) -> usize {
    diameter(fg).div_ceil(2) + 1
}

/// Marginals by summing the joint over every assignment consistent with the evidence.
fn enumerate(g: &DependencyGraph, evidence: &Evidence) -> Vec<Array1<f64>> {
    let domains: Vec<&Domain> = g.variables().map(|v| &v.domain).collect();
    let mut res: Vec<Array1<f64>> = domains.iter().map(|d| Array1::zeros(d.len())).collect();
    for classes in domains.iter().map(|d| 0..d.len()).multi_cartesian_product() {
        if evidence
            .iter()
            .any(|(var, c)| classes[var] != c as usize)
        {
            continue;
        }
        let assignment: Vec<Value> = classes
            .iter()
            .zip(domains.iter())
            .map(|(c, d)| d.values()[*c].clone())
            .collect();
        let p = g.probability(&assignment).unwrap();
        for (m, c) in res.iter_mut().zip(classes.iter()) {
            m[*c] += p;
        }
    }
    for m in res.iter_mut() {
        let s = m.sum();
        *m /= s;
    }
    res
}

fn check_against_enumeration(g: &DependencyGraph, evidence: &Evidence) {
    let fg = Arc::new(g.compile());
    assert!(!fg.is_cyclic());
    let res = infer(fg.clone(), evidence, 100, 1e-10).unwrap();
    assert!(res.converged);
    let bound = sweep_bound(&fg);
    assert!(res.iterations <= bound, "{} sweeps, bound {bound}", res.iterations);
    for (var, (post, exact)) in res.posteriors.iter().zip(enumerate(g, evidence)).enumerate() {
        match evidence.get(var) {
            Some(c) => assert_eq!(post.most_likely(), &g.variable(var).domain.values()[c as usize]),
            None => {
                let dist = post.distribution().unwrap();
                for (a, b) in dist.probabilities().iter().zip(exact.iter()) {
                    assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
                }
            }
        }
    }
}

#[test]
fn tree_matches_enumeration() {
    for seed in 0..5 {
        let g = random_network(seed, 6, 1);
        check_against_enumeration(&g, &Evidence::new());
        let mut evidence = Evidence::new();
        evidence.observe(5, 1);
        evidence.observe(2, 0);
        check_against_enumeration(&g, &evidence);
    }
}

#[test]
fn chain_needs_one_sweep_per_link() {
    for n in [2, 3, 6, 10] {
        let g = chain_network(n as u64, n);
        let fg = Arc::new(g.compile());
        assert_eq!(diameter(&fg), 2 * n - 1);
        let mut evidence = Evidence::new();
        evidence.observe(n - 1, 1);
        let res = infer(fg.clone(), &evidence, 100, 1e-12).unwrap();
        assert!(res.converged);
        assert_eq!(res.iterations, n + 1);
        assert_eq!(res.iterations, sweep_bound(&fg));
        if n <= 6 {
            check_against_enumeration(&g, &evidence);
        }
    }
}

#[test]
fn star_converges_in_three_sweeps() {
    for k in [2, 5, 8] {
        let g = star_network(k as u64, k);
        let fg = Arc::new(g.compile());
        assert_eq!(diameter(&fg), 4);
        let mut evidence = Evidence::new();
        evidence.observe(1, 0);
        let res = infer(fg.clone(), &evidence, 100, 1e-12).unwrap();
        assert!(res.converged);
        assert_eq!(res.iterations, 3);
        check_against_enumeration(&g, &evidence);
    }
}

#[test]
fn random_forests_within_diameter() {
    for seed in 10..20 {
        let g = random_network(seed, 8, 1);
        let mut evidence = Evidence::new();
        evidence.observe(seed as usize % 8, 0);
        check_against_enumeration(&g, &evidence);
    }
}

#[test]
fn root_only_network() {
    let g = random_network(3, 4, 0);
    let fg = Arc::new(g.compile());
    let res = infer(fg, &Evidence::new(), 100, 1e-10).unwrap();
    for (post, node) in res.posteriors.iter().zip(g.nodes()) {
        match &node.distribution {
            bayesnet::NodeDistribution::Root(d) => {
                assert_eq!(post.distribution().unwrap().domain(), d.domain());
                for (a, b) in post.distribution().unwrap().probabilities().iter().zip(d.probabilities()) {
                    assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
                }
            }
            bayesnet::NodeDistribution::Conditional(_) => unreachable!(),
        }
    }
}

#[test]
fn loopy_graph_reports_its_state() {
    let g = random_network(11, 7, 3);
    let fg = Arc::new(g.compile());
    let mut state = BPState::new(fg, Evidence::new()).unwrap();
    let res = state
        .run(&BPConfig {
            max_iterations: 3,
            tolerance: 1e-300,
        })
        .unwrap();
    assert!(res.iterations <= 3);
    assert_eq!(state.iterations(), res.iterations);
    if !res.converged {
        assert_eq!(res.iterations, 3);
        let warning = res.warning().unwrap();
        assert_eq!(warning.iterations, 3);
        assert_eq!(warning.max_delta, res.max_delta);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn posteriors_are_normalized_and_reproducible(
        seed in any::<u64>(),
        n in 2usize..7,
        max_parents in 1usize..3,
        observed in proptest::option::of(0usize..7),
    ) {
        let g = random_network(seed, n, max_parents);
        let fg = Arc::new(g.compile());
        let mut evidence = Evidence::new();
        if let Some(var) = observed.filter(|v| *v < n) {
            evidence.observe(var, 0);
        }
        let a = infer(fg.clone(), &evidence, 50, 1e-9).unwrap();
        let b = infer(fg, &evidence, 50, 1e-9).unwrap();
        prop_assert_eq!(&a, &b);
        for post in &a.posteriors {
            if let Some(d) = post.distribution() {
                prop_assert!((d.probabilities().sum() - 1.0).abs() < 1e-6);
                prop_assert!(d.probabilities().iter().all(|p| (0.0..=1.0 + 1e-12).contains(p)));
            }
        }
    }

    #[test]
    fn compile_is_reproducible(seed in any::<u64>(), n in 1usize..6) {
        let g = random_network(seed, n, 2);
        prop_assert_eq!(g.compile(), g.compile());
    }
}
