//! Information measures estimated from empirical counts.
//!
//! All quantities are in nats.

use itertools::Itertools;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use crate::dataset::MISSING;
use crate::ClassVal;

/// Entropy of a probability vector.
pub fn entropy(probs: ArrayView1<f64>) -> f64 {
    -probs
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| p * p.ln())
        .sum::<f64>()
}

/// Co-occurrences of the values of columns `i` and `j` in `data`.
///
/// Rows where either cell is [`MISSING`] are skipped.
pub fn joint_counts(
    data: ArrayView2<ClassVal>,
    (i, card_i): (usize, usize),
    (j, card_j): (usize, usize),
) -> Array2<f64> {
    let mut res = Array2::zeros((card_i, card_j));
    for row in data.outer_iter() {
        if row[i] != MISSING && row[j] != MISSING {
            res[(row[i] as usize, row[j] as usize)] += 1.0;
        }
    }
    res
}

/// Mutual information of the two variables of a joint count table.
pub fn mutual_information(joint: ArrayView2<f64>) -> f64 {
    let n = joint.sum();
    if n <= 0.0 {
        return 0.0;
    }
    let row = joint.sum_axis(Axis(1));
    let col = joint.sum_axis(Axis(0));
    let mut mi: f64 = 0.0;
    for ((x, y), c) in joint.indexed_iter() {
        if *c > 0.0 {
            mi += c / n * (c * n / (row[x] * col[y])).ln();
        }
    }
    // Rounding can give tiny negative values for independent columns.
    mi.max(0.0)
}

/// Symmetric matrix of the mutual information between every pair of columns of a complete
/// data matrix.
pub fn pairwise_mutual_information(data: ArrayView2<ClassVal>, cards: &[usize]) -> Array2<f64> {
    let n = cards.len();
    let pairs: Vec<(usize, usize)> = (0..n).tuple_combinations().collect();
    let values: Vec<f64> = pairs
        .par_iter()
        .map(|(i, j)| {
            mutual_information(joint_counts(data, (*i, cards[*i]), (*j, cards[*j])).view())
        })
        .collect();
    let mut res = Array2::zeros((n, n));
    for ((i, j), mi) in pairs.into_iter().zip(values.into_iter()) {
        res[(i, j)] = mi;
        res[(j, i)] = mi;
    }
    res
}
