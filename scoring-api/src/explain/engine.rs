//! Tree explainer - path-dependent TreeSHAP
//!
//! Exact Shapley values for tree ensembles, using the training covers of
//! each node as the background distribution. For every row the values add
//! up to the raw margin minus the expected value.

use std::sync::Arc;

use ndarray::Array2;
use thiserror::Error;

use super::types::{ExpectedValue, ShapOutput};
use crate::models::booster::{Booster, Node, Tree};

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("expected {expected} feature columns, got {got}")]
    FeatureCount { expected: usize, got: usize },
}

#[derive(Debug, Clone)]
pub struct TreeExplainer {
    booster: Arc<Booster>,
}

impl TreeExplainer {
    pub fn new(booster: Arc<Booster>) -> Self {
        Self { booster }
    }

    pub fn feature_names(&self) -> &[String] {
        &self.booster.feature_names
    }

    pub fn expected_value(&self) -> ExpectedValue {
        let expected = self.booster.expected_values();
        if expected.len() == 1 {
            ExpectedValue::Single(expected[0])
        } else {
            ExpectedValue::PerClass(expected)
        }
    }

    /// Attribution of every feature for every row of `x`
    pub fn shap_values(&self, x: &Array2<f64>) -> Result<ShapOutput, ExplainError> {
        let num_features = self.booster.num_features();
        if x.ncols() != num_features {
            return Err(ExplainError::FeatureCount {
                expected: num_features,
                got: x.ncols(),
            });
        }

        let outputs = self.booster.num_outputs;
        let mut per_output = vec![Array2::<f64>::zeros((x.nrows(), num_features)); outputs];

        for (i, row) in x.rows().into_iter().enumerate() {
            let row = row.to_vec();
            for (t, tree) in self.booster.trees.iter().enumerate() {
                let mut phi = vec![0.0; num_features];
                tree_shap(tree, &row, &mut phi);
                let mut target = per_output[t % outputs].row_mut(i);
                for (slot, contribution) in target.iter_mut().zip(phi) {
                    *slot += contribution;
                }
            }
        }

        if outputs == 1 {
            Ok(ShapOutput::Single(per_output.remove(0)))
        } else {
            Ok(ShapOutput::PerClass(per_output))
        }
    }
}

// ============================================================================
// TREESHAP
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

fn tree_shap(tree: &Tree, row: &[f64], phi: &mut [f64]) {
    let path = Vec::with_capacity(tree.max_depth() + 2);
    recurse(tree, 0, row, phi, path, 1.0, 1.0, None);
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &Tree,
    node: usize,
    row: &[f64],
    phi: &mut [f64],
    mut path: Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    extend(&mut path, zero_fraction, one_fraction, feature);

    match &tree.nodes[node] {
        Node::Leaf { value, .. } => {
            for i in 1..path.len() {
                let w = unwound_sum(&path, i);
                let el = path[i];
                if let Some(f) = el.feature {
                    phi[f] += w * (el.one_fraction - el.zero_fraction) * value;
                }
            }
        }
        Node::Split { feature: split, decision, left, right, cover } => {
            let value = row.get(*split).copied().unwrap_or(f64::NAN);
            let (hot, cold) = if decision.goes_left(value) {
                (*left, *right)
            } else {
                (*right, *left)
            };
            let fraction = |child: usize| {
                if *cover > 0.0 {
                    tree.nodes[child].cover() / cover
                } else {
                    0.5
                }
            };

            let mut incoming_zero = 1.0;
            let mut incoming_one = 1.0;
            if let Some(k) = path.iter().position(|e| e.feature == Some(*split)) {
                incoming_zero = path[k].zero_fraction;
                incoming_one = path[k].one_fraction;
                unwind(&mut path, k);
            }

            recurse(tree, hot, row, phi, path.clone(), fraction(hot) * incoming_zero, incoming_one, Some(*split));
            recurse(tree, cold, row, phi, path, fraction(cold) * incoming_zero, 0.0, Some(*split));
        }
    }
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / denom;
    }
}

fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].weight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one_portion * denom / ((i + 1) as f64 * one);
            next_one_portion = tmp - path[i].weight * zero * (depth - i) as f64 / denom;
        } else {
            path[i].weight = path[i].weight * denom / (zero * (depth - i) as f64);
        }
    }
    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Sum of the path weights once `index` is unwound, without mutating
fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let mut next_one_portion = path[depth].weight;
    let mut total = 0.0;

    if one != 0.0 {
        for i in (0..depth).rev() {
            let tmp = next_one_portion / ((i + 1) as f64 * one);
            total += tmp;
            next_one_portion = path[i].weight - tmp * zero * (depth - i) as f64;
        }
    } else if zero != 0.0 {
        for i in (0..depth).rev() {
            total += path[i].weight / (zero * (depth - i) as f64);
        }
    }
    total * (depth + 1) as f64
}
