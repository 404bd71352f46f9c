//! Random forest regression: bootstrap-sampled CART trees split on variance
//! reduction, predicting the mean of their leaves.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::ForestConfig;

/// A tabular regressor: fitted once, then queried read-only.
pub trait Regressor: Send + Sync {
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]);
    fn predict(&self, features: &[f64]) -> f64;

    fn predict_many(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict(row)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct TreeParams {
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl RegressionTree {
    fn fit(x: &[Vec<f64>], y: &[f64], indices: &mut [usize], params: TreeParams) -> Self {
        let mut tree = RegressionTree { nodes: Vec::new() };
        if !indices.is_empty() {
            tree.grow(x, y, indices, 0, params);
        }
        tree
    }

    fn grow(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        indices: &mut [usize],
        depth: usize,
        params: TreeParams,
    ) -> usize {
        let node_id = self.nodes.len();
        let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64;
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= params.max_depth || indices.len() < params.min_samples_split {
            return node_id;
        }
        let Some(split) = best_split(x, y, indices, params.min_samples_leaf) else {
            return node_id;
        };

        let mid = partition(indices, |i| x[i][split.feature] <= split.threshold);
        if mid == 0 || mid == indices.len() {
            return node_id;
        }
        let (left_idx, right_idx) = indices.split_at_mut(mid);
        let left = self.grow(x, y, left_idx, depth + 1, params);
        let right = self.grow(x, y, right_idx, depth + 1, params);
        self.nodes[node_id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_id
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut node = 0;
        loop {
            match self.nodes.get(node) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    node = if features[*feature] <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

/// Moves rows matching `pred` to the front; returns how many matched.
fn partition(indices: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for k in 0..indices.len() {
        if pred(indices[k]) {
            indices.swap(mid, k);
            mid += 1;
        }
    }
    mid
}

/// Split maximizing `sum_l²/n_l + sum_r²/n_r`, i.e. minimizing the summed
/// squared error of both children.
fn best_split(x: &[Vec<f64>], y: &[f64], indices: &[usize], min_leaf: usize) -> Option<BestSplit> {
    let n = indices.len();
    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let parent_score = total * total / n as f64;
    let tolerance = 1e-9 * parent_score.abs().max(1.0);
    let n_features = x[indices[0]].len();
    let min_leaf = min_leaf.max(1);

    let mut best: Option<BestSplit> = None;
    let mut column: Vec<(f64, f64)> = Vec::with_capacity(n);
    for feature in 0..n_features {
        column.clear();
        column.extend(indices.iter().map(|&i| (x[i][feature], y[i])));
        column.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += column[k - 1].1;
            if k < min_leaf || n - k < min_leaf || column[k - 1].0 == column[k].0 {
                continue;
            }
            let right_sum = total - left_sum;
            let score = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
            if score > parent_score + tolerance && best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(BestSplit {
                    feature,
                    threshold: (column[k - 1].0 + column[k].0) / 2.0,
                    score,
                });
            }
        }
    }
    best
}

/// Bagged regression trees; tree `i` samples with seed `seed + i`.
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    config: ForestConfig,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}

impl Regressor for RandomForestRegressor {
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) {
        let n = features.len().min(targets.len());
        if n == 0 {
            self.trees.clear();
            return;
        }
        let params = TreeParams {
            max_depth: self.config.max_depth,
            min_samples_split: self.config.min_samples_split.max(2),
            min_samples_leaf: self.config.min_samples_leaf,
        };
        let seed = self.config.seed;
        self.trees = (0..self.config.n_trees.max(1))
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let mut sample: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                RegressionTree::fit(features, targets, &mut sample, params)
            })
            .collect();
        log::debug!("fitted {} trees on {} rows", self.trees.len(), n);
    }

    fn predict(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(features)).sum::<f64>() / self.trees.len() as f64
    }
}
