//! Supervised models for failure prediction
//!
//! Three classifier families over standardized feature vectors: a bagged
//! decision-tree ensemble, gradient-boosted trees on logistic loss, and a
//! linear classifier trained by gradient descent. Trees split on variance
//! reduction, which for binary labels is proportional to Gini impurity, so
//! one builder serves both the forest and the boosted residual trees.
//!
//! All fitting is deterministic for a fixed seed.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Minimum variance treated as a splittable node
const MIN_VARIANCE: f64 = 1e-12;

/// Samples below which a node becomes a leaf
const MIN_SAMPLES_SPLIT: usize = 2;

/// A node in a regression/probability tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f32,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        value: f32,
    },
}

impl TreeNode {
    fn predict(&self, sample: &[f32]) -> f32 {
        match self {
            Self::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if sample[*feature] < *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
            Self::Leaf { value } => *value,
        }
    }
}

/// Single fitted decision tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: TreeNode,
}

impl DecisionTree {
    pub fn predict(&self, sample: &[f32]) -> f32 {
        self.root.predict(sample)
    }
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f32>],
    y: &'a [f32],
    max_depth: usize,
    /// Features considered per split; `None` means all
    features_per_split: Option<usize>,
    n_features: usize,
    /// Accumulated impurity decrease per feature, weighted by node size
    importance: Vec<f64>,
    n_total: usize,
}

impl<'a> TreeBuilder<'a> {
    fn new(x: &'a [Vec<f32>], y: &'a [f32], max_depth: usize, features_per_split: Option<usize>) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        Self {
            x,
            y,
            max_depth,
            features_per_split,
            n_features,
            importance: vec![0.0; n_features],
            n_total: x.len(),
        }
    }

    fn build(&mut self, indices: &[usize], depth: usize, rng: &mut StdRng) -> TreeNode {
        let n = indices.len();
        let mean = self.mean(indices);

        if depth >= self.max_depth || n < MIN_SAMPLES_SPLIT {
            return TreeNode::Leaf { value: mean };
        }

        let (sum, sum_sq) = self.totals(indices);
        let parent_sse = sum_sq - sum * sum / n as f64;
        if parent_sse < MIN_VARIANCE {
            return TreeNode::Leaf { value: mean };
        }

        let candidates = self.candidate_features(rng);
        let Some((feature, threshold, gain)) = self.best_split(indices, &candidates, sum, sum_sq)
        else {
            return TreeNode::Leaf { value: mean };
        };

        self.importance[feature] += gain / self.n_total as f64;

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| self.x[i][feature] < threshold);

        let left = Box::new(self.build(&left_idx, depth + 1, rng));
        let right = Box::new(self.build(&right_idx, depth + 1, rng));
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        }
    }

    fn candidate_features(&self, rng: &mut StdRng) -> Vec<usize> {
        match self.features_per_split {
            Some(k) if k < self.n_features => {
                let all: Vec<usize> = (0..self.n_features).collect();
                let mut chosen: Vec<usize> =
                    all.choose_multiple(rng, k).copied().collect();
                chosen.sort_unstable();
                chosen
            }
            _ => (0..self.n_features).collect(),
        }
    }

    /// Best (feature, threshold, sse-reduction) across candidate features
    fn best_split(
        &self,
        indices: &[usize],
        features: &[usize],
        sum: f64,
        sum_sq: f64,
    ) -> Option<(usize, f32, f64)> {
        let n = indices.len() as f64;
        let parent_sse = sum_sq - sum * sum / n;
        let mut best: Option<(usize, f32, f64)> = None;

        for &feature in features {
            let mut pairs: Vec<(f32, f64)> = indices
                .iter()
                .map(|&i| (self.x[i][feature], f64::from(self.y[i])))
                .collect();
            pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut left_sum = 0.0;
            let mut left_sum_sq = 0.0;
            for i in 0..pairs.len() - 1 {
                let target = pairs[i].1;
                left_sum += target;
                left_sum_sq += target * target;

                if pairs[i].0 == pairs[i + 1].0 {
                    continue;
                }

                let n_left = (i + 1) as f64;
                let n_right = n - n_left;
                let right_sum = sum - left_sum;
                let right_sum_sq = sum_sq - left_sum_sq;

                let sse = (left_sum_sq - left_sum * left_sum / n_left)
                    + (right_sum_sq - right_sum * right_sum / n_right);
                let gain = parent_sse - sse;

                if gain > MIN_VARIANCE && best.as_ref().is_none_or(|b| gain > b.2) {
                    let threshold = (pairs[i].0 + pairs[i + 1].0) / 2.0;
                    best = Some((feature, threshold, gain));
                }
            }
        }

        best
    }

    fn mean(&self, indices: &[usize]) -> f32 {
        if indices.is_empty() {
            return 0.0;
        }
        let sum: f64 = indices.iter().map(|&i| f64::from(self.y[i])).sum();
        (sum / indices.len() as f64) as f32
    }

    fn totals(&self, indices: &[usize]) -> (f64, f64) {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for &i in indices {
            let v = f64::from(self.y[i]);
            sum += v;
            sum_sq += v * v;
        }
        (sum, sum_sq)
    }
}

/// Bagged decision-tree ensemble
///
/// Each tree is grown on a bootstrap sample with sqrt-feature subsampling;
/// the predicted probability is the mean of the per-tree leaf values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    feature_importance: Vec<f32>,
    n_features: usize,
}

impl RandomForest {
    pub fn fit(x: &[Vec<f32>], y: &[f32], n_estimators: usize, max_depth: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = x.len();
        let n_features = x.first().map_or(0, Vec::len);
        let features_per_split = ((n_features as f64).sqrt().round() as usize).max(1);

        let mut trees = Vec::with_capacity(n_estimators);
        let mut importance = vec![0.0f64; n_features];

        for _ in 0..n_estimators {
            let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut builder = TreeBuilder::new(x, y, max_depth, Some(features_per_split));
            let root = builder.build(&indices, 0, &mut rng);
            for (total, tree) in importance.iter_mut().zip(&builder.importance) {
                *total += tree;
            }
            trees.push(DecisionTree { root });
        }

        Self {
            trees,
            feature_importance: normalize_importance(&importance),
            n_features,
        }
    }

    pub fn predict_proba(&self, sample: &[f32]) -> f32 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let sum: f32 = self.trees.iter().map(|t| t.predict(sample)).sum();
        (sum / self.trees.len() as f32).clamp(0.0, 1.0)
    }

    pub fn feature_importance(&self) -> &[f32] {
        &self.feature_importance
    }
}

/// Gradient-boosted trees on logistic loss
///
/// Stage m fits a shallow regression tree to the residual `y - sigmoid(F)`
/// and adds it with a fixed learning rate; the initial score is the log-odds
/// of the base failure rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    init_score: f32,
    learning_rate: f32,
    trees: Vec<DecisionTree>,
    feature_importance: Vec<f32>,
    n_features: usize,
}

impl GradientBoosting {
    pub fn fit(x: &[Vec<f32>], y: &[f32], n_estimators: usize, max_depth: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = x.len();
        let n_features = x.first().map_or(0, Vec::len);
        let learning_rate = 0.1f32;

        let base_rate = if n == 0 {
            0.5
        } else {
            (y.iter().map(|&v| f64::from(v)).sum::<f64>() / n as f64).clamp(1e-6, 1.0 - 1e-6)
        };
        let init_score = (base_rate / (1.0 - base_rate)).ln() as f32;

        let mut scores = vec![init_score; n];
        let all_indices: Vec<usize> = (0..n).collect();
        let mut trees = Vec::with_capacity(n_estimators);
        let mut importance = vec![0.0f64; n_features];

        for _ in 0..n_estimators {
            let residuals: Vec<f32> = y
                .iter()
                .zip(&scores)
                .map(|(&target, &score)| target - sigmoid(score))
                .collect();

            let mut builder = TreeBuilder::new(x, &residuals, max_depth, None);
            let root = builder.build(&all_indices, 0, &mut rng);
            for (total, tree) in importance.iter_mut().zip(&builder.importance) {
                *total += tree;
            }
            let tree = DecisionTree { root };

            for (score, row) in scores.iter_mut().zip(x) {
                *score += learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Self {
            init_score,
            learning_rate,
            trees,
            feature_importance: normalize_importance(&importance),
            n_features,
        }
    }

    pub fn predict_proba(&self, sample: &[f32]) -> f32 {
        let mut score = self.init_score;
        for tree in &self.trees {
            score += self.learning_rate * tree.predict(sample);
        }
        sigmoid(score).clamp(0.0, 1.0)
    }

    pub fn feature_importance(&self) -> &[f32] {
        &self.feature_importance
    }
}

/// Linear classifier trained by full-batch gradient descent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    weights: Vec<f32>,
    bias: f32,
}

impl LogisticModel {
    pub fn fit(x: &[Vec<f32>], y: &[f32], max_iter: usize) -> Self {
        let n = x.len();
        let n_features = x.first().map_or(0, Vec::len);
        let mut weights = vec![0.0f32; n_features];
        let mut bias = 0.0f32;

        if n == 0 {
            return Self { weights, bias };
        }

        let learning_rate = 0.1f32;
        for _ in 0..max_iter {
            let mut gradient = vec![0.0f32; n_features];
            let mut bias_gradient = 0.0f32;

            for (row, &target) in x.iter().zip(y) {
                let pred = sigmoid(dot(&weights, row) + bias);
                let error = pred - target;
                for (g, &value) in gradient.iter_mut().zip(row) {
                    *g += error * value;
                }
                bias_gradient += error;
            }

            let scale = learning_rate / n as f32;
            for (w, g) in weights.iter_mut().zip(&gradient) {
                *w -= scale * g;
            }
            bias -= scale * bias_gradient;
        }

        Self { weights, bias }
    }

    pub fn predict_proba(&self, sample: &[f32]) -> f32 {
        sigmoid(dot(&self.weights, sample) + self.bias).clamp(0.0, 1.0)
    }
}

/// Fitted classifier, dispatched by configured algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClassifierModel {
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    Logistic(LogisticModel),
}

impl ClassifierModel {
    pub fn predict_proba(&self, sample: &[f32]) -> f32 {
        match self {
            Self::RandomForest(model) => model.predict_proba(sample),
            Self::GradientBoosting(model) => model.predict_proba(sample),
            Self::Logistic(model) => model.predict_proba(sample),
        }
    }

    /// Per-feature importance, when the model family supports it
    pub fn feature_importance(&self) -> Option<&[f32]> {
        match self {
            Self::RandomForest(model) => Some(model.feature_importance()),
            Self::GradientBoosting(model) => Some(model.feature_importance()),
            Self::Logistic(_) => None,
        }
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

fn dot(weights: &[f32], sample: &[f32]) -> f32 {
    weights.iter().zip(sample).map(|(w, x)| w * x).sum()
}

/// Normalize accumulated importances to sum to 1
fn normalize_importance(raw: &[f64]) -> Vec<f32> {
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return vec![0.0; raw.len()];
    }
    raw.iter().map(|&v| (v / total) as f32).collect()
}
