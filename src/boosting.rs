//! Gradient-boosted regression trees on the log loss.
//!
//! Every round fits a depth-limited least-squares tree to the residuals
//! `y - p` and sets each leaf to the Newton step `sum(r) / sum(p (1 - p))`.

use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::RankerConfig;
use crate::error::{RecError, Result};
use crate::features::N_FEATURES;
use crate::ranker::{Scorer, TrainableScorer};

const MIN_GAIN: f64 = 1e-12;
const MAX_LOG_ODDS: f32 = 5.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f32,
    },
    Split {
        feature: usize,
        threshold: f32,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn predict(&self, x: &[f32; N_FEATURES]) -> f32 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Additive ensemble in log-odds space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    pub init: f32,
    pub learning_rate: f32,
    pub trees: Vec<TreeNode>,
}

impl BoostedTrees {
    pub fn raw_score(&self, x: &[f32; N_FEATURES]) -> f32 {
        self.init
            + self.learning_rate * self.trees.iter().map(|t| t.predict(x)).sum::<f32>()
    }

    pub fn predict_proba(&self, x: &[f32; N_FEATURES]) -> f32 {
        sigmoid(self.raw_score(x))
    }
}

impl Scorer for BoostedTrees {
    fn score(&self, features: &[[f32; N_FEATURES]]) -> Vec<f32> {
        features.par_iter().map(|x| self.predict_proba(x)).collect()
    }
}

#[inline]
fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

#[derive(Clone, Debug)]
pub struct GradientBoosting {
    pub n_estimators: usize,
    pub learning_rate: f32,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl GradientBoosting {
    pub fn from_config(config: &RankerConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            learning_rate: config.learning_rate,
            max_depth: config.max_depth,
            min_samples_leaf: 1,
        }
    }
}

impl Default for GradientBoosting {
    fn default() -> Self {
        Self::from_config(&RankerConfig::default())
    }
}

struct BestSplit {
    feature: usize,
    threshold: f32,
    gain: f64,
}

/// Residuals and hessians of one boosting round.
struct Round<'a> {
    x: &'a [[f32; N_FEATURES]],
    residual: &'a [f64],
    hessian: &'a [f64],
    max_depth: usize,
    min_samples_leaf: usize,
}

impl Round<'_> {
    fn leaf(&self, rows: &[usize]) -> TreeNode {
        let r: f64 = rows.iter().map(|&i| self.residual[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hessian[i]).sum();
        let value = if h < 1e-12 { 0.0 } else { (r / h) as f32 };
        TreeNode::Leaf { value }
    }

    /// Best least-squares split over all features. Ties keep the first
    /// feature and the lowest threshold.
    fn best_split(&self, rows: &[usize]) -> Option<BestSplit> {
        let n = rows.len();
        let total: f64 = rows.iter().map(|&i| self.residual[i]).sum();
        let parent = total * total / n as f64;
        let mut best: Option<BestSplit> = None;

        for feature in 0..N_FEATURES {
            let mut sorted = rows.to_vec();
            sorted.sort_by(|&a, &b| {
                self.x[a][feature]
                    .total_cmp(&self.x[b][feature])
                    .then(a.cmp(&b))
            });
            let mut left_sum = 0.0f64;
            for pos in 0..n - 1 {
                left_sum += self.residual[sorted[pos]];
                let n_left = pos + 1;
                let (lo, hi) = (self.x[sorted[pos]][feature], self.x[sorted[pos + 1]][feature]);
                if lo == hi || n_left < self.min_samples_leaf || n - n_left < self.min_samples_leaf {
                    continue;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / n_left as f64
                    + right_sum * right_sum / (n - n_left) as f64
                    - parent;
                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mid = lo + (hi - lo) / 2.0;
                    best = Some(BestSplit {
                        feature,
                        // adjacent floats: the midpoint may round up to `hi`
                        threshold: if mid < hi { mid } else { lo },
                        gain,
                    });
                }
            }
        }
        best
    }

    fn grow(&self, rows: &[usize], depth: usize) -> TreeNode {
        if depth >= self.max_depth || rows.len() < 2 * self.min_samples_leaf.max(1) {
            return self.leaf(rows);
        }
        let Some(split) = self.best_split(rows) else {
            return self.leaf(rows);
        };
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&i| self.x[i][split.feature] <= split.threshold);
        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.grow(&left, depth + 1)),
            right: Box::new(self.grow(&right, depth + 1)),
        }
    }
}

impl TrainableScorer for GradientBoosting {
    type Model = BoostedTrees;

    fn train(&self, features: &[[f32; N_FEATURES]], labels: &[bool]) -> Result<BoostedTrees> {
        if features.len() != labels.len() {
            return Err(RecError::DimensionMismatch {
                expected: format!("{} labels", features.len()),
                actual: labels.len().to_string(),
            });
        }
        if features.is_empty() {
            return Err(RecError::EmptyInput);
        }

        let start = Instant::now();
        let n = features.len();
        let y: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        let p = y.iter().sum::<f64>() / n as f64;
        let init = if p <= 0.0 {
            -MAX_LOG_ODDS
        } else if p >= 1.0 {
            MAX_LOG_ODDS
        } else {
            (p / (1.0 - p)).ln() as f32
        };

        let mut model = BoostedTrees {
            init,
            learning_rate: self.learning_rate,
            trees: Vec::with_capacity(self.n_estimators),
        };
        let mut raw = vec![init; n];
        let rows: Vec<usize> = (0..n).collect();

        for _ in 0..self.n_estimators {
            let prob: Vec<f64> = raw.iter().map(|&z| sigmoid(z) as f64).collect();
            let residual: Vec<f64> = y.iter().zip(&prob).map(|(y, p)| y - p).collect();
            let hessian: Vec<f64> = prob.iter().map(|p| p * (1.0 - p)).collect();
            let round = Round {
                x: features,
                residual: &residual,
                hessian: &hessian,
                max_depth: self.max_depth,
                min_samples_leaf: self.min_samples_leaf,
            };
            let tree = round.grow(&rows, 0);
            for (z, x) in raw.iter_mut().zip(features) {
                *z += self.learning_rate * tree.predict(x);
            }
            model.trees.push(tree);
        }

        tracing::debug!(
            n_trees = model.trees.len(),
            init = model.init,
            "fitted boosted trees on {n} rows in {:.4?}",
            start.elapsed()
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::roc_auc;

    #[test]
    fn test_single_split_finds_threshold() -> Result<()> {
        let features = [[1.0, 0.0], [2.0, 0.0], [10.0, 0.0], [11.0, 0.0]];
        let labels = [false, false, true, true];
        let trainer = GradientBoosting {
            n_estimators: 1,
            learning_rate: 1.0,
            max_depth: 1,
            min_samples_leaf: 1,
        };
        let model = trainer.train(&features, &labels)?;
        match &model.trees[0] {
            TreeNode::Split {
                feature, threshold, ..
            } => {
                assert_eq!(*feature, 0);
                assert!((threshold - 6.0).abs() < 1e-6);
            }
            leaf => panic!("expected a split, got {leaf:?}"),
        }
        let scores = model.score(&features);
        assert!(scores[0] < 0.5 && scores[3] > 0.5);
        Ok(())
    }

    #[test]
    fn test_depth_is_bounded() -> Result<()> {
        let features: Vec<[f32; N_FEATURES]> =
            (0..40).map(|i| [i as f32, (i % 2) as f32]).collect();
        let labels: Vec<bool> = (0..40).map(|i| (i / 5) % 2 == 0).collect();
        let trainer = GradientBoosting {
            n_estimators: 5,
            max_depth: 2,
            ..GradientBoosting::default()
        };
        let model = trainer.train(&features, &labels)?;
        assert_eq!(model.trees.len(), 5);
        assert!(model.trees.iter().all(|t| t.depth() <= 2));
        assert!(roc_auc(&labels, &model.score(&features)) > 0.5);
        Ok(())
    }

    #[test]
    fn test_single_class_is_constant() -> Result<()> {
        let model = GradientBoosting::default().train(&[[1.0, 0.0], [2.0, 1.0]], &[false, false])?;
        let scores = model.score(&[[1.0, 0.0], [2.0, 1.0]]);
        assert_eq!(scores[0], scores[1]);
        assert!(scores[0] < 0.01);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_input() {
        let trainer = GradientBoosting::default();
        assert!(matches!(
            trainer.train(&[[1.0, 0.0]], &[]),
            Err(RecError::DimensionMismatch { .. })
        ));
        assert!(matches!(trainer.train(&[], &[]), Err(RecError::EmptyInput)));
    }
}
