use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};
use crate::neighborhood::DEFAULT_NUM_NEIGHBORS;

/// Which classifier scores the feature rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankerKind {
    #[default]
    Logreg,
    Gbdt,
}

/// Settings of the ranker. `learning_rate` is the step size of the logistic
/// regression and the shrinkage of the boosted trees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    pub model: RankerKind,
    pub learning_rate: f32,
    /// Gradient steps of the logistic regression.
    pub epochs: usize,
    pub l2: f32,
    /// Boosting rounds.
    pub n_estimators: usize,
    pub max_depth: usize,
    /// Share of feature rows held back to report validation AUC.
    pub validation_fraction: f32,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            model: RankerKind::Logreg,
            learning_rate: 0.1,
            epochs: 300,
            l2: 1e-4,
            n_estimators: 100,
            max_depth: 3,
            validation_fraction: 0.2,
        }
    }
}

/// Knobs of every pipeline stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Length of the final recommendation lists.
    pub top_k: usize,
    /// Rank of the truncated SVD.
    pub factors: usize,
    /// Power iterations of the randomized SVD.
    pub iterations: usize,
    pub seed: u64,
    /// Length of item-item and neighborhood candidate lists.
    pub candidate_top_k: usize,
    pub n_neighbors: usize,
    /// Most recent training interactions per user that expand candidates;
    /// zero turns the item-item expansion off.
    pub recent_window: usize,
    /// Item-item candidates taken from each recent item.
    pub item_item_expand: usize,
    /// Size of the popularity fallback pool.
    pub popular_fallback: usize,
    /// Zero lets rayon decide.
    pub num_threads: usize,
    pub ranker: RankerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            factors: 64,
            iterations: 7,
            seed: 42,
            candidate_top_k: 100,
            n_neighbors: DEFAULT_NUM_NEIGHBORS,
            recent_window: 5,
            item_item_expand: 20,
            popular_fallback: 50,
            num_threads: 0,
            ranker: RankerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn factors(mut self, factors: usize) -> Self {
        self.factors = factors;
        self
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn candidate_top_k(mut self, candidate_top_k: usize) -> Self {
        self.candidate_top_k = candidate_top_k;
        self
    }

    pub fn n_neighbors(mut self, n_neighbors: usize) -> Self {
        self.n_neighbors = n_neighbors;
        self
    }

    pub fn recent_window(mut self, recent_window: usize) -> Self {
        self.recent_window = recent_window;
        self
    }

    pub fn item_item_expand(mut self, item_item_expand: usize) -> Self {
        self.item_item_expand = item_item_expand;
        self
    }

    pub fn popular_fallback(mut self, popular_fallback: usize) -> Self {
        self.popular_fallback = popular_fallback;
        self
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn ranker(mut self, ranker: RankerConfig) -> Self {
        self.ranker = ranker;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("top_k", self.top_k),
            ("factors", self.factors),
            ("iterations", self.iterations),
            ("candidate_top_k", self.candidate_top_k),
            ("n_neighbors", self.n_neighbors),
            // an empty fallback can leave every candidate pool empty
            ("popular_fallback", self.popular_fallback),
            ("ranker.n_estimators", self.ranker.n_estimators),
            ("ranker.max_depth", self.ranker.max_depth),
        ];
        for (param, value) in positive {
            if value == 0 {
                return Err(RecError::invalid_config(param, value, "must be >= 1"));
            }
        }

        let lr = self.ranker.learning_rate;
        if !lr.is_finite() || lr <= 0.0 {
            return Err(RecError::invalid_config(
                "ranker.learning_rate",
                lr,
                "must be a positive finite number",
            ));
        }
        let l2 = self.ranker.l2;
        if !l2.is_finite() || l2 < 0.0 {
            return Err(RecError::invalid_config(
                "ranker.l2",
                l2,
                "must be a non-negative finite number",
            ));
        }
        let frac = self.ranker.validation_fraction;
        if !(0.0..1.0).contains(&frac) {
            return Err(RecError::invalid_config(
                "ranker.validation_fraction",
                frac,
                "must be in [0, 1)",
            ));
        }
        Ok(())
    }
}
