use std::time::Instant;

use fxhash::FxHashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::boosting::{BoostedTrees, GradientBoosting};
use crate::config::{RankerConfig, RankerKind};
use crate::error::{RecError, Result};
use crate::evaluation::roc_auc;
use crate::features::{FeatureTable, N_FEATURES};
use crate::ids::{ExternalId, IdMap};
use crate::recommendations::Recommendations;
use crate::utils::{pad_to, top_k_scored};

/// Anything that turns a feature row into a probability.
pub trait Scorer {
    fn score(&self, features: &[[f32; N_FEATURES]]) -> Vec<f32>;
}

/// A classifier that can be fitted on labeled feature rows.
pub trait TrainableScorer {
    type Model: Scorer;

    fn train(&self, features: &[[f32; N_FEATURES]], labels: &[bool]) -> Result<Self::Model>;
}

/// Linear model on standardized features.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: [f32; N_FEATURES],
    pub bias: f32,
    pub mean: [f32; N_FEATURES],
    pub scale: [f32; N_FEATURES],
}

#[inline]
fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

impl LogisticModel {
    fn standardize(&self, x: &[f32; N_FEATURES]) -> [f32; N_FEATURES] {
        let mut z = [0.0; N_FEATURES];
        for j in 0..N_FEATURES {
            z[j] = (x[j] - self.mean[j]) / self.scale[j];
        }
        z
    }

    pub fn predict_proba(&self, x: &[f32; N_FEATURES]) -> f32 {
        let z = self.standardize(x);
        let logit: f32 = self
            .weights
            .iter()
            .zip(z.iter())
            .map(|(w, v)| w * v)
            .sum::<f32>()
            + self.bias;
        sigmoid(logit)
    }
}

impl Scorer for LogisticModel {
    fn score(&self, features: &[[f32; N_FEATURES]]) -> Vec<f32> {
        features.par_iter().map(|x| self.predict_proba(x)).collect()
    }
}

/// Full-batch gradient descent on the L2-regularized log loss.
#[derive(Clone, Debug)]
pub struct LogisticRegression {
    pub learning_rate: f32,
    pub epochs: usize,
    pub l2: f32,
}

impl LogisticRegression {
    pub fn from_config(config: &RankerConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            epochs: config.epochs,
            l2: config.l2,
        }
    }
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::from_config(&RankerConfig::default())
    }
}

fn column_stats(features: &[[f32; N_FEATURES]]) -> ([f32; N_FEATURES], [f32; N_FEATURES]) {
    let n = features.len().max(1) as f32;
    let mut mean = [0.0f32; N_FEATURES];
    let mut scale = [0.0f32; N_FEATURES];
    for x in features {
        for j in 0..N_FEATURES {
            mean[j] += x[j] / n;
        }
    }
    for x in features {
        for j in 0..N_FEATURES {
            scale[j] += (x[j] - mean[j]).powi(2) / n;
        }
    }
    for s in scale.iter_mut() {
        *s = s.sqrt();
        // constant column
        if *s < 1e-12 {
            *s = 1.0;
        }
    }
    (mean, scale)
}

impl TrainableScorer for LogisticRegression {
    type Model = LogisticModel;

    fn train(&self, features: &[[f32; N_FEATURES]], labels: &[bool]) -> Result<LogisticModel> {
        if features.len() != labels.len() {
            return Err(RecError::DimensionMismatch {
                expected: format!("{} labels", features.len()),
                actual: labels.len().to_string(),
            });
        }
        if features.is_empty() {
            return Err(RecError::EmptyInput);
        }

        let (mean, scale) = column_stats(features);
        let mut model = LogisticModel {
            weights: [0.0; N_FEATURES],
            bias: 0.0,
            mean,
            scale,
        };
        let standardized: Vec<[f32; N_FEATURES]> =
            features.iter().map(|x| model.standardize(x)).collect();
        let n = features.len() as f32;

        for _ in 0..self.epochs {
            let mut grad_w = [0.0f32; N_FEATURES];
            let mut grad_b = 0.0f32;
            for (z, &y) in standardized.iter().zip(labels) {
                let logit: f32 = model
                    .weights
                    .iter()
                    .zip(z.iter())
                    .map(|(w, v)| w * v)
                    .sum::<f32>()
                    + model.bias;
                let err = sigmoid(logit) - if y { 1.0 } else { 0.0 };
                for j in 0..N_FEATURES {
                    grad_w[j] += err * z[j];
                }
                grad_b += err;
            }
            for j in 0..N_FEATURES {
                let g = grad_w[j] / n + self.l2 * model.weights[j];
                model.weights[j] -= self.learning_rate * g;
            }
            model.bias -= self.learning_rate * grad_b / n;
        }

        tracing::debug!(
            weights = ?model.weights,
            bias = model.bias,
            "fitted logistic model on {} rows",
            features.len()
        );
        Ok(model)
    }
}

/// Trainer picked by `RankerConfig::model`.
#[derive(Clone, Debug)]
pub enum Ranker {
    Logistic(LogisticRegression),
    Boosted(GradientBoosting),
}

impl Ranker {
    pub fn from_config(config: &RankerConfig) -> Self {
        match config.model {
            RankerKind::Logreg => Ranker::Logistic(LogisticRegression::from_config(config)),
            RankerKind::Gbdt => Ranker::Boosted(GradientBoosting::from_config(config)),
        }
    }
}

/// A trained ranker of either kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RankerModel {
    Logistic(LogisticModel),
    Boosted(BoostedTrees),
}

impl Scorer for RankerModel {
    fn score(&self, features: &[[f32; N_FEATURES]]) -> Vec<f32> {
        match self {
            RankerModel::Logistic(m) => m.score(features),
            RankerModel::Boosted(m) => m.score(features),
        }
    }
}

impl TrainableScorer for Ranker {
    type Model = RankerModel;

    fn train(&self, features: &[[f32; N_FEATURES]], labels: &[bool]) -> Result<RankerModel> {
        match self {
            Ranker::Logistic(t) => t.train(features, labels).map(RankerModel::Logistic),
            Ranker::Boosted(t) => t.train(features, labels).map(RankerModel::Boosted),
        }
    }
}

/// Stratified, seeded split of row indices into (train, validation).
pub fn stratified_split(labels: &[bool], fraction: f32, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut valid = Vec::new();
    for class in [false, true] {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        idx.shuffle(&mut rng);
        let n_valid = (idx.len() as f32 * fraction).round() as usize;
        // keep at least one row of the class for training
        let n_valid = n_valid.min(idx.len().saturating_sub(1));
        valid.extend_from_slice(&idx[..n_valid]);
        train.extend_from_slice(&idx[n_valid..]);
    }
    train.sort_unstable();
    valid.sort_unstable();
    (train, valid)
}

/// Train on a stratified share of the table and report validation AUC.
pub fn train_with_validation<T: TrainableScorer>(
    trainer: &T,
    table: &FeatureTable,
    validation_fraction: f32,
    seed: u64,
) -> Result<(T::Model, f64)> {
    let start = Instant::now();
    let features = table.feature_matrix();
    let labels = table.labels();
    let (train_idx, valid_idx) = stratified_split(&labels, validation_fraction, seed);

    let pick_x = |idx: &[usize]| idx.iter().map(|&i| features[i]).collect::<Vec<_>>();
    let pick_y = |idx: &[usize]| idx.iter().map(|&i| labels[i]).collect::<Vec<_>>();

    let model = trainer.train(&pick_x(&train_idx), &pick_y(&train_idx))?;
    let auc = if valid_idx.is_empty() {
        0.5
    } else {
        roc_auc(&pick_y(&valid_idx), &model.score(&pick_x(&valid_idx)))
    };

    tracing::info!(
        n_train = train_idx.len(),
        n_valid = valid_idx.len(),
        auc,
        "trained ranker in {:.4?}",
        start.elapsed()
    );
    Ok((model, auc))
}

/// Per-user top-`k` lists from scored feature rows.
///
/// Users with fewer than `k` candidates get their best candidate repeated;
/// users without candidates get item 0.
pub fn rank_features<S: Scorer>(
    model: &S,
    table: &FeatureTable,
    n_users: usize,
    k: usize,
) -> Recommendations {
    let scores = model.score(&table.feature_matrix());
    let mut by_user: Vec<Vec<(u32, f32)>> = vec![Vec::new(); n_users];
    for (row, score) in table.rows().iter().zip(scores) {
        if let Some(scored) = by_user.get_mut(row.user_id as usize) {
            scored.push((row.item_id, score));
        }
    }

    let lists: Vec<Vec<u32>> = by_user
        .into_par_iter()
        .map(|scored| {
            let top = top_k_scored(scored, k);
            let filler = top.first().copied().unwrap_or(0);
            pad_to(top, k, filler)
        })
        .collect();
    Recommendations::new(lists)
}

/// Query side of a trained ranker: scores are computed once, queries are
/// answered by external id.
pub struct RankingService {
    users: IdMap,
    items: IdMap,
    // per user index, items sorted by descending probability
    ranked: FxHashMap<u32, Vec<u32>>,
}

impl RankingService {
    pub fn new<S: Scorer>(model: &S, table: &FeatureTable, users: IdMap, items: IdMap) -> Self {
        let scores = model.score(&table.feature_matrix());
        let mut scored: FxHashMap<u32, Vec<(u32, f32)>> = FxHashMap::default();
        for (row, score) in table.rows().iter().zip(scores) {
            scored
                .entry(row.user_id)
                .or_default()
                .push((row.item_id, score));
        }
        let ranked = scored
            .into_iter()
            .map(|(u, s)| {
                let n = s.len();
                (u, top_k_scored(s, n))
            })
            .collect();
        Self {
            users,
            items,
            ranked,
        }
    }

    /// Up to `k` external item ids; empty for unknown users.
    pub fn recommend(&self, user_id: &ExternalId, k: usize) -> Vec<ExternalId> {
        let Some(user) = self.users.resolve(user_id) else {
            tracing::debug!("unknown user {user_id}");
            return Vec::new();
        };
        self.ranked
            .get(&user)
            .map(|items| {
                items
                    .iter()
                    .take(k)
                    .filter_map(|&i| self.items.id(i).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureRow;

    fn row(user_id: u32, item_id: u32, item_pop: u32, is_recent: u8, label: u8) -> FeatureRow {
        FeatureRow {
            user_id,
            item_id,
            item_pop,
            is_recent,
            label,
        }
    }

    fn table() -> FeatureTable {
        // positives are popular, negatives are not
        let mut rows = Vec::new();
        for u in 0..10u32 {
            rows.push(row(u, 0, 50 + u, 0, 1));
            rows.push(row(u, 1, 2, 0, 0));
            rows.push(row(u, 2, 1 + u % 3, 1, 0));
        }
        FeatureTable::new(rows)
    }

    struct PopularityScorer;

    impl Scorer for PopularityScorer {
        fn score(&self, features: &[[f32; N_FEATURES]]) -> Vec<f32> {
            features.iter().map(|x| x[0]).collect()
        }
    }

    #[test]
    fn test_logistic_regression_separates_classes() -> Result<()> {
        let table = table();
        let model = LogisticRegression::default().train(&table.feature_matrix(), &table.labels())?;
        let scores = model.score(&table.feature_matrix());
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!((roc_auc(&table.labels(), &scores) - 1.0).abs() < 1e-9);
        assert!(model.weights[0] > 0.0);
        Ok(())
    }

    #[test]
    fn test_train_rejects_bad_input() {
        let trainer = LogisticRegression::default();
        assert!(matches!(
            trainer.train(&[[1.0, 0.0]], &[true, false]),
            Err(RecError::DimensionMismatch { .. })
        ));
        assert!(matches!(trainer.train(&[], &[]), Err(RecError::EmptyInput)));
    }

    #[test]
    fn test_boosted_trees_separate_classes() -> Result<()> {
        let table = table();
        let trainer = Ranker::from_config(&RankerConfig {
            model: RankerKind::Gbdt,
            ..RankerConfig::default()
        });
        assert!(matches!(trainer, Ranker::Boosted(_)));
        let model = trainer.train(&table.feature_matrix(), &table.labels())?;
        assert!(matches!(model, RankerModel::Boosted(_)));
        let scores = model.score(&table.feature_matrix());
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!((roc_auc(&table.labels(), &scores) - 1.0).abs() < 1e-9);

        let (_, auc) = train_with_validation(&trainer, &table, 0.2, 7)?;
        assert!((auc - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_stratified_split() {
        let labels: Vec<bool> = (0..20).map(|i| i % 4 == 0).collect();
        let (train, valid) = stratified_split(&labels, 0.2, 42);
        assert_eq!(train.len() + valid.len(), 20);
        let valid_pos = valid.iter().filter(|&&i| labels[i]).count();
        assert_eq!(valid_pos, 1);
        assert_eq!(valid.len(), 4);
        assert_eq!(stratified_split(&labels, 0.2, 42), (train, valid));
    }

    #[test]
    fn test_train_with_validation() -> Result<()> {
        let (model, auc) = train_with_validation(&LogisticRegression::default(), &table(), 0.2, 7)?;
        assert!((auc - 1.0).abs() < 1e-9);
        assert!(model.predict_proba(&[60.0, 0.0]) > model.predict_proba(&[1.0, 1.0]));
        Ok(())
    }

    #[test]
    fn test_rank_features_pads() {
        let table = FeatureTable::new(vec![
            row(0, 3, 1, 0, 0),
            row(0, 5, 9, 0, 0),
            row(0, 4, 9, 0, 0),
            row(1, 2, 4, 0, 0),
        ]);
        let recs = rank_features(&PopularityScorer, &table, 3, 2);
        // tie between 4 and 5 resolved by ascending item index
        assert_eq!(recs.get(0), &[4, 5]);
        assert_eq!(recs.get(1), &[2, 2]);
        assert_eq!(recs.get(2), &[0, 0]);
    }

    #[test]
    fn test_ranking_service() {
        let table = FeatureTable::new(vec![
            row(0, 0, 1, 0, 0),
            row(0, 1, 5, 0, 0),
            row(0, 2, 3, 0, 0),
        ]);
        let users = IdMap::from_ids(vec![ExternalId::Int(100), ExternalId::Int(200)]);
        let items = IdMap::from_ids(vec!["a".into(), "b".into(), "c".into()]);
        let service = RankingService::new(&PopularityScorer, &table, users, items);

        let recs = service.recommend(&ExternalId::Int(100), 2);
        assert_eq!(recs, vec![ExternalId::from("b"), ExternalId::from("c")]);
        // string form of a numeric id resolves as well
        assert_eq!(service.recommend(&"100".into(), 10).len(), 3);
        // known user without rows, unknown user
        assert!(service.recommend(&ExternalId::Int(200), 5).is_empty());
        assert!(service.recommend(&ExternalId::Int(999), 5).is_empty());
    }
}
