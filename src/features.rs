use std::collections::BTreeSet;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::candidates::CandidateSet;
use crate::config::PipelineConfig;
use crate::interactions::Interaction;
use crate::popularity::PopularityRanker;
use crate::split::{user_histories, HeldOut};

pub const N_FEATURES: usize = 2;

/// One `(user, candidate item)` pair. Flags are stored as 0/1 so rows map
/// one-to-one onto the feature table columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub user_id: u32,
    pub item_id: u32,
    pub item_pop: u32,
    pub is_recent: u8,
    pub label: u8,
}

impl FeatureRow {
    /// Model inputs in column order `item_pop, is_recent`.
    #[inline]
    pub fn features(&self) -> [f32; N_FEATURES] {
        [self.item_pop as f32, self.is_recent as f32]
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.label == 1
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureTable(Vec<FeatureRow>);

impl FeatureTable {
    pub fn new(rows: Vec<FeatureRow>) -> Self {
        Self(rows)
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn feature_matrix(&self) -> Vec<[f32; N_FEATURES]> {
        self.0.iter().map(FeatureRow::features).collect()
    }

    pub fn labels(&self) -> Vec<bool> {
        self.0.iter().map(FeatureRow::is_positive).collect()
    }

    pub fn n_positive(&self) -> usize {
        self.0.iter().filter(|r| r.is_positive()).count()
    }

    pub fn rows_for_user(&self, user: u32) -> impl Iterator<Item = &FeatureRow> {
        self.0.iter().filter(move |r| r.user_id == user)
    }
}

/// Joins candidate sets with popularity and recency into labeled rows.
#[derive(Clone, Debug)]
pub struct FeatureAssembler {
    pub recent_window: usize,
    pub item_item_expand: usize,
    pub popular_fallback: usize,
}

impl FeatureAssembler {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            recent_window: config.recent_window,
            item_item_expand: config.item_item_expand,
            popular_fallback: config.popular_fallback,
        }
    }

    /// Last `recent_window` distinct training items per user, by timestamp.
    pub fn recent_items(&self, train: &[Interaction], n_users: usize) -> Vec<Vec<u32>> {
        user_histories(train, n_users)
            .into_iter()
            .map(|history| {
                let skip = history.len().saturating_sub(self.recent_window);
                let mut recent: Vec<u32> = Vec::with_capacity(self.recent_window);
                for x in &history[skip..] {
                    if !recent.contains(&x.item) {
                        recent.push(x.item);
                    }
                }
                recent
            })
            .collect()
    }

    /// Candidate pool of one user, in ascending item order.
    fn candidate_pool(
        &self,
        user: u32,
        recent: &[u32],
        neighborhood: &CandidateSet,
        item_item: &CandidateSet,
        popularity: &PopularityRanker,
    ) -> BTreeSet<u32> {
        let mut pool: BTreeSet<u32> = neighborhood.get(user).iter().copied().collect();
        for &item in recent {
            let expand = item_item.get(item);
            pool.extend(&expand[..self.item_item_expand.min(expand.len())]);
        }
        if pool.is_empty() {
            pool.extend(popularity.top(self.popular_fallback));
        }
        pool
    }

    /// Emit one row per `(user, candidate)` pair.
    ///
    /// Popularity and recency come from the training partition only, the
    /// label from `held_out` only.
    pub fn assemble(
        &self,
        train: &[Interaction],
        held_out: &HeldOut,
        popularity: &PopularityRanker,
        neighborhood: &CandidateSet,
        item_item: &CandidateSet,
    ) -> FeatureTable {
        let start = Instant::now();
        let n_users = held_out.n_users();
        let recent = self.recent_items(train, n_users);

        let per_user: Vec<Vec<FeatureRow>> = (0..n_users)
            .into_par_iter()
            .map(|u| {
                let user = u as u32;
                let pool = self.candidate_pool(
                    user,
                    &recent[u],
                    neighborhood,
                    item_item,
                    popularity,
                );
                pool.into_iter()
                    .map(|item| FeatureRow {
                        user_id: user,
                        item_id: item,
                        item_pop: popularity.count(item),
                        is_recent: recent[u].contains(&item) as u8,
                        label: held_out.contains(u, item) as u8,
                    })
                    .collect()
            })
            .collect();
        let table = FeatureTable::new(per_user.into_iter().flatten().collect());

        tracing::info!(
            n_rows = table.len(),
            n_positive = table.n_positive(),
            "assembled features in {:.4?}",
            start.elapsed()
        );
        if table.n_positive() == 0 {
            tracing::warn!("no candidate pool contains a held-out item");
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(u: u32, i: u32, ts: i64) -> Interaction {
        Interaction::new(u, i, Some(ts), 1.0)
    }

    fn assembler() -> FeatureAssembler {
        FeatureAssembler {
            recent_window: 2,
            item_item_expand: 1,
            popular_fallback: 2,
        }
    }

    #[test]
    fn test_recent_items() {
        let train = vec![x(0, 1, 3), x(0, 2, 1), x(0, 3, 2), x(1, 4, 1)];
        let recent = assembler().recent_items(&train, 3);
        assert_eq!(recent[0], vec![3, 1]);
        assert_eq!(recent[1], vec![4]);
        assert!(recent[2].is_empty());
    }

    #[test]
    fn test_assemble() {
        // user 0 trained on items 0, 1 and held out item 3
        // user 1 trained on item 2, nothing held out
        // user 2 has nothing at all and falls back to popularity
        let train = vec![x(0, 0, 1), x(0, 1, 2), x(1, 2, 1)];
        let held_out = HeldOut::new(vec![vec![3], vec![], vec![]]);
        let popularity = PopularityRanker::from_counts(vec![1, 1, 1, 0, 0]);
        let neighborhood = CandidateSet::new(vec![vec![4], vec![], vec![]]);
        let item_item = CandidateSet::new(vec![
            vec![3, 2],
            vec![0],
            vec![],
            vec![],
            vec![],
        ]);

        let table = assembler().assemble(&train, &held_out, &popularity, &neighborhood, &item_item);

        let user0: Vec<(u32, u32, u8, u8)> = table
            .rows_for_user(0)
            .map(|r| (r.item_id, r.item_pop, r.is_recent, r.label))
            .collect();
        // pool = {4} from neighbors, {3} from item 0 (expand 1), {0} from item 1
        assert_eq!(user0, vec![(0, 1, 1, 0), (3, 0, 0, 1), (4, 0, 0, 0)]);

        // item 2 has no item-item candidates and there are no neighbors
        let user1: Vec<u32> = table.rows_for_user(1).map(|r| r.item_id).collect();
        assert_eq!(user1, vec![0, 1]);

        let user2: Vec<u32> = table.rows_for_user(2).map(|r| r.item_id).collect();
        assert_eq!(user2, vec![0, 1]);

        assert_eq!(table.n_positive(), 1);
        assert_eq!(table.feature_matrix()[0], [1.0, 1.0]);
    }

    #[test]
    fn test_labels_come_from_held_out_only() {
        let train = vec![x(0, 0, 1)];
        let held_out = HeldOut::new(vec![vec![1]]);
        let popularity = PopularityRanker::from_counts(vec![1, 0]);
        let candidates = CandidateSet::new(vec![vec![1], vec![0]]);
        let table = assembler().assemble(&train, &held_out, &popularity, &candidates, &candidates);
        for row in table.rows() {
            assert_eq!(row.is_positive(), held_out.contains(row.user_id as usize, row.item_id));
            // the held-out item is never flagged as recent
            if row.is_positive() {
                assert_eq!(row.is_recent, 0);
            }
        }
    }
}
