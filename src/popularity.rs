use std::time::Instant;

use fxhash::FxHashSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::interactions::Interaction;
use crate::recommendations::Recommendations;
use crate::utils::pad_to;

/// Global popularity baseline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PopularityRanker {
    counts: Vec<u32>,
    ranked: Vec<u32>,
}

impl PopularityRanker {
    /// Rank items by descending count, ties by ascending item index.
    pub fn from_counts(counts: Vec<u32>) -> Self {
        let mut ranked: Vec<u32> = (0..counts.len() as u32).collect();
        ranked.sort_by(|&a, &b| {
            counts[b as usize]
                .cmp(&counts[a as usize])
                .then(a.cmp(&b))
        });
        Self { counts, ranked }
    }

    /// Count training interaction rows per item; items absent from
    /// training get zero.
    pub fn fit(train: &[Interaction], n_items: usize) -> Self {
        let mut counts = vec![0u32; n_items];
        for x in train {
            if let Some(c) = counts.get_mut(x.item as usize) {
                *c += 1;
            }
        }
        Self::from_counts(counts)
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn count(&self, item: u32) -> u32 {
        self.counts.get(item as usize).copied().unwrap_or(0)
    }

    #[inline]
    pub fn n_items(&self) -> usize {
        self.counts.len()
    }

    /// All items, most popular first.
    pub fn ranked(&self) -> &[u32] {
        &self.ranked
    }

    pub fn most_popular(&self) -> Option<u32> {
        self.ranked.first().copied()
    }

    /// The `n` most popular items (fewer if the catalog is smaller).
    pub fn top(&self, n: usize) -> &[u32] {
        &self.ranked[..n.min(self.ranked.len())]
    }

    /// Top-`k` unseen items for one user. When fewer than `k` unseen items
    /// remain the list is padded with the single most popular item, seen or
    /// not.
    pub fn recommend_user(&self, seen: &FxHashSet<u32>, k: usize) -> Vec<u32> {
        let k = k.min(self.n_items());
        let picks: Vec<u32> = self
            .ranked
            .iter()
            .copied()
            .filter(|i| !seen.contains(i))
            .take(k)
            .collect();

        match self.most_popular() {
            Some(top) if picks.len() < k => {
                tracing::debug!("padding {} slots with item {top}", k - picks.len());
                pad_to(picks, k, top)
            }
            _ => picks,
        }
    }

    /// One list per entry of `consumed` (training seen sets by user index).
    pub fn recommend(&self, consumed: &[FxHashSet<u32>], k: usize) -> Recommendations {
        let start = Instant::now();
        let lists: Vec<Vec<u32>> = consumed
            .par_iter()
            .map(|seen| self.recommend_user(seen, k))
            .collect();

        tracing::info!(
            n_users = lists.len(),
            "popularity recommendations in {:.4?}",
            start.elapsed()
        );
        Recommendations::new(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seen(items: &[u32]) -> FxHashSet<u32> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_popularity_scenario() {
        // item0=5, item1=3, item2=1, item3=0
        let ranker = PopularityRanker::from_counts(vec![5, 3, 1, 0]);
        let consumed = vec![seen(&[]), seen(&[0]), seen(&[1, 2])];
        let recs = ranker.recommend(&consumed, 2);
        assert_eq!(recs.get(0), &[0, 1]);
        assert_eq!(recs.get(1), &[1, 2]);
        assert_eq!(recs.get(2), &[0, 3]);
    }

    #[test]
    fn test_ties_broken_by_index() {
        let ranker = PopularityRanker::from_counts(vec![1, 2, 2, 0, 1]);
        assert_eq!(ranker.ranked(), &[1, 2, 0, 4, 3]);
        assert_eq!(ranker.top(2), &[1, 2]);
        assert_eq!(ranker.top(9).len(), 5);
    }

    #[test]
    fn test_padding_repeats_most_popular() {
        let ranker = PopularityRanker::from_counts(vec![4, 2, 1]);
        let recs = ranker.recommend_user(&seen(&[0, 1]), 3);
        assert_eq!(recs, vec![2, 0, 0]);

        // k larger than the catalog is clamped
        let recs = ranker.recommend_user(&seen(&[]), 10);
        assert_eq!(recs, vec![0, 1, 2]);
    }

    #[test]
    fn test_fit_counts_rows() {
        let train = vec![
            Interaction::new(0, 2, None, 1.0),
            Interaction::new(1, 2, None, 1.0),
            Interaction::new(1, 0, None, 1.0),
        ];
        let ranker = PopularityRanker::fit(&train, 4);
        assert_eq!(ranker.counts(), &[1, 0, 2, 0]);
        assert_eq!(ranker.most_popular(), Some(2));
        assert_eq!(ranker.count(3), 0);
        assert_eq!(ranker.count(99), 0);
    }
}
