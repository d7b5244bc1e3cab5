use std::cmp::Ordering;

use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::recommendations::Recommendations;
use crate::split::HeldOut;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub recall: f64,
    pub ndcg: f64,
    pub coverage: f64,
}

/// Pairs of (top-K recommendations, held-out set) for users with a
/// non-empty held-out entry.
fn qualifying<'a>(
    recs: &'a Recommendations,
    held_out: &'a HeldOut,
    k: usize,
) -> impl Iterator<Item = (&'a [u32], FxHashSet<u32>)> + 'a {
    held_out
        .iter()
        .enumerate()
        .filter(|(_, gt)| !gt.is_empty())
        .map(move |(u, gt)| {
            let list = recs.get(u);
            (&list[..k.min(list.len())], gt.iter().copied().collect())
        })
}

/// Sum of hits over qualifying users divided by their count; 0 when no
/// user has a held-out item.
pub fn recall_at_k(recs: &Recommendations, held_out: &HeldOut, k: usize) -> f64 {
    let mut hits = 0usize;
    let mut total = 0usize;
    for (top, gt) in qualifying(recs, held_out, k) {
        let top: FxHashSet<u32> = top.iter().copied().collect();
        hits += top.intersection(&gt).count();
        total += 1;
    }
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[inline]
fn discount(position: usize) -> f64 {
    // 1-indexed position
    1.0 / ((position + 1) as f64).log2()
}

/// Mean NDCG over qualifying users. The ideal ordering places
/// `min(|held_out|, K)` hits first.
pub fn ndcg_at_k(recs: &Recommendations, held_out: &HeldOut, k: usize) -> f64 {
    let per_user: Vec<f64> = qualifying(recs, held_out, k)
        .map(|(top, gt)| {
            let dcg: f64 = top
                .iter()
                .enumerate()
                .filter(|(_, item)| gt.contains(*item))
                .map(|(i, _)| discount(i + 1))
                .sum();
            let ideal: f64 = (1..=gt.len().min(k)).map(discount).sum();
            if ideal > 0.0 {
                dcg / ideal
            } else {
                0.0
            }
        })
        .collect();

    if per_user.is_empty() {
        0.0
    } else {
        per_user.iter().sum::<f64>() / per_user.len() as f64
    }
}

/// Distinct recommended items relative to the catalog size.
pub fn coverage(recs: &Recommendations, n_items: usize) -> f64 {
    if n_items == 0 {
        return 0.0;
    }
    recs.distinct_items().len() as f64 / n_items as f64
}

pub fn evaluate(recs: &Recommendations, held_out: &HeldOut, n_items: usize, k: usize) -> Metrics {
    Metrics {
        recall: recall_at_k(recs, held_out, k),
        ndcg: ndcg_at_k(recs, held_out, k),
        coverage: coverage(recs, n_items),
    }
}

/// Area under the ROC curve through the Mann-Whitney rank statistic, tied
/// scores sharing their average rank. 0.5 when a class is missing.
pub fn roc_auc(labels: &[bool], scores: &[f32]) -> f64 {
    let n = labels.len().min(scores.len());
    let n_pos = labels[..n].iter().filter(|&&l| l).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let mut pos_rank_sum = 0.0f64;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && scores[order[j]] == scores[order[i]] {
            j += 1;
        }
        // ranks i+1 ..= j share their mean
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        for &idx in &order[i..j] {
            if labels[idx] {
                pos_rank_sum += avg_rank;
            }
        }
        i = j;
    }

    let n_pos = n_pos as f64;
    (pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recs(lists: Vec<Vec<u32>>) -> Recommendations {
        Recommendations::new(lists)
    }

    #[test]
    fn test_recall_scenario() {
        let held = HeldOut::new(vec![vec![2], vec![], vec![1]]);
        let r = recs(vec![vec![2, 0], vec![3, 1], vec![0, 3]]);
        assert!((recall_at_k(&r, &held, 2) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_recall_truncates_to_k() {
        let held = HeldOut::new(vec![vec![2]]);
        let r = recs(vec![vec![0, 1, 2]]);
        assert_eq!(recall_at_k(&r, &held, 2), 0.0);
        assert_eq!(recall_at_k(&r, &held, 3), 1.0);
    }

    #[test]
    fn test_no_qualifying_users() {
        let held = HeldOut::new(vec![vec![], vec![]]);
        let r = recs(vec![vec![0], vec![1]]);
        assert_eq!(recall_at_k(&r, &held, 1), 0.0);
        assert_eq!(ndcg_at_k(&r, &held, 1), 0.0);
    }

    #[test]
    fn test_ndcg() {
        let held = HeldOut::new(vec![vec![2], vec![5], vec![1]]);
        // hit at rank 1, hit at rank 2, miss
        let r = recs(vec![vec![2, 0], vec![3, 5], vec![0, 3]]);
        let expected = (1.0 + 1.0 / 3f64.log2() + 0.0) / 3.0;
        assert!((ndcg_at_k(&r, &held, 2) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_ndcg_perfect_ranking() {
        let held = HeldOut::new(vec![vec![4, 7], vec![1]]);
        let r = recs(vec![vec![7, 4, 0], vec![1, 2, 3]]);
        assert!((ndcg_at_k(&r, &held, 3) - 1.0).abs() < 1e-12);

        // more held-out items than K: ideal caps at K hits
        let held = HeldOut::new(vec![vec![1, 2, 3]]);
        let r = recs(vec![vec![3, 1]]);
        assert!((ndcg_at_k(&r, &held, 2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ndcg_ideal_uses_k_not_list_length() {
        // a short list cannot reach the ideal of two hits within K = 2
        let held = HeldOut::new(vec![vec![1, 2]]);
        let r = recs(vec![vec![1]]);
        let expected = 1.0 / (1.0 + 1.0 / 3f64.log2());
        assert!((ndcg_at_k(&r, &held, 2) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_metrics_bounded() {
        let held = HeldOut::new(vec![vec![0], vec![1], vec![], vec![3]]);
        let r = recs(vec![vec![0, 1], vec![0, 2], vec![1, 1], vec![2, 3]]);
        let m = evaluate(&r, &held, 4, 2);
        for v in [m.recall, m.ndcg, m.coverage] {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_coverage() {
        let r = recs(vec![vec![0, 1], vec![1, 2], vec![2, 0]]);
        assert!((coverage(&r, 4) - 0.75).abs() < 1e-12);
        let full = recs(vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(coverage(&full, 4), 1.0);
        assert_eq!(coverage(&full, 0), 0.0);
    }

    #[test]
    fn test_roc_auc() {
        let labels = [false, false, true, true];
        assert!((roc_auc(&labels, &[0.1, 0.4, 0.35, 0.8]) - 0.75).abs() < 1e-12);
        assert!((roc_auc(&labels, &[0.1, 0.2, 0.3, 0.4]) - 1.0).abs() < 1e-12);
        // all tied
        assert!((roc_auc(&labels, &[0.5; 4]) - 0.5).abs() < 1e-12);
        assert_eq!(roc_auc(&[true, true], &[0.1, 0.2]), 0.5);
    }
}
