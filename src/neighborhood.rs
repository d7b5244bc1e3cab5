use std::time::Instant;

use fxhash::{FxHashMap, FxHashSet};
use rayon::prelude::*;

use crate::candidates::CandidateSet;
use crate::consumed::build_consumed_sorted;
use crate::interactions::Interaction;
use crate::similarities::{jaccard, sort_neighbors};
use crate::utils::{top_k_scored, Neighbor};

pub const DEFAULT_NUM_NEIGHBORS: usize = 20;

/// Users sorted by Jaccard similarity to `target`, positive only.
///
/// Only users sharing at least one item can have a positive similarity, so
/// the inverted `item_users` index restricts the comparison to them.
fn user_neighbors(
    target: usize,
    user_items: &[Vec<u32>],
    item_users: &[Vec<u32>],
    n_neighbors: usize,
) -> Vec<Neighbor> {
    let items = &user_items[target];
    let mut others: FxHashSet<u32> = FxHashSet::default();
    for users in items.iter().filter_map(|&i| item_users.get(i as usize)) {
        others.extend(users.iter().copied().filter(|&v| v as usize != target));
    }
    let sims: Vec<(u32, f32)> = others
        .into_iter()
        .map(|v| (v, jaccard(items, &user_items[v as usize])))
        .collect();
    sort_neighbors(sims, n_neighbors)
}

/// Count one vote per neighbor for every item the target has not seen and
/// return the `top_k` items by votes, ties by ascending item index.
fn vote_items(
    target: usize,
    neighbors: &[Neighbor],
    user_items: &[Vec<u32>],
    top_k: usize,
) -> Vec<u32> {
    let seen = &user_items[target];
    let mut votes: FxHashMap<u32, u32> = FxHashMap::default();
    for nb in neighbors {
        for &i in &user_items[nb.id as usize] {
            if seen.binary_search(&i).is_err() {
                *votes.entry(i).or_insert(0) += 1;
            }
        }
    }
    let scored: Vec<(u32, f32)> = votes.into_iter().map(|(i, v)| (i, v as f32)).collect();
    top_k_scored(scored, top_k)
}

/// User-to-item candidates from Jaccard user neighborhoods.
///
/// A user without positive-similarity neighbors gets an empty list.
pub fn neighborhood_candidates(
    interactions: &[Interaction],
    n_users: usize,
    n_items: usize,
    n_neighbors: usize,
    top_k: usize,
) -> CandidateSet {
    let start = Instant::now();
    let mut user_items = build_consumed_sorted(interactions, n_users);
    for items in user_items.iter_mut() {
        items.retain(|&i| (i as usize) < n_items);
    }
    let mut item_users: Vec<Vec<u32>> = vec![Vec::new(); n_items];
    for (u, items) in user_items.iter().enumerate() {
        for &i in items {
            if let Some(users) = item_users.get_mut(i as usize) {
                users.push(u as u32);
            }
        }
    }

    let top_k = top_k.min(n_items);
    let lists: Vec<Vec<u32>> = (0..n_users)
        .into_par_iter()
        .map(|u| {
            let neighbors = user_neighbors(u, &user_items, &item_users, n_neighbors);
            vote_items(u, &neighbors, &user_items, top_k)
        })
        .collect();
    let candidates = CandidateSet::new(lists);

    tracing::info!(
        n_users,
        n_candidates = candidates.n_candidates(),
        "neighborhood candidates in {:.4?}",
        start.elapsed()
    );
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(u: u32, i: u32) -> Interaction {
        Interaction::new(u, i, None, 1.0)
    }

    fn interactions() -> Vec<Interaction> {
        // user 0: {0, 1}
        // user 1: {0, 1, 2}      jaccard(0, 1) = 2/3
        // user 2: {1, 3, 4}      jaccard(0, 2) = 1/4
        // user 3: {5}            no overlap with anyone
        // user 4: {0, 4}         jaccard(0, 4) = 1/3
        vec![
            x(0, 0),
            x(0, 1),
            x(1, 0),
            x(1, 1),
            x(1, 2),
            x(2, 1),
            x(2, 3),
            x(2, 4),
            x(3, 5),
            x(4, 0),
            x(4, 4),
        ]
    }

    #[test]
    fn test_user_neighbors_order() {
        let user_items = build_consumed_sorted(&interactions(), 5);
        let mut item_users = vec![Vec::new(); 6];
        for (u, items) in user_items.iter().enumerate() {
            for &i in items {
                item_users[i as usize].push(u as u32);
            }
        }
        let ids: Vec<u32> = user_neighbors(0, &user_items, &item_users, 20)
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec![1, 4, 2]);

        let ids: Vec<u32> = user_neighbors(0, &user_items, &item_users, 2)
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec![1, 4]);
        assert!(user_neighbors(3, &user_items, &item_users, 20).is_empty());
    }

    #[test]
    fn test_neighborhood_candidates() {
        let candidates = neighborhood_candidates(&interactions(), 5, 6, 20, 10);
        // votes for user 0: item 4 from users 2 and 4, item 2 from user 1,
        // item 3 from user 2
        assert_eq!(candidates.get(0), &[4, 2, 3]);
        // isolated user
        assert!(candidates.get(3).is_empty());
        for (u, list) in candidates.iter() {
            let seen = interactions()
                .into_iter()
                .filter(|x| x.user == u)
                .map(|x| x.item)
                .collect::<Vec<_>>();
            assert!(list.iter().all(|i| !seen.contains(i)));
        }

        let truncated = neighborhood_candidates(&interactions(), 5, 6, 20, 1);
        assert_eq!(truncated.get(0), &[4]);
    }

    #[test]
    fn test_items_outside_catalog_are_skipped() {
        let mut data = interactions();
        data.push(x(0, 9));
        data.push(x(1, 9));
        let candidates = neighborhood_candidates(&data, 5, 6, 20, 10);
        assert_eq!(candidates.get(0), &[4, 2, 3]);
        assert!(candidates.iter().all(|(_, list)| list.iter().all(|&i| i < 6)));
    }

    #[test]
    fn test_neighbor_limit_changes_votes() {
        // with a single neighbor only user 1 votes
        let candidates = neighborhood_candidates(&interactions(), 5, 6, 1, 10);
        assert_eq!(candidates.get(0), &[2]);
    }
}
