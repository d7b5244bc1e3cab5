use std::time::Instant;

use crate::candidates::CandidateSet;
use crate::consumed::build_consumed_sorted;
use crate::error::Result;
use crate::interactions::Interaction;
use crate::similarities::{compute_sum_squares, invert_cosine, sort_by_sims};
use crate::sparse::CsrMatrix;
use crate::utils::Neighbor;

/// Binary user x item incidence: any weight counts as presence.
fn incidence_matrix(
    interactions: &[Interaction],
    n_users: usize,
    n_items: usize,
) -> Result<CsrMatrix<u32, f32>> {
    let binary: Vec<Interaction> = build_consumed_sorted(interactions, n_users)
        .into_iter()
        .enumerate()
        .flat_map(|(u, items)| {
            items
                .into_iter()
                .map(move |i| Interaction::new(u as u32, i, None, 1.0))
        })
        .collect();
    CsrMatrix::from_interactions(&binary, n_users, n_items)
}

/// Item neighbors by cosine similarity of their user-incidence columns.
///
/// Every list holds at most `top_k` other items with similarity > 0, sorted
/// by descending similarity, ties broken by ascending item index.
pub fn item_neighbors(
    interactions: &[Interaction],
    n_users: usize,
    n_items: usize,
    top_k: usize,
) -> Result<Vec<Vec<Neighbor>>> {
    let user_interactions = incidence_matrix(interactions, n_users, n_items)?;
    let item_interactions = user_interactions.transpose();
    let sum_squares = compute_sum_squares(&item_interactions);
    let cosine_sims = invert_cosine(&user_interactions, &sum_squares);
    Ok(sort_by_sims(&cosine_sims, n_items, top_k.min(n_items)))
}

/// Item-item candidate generation over raw (indexed) interactions.
pub fn item_item_candidates(
    interactions: &[Interaction],
    n_users: usize,
    n_items: usize,
    top_k: usize,
) -> Result<CandidateSet> {
    let start = Instant::now();
    let neighbors = item_neighbors(interactions, n_users, n_items, top_k)?;
    let lists: Vec<Vec<u32>> = neighbors
        .into_iter()
        .map(|nbs| nbs.into_iter().map(|n| n.id).collect())
        .collect();
    let candidates = CandidateSet::new(lists);

    let n_empty = candidates.iter().filter(|(_, c)| c.is_empty()).count();
    tracing::info!(
        n_items,
        n_candidates = candidates.n_candidates(),
        n_empty,
        "item-item candidates in {:.4?}",
        start.elapsed()
    );
    Ok(candidates)
}
