use std::cmp::Ordering;
use std::time::Instant;

use fxhash::FxHashMap;
use rayon::prelude::*;

use crate::sparse::{get_row, CsrMatrix};
use crate::utils::{cmp_scored, decode_pair, encode_pair, CumValues, Neighbor};

const BATCH_SIZE: usize = 1000;

/// Sum of squared values for every row of `interactions`.
pub(crate) fn compute_sum_squares(interactions: &CsrMatrix<u32, f32>) -> Vec<f32> {
    (0..interactions.n_rows())
        .map(|i| {
            get_row(interactions, i, false)
                .map_or(0.0, |row| row.fold(0.0, |ss, (_, d)| ss + d * d))
        })
        .collect()
}

/// Cosine from a dot product and two sums of squares.
///
/// Evaluated as `sqrt(prod^2 / (ss1 * ss2))` in f64: on integer counts the
/// division is exact up to one rounding, so equal ratios yield bit-identical
/// similarities and ties fall through to the index order.
pub(crate) fn compute_cosine(prod: f32, sum_squ1: f32, sum_squ2: f32) -> f32 {
    if prod == 0.0 || sum_squ1 == 0.0 || sum_squ2 == 0.0 {
        0.0
    } else {
        let prod = prod as f64;
        let ratio = prod * prod / (sum_squ1 as f64 * sum_squ2 as f64);
        ratio.sqrt().copysign(prod) as f32
    }
}

/// Jaccard similarity of two sorted, de-duplicated id slices. Zero when
/// the union is empty.
pub(crate) fn jaccard(a: &[u32], b: &[u32]) -> f32 {
    let (mut i, mut j) = (0, 0);
    let mut inter = 0usize;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                inter += 1;
                i += 1;
                j += 1;
            }
        }
    }
    let union = a.len() + b.len() - inter;
    if union == 0 {
        0.0
    } else {
        inter as f32 / union as f32
    }
}

#[inline]
fn update_pair_stats(acc: &mut FxHashMap<u64, CumValues>, x1: u32, x2: u32, prod_val: f32) {
    let key = encode_pair(x1, x2);
    acc.entry(key)
        .and_modify(|(p, c)| {
            *p += prod_val;
            *c += 1;
        })
        .or_insert((prod_val, 1));
}

/// Process item pairs in a single row with batching for long rows
fn process_row_batched(acc: &mut FxHashMap<u64, CumValues>, row_indices: &[u32], row_data: &[f32]) {
    let row_len = row_indices.len();
    let num_batches = row_len.div_ceil(BATCH_SIZE);

    for batch_a in 0..num_batches {
        let start_a = batch_a * BATCH_SIZE;
        let end_a = (start_a + BATCH_SIZE).min(row_len);

        // Pairs within batch A
        for i in start_a..end_a {
            for j in (i + 1)..end_a {
                update_pair_stats(
                    acc,
                    row_indices[i],
                    row_indices[j],
                    row_data[i] * row_data[j],
                );
            }
        }

        // Pairs between batch A and subsequent batches
        for batch_b in (batch_a + 1)..num_batches {
            let start_b = batch_b * BATCH_SIZE;
            let end_b = (start_b + BATCH_SIZE).min(row_len);
            for i in start_a..end_a {
                for j in start_b..end_b {
                    update_pair_stats(
                        acc,
                        row_indices[i],
                        row_indices[j],
                        row_data[i] * row_data[j],
                    );
                }
            }
        }
    }
}

/// Compute pairwise co-occurrence statistics across all rows in parallel.
///
/// For each row, enumerates all column pairs and accumulates their dot product
/// contributions and co-occurrence counts. Column indices inside a row are
/// sorted, so every key is encoded with the smaller index first.
///
/// # Returns
/// HashMap where key is encoded (col1, col2) pair and value is (dot_product, count)
pub(crate) fn compute_pair_stats(interactions: &CsrMatrix<u32, f32>) -> FxHashMap<u64, CumValues> {
    let (indices, indptr, data) = interactions.values();

    (0..interactions.n_rows())
        .into_par_iter()
        .fold(FxHashMap::default, |mut acc, i| {
            let row_start = indptr[i];
            let row_end = indptr[i + 1];
            if row_end - row_start < 2 {
                return acc;
            }
            let row_indices = &indices[row_start..row_end];
            let row_data = &data[row_start..row_end];
            process_row_batched(&mut acc, row_indices, row_data);
            acc
        })
        .reduce(FxHashMap::default, |mut a, b| {
            for (k, (p, c)) in b {
                a.entry(k)
                    .and_modify(|(ap, ac)| {
                        *ap += p;
                        *ac += c;
                    })
                    .or_insert((p, c));
            }
            a
        })
}

/// Compute column-wise cosine similarities using the inverted index approach.
///
/// Iterates over rows (users) and accumulates co-occurrence statistics for
/// column pairs (items) that appear together, so only pairs sharing at least
/// one row are ever materialized.
///
/// # Arguments
/// * `interactions` - CSR matrix where rows are the iteration dimension
/// * `sum_squares` - Precomputed sum of squared values for each column
///
/// # Returns
/// Vector of (col1, col2, cosine_similarity) tuples with col1 < col2
pub(crate) fn invert_cosine(
    interactions: &CsrMatrix<u32, f32>,
    sum_squares: &[f32],
) -> Vec<(u32, u32, f32)> {
    let start = Instant::now();
    let pair_stats = compute_pair_stats(interactions);
    let cosine_sims: Vec<(u32, u32, f32)> = pair_stats
        .into_iter()
        .map(|(key, (prod, _))| {
            let (x1, x2) = decode_pair(key);
            let cosine = compute_cosine(prod, sum_squares[x1 as usize], sum_squares[x2 as usize]);
            (x1, x2, cosine)
        })
        .collect();

    tracing::debug!(
        "invert cosine sim: {} elapsed: {:.4?}",
        cosine_sims.len(),
        start.elapsed()
    );
    cosine_sims
}

/// Aggregate similarity pairs into per-node neighbor lists.
pub(crate) fn aggregate_sims(cosine_sims: &[(u32, u32, f32)], n: usize) -> Vec<Vec<(u32, f32)>> {
    let mut agg_sims: Vec<Vec<(u32, f32)>> = vec![Vec::new(); n];
    for &(x1, x2, sim) in cosine_sims {
        if x1 == x2 {
            continue;
        }
        agg_sims[x1 as usize].push((x2, sim));
        agg_sims[x2 as usize].push((x1, sim));
    }
    agg_sims
}

/// Sort neighbors by similarity (descending, ties by ascending id), drop
/// non-positive similarities and keep at most `top_k`.
pub(crate) fn sort_neighbors(mut neighbor_sims: Vec<(u32, f32)>, top_k: usize) -> Vec<Neighbor> {
    neighbor_sims.retain(|(_, sim)| *sim > 0.0);
    neighbor_sims.sort_unstable_by(cmp_scored);
    neighbor_sims.truncate(top_k);
    neighbor_sims
        .into_iter()
        .map(|(id, sim)| Neighbor { id, sim })
        .collect()
}

/// Aggregate and sort similarity pairs into per-node neighbor lists.
///
/// # Process
/// 1. Aggregate: For each pair (x1, x2, sim), add x2 to x1's neighbors and vice versa
/// 2. Sort: Sort each node's neighbors by similarity (descending)
/// 3. Truncate: keep the `top_k` positive neighbors
pub(crate) fn sort_by_sims(
    cosine_sims: &[(u32, u32, f32)],
    n: usize,
    top_k: usize,
) -> Vec<Vec<Neighbor>> {
    let start = Instant::now();
    let sorted: Vec<Vec<Neighbor>> = aggregate_sims(cosine_sims, n)
        .into_par_iter()
        .map(|neighbor_sims| sort_neighbors(neighbor_sims, top_k))
        .collect();

    tracing::debug!("sort elapsed: {:.4?}", start.elapsed());
    sorted
}
