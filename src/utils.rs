use std::cmp::Ordering;

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: u32,
    pub sim: f32,
}

// (prod, count)
pub(crate) type CumValues = (f32, u32);

/// Encodes a pair of u32 values into a single u64 key.
/// x1 is stored in the upper 32 bits, x2 in the lower 32 bits.
#[inline]
pub(crate) fn encode_pair(x1: u32, x2: u32) -> u64 {
    ((x1 as u64) << 32) | (x2 as u64)
}

/// Decodes a u64 key back into a pair of u32 values.
#[inline]
pub(crate) fn decode_pair(key: u64) -> (u32, u32) {
    let x1 = (key >> 32) as u32;
    let x2 = (key & 0xFFFFFFFF) as u32;
    (x1, x2)
}

/// `num_threads == 0` lets rayon pick the number of threads.
pub(crate) fn create_thread_pool(num_threads: usize) -> Result<ThreadPool> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| RecError::ThreadPool(e.to_string()))?;

    Ok(pool)
}

/// Descending by score, ascending by id on ties. NaN scores sink to the end.
#[inline]
pub(crate) fn cmp_scored(a: &(u32, f32), b: &(u32, f32)) -> Ordering {
    match (a.1.is_nan(), b.1.is_nan()) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        _ => b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)),
    }
}

/// Select the top-`k` ids by score.
///
/// Uses `select_nth_unstable_by` (quickselect) for O(n) partitioning to find
/// top k items, then sorts only those k items in O(k log k). The comparator
/// is a total order, so the result does not depend on input order.
pub(crate) fn top_k_scored(mut scored: Vec<(u32, f32)>, k: usize) -> Vec<u32> {
    if k == 0 {
        return Vec::new();
    }
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, cmp_scored);
        scored.truncate(k);
    }
    scored.sort_unstable_by(cmp_scored);
    scored.into_iter().map(|(i, _)| i).collect()
}

/// Pad `items` to length `k` by repeating `filler`, or truncate.
pub(crate) fn pad_to(mut items: Vec<u32>, k: usize, filler: u32) -> Vec<u32> {
    items.truncate(k);
    items.resize(k, filler);
    items
}
