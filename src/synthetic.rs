use fxhash::FxHashSet;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::error::{RecError, Result};
use crate::interactions::RawInteraction;

const POWER: f64 = 1.5;
const MIN_POPULARITY: f64 = 1e-4;
const TS_RANGE: std::ops::Range<i64> = 1_700_000_000..1_725_000_000;

/// Deterministic synthetic implicit-feedback table.
///
/// Users are uniform, items follow a power-law popularity, duplicate
/// `(user, item)` pairs keep their first occurrence.
pub fn generate(
    n_users: usize,
    n_items: usize,
    density: f64,
    seed: u64,
) -> Result<Vec<RawInteraction>> {
    if n_users == 0 || n_items == 0 {
        return Err(RecError::invalid_config(
            "n_users/n_items",
            format!("{n_users}/{n_items}"),
            "must both be >= 1",
        ));
    }
    if !(density > 0.0 && density <= 1.0) {
        return Err(RecError::invalid_config("density", density, "must be in (0, 1]"));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let n = (n_users as f64 * n_items as f64 * density) as usize;

    // power-distributed samples x = u^(1/a)
    let popularity: Vec<f64> = (0..n_items)
        .map(|_| rng.gen::<f64>().powf(POWER.recip()).max(MIN_POPULARITY))
        .collect();
    let item_dist = WeightedIndex::new(&popularity)
        .map_err(|e| RecError::invalid_config("popularity", e, "must be positive weights"))?;

    let mut seen: FxHashSet<(usize, usize)> = FxHashSet::default();
    let mut raw = Vec::with_capacity(n);
    for _ in 0..n {
        let user = rng.gen_range(0..n_users);
        let item = item_dist.sample(&mut rng);
        let ts = rng.gen_range(TS_RANGE);
        if seen.insert((user, item)) {
            raw.push(RawInteraction::new(
                (user as i64).into(),
                (item as i64).into(),
                Some(ts),
                1.0,
            ));
        }
    }

    tracing::info!(
        n_users,
        n_items,
        n_interactions = raw.len(),
        "generated synthetic interactions"
    );
    Ok(raw)
}
