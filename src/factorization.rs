use std::time::Instant;

use fxhash::FxHashSet;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{RecError, Result};
use crate::recommendations::Recommendations;
use crate::sparse::{get_row, CsrMatrix};
use crate::utils::{pad_to, top_k_scored};

const N_OVERSAMPLES: usize = 10;

/// Truncated SVD baseline: `X ~ U V^T` with `U = Q U_b S` and `V = V_b`.
#[derive(Clone, Debug)]
pub struct SvdRanker {
    user_factors: DMatrix<f32>,
    item_factors: DMatrix<f32>,
}

/// `X * m` for a sparse `X`.
fn sparse_mul_dense(x: &CsrMatrix<u32, f32>, m: &DMatrix<f32>) -> DMatrix<f32> {
    let mut out = DMatrix::<f32>::zeros(x.n_rows(), m.ncols());
    for r in 0..x.n_rows() {
        if let Some(row) = get_row(x, r, false) {
            for (c, v) in row {
                for j in 0..m.ncols() {
                    out[(r, j)] += v * m[(c as usize, j)];
                }
            }
        }
    }
    out
}

/// `X^T * m` for a sparse `X`, without materializing the transpose.
fn sparse_t_mul_dense(x: &CsrMatrix<u32, f32>, m: &DMatrix<f32>) -> DMatrix<f32> {
    let mut out = DMatrix::<f32>::zeros(x.n_cols(), m.ncols());
    for r in 0..x.n_rows() {
        if let Some(row) = get_row(x, r, false) {
            for (c, v) in row {
                for j in 0..m.ncols() {
                    out[(c as usize, j)] += v * m[(r, j)];
                }
            }
        }
    }
    out
}

fn orthonormalize(m: DMatrix<f32>) -> DMatrix<f32> {
    m.qr().q()
}

impl SvdRanker {
    /// Randomized truncated SVD with `iterations` power iterations.
    ///
    /// The effective rank is `factors` clamped to the smaller matrix side.
    pub fn fit(
        matrix: &CsrMatrix<u32, f32>,
        factors: usize,
        iterations: usize,
        seed: u64,
    ) -> Result<Self> {
        if factors == 0 {
            return Err(RecError::invalid_config("factors", factors, "must be >= 1"));
        }
        if iterations == 0 {
            return Err(RecError::invalid_config("iterations", iterations, "must be >= 1"));
        }
        let (n_users, n_items) = (matrix.n_rows(), matrix.n_cols());
        if n_users == 0 || n_items == 0 {
            return Err(RecError::EmptyInput);
        }

        let start = Instant::now();
        let rank = factors.min(n_users).min(n_items);
        let n_components = (rank + N_OVERSAMPLES).min(n_users).min(n_items);

        let mut rng = StdRng::seed_from_u64(seed);
        let omega = DMatrix::<f32>::from_fn(n_items, n_components, |_, _| {
            rng.gen_range(-1.0f32..1.0)
        });

        let mut q = orthonormalize(sparse_mul_dense(matrix, &omega));
        for _ in 0..iterations {
            let z = orthonormalize(sparse_t_mul_dense(matrix, &q));
            q = orthonormalize(sparse_mul_dense(matrix, &z));
        }

        // B = Q^T X, small enough for a dense decomposition
        let b = sparse_t_mul_dense(matrix, &q).transpose();
        let svd = b.svd(true, true);
        let u_b = svd
            .u
            .ok_or_else(|| RecError::Factorization("left singular vectors missing".into()))?;
        let v_t = svd
            .v_t
            .ok_or_else(|| RecError::Factorization("right singular vectors missing".into()))?;
        let sigma = svd.singular_values;

        let mut order: Vec<usize> = (0..sigma.len()).collect();
        order.sort_by(|&a, &b| sigma[b].total_cmp(&sigma[a]).then(a.cmp(&b)));
        let rank = rank.min(order.len());

        let u = &q * &u_b;
        let user_factors =
            DMatrix::from_fn(n_users, rank, |i, j| u[(i, order[j])] * sigma[order[j]]);
        let item_factors = DMatrix::from_fn(n_items, rank, |i, j| v_t[(order[j], i)]);

        tracing::info!(
            rank,
            iterations,
            "truncated svd on {n_users}x{n_items} in {:.4?}",
            start.elapsed()
        );
        Ok(Self {
            user_factors,
            item_factors,
        })
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.user_factors.ncols()
    }

    #[inline]
    pub fn n_items(&self) -> usize {
        self.item_factors.nrows()
    }

    /// `U[u] . V^T`; an unknown user scores zero everywhere.
    pub fn scores(&self, user: usize) -> Vec<f32> {
        let n_items = self.n_items();
        if user >= self.user_factors.nrows() {
            return vec![0.0; n_items];
        }
        (0..n_items)
            .map(|i| {
                (0..self.rank())
                    .map(|j| self.user_factors[(user, j)] * self.item_factors[(i, j)])
                    .sum()
            })
            .collect()
    }

    /// Top-`k` items for one user with seen items masked to `-inf`.
    ///
    /// Short lists are padded with their first item; a user who has seen
    /// the whole catalog gets their best unmasked item repeated.
    pub fn recommend_user(&self, user: usize, seen: &FxHashSet<u32>, k: usize) -> Vec<u32> {
        let k = k.min(self.n_items());
        let raw = self.scores(user);
        let masked: Vec<(u32, f32)> = raw
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let s = if seen.contains(&(i as u32)) {
                    f32::NEG_INFINITY
                } else {
                    s
                };
                (i as u32, s)
            })
            .filter(|(_, s)| *s != f32::NEG_INFINITY)
            .collect();

        let picks = top_k_scored(masked, k);
        if picks.len() >= k {
            return picks;
        }
        let filler = match picks.first() {
            Some(&first) => first,
            None => {
                let all: Vec<(u32, f32)> = raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| (i as u32, s))
                    .collect();
                match top_k_scored(all, 1).first() {
                    Some(&best) => best,
                    None => return picks,
                }
            }
        };
        pad_to(picks, k, filler)
    }

    pub fn recommend(&self, consumed: &[FxHashSet<u32>], k: usize) -> Recommendations {
        let start = Instant::now();
        let lists: Vec<Vec<u32>> = consumed
            .par_iter()
            .enumerate()
            .map(|(u, seen)| self.recommend_user(u, seen, k))
            .collect();

        tracing::info!(
            n_users = lists.len(),
            "svd recommendations in {:.4?}",
            start.elapsed()
        );
        Recommendations::new(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumed::build_consumed;
    use crate::interactions::Interaction;

    fn block_matrix() -> (Vec<Interaction>, CsrMatrix<u32, f32>) {
        // two user groups with disjoint tastes:
        // users 0-2 like items 0-2, users 3-5 like items 3-5,
        // each user misses exactly one item of their block
        let mut data = Vec::new();
        for u in 0..6u32 {
            let block = if u < 3 { 0 } else { 3 };
            for i in block..block + 3 {
                if i - block != u % 3 {
                    data.push(Interaction::new(u, i, None, 1.0));
                }
            }
        }
        let matrix = CsrMatrix::from_interactions(&data, 6, 6).unwrap();
        (data, matrix)
    }

    #[test]
    fn test_reconstruction_and_masking() -> Result<()> {
        let (data, matrix) = block_matrix();
        let model = SvdRanker::fit(&matrix, 2, 5, 42)?;
        assert_eq!(model.rank(), 2);

        let consumed = build_consumed(&data, 6);
        let recs = model.recommend(&consumed, 1);
        for u in 0..6usize {
            // the missing in-block item is the best unseen candidate
            let block = if u < 3 { 0 } else { 3 };
            assert_eq!(recs.get(u), &[(block + u % 3) as u32]);
        }

        let recs = model.recommend(&consumed, 4);
        for (u, list) in recs.iter().enumerate() {
            assert_eq!(list.len(), 4);
            assert!(list.iter().all(|i| !consumed[u].contains(i)));
        }
        Ok(())
    }

    #[test]
    fn test_rank_clamped_to_matrix() -> Result<()> {
        let (_, matrix) = block_matrix();
        let model = SvdRanker::fit(&matrix, 64, 3, 7)?;
        assert!(model.rank() <= 6);
        assert_eq!(model.n_items(), 6);
        Ok(())
    }

    #[test]
    fn test_fully_seen_user_is_padded() -> Result<()> {
        let data = vec![
            Interaction::new(0, 0, None, 1.0),
            Interaction::new(0, 1, None, 1.0),
            Interaction::new(1, 1, None, 1.0),
        ];
        let matrix = CsrMatrix::from_interactions(&data, 2, 2)?;
        let model = SvdRanker::fit(&matrix, 1, 2, 0)?;
        let consumed = build_consumed(&data, 2);

        let recs = model.recommend(&consumed, 2);
        assert_eq!(recs.get(0).len(), 2);
        assert_eq!(recs.get(0)[0], recs.get(0)[1]);
        assert_eq!(recs.get(1), &[0, 0]);
        Ok(())
    }

    #[test]
    fn test_invalid_knobs() {
        let (_, matrix) = block_matrix();
        assert!(matches!(
            SvdRanker::fit(&matrix, 0, 1, 0),
            Err(RecError::InvalidConfig { .. })
        ));
        assert!(matches!(
            SvdRanker::fit(&matrix, 2, 0, 0),
            Err(RecError::InvalidConfig { .. })
        ));
    }
}
