use std::hash::Hash;
use std::ops::AddAssign;
use std::time::Instant;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};
use crate::interactions::Interaction;

/// Analogy of `scipy.sparse.csr_matrix`
/// https://docs.scipy.org/doc/scipy/reference/generated/scipy.sparse.csr_matrix.html
///
/// Column indices inside a row are sorted ascending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix<T = u32, U = f32> {
    pub indices: Vec<T>,
    pub indptr: Vec<usize>,
    pub data: Vec<U>,
    pub n_cols: usize,
}

impl<T: Copy + Eq + Hash + Ord, U: Copy> CsrMatrix<T, U> {
    pub fn values(&self) -> (&[T], &[usize], &[U]) {
        (&self.indices, &self.indptr, &self.data)
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.indptr.len().saturating_sub(1)
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Column indices of row `i`, empty for out-of-range rows.
    pub fn row_indices(&self, i: usize) -> &[T] {
        if i >= self.n_rows() {
            return &[];
        }
        &self.indices[self.indptr[i]..self.indptr[i + 1]]
    }

    pub fn iter(&self) -> CsrMatrixIterator<'_, T, U> {
        CsrMatrixIterator {
            matrix: self,
            row_idx: 0,
        }
    }
}

impl CsrMatrix<u32, f32> {
    /// Build a `n_rows x n_cols` matrix with one entry per distinct
    /// `(user, item)` pair, duplicate weights summed. Rows and columns
    /// without interactions stay valid and empty.
    pub fn from_interactions(
        interactions: &[Interaction],
        n_rows: usize,
        n_cols: usize,
    ) -> Result<Self> {
        let start = Instant::now();
        let mut dok: DokMatrix<u32, f32> = DokMatrix::new(n_rows, n_cols);
        for x in interactions {
            dok.add(x.user as usize, x.item, x.weight)?;
        }
        let matrix = dok.to_csr();

        tracing::info!(
            n_rows,
            n_cols,
            nnz = matrix.nnz(),
            "built sparse interaction matrix in {:.4?}",
            start.elapsed()
        );
        Ok(matrix)
    }

    /// Same entries with rows and columns swapped, i.e. the item-major view
    /// of a user-major matrix.
    pub fn transpose(&self) -> CsrMatrix<u32, f32> {
        let n_rows = self.n_rows();
        let mut counts = vec![0usize; self.n_cols + 1];
        for &col in &self.indices {
            counts[col as usize + 1] += 1;
        }
        for c in 1..counts.len() {
            counts[c] += counts[c - 1];
        }
        let indptr = counts.clone();
        let mut next = counts;
        let mut indices = vec![0u32; self.nnz()];
        let mut data = vec![0f32; self.nnz()];
        // rows are visited in order, so every output row ends up sorted
        for row in 0..n_rows {
            for k in self.indptr[row]..self.indptr[row + 1] {
                let col = self.indices[k] as usize;
                let dest = next[col];
                indices[dest] = row as u32;
                data[dest] = self.data[k];
                next[col] += 1;
            }
        }
        CsrMatrix {
            indices,
            indptr,
            data,
            n_cols: n_rows,
        }
    }
}

pub struct CsrMatrixIterator<'a, T, U> {
    matrix: &'a CsrMatrix<T, U>,
    row_idx: usize,
}

impl<'a, T, U> Iterator for CsrMatrixIterator<'a, T, U>
where
    T: Copy + Eq + Hash + Ord,
    U: Copy,
{
    type Item = Vec<(T, U)>;

    fn next(&mut self) -> Option<Self::Item> {
        let sparse_row = get_row(self.matrix, self.row_idx, true);
        self.row_idx += 1;
        sparse_row.map(|row| row.collect())
    }
}

pub fn get_row<'a, T, U>(
    matrix: &'a CsrMatrix<T, U>,
    i: usize,
    in_iterator: bool,
) -> Option<Box<dyn Iterator<Item = (T, U)> + 'a>>
where
    T: Copy + Eq + Hash + Ord + 'a,
    U: Copy + 'a,
{
    if i >= matrix.n_rows() {
        return None;
    }
    let start = matrix.indptr[i];
    let end = matrix.indptr[i + 1];
    if start == end {
        return if in_iterator {
            // avoid ending the iterator prematurely
            Some(Box::new(std::iter::empty()))
        } else {
            None
        };
    }

    let index_iter = (start..end).map(|i| (matrix.indices[i], matrix.data[i]));
    Some(Box::new(index_iter))
}

/// Analogy of `scipy.sparse.dok_matrix`
/// https://docs.scipy.org/doc/scipy/reference/generated/scipy.sparse.dok_matrix.html
pub struct DokMatrix<T = u32, U = f32> {
    data: Vec<FxHashMap<T, U>>,
    n_cols: usize,
}

impl<U> DokMatrix<u32, U>
where
    U: Copy + AddAssign,
{
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            data: (0..n_rows).map(|_| FxHashMap::default()).collect(),
            n_cols,
        }
    }

    /// Accumulate `val` into `(row, col)`.
    pub fn add(&mut self, row: usize, col: u32, val: U) -> Result<()> {
        if row >= self.data.len() || col as usize >= self.n_cols {
            return Err(RecError::DimensionMismatch {
                expected: format!("index within {}x{}", self.data.len(), self.n_cols),
                actual: format!("({row}, {col})"),
            });
        }
        self.data[row]
            .entry(col)
            .and_modify(|v| *v += val)
            .or_insert(val);
        Ok(())
    }

    pub fn to_csr(&self) -> CsrMatrix<u32, U> {
        let mut indices: Vec<u32> = Vec::new();
        let mut indptr: Vec<usize> = vec![0];
        let mut data: Vec<U> = Vec::new();
        for d in &self.data {
            if !d.is_empty() {
                let mut mapping: Vec<(&u32, &U)> = d.iter().collect();
                mapping.sort_unstable_by_key(|(i, _)| **i);
                let (idx, dat): (Vec<u32>, Vec<U>) = mapping.into_iter().unzip();
                indices.extend(idx);
                data.extend(dat);
            }
            // ensure keeping empty rows
            indptr.push(indices.len());
        }
        CsrMatrix {
            indices,
            indptr,
            data,
            n_cols: self.n_cols,
        }
    }
}
