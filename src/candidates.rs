use serde::{Deserialize, Serialize};

/// Candidate item lists keyed by a dense index (item index for item-item
/// candidates, user index for neighborhood candidates).
///
/// Lists are ordered by descending score, free of duplicates and never
/// contain their own key when keyed by item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateSet(Vec<Vec<u32>>);

impl CandidateSet {
    pub fn new(lists: Vec<Vec<u32>>) -> Self {
        Self(lists)
    }

    /// Number of keys, including keys with empty lists.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Candidates for `key`; unknown keys yield an empty slice.
    pub fn get(&self, key: u32) -> &[u32] {
        self.0.get(key as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u32])> {
        self.0
            .iter()
            .enumerate()
            .map(|(k, v)| (k as u32, v.as_slice()))
    }

    pub fn n_candidates(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }
}
