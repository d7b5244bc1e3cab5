use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Ranked item indices per user index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recommendations(Vec<Vec<u32>>);

impl Recommendations {
    pub fn new(lists: Vec<Vec<u32>>) -> Self {
        Self(lists)
    }

    #[inline]
    pub fn n_users(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, user: usize) -> &[u32] {
        self.0.get(user).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> {
        self.0.iter().map(|v| v.as_slice())
    }

    pub fn distinct_items(&self) -> FxHashSet<u32> {
        self.0.iter().flatten().copied().collect()
    }
}

impl From<Vec<Vec<u32>>> for Recommendations {
    fn from(lists: Vec<Vec<u32>>) -> Self {
        Self(lists)
    }
}
