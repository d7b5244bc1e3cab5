use std::fmt;
use std::time::Instant;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};
use crate::interactions::RawInteraction;

/// External user or item key as it appears in the raw data.
///
/// Integers sort before strings, so a table with purely numeric ids maps
/// them in numeric order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalId {
    Int(i64),
    Str(String),
}

impl ExternalId {
    /// Parse a raw text field. Only the canonical decimal form of an integer
    /// becomes `Int`, so `"007"`, `"+5"` or `" 5"` stay distinct strings.
    pub fn parse(raw: &str) -> Self {
        match canonical_int(raw) {
            Some(n) => ExternalId::Int(n),
            None => ExternalId::Str(raw.to_string()),
        }
    }

    /// The same key in the other representation, if one exists.
    fn alternate(&self) -> Option<ExternalId> {
        match self {
            ExternalId::Int(n) => Some(ExternalId::Str(n.to_string())),
            ExternalId::Str(s) => canonical_int(s).map(ExternalId::Int),
        }
    }
}

fn canonical_int(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|n| n.to_string() == raw)
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalId::Int(n) => write!(f, "{n}"),
            ExternalId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ExternalId {
    fn from(n: i64) -> Self {
        ExternalId::Int(n)
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        ExternalId::Str(s.to_string())
    }
}

/// Bijection between external ids and dense indices in `[0, len)`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdMap {
    ids: Vec<ExternalId>,
    index: FxHashMap<ExternalId, u32>,
}

impl IdMap {
    /// Build from any collection of ids; duplicates collapse and the
    /// remaining ids are assigned indices in sorted order.
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = ExternalId>,
    {
        let mut ids: Vec<ExternalId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        let index = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i as u32))
            .collect();
        Self { ids, index }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index(&self, id: &ExternalId) -> Option<u32> {
        self.index.get(id).copied()
    }

    pub fn id(&self, index: u32) -> Option<&ExternalId> {
        self.ids.get(index as usize)
    }

    pub fn ids(&self) -> &[ExternalId] {
        &self.ids
    }

    /// Look up an id, falling back to its int/string twin. Keys written by
    /// one serializer as `5` and by another as `"5"` land on the same index.
    pub fn resolve(&self, id: &ExternalId) -> Option<u32> {
        self.index(id)
            .or_else(|| id.alternate().and_then(|alt| self.index(&alt)))
    }
}

/// Build user and item mappings from the sorted sets of distinct ids.
pub fn build_mappings(raw: &[RawInteraction]) -> Result<(IdMap, IdMap)> {
    if raw.is_empty() {
        return Err(RecError::EmptyInput);
    }
    let start = Instant::now();
    let users = IdMap::from_ids(raw.iter().map(|r| r.user_id.clone()));
    let items = IdMap::from_ids(raw.iter().map(|r| r.item_id.clone()));

    tracing::info!(
        n_users = users.len(),
        n_items = items.len(),
        "built id mappings in {:.4?}",
        start.elapsed()
    );
    Ok((users, items))
}
