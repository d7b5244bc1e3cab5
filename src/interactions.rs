use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::ids::{ExternalId, IdMap};

/// One row of the raw interactions table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawInteraction {
    pub user_id: ExternalId,
    pub item_id: ExternalId,
    pub timestamp: Option<i64>,
    pub weight: f32,
}

impl RawInteraction {
    pub fn new(
        user_id: ExternalId,
        item_id: ExternalId,
        timestamp: Option<i64>,
        weight: f32,
    ) -> Self {
        Self {
            user_id,
            item_id,
            timestamp,
            weight,
        }
    }
}

/// An interaction remapped to dense indices.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user: u32,
    pub item: u32,
    pub timestamp: Option<i64>,
    pub weight: f32,
}

impl Interaction {
    pub fn new(user: u32, item: u32, timestamp: Option<i64>, weight: f32) -> Self {
        Self {
            user,
            item,
            timestamp,
            weight,
        }
    }
}

/// Collapse duplicate `(user, item)` pairs, keeping the last occurrence.
///
/// Survivors keep their relative input order.
pub fn dedup_last(raw: &[RawInteraction]) -> Vec<RawInteraction> {
    let mut last_pos: FxHashMap<(&ExternalId, &ExternalId), usize> = FxHashMap::default();
    for (pos, r) in raw.iter().enumerate() {
        last_pos.insert((&r.user_id, &r.item_id), pos);
    }
    let deduped: Vec<RawInteraction> = raw
        .iter()
        .enumerate()
        .filter(|(pos, r)| last_pos[&(&r.user_id, &r.item_id)] == *pos)
        .map(|(_, r)| r.clone())
        .collect();

    if deduped.len() < raw.len() {
        tracing::debug!(
            "dropped {} duplicate (user, item) pairs",
            raw.len() - deduped.len()
        );
    }
    deduped
}

/// Remap a raw table through the given mappings. Rows whose ids are unknown
/// to either mapping are skipped.
pub fn index_interactions(
    raw: &[RawInteraction],
    users: &IdMap,
    items: &IdMap,
) -> Vec<Interaction> {
    let mut skipped = 0usize;
    let indexed: Vec<Interaction> = raw
        .iter()
        .filter_map(|r| match (users.index(&r.user_id), items.index(&r.item_id)) {
            (Some(u), Some(i)) => Some(Interaction::new(u, i, r.timestamp, r.weight)),
            _ => {
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        tracing::warn!("{skipped} interactions reference ids outside the mapping");
    }
    indexed
}
