use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::interactions::Interaction;

/// Held-out item indices per user index. Under leave-last-one-out each entry
/// holds zero or one item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeldOut(Vec<Vec<u32>>);

impl HeldOut {
    pub fn new(entries: Vec<Vec<u32>>) -> Self {
        Self(entries)
    }

    pub fn empty(n_users: usize) -> Self {
        Self(vec![Vec::new(); n_users])
    }

    #[inline]
    pub fn n_users(&self) -> usize {
        self.0.len()
    }

    /// Held-out items for `user`, empty when the user is unknown.
    pub fn get(&self, user: usize) -> &[u32] {
        self.0.get(user).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, user: usize, item: u32) -> bool {
        self.get(user).contains(&item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> {
        self.0.iter().map(|v| v.as_slice())
    }

    /// Number of users with a non-empty entry.
    pub fn n_evaluable(&self) -> usize {
        self.0.iter().filter(|v| !v.is_empty()).count()
    }
}

#[derive(Clone, Debug)]
pub struct Split {
    pub train: Vec<Interaction>,
    pub held_out: HeldOut,
}

/// Group interactions by user, each group ordered chronologically.
///
/// The sort is stable, so interactions without timestamps (or with equal
/// timestamps) keep their input order.
pub fn user_histories(interactions: &[Interaction], n_users: usize) -> Vec<Vec<Interaction>> {
    let mut histories: Vec<Vec<Interaction>> = vec![Vec::new(); n_users];
    for x in interactions {
        if let Some(h) = histories.get_mut(x.user as usize) {
            h.push(*x);
        }
    }
    for h in histories.iter_mut() {
        h.sort_by_key(|x| x.timestamp);
    }
    histories
}

/// Leave-last-one-out: every user with more than one interaction gives up
/// the chronologically last one. Single-interaction users stay entirely in
/// training and are never evaluable.
pub fn leave_last_one_out(interactions: &[Interaction], n_users: usize) -> Split {
    let start = Instant::now();
    let mut train = Vec::with_capacity(interactions.len());
    let mut held_out = HeldOut::empty(n_users);

    for (u, mut history) in user_histories(interactions, n_users)
        .into_iter()
        .enumerate()
    {
        if history.len() > 1 {
            if let Some(last) = history.pop() {
                held_out.0[u].push(last.item);
            }
        }
        train.extend(history);
    }

    tracing::info!(
        n_train = train.len(),
        n_held_out = held_out.n_evaluable(),
        "leave-last-one-out split in {:.4?}",
        start.elapsed()
    );
    Split { train, held_out }
}
