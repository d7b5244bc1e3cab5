use fxhash::FxHashSet;

use crate::interactions::Interaction;

/// Distinct items each user interacted with, indexed by user.
pub fn build_consumed(interactions: &[Interaction], n_users: usize) -> Vec<FxHashSet<u32>> {
    let mut user_consumed: Vec<FxHashSet<u32>> = vec![FxHashSet::default(); n_users];
    for x in interactions {
        if let Some(seen) = user_consumed.get_mut(x.user as usize) {
            seen.insert(x.item);
        }
    }
    user_consumed
}

/// Same as [`build_consumed`] but as sorted item vectors, which keeps
/// intersection work cache friendly.
pub(crate) fn build_consumed_sorted(interactions: &[Interaction], n_users: usize) -> Vec<Vec<u32>> {
    let mut user_consumed: Vec<Vec<u32>> = vec![Vec::new(); n_users];
    for x in interactions {
        if let Some(items) = user_consumed.get_mut(x.user as usize) {
            items.push(x.item);
        }
    }
    for items in user_consumed.iter_mut() {
        items.sort_unstable();
        items.dedup();
    }
    user_consumed
}
