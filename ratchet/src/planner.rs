//! Work-list computation.
//!
//! Given the discovered migration ids (ascending) and the set of completed
//! ids from the store, each function produces the ordered list of
//! (id, direction) steps for one command. The functions are pure; the
//! engine resolves ids back to migration objects.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::migration::Direction;

/// One step of a planned batch.
pub type Step = (i64, Direction);

/// All pending migrations, ascending.
pub fn migrate(all: &[i64], completed: &HashSet<i64>) -> Vec<Step> {
    all.iter()
        .copied()
        .filter(|id| !completed.contains(id))
        .map(|id| (id, Direction::Up))
        .collect()
}

/// Pending migrations strictly below `target`, ascending.
pub fn migrate_until_just_before(all: &[i64], completed: &HashSet<i64>, target: i64) -> Vec<Step> {
    all.iter()
        .copied()
        .filter(|id| *id < target && !completed.contains(id))
        .map(|id| (id, Direction::Up))
        .collect()
}

/// The requested ids in the given order, skipping ids that are unknown or
/// already applied.
pub fn up(all: &[i64], completed: &HashSet<i64>, requested: &[i64]) -> Vec<Step> {
    requested
        .iter()
        .copied()
        .filter(|id| {
            if all.binary_search(id).is_err() {
                warn!(id, "skipping unknown migration id");
                false
            } else if completed.contains(id) {
                debug!(id, "already applied, skipping");
                false
            } else {
                true
            }
        })
        .map(|id| (id, Direction::Up))
        .collect()
}

/// The requested ids in the given order, skipping ids that are unknown or
/// not currently applied.
pub fn down(all: &[i64], completed: &HashSet<i64>, requested: &[i64]) -> Vec<Step> {
    requested
        .iter()
        .copied()
        .filter(|id| {
            if all.binary_search(id).is_err() {
                warn!(id, "skipping unknown migration id");
                false
            } else if !completed.contains(id) {
                debug!(id, "not applied, skipping");
                false
            } else {
                true
            }
        })
        .map(|id| (id, Direction::Down))
        .collect()
}

/// The single most recently applied migration.
pub fn rollback(completed: &HashSet<i64>) -> Vec<Step> {
    completed
        .iter()
        .copied()
        .max()
        .map(|id| (id, Direction::Down))
        .into_iter()
        .collect()
}

/// Applied migrations strictly above `target`, descending.
pub fn rollback_until_just_after(completed: &HashSet<i64>, target: i64) -> Vec<Step> {
    let mut ids: Vec<i64> = completed.iter().copied().filter(|id| *id > target).collect();
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids.into_iter().map(|id| (id, Direction::Down)).collect()
}

/// Everything applied rolled back descending, then the full set applied
/// ascending.
pub fn reset(all: &[i64], completed: &HashSet<i64>) -> Vec<Step> {
    let mut plan = rollback_until_just_after(completed, i64::MIN);
    plan.extend(all.iter().copied().map(|id| (id, Direction::Up)));
    plan
}
