//! Deterministic candidate filtering and ordering for the work pools.

use crate::core::priority::priority_of;
use crate::core::types::{Pool, WorkItem};

/// Filter out claimed items and order the rest for claiming.
///
/// - Items carrying `claimed_label` are never returned.
/// - `Pool::Analysis` keeps the tracker's native order.
/// - `Pool::Execution` is stable-sorted by ascending priority, so ties keep native order.
pub fn order_candidates(pool: Pool, items: Vec<WorkItem>, claimed_label: &str) -> Vec<WorkItem> {
    let mut candidates: Vec<WorkItem> = items
        .into_iter()
        .filter(|item| !item.has_label(claimed_label))
        .collect();
    if pool == Pool::Execution {
        candidates.sort_by_cached_key(|item| priority_of(&item.body));
    }
    candidates
}
