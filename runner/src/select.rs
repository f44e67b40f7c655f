//! Work pool selection against live tracker state.
//!
//! Nothing here is cached: every call re-lists the pools so claim decisions
//! never act on a stale view of the claimed label.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::selector::order_candidates;
use crate::core::types::{Pool, WorkItem};
use crate::io::config::LabelConfig;
use crate::io::tracker::Tracker;

/// Fetch and order the unclaimed candidates of one pool.
pub fn select_candidates<T: Tracker + ?Sized>(
    tracker: &T,
    labels: &LabelConfig,
    pool: Pool,
) -> Result<Vec<WorkItem>> {
    let items = tracker
        .list_items(labels.for_pool(pool))
        .with_context(|| format!("list {pool} pool"))?;
    let candidates = order_candidates(pool, items, &labels.claimed);
    debug!(%pool, count = candidates.len(), "selected candidates");
    Ok(candidates)
}

/// Candidates of every pool in claim order: all analysis items, then execution items.
///
/// An item tagged for both pools is attempted once, as an analysis item.
pub fn claim_sequence<T: Tracker + ?Sized>(
    tracker: &T,
    labels: &LabelConfig,
) -> Result<Vec<(Pool, WorkItem)>> {
    let mut seen = BTreeSet::new();
    let mut sequence = Vec::new();
    for pool in Pool::ORDERED {
        for item in select_candidates(tracker, labels, pool)? {
            if seen.insert(item.id) {
                sequence.push((pool, item));
            }
        }
    }
    Ok(sequence)
}

/// Cheap existence check used by watch mode before starting a batch.
pub fn has_eligible_work<T: Tracker + ?Sized>(tracker: &T, labels: &LabelConfig) -> Result<bool> {
    for pool in Pool::ORDERED {
        if !select_candidates(tracker, labels, pool)?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}
