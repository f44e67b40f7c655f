//! Claim comment format and log-order resolution.
//!
//! Ownership of an item is decided solely by its comment log: the earliest
//! live claim record wins. A release comment from a worker retires that
//! worker's earlier claims, so an item handed back can be claimed afresh. The
//! claimed label is advisory and plays no part here.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ClaimOutcome, ClaimRecord, Comment, WorkerId};

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*issue-runner:(claim|release)\s+worker=(\S+)\s*-->").unwrap()
});

/// Render the claim comment posted by `worker`.
pub fn claim_comment(worker: &WorkerId) -> String {
    format!("<!-- issue-runner:claim worker={worker} -->\nClaimed by worker `{worker}`.")
}

/// Render the audit comment posted when `worker` gives an item up or loses a race.
pub fn release_comment(worker: &WorkerId, reason: &str) -> String {
    format!("<!-- issue-runner:release worker={worker} -->\nReleased by worker `{worker}`: {reason}.")
}

/// Extract the live claim records from a window of comments, ordered by creation time.
///
/// Comments are replayed in creation order (stable, so equal timestamps keep
/// log order). A release by a worker drops every claim that worker posted
/// before it.
pub fn claim_records(item_id: u64, comments: &[Comment]) -> Vec<ClaimRecord> {
    let mut markers: Vec<(&Comment, bool, WorkerId)> = comments
        .iter()
        .filter_map(|comment| {
            let caps = MARKER_RE.captures(&comment.body)?;
            let is_claim = &caps[1] == "claim";
            Some((comment, is_claim, WorkerId::new(&caps[2])))
        })
        .collect();
    markers.sort_by_key(|(comment, _, _)| comment.created_at);

    let mut records: Vec<ClaimRecord> = Vec::new();
    for (comment, is_claim, worker_id) in markers {
        if is_claim {
            records.push(ClaimRecord {
                item_id,
                worker_id,
                posted_at: comment.created_at,
            });
        } else {
            records.retain(|record| record.worker_id != worker_id);
        }
    }
    records
}

/// Decide the outcome for `me` given claim records sorted by `posted_at`.
pub fn resolve_claim(records: &[ClaimRecord], me: &WorkerId) -> ClaimOutcome {
    match records.first() {
        None => ClaimOutcome::Inconclusive,
        Some(earliest) if &earliest.worker_id == me => ClaimOutcome::Won,
        Some(_) => ClaimOutcome::Lost,
    }
}
