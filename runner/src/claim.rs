//! Claim coordinator: optimistic mutual exclusion over the tracker.
//!
//! There is no lock server. A worker marks the item with the claimed label
//! (advisory, may be set by several workers at once), appends a claim comment
//! carrying its identity, waits out a random jitter window so concurrent
//! claims can land, then reads the comment log back. The earliest claim
//! comment wins; everyone else backs off and leaves an audit comment.
//!
//! Known weak spots, kept as-is:
//! - An empty claim window (degraded read) is `Inconclusive` and proceeds, so a
//!   failed read under contention can yield two owners.
//! - Losers never remove the label, so the label alone cannot be trusted as
//!   "currently owned" after a worker crash; only the log can.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::core::claim::{claim_comment, claim_records, release_comment, resolve_claim};
use crate::core::types::{ClaimOutcome, WorkItem, WorkerId};
use crate::io::config::RunnerConfig;
use crate::io::sleep::Sleeper;
use crate::io::tracker::Tracker;

/// Tunables for one claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSettings {
    pub claimed_label: String,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub comment_window: usize,
}

impl ClaimSettings {
    pub fn from_config(cfg: &RunnerConfig) -> Self {
        Self {
            claimed_label: cfg.labels.claimed.clone(),
            jitter_min: Duration::from_millis(cfg.claim.jitter_min_ms),
            jitter_max: Duration::from_millis(cfg.claim.jitter_max_ms),
            comment_window: cfg.claim.comment_window,
        }
    }

    fn jitter(&self) -> Duration {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        rand::thread_rng().gen_range(self.jitter_min..=self.jitter_max)
    }
}

/// Try to take ownership of `item` for `worker`.
///
/// Label and release-comment failures are logged and ignored. Failing to post
/// the claim comment itself counts as `Lost`.
#[instrument(skip_all, fields(item = item.id, worker = %worker))]
pub fn try_claim<T, S>(
    tracker: &T,
    sleeper: &S,
    settings: &ClaimSettings,
    item: &WorkItem,
    worker: &WorkerId,
) -> ClaimOutcome
where
    T: Tracker + ?Sized,
    S: Sleeper + ?Sized,
{
    if let Err(err) = tracker.add_label(item.id, &settings.claimed_label) {
        warn!(err = %format!("{err:#}"), "failed to add claimed label");
    }

    if let Err(err) = tracker.post_comment(item.id, &claim_comment(worker)) {
        warn!(err = %format!("{err:#}"), "failed to post claim comment");
        return ClaimOutcome::Lost;
    }

    let jitter = settings.jitter();
    debug!(millis = jitter.as_millis() as u64, "waiting for concurrent claims");
    sleeper.sleep(jitter);

    let comments = match tracker.get_comments(item.id, settings.comment_window) {
        Ok(comments) => comments,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "failed to read claim comments");
            Vec::new()
        }
    };
    let records = claim_records(item.id, &comments);
    let outcome = resolve_claim(&records, worker);

    match outcome {
        ClaimOutcome::Won => info!(title = %item.title, "claim won"),
        ClaimOutcome::Inconclusive => {
            warn!("no claim comments visible; proceeding as owner");
        }
        ClaimOutcome::Lost => {
            let winner = records
                .first()
                .map(|record| record.worker_id.to_string())
                .unwrap_or_default();
            info!(%winner, "claim lost");
            let body = release_comment(worker, &format!("lost claim to `{winner}`"));
            if let Err(err) = tracker.post_comment(item.id, &body) {
                warn!(err = %format!("{err:#}"), "failed to post release comment");
            }
        }
    }
    outcome
}

/// Give up an owned item: drop the claimed label and leave an audit comment.
///
/// Only the current owner calls this. Both steps are best-effort.
#[instrument(skip_all, fields(item = item_id, worker = %worker))]
pub fn release<T: Tracker + ?Sized>(
    tracker: &T,
    claimed_label: &str,
    item_id: u64,
    worker: &WorkerId,
    reason: &str,
) {
    if let Err(err) = tracker.remove_label(item_id, claimed_label) {
        warn!(err = %format!("{err:#}"), "failed to remove claimed label");
    }
    if let Err(err) = tracker.post_comment(item_id, &release_comment(worker, reason)) {
        warn!(err = %format!("{err:#}"), "failed to post release comment");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::test_support::{Faults, MemoryTracker, RecordingSleeper, t0, work_item};

    fn settings() -> ClaimSettings {
        ClaimSettings {
            claimed_label: "claimed".to_string(),
            jitter_min: Duration::from_millis(3),
            jitter_max: Duration::from_millis(7),
            comment_window: 10,
        }
    }

    #[test]
    fn uncontended_claim_wins_and_labels() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        let sleeper = RecordingSleeper::default();
        let me = WorkerId::new("w1");
        let item = tracker.item(1).expect("item");

        let outcome = try_claim(&tracker, &sleeper, &settings(), &item, &me);

        assert_eq!(outcome, ClaimOutcome::Won);
        assert!(tracker.item(1).expect("item").has_label("claimed"));
        let jitter = sleeper.recorded();
        assert_eq!(jitter.len(), 1);
        assert!(jitter[0] >= Duration::from_millis(3) && jitter[0] <= Duration::from_millis(7));
    }

    #[test]
    fn earlier_foreign_claim_wins_even_if_it_lands_later() {
        let tracker = Arc::new(MemoryTracker::new(vec![work_item(1, "", &["ready"])]));
        let other = WorkerId::new("w-other");
        // Arrives during our jitter window, stamped earlier than our own comment.
        let sleeper = {
            let tracker = Arc::clone(&tracker);
            let body = claim_comment(&other);
            RecordingSleeper::with_hook(move |_| tracker.insert_comment_at(1, &body, t0()))
        };
        let me = WorkerId::new("w1");
        let item = tracker.item(1).expect("item");

        let outcome = try_claim(tracker.as_ref(), &sleeper, &settings(), &item, &me);

        assert_eq!(outcome, ClaimOutcome::Lost);
        let last = tracker.comments(1).pop().expect("release comment");
        assert!(last.body.contains("issue-runner:release worker=w1"));
        assert!(last.body.contains("w-other"));
        // The loser added the label and never removes it.
        assert!(tracker.item(1).expect("item").has_label("claimed"));
    }

    #[test]
    fn failed_claim_comment_counts_as_lost() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        tracker.set_faults(Faults {
            post_comment: true,
            ..Faults::default()
        });
        let sleeper = RecordingSleeper::default();
        let item = tracker.item(1).expect("item");

        let outcome = try_claim(&tracker, &sleeper, &settings(), &item, &WorkerId::new("w1"));

        assert_eq!(outcome, ClaimOutcome::Lost);
        assert!(sleeper.recorded().is_empty());
    }

    #[test]
    fn label_failure_is_swallowed() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        tracker.set_faults(Faults {
            add_label: true,
            ..Faults::default()
        });
        let item = tracker.item(1).expect("item");

        let outcome = try_claim(
            &tracker,
            &RecordingSleeper::default(),
            &settings(),
            &item,
            &WorkerId::new("w1"),
        );

        assert_eq!(outcome, ClaimOutcome::Won);
        assert!(!tracker.item(1).expect("item").has_label("claimed"));
    }

    #[test]
    fn unreadable_log_is_inconclusive() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        tracker.set_faults(Faults {
            get_comments: true,
            ..Faults::default()
        });
        let item = tracker.item(1).expect("item");

        let outcome = try_claim(
            &tracker,
            &RecordingSleeper::default(),
            &settings(),
            &item,
            &WorkerId::new("w1"),
        );

        assert_eq!(outcome, ClaimOutcome::Inconclusive);
        assert!(outcome.proceeds());
    }

    #[test]
    fn release_removes_label_and_comments() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready", "claimed"])]);
        let me = WorkerId::new("w1");

        release(&tracker, "claimed", 1, &me, "max retries exceeded");

        assert!(!tracker.item(1).expect("item").has_label("claimed"));
        let comments = tracker.comments(1);
        assert_eq!(comments.len(), 1);
        assert!(comments[0].body.contains("max retries exceeded"));
    }

    #[test]
    fn zero_width_jitter_is_exact() {
        let mut s = settings();
        s.jitter_min = Duration::from_secs(2);
        s.jitter_max = Duration::from_secs(2);
        assert_eq!(s.jitter(), Duration::from_secs(2));
    }
}
