//! Iteration driver: select, claim, invoke, classify, then retry or move on.
//!
//! One iteration walks `Selecting -> Claiming -> Invoking -> Classifying` and
//! ends in exactly one [`IterationOutcome`]. Retry state lives only inside
//! one iteration. The only state a batch carries between iterations is the list
//! of items it already skipped, which selection defers behind other candidates.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::claim::{ClaimSettings, release, try_claim};
use crate::core::classifier::{classify, has_completion_signal};
use crate::core::retry::{RetryDecision, RetryPolicy};
use crate::core::types::{ClaimOutcome, ErrorCategory, Pool, WorkItem, WorkerId};
use crate::io::agent::{Agent, AgentRequest, AgentTranscript};
use crate::io::config::RunnerConfig;
use crate::io::prompt::PromptEngine;
use crate::io::sleep::Sleeper;
use crate::io::tracker::{BoardUpdate, Tracker};
use crate::select::{claim_sequence, has_eligible_work};

/// How one iteration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The tool's result was accepted (success, or completed work despite noise).
    Advanced {
        item_id: u64,
        attempts: u32,
        work_completed: bool,
    },
    /// The retry cap was exhausted; the item was released without being marked done.
    Skipped {
        item_id: u64,
        attempts: u32,
        category: ErrorCategory,
        /// Whether any other candidate remained when the item was given up.
        work_remains: bool,
    },
    /// Every selection round ended without a won claim.
    Abandoned { rounds: u32 },
    /// Neither pool had an unclaimed candidate.
    NoWork,
    /// The transcript carried the completion signal; the whole run ends.
    Terminated { item_id: u64 },
}

enum Selection {
    Claimed(Pool, WorkItem),
    NoWork,
    Abandoned { rounds: u32 },
}

/// Everything one worker needs to run iterations.
pub struct IterationDriver<'a, T: ?Sized, A: ?Sized, S: ?Sized> {
    tracker: &'a T,
    agent: &'a A,
    sleeper: &'a S,
    cfg: &'a RunnerConfig,
    worker: &'a WorkerId,
    workdir: PathBuf,
    claim: ClaimSettings,
    retry: RetryPolicy,
    prompts: PromptEngine,
}

impl<'a, T, A, S> IterationDriver<'a, T, A, S>
where
    T: Tracker + ?Sized,
    A: Agent + ?Sized,
    S: Sleeper + ?Sized,
{
    pub fn new(
        tracker: &'a T,
        agent: &'a A,
        sleeper: &'a S,
        cfg: &'a RunnerConfig,
        worker: &'a WorkerId,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tracker,
            agent,
            sleeper,
            cfg,
            worker,
            workdir: workdir.into(),
            claim: ClaimSettings::from_config(cfg),
            retry: cfg.retry.policy(),
            prompts: PromptEngine::new(),
        }
    }

    pub fn tracker(&self) -> &'a T {
        self.tracker
    }

    pub fn sleeper(&self) -> &'a S {
        self.sleeper
    }

    pub fn config(&self) -> &'a RunnerConfig {
        self.cfg
    }

    /// Run one iteration (1-indexed within its batch) with no deferred items.
    pub fn run_iteration(&self, iteration: u32) -> Result<IterationOutcome> {
        self.run_iteration_deferring(iteration, &[])
    }

    /// Run one iteration, trying items in `deferred` only after every other candidate.
    ///
    /// Deferred items are tried in the order given, so passing the least
    /// recently skipped item first rotates through them.
    #[instrument(skip(self, deferred), fields(worker = %self.worker, deferred = deferred.len()))]
    pub fn run_iteration_deferring(
        &self,
        iteration: u32,
        deferred: &[u64],
    ) -> Result<IterationOutcome> {
        let (pool, item) = match self.select_and_claim(deferred) {
            Selection::Claimed(pool, item) => (pool, item),
            Selection::NoWork => {
                info!("no unclaimed work in any pool");
                return Ok(IterationOutcome::NoWork);
            }
            Selection::Abandoned { rounds } => {
                warn!(rounds, "no claim won; abandoning iteration");
                return Ok(IterationOutcome::Abandoned { rounds });
            }
        };
        self.set_board_status(item.id, &self.cfg.board.in_progress);

        let prompt = self.prompts.render(&item, pool, self.worker, self.cfg)?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let transcript = self.invoke(&item, iteration, attempt, &prompt);

            let verdict = classify(&transcript.text);
            if has_completion_signal(&transcript.text, &self.cfg.completion_signal) {
                info!(item = item.id, attempt, work_completed = verdict.work_completed, "completion signal received");
                if verdict.work_completed {
                    self.finish(item.id);
                } else {
                    self.release(item.id, "run finished");
                }
                return Ok(IterationOutcome::Terminated { item_id: item.id });
            }

            match self.retry.decide(verdict, attempt) {
                RetryDecision::Advance => {
                    if verdict.category.is_error() {
                        info!(item = item.id, category = %verdict.category, "work completed; ignoring tool error");
                    }
                    if verdict.work_completed {
                        self.finish(item.id);
                    } else {
                        self.release(item.id, "iteration finished");
                    }
                    info!(item = item.id, attempt, work_completed = verdict.work_completed, "iteration advanced");
                    return Ok(IterationOutcome::Advanced {
                        item_id: item.id,
                        attempts: attempt,
                        work_completed: verdict.work_completed,
                    });
                }
                RetryDecision::Retry { delay } => {
                    warn!(
                        item = item.id,
                        attempt,
                        category = %verdict.category,
                        delay_secs = delay.as_secs(),
                        "tool failed; retrying"
                    );
                    self.sleeper.sleep(delay);
                }
                RetryDecision::GiveUp => {
                    let work_remains = self.work_remains();
                    warn!(
                        item = item.id,
                        attempts = attempt,
                        category = %verdict.category,
                        work_remains,
                        "max retries exceeded; skipping item"
                    );
                    self.release(item.id, &format!("gave up after {attempt} attempts ({})", verdict.category));
                    return Ok(IterationOutcome::Skipped {
                        item_id: item.id,
                        attempts: attempt,
                        category: verdict.category,
                        work_remains,
                    });
                }
            }
        }
    }

    /// Walk candidates in claim order until one claim proceeds.
    ///
    /// At most `max_attempts_per_round` distinct items are tried per round;
    /// rounds are separated by a fixed backoff and re-list the pools. Items in
    /// `deferred` move behind all other candidates, in `deferred` order.
    fn select_and_claim(&self, deferred: &[u64]) -> Selection {
        let claim_cfg = &self.cfg.claim;
        for round in 1..=claim_cfg.max_rounds {
            match claim_sequence(self.tracker, &self.cfg.labels) {
                Ok(sequence) if sequence.is_empty() => return Selection::NoWork,
                Ok(sequence) => {
                    let (fresh, mut later): (Vec<_>, Vec<_>) = sequence
                        .into_iter()
                        .partition(|(_, item)| !deferred.contains(&item.id));
                    later.sort_by_key(|(_, item)| deferred.iter().position(|id| *id == item.id));
                    let ordered = fresh.into_iter().chain(later);
                    for (pool, item) in ordered.take(claim_cfg.max_attempts_per_round) {
                        match try_claim(self.tracker, self.sleeper, &self.claim, &item, self.worker) {
                            ClaimOutcome::Won => return Selection::Claimed(pool, item),
                            ClaimOutcome::Inconclusive => {
                                warn!(item = item.id, "claim inconclusive; treating as won");
                                return Selection::Claimed(pool, item);
                            }
                            ClaimOutcome::Lost => {}
                        }
                    }
                }
                Err(err) => warn!(round, err = %format!("{err:#}"), "failed to list work"),
            }
            if round < claim_cfg.max_rounds {
                info!(round, "no claim won this round; backing off");
                self.sleeper
                    .sleep(Duration::from_secs(claim_cfg.round_backoff_secs));
            }
        }
        Selection::Abandoned {
            rounds: claim_cfg.max_rounds,
        }
    }

    fn invoke(&self, item: &WorkItem, iteration: u32, attempt: u32, prompt: &str) -> AgentTranscript {
        let log_path = self
            .workdir
            .join(".issue-runner")
            .join("logs")
            .join(self.worker.as_str())
            .join(format!("{}-{iteration}-{attempt}.log", item.id));
        let request = AgentRequest {
            workdir: self.workdir.clone(),
            prompt: prompt.to_string(),
            timeout: Duration::from_secs(self.cfg.agent.timeout_secs),
            output_limit_bytes: self.cfg.agent.output_limit_bytes,
            log_path: Some(log_path),
        };
        match self.agent.invoke(&request) {
            Ok(transcript) => transcript,
            Err(err) => {
                warn!(item = item.id, attempt, err = %format!("{err:#}"), "agent invocation failed");
                AgentTranscript::empty()
            }
        }
    }

    /// Re-query the pools; a failed query counts as "work remains".
    fn work_remains(&self) -> bool {
        has_eligible_work(self.tracker, &self.cfg.labels).unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "failed to check remaining work");
            true
        })
    }

    fn finish(&self, item_id: u64) {
        if let Err(err) = self.tracker.close_item(item_id, "Completed: CI passed.") {
            warn!(item = item_id, err = %format!("{err:#}"), "failed to close item");
        }
        self.set_board_status(item_id, &self.cfg.board.done);
        if let Err(err) = self.tracker.remove_label(item_id, &self.cfg.labels.claimed) {
            warn!(item = item_id, err = %format!("{err:#}"), "failed to remove claimed label");
        }
    }

    fn release(&self, item_id: u64, reason: &str) {
        release(self.tracker, &self.cfg.labels.claimed, item_id, self.worker, reason);
    }

    fn set_board_status(&self, item_id: u64, value: &str) {
        match self
            .tracker
            .set_board_status(item_id, &self.cfg.board.field, value)
        {
            Ok(BoardUpdate::Applied) => {}
            Ok(BoardUpdate::Unsupported) => {}
            Err(err) => warn!(item = item_id, err = %format!("{err:#}"), "failed to update board status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::claim::claim_comment;
    use crate::test_support::{
        Faults, MemoryTracker, RecordingSleeper, ScriptedAgent, t0, work_item,
    };

    const DONE: &str = "CI passed on PR #5\n✓ Closed issue #1";
    const NETWORK: &str = "Error: connection reset by peer";

    fn driver<'a>(
        tracker: &'a MemoryTracker,
        agent: &'a ScriptedAgent,
        sleeper: &'a RecordingSleeper,
        cfg: &'a RunnerConfig,
        worker: &'a WorkerId,
    ) -> IterationDriver<'a, MemoryTracker, ScriptedAgent, RecordingSleeper> {
        IterationDriver::new(tracker, agent, sleeper, cfg, worker, "/tmp/issue-runner-tests")
    }

    fn config() -> RunnerConfig {
        let mut cfg = RunnerConfig::default();
        cfg.claim.jitter_min_ms = 0;
        cfg.claim.jitter_max_ms = 0;
        cfg
    }

    #[test]
    fn completed_work_closes_and_releases() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        let agent = ScriptedAgent::new(vec![DONE]);
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert_eq!(
            outcome,
            IterationOutcome::Advanced {
                item_id: 1,
                attempts: 1,
                work_completed: true
            }
        );
        assert!(tracker.is_closed(1));
        assert!(!tracker.item(1).expect("item").has_label("claimed"));
        assert_eq!(tracker.board_status(1).as_deref(), Some("Done"));
    }

    #[test]
    fn network_errors_retry_up_to_the_cap_then_skip() {
        let tracker = MemoryTracker::new(vec![
            work_item(1, "1 - Critical", &["ready"]),
            work_item(2, "", &["ready"]),
        ]);
        let agent = ScriptedAgent::repeating(NETWORK);
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert_eq!(agent.invocations(), 5);
        assert_eq!(
            outcome,
            IterationOutcome::Skipped {
                item_id: 1,
                attempts: 5,
                category: ErrorCategory::NetworkTransient,
                work_remains: true
            }
        );
        let backoffs: Vec<u64> = sleeper
            .recorded()
            .iter()
            .filter(|d| !d.is_zero())
            .map(Duration::as_secs)
            .collect();
        assert_eq!(backoffs, vec![20, 40, 60, 80]);
        // Released so another worker (or a later iteration) can pick it up again.
        assert!(!tracker.item(1).expect("item").has_label("claimed"));
        assert!(!tracker.is_closed(1));
    }

    #[test]
    fn exhausted_retries_with_nothing_left_reports_no_remaining_work() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        let agent = ScriptedAgent::repeating("");
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert!(matches!(
            outcome,
            IterationOutcome::Skipped {
                category: ErrorCategory::EmptyOutput,
                work_remains: false,
                ..
            }
        ));
    }

    #[test]
    fn completed_work_short_circuits_a_matched_error() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        let transcript = format!("{DONE}\nError: could not save notes");
        let agent = ScriptedAgent::new(vec![transcript.as_str()]);
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert_eq!(agent.invocations(), 1);
        assert!(matches!(
            outcome,
            IterationOutcome::Advanced {
                work_completed: true,
                ..
            }
        ));
    }

    #[test]
    fn transient_error_then_success_advances() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        let agent = ScriptedAgent::new(vec!["No messages returned", "implemented the change"]);
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert_eq!(
            outcome,
            IterationOutcome::Advanced {
                item_id: 1,
                attempts: 2,
                work_completed: false
            }
        );
        assert!(sleeper.recorded().contains(&Duration::from_secs(15)));
        assert!(!tracker.is_closed(1));
    }

    #[test]
    fn completion_signal_terminates_regardless_of_classification() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        let agent = ScriptedAgent::new(vec!["Error: nothing to do\n<promise>COMPLETE</promise>"]);
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert_eq!(outcome, IterationOutcome::Terminated { item_id: 1 });
        assert_eq!(agent.invocations(), 1);
    }

    #[test]
    fn completion_signal_still_closes_finished_work() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        let agent = ScriptedAgent::new(vec!["CI passed\nClosed issue #1\n<promise>COMPLETE</promise>"]);
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert_eq!(outcome, IterationOutcome::Terminated { item_id: 1 });
        assert!(tracker.is_closed(1));
        assert_eq!(tracker.board_status(1).as_deref(), Some("Done"));
        assert!(!tracker.item(1).expect("item").has_label("claimed"));
    }

    #[test]
    fn completion_signal_without_markers_leaves_item_open() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        let agent = ScriptedAgent::new(vec!["Nothing left.\n<promise>COMPLETE</promise>"]);
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert!(!tracker.is_closed(1));
        assert_eq!(tracker.board_status(1).as_deref(), Some("In Progress"));
        assert!(!tracker.item(1).expect("item").has_label("claimed"));
    }

    #[test]
    fn deferred_items_are_tried_after_other_candidates() {
        let tracker = MemoryTracker::new(vec![
            work_item(1, "1 - Critical", &["ready"]),
            work_item(2, "5 - Trivial", &["ready"]),
        ]);
        let agent = ScriptedAgent::repeating("implemented");
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");
        let driver = driver(&tracker, &agent, &sleeper, &cfg, &me);

        let first = driver.run_iteration_deferring(1, &[1]).expect("iteration");
        assert!(matches!(first, IterationOutcome::Advanced { item_id: 2, .. }));

        // Deferral never hides the only remaining candidate.
        tracker.close_item(2, "done").expect("close");
        let second = driver.run_iteration_deferring(2, &[1]).expect("iteration");
        assert!(matches!(second, IterationOutcome::Advanced { item_id: 1, .. }));
    }

    #[test]
    fn analysis_pool_is_claimed_before_execution_pool() {
        let tracker = MemoryTracker::new(vec![
            work_item(1, "1 - Critical", &["ready"]),
            work_item(2, "", &["needs-analysis"]),
        ]);
        let agent = ScriptedAgent::new(vec!["refined the issue"]);
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert!(matches!(outcome, IterationOutcome::Advanced { item_id: 2, .. }));
        assert!(agent.prompts()[0].contains("refine this issue"));
        assert!(tracker.comments(1).is_empty());
    }

    #[test]
    fn lost_claim_moves_to_next_candidate_in_order() {
        let tracker = MemoryTracker::new(vec![
            work_item(1, "", &["needs-analysis"]),
            work_item(2, "", &["ready"]),
        ]);
        // Another worker already holds item 1 in the log, without the label visible yet.
        tracker.insert_comment_at(1, &claim_comment(&WorkerId::new("w-other")), t0());
        let agent = ScriptedAgent::new(vec!["done"]);
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert!(matches!(outcome, IterationOutcome::Advanced { item_id: 2, .. }));
        let first_claim_on_1 = tracker.comments(1)[1].created_at;
        let claim_on_2 = tracker.comments(2)[0].created_at;
        assert!(first_claim_on_1 < claim_on_2);
        assert!(tracker.item(1).expect("item").has_label("claimed"));
    }

    #[test]
    fn claim_attempts_per_round_are_capped_then_rounds_back_off() {
        let items: Vec<_> = (1..=7).map(|id| work_item(id, "", &["ready"])).collect();
        let tracker = Arc::new(MemoryTracker::new(items));
        // Every claim is beaten by a competitor whose comment is stamped earlier.
        let sleeper = {
            let tracker = Arc::clone(&tracker);
            RecordingSleeper::with_hook(move |_| {
                for id in 1..=7 {
                    if tracker.comments(id).len() == 1 {
                        tracker.insert_comment_at(id, &claim_comment(&WorkerId::new("w-fast")), t0());
                    }
                }
            })
        };
        let agent = ScriptedAgent::new(Vec::new());
        let mut cfg = config();
        cfg.claim.max_rounds = 2;
        let me = WorkerId::new("w1");

        let outcome = driver(tracker.as_ref(), &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert_eq!(outcome, IterationOutcome::Abandoned { rounds: 2 });
        assert_eq!(agent.invocations(), 0);
        // Round 1 tries items 1..=5; by round 2 they carry the label, so 6 and 7 remain.
        for id in 1..=7 {
            assert!(!tracker.comments(id).is_empty(), "item {id} never attempted");
        }
        assert!(sleeper.recorded().contains(&Duration::from_secs(30)));
    }

    #[test]
    fn empty_pools_report_no_work() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready", "claimed"])]);
        let agent = ScriptedAgent::new(Vec::new());
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert_eq!(outcome, IterationOutcome::NoWork);
    }

    #[test]
    fn list_failures_exhaust_rounds_without_erroring() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        tracker.set_faults(Faults {
            list_items: true,
            ..Faults::default()
        });
        let agent = ScriptedAgent::new(Vec::new());
        let sleeper = RecordingSleeper::default();
        let cfg = config();
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert_eq!(outcome, IterationOutcome::Abandoned { rounds: 3 });
        assert_eq!(sleeper.recorded().len(), 2);
    }

    #[test]
    fn agent_failure_is_retried_as_empty_output() {
        let tracker = MemoryTracker::new(vec![work_item(1, "", &["ready"])]);
        // Queue runs dry after one transcript, so later invocations error out.
        let agent = ScriptedAgent::new(vec![""]);
        let sleeper = RecordingSleeper::default();
        let mut cfg = config();
        cfg.retry.max_attempts = 2;
        let me = WorkerId::new("w1");

        let outcome = driver(&tracker, &agent, &sleeper, &cfg, &me)
            .run_iteration(1)
            .expect("iteration");

        assert!(matches!(
            outcome,
            IterationOutcome::Skipped {
                attempts: 2,
                category: ErrorCategory::EmptyOutput,
                ..
            }
        ));
    }
}
