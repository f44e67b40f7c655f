//! Batch and watch control around the iteration driver.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::io::agent::Agent;
use crate::io::sleep::{CancelToken, Sleeper, sleep_unless_cancelled};
use crate::io::tracker::Tracker;
use crate::iteration::{IterationDriver, IterationOutcome};
use crate::select::has_eligible_work;

/// Granularity of idle sleeps, bounding how long an interrupt goes unnoticed.
const IDLE_SLICE: Duration = Duration::from_secs(1);

/// Progress of one batch. Reset at the start of every batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchState {
    pub batch_number: u32,
    pub iterations_run: u32,
    pub completion_signal_seen: bool,
    /// Items given up on in this batch, least recently skipped first.
    /// Later iterations try them only after every other candidate.
    pub skipped: Vec<u64>,
}

/// Reason why `run_batch` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStop {
    /// A transcript carried the completion signal.
    Terminated,
    /// No candidate work remained.
    NoWork,
    /// The configured iteration bound was reached without the signal.
    IterationLimit,
    /// Cancellation was requested between iterations.
    Cancelled,
}

/// Summary of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub state: BatchState,
    pub stop: BatchStop,
}

/// Reason why `run_watch` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStop {
    Terminated,
    Cancelled,
}

/// Summary of a watch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOutcome {
    pub batches: u32,
    pub stop: WatchStop,
}

/// Run up to `max_iterations` iterations.
///
/// Cancellation is only observed between iterations; an iteration in flight
/// always runs to completion.
#[instrument(skip(driver, cancel))]
pub fn run_batch<T, A, S>(
    driver: &IterationDriver<'_, T, A, S>,
    batch_number: u32,
    max_iterations: u32,
    cancel: &CancelToken,
) -> Result<BatchOutcome>
where
    T: Tracker + ?Sized,
    A: Agent + ?Sized,
    S: Sleeper + ?Sized,
{
    let mut state = BatchState {
        batch_number,
        ..BatchState::default()
    };
    info!("batch started");

    let stop = 'batch: {
        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                break 'batch BatchStop::Cancelled;
            }
            let outcome = driver.run_iteration_deferring(iteration, &state.skipped)?;
            if outcome == IterationOutcome::NoWork {
                break 'batch BatchStop::NoWork;
            }
            state.iterations_run += 1;
            match outcome {
                IterationOutcome::Terminated { .. } => {
                    state.completion_signal_seen = true;
                    break 'batch BatchStop::Terminated;
                }
                IterationOutcome::Skipped {
                    work_remains: false,
                    ..
                } => break 'batch BatchStop::NoWork,
                IterationOutcome::Skipped { item_id, .. } => {
                    state.skipped.retain(|id| *id != item_id);
                    state.skipped.push(item_id);
                }
                _ => {}
            }
        }
        BatchStop::IterationLimit
    };

    info!(iterations = state.iterations_run, ?stop, "batch finished");
    Ok(BatchOutcome { state, stop })
}

/// Repeat batches until the completion signal or cancellation.
///
/// Before each batch the pools are polled; while both are empty the worker
/// idles for `poll_interval`, waking early if `cancel` is set.
pub fn run_watch<T, A, S>(
    driver: &IterationDriver<'_, T, A, S>,
    max_iterations: u32,
    poll_interval: Duration,
    cancel: &CancelToken,
) -> Result<WatchOutcome>
where
    T: Tracker + ?Sized,
    A: Agent + ?Sized,
    S: Sleeper + ?Sized,
{
    let mut batches = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Ok(WatchOutcome {
                batches,
                stop: WatchStop::Cancelled,
            });
        }

        let has_work = has_eligible_work(driver.tracker(), &driver.config().labels)
            .unwrap_or_else(|err| {
                warn!(err = %format!("{err:#}"), "failed to poll for work");
                false
            });
        if !has_work {
            info!(secs = poll_interval.as_secs(), "no eligible work; idling");
            if !sleep_unless_cancelled(driver.sleeper(), cancel, poll_interval, IDLE_SLICE) {
                return Ok(WatchOutcome {
                    batches,
                    stop: WatchStop::Cancelled,
                });
            }
            continue;
        }

        batches += 1;
        let outcome = run_batch(driver, batches, max_iterations, cancel)?;
        match outcome.stop {
            BatchStop::Terminated => {
                return Ok(WatchOutcome {
                    batches,
                    stop: WatchStop::Terminated,
                });
            }
            BatchStop::Cancelled => {
                return Ok(WatchOutcome {
                    batches,
                    stop: WatchStop::Cancelled,
                });
            }
            BatchStop::NoWork | BatchStop::IterationLimit => {}
        }
    }
}
