//! Multi-worker issue coordinator for autonomous coding agents.
//!
//! Several independent workers share one issue tracker. Each worker picks
//! unclaimed work from two pools (analysis before execution), takes ownership
//! through an optimistic claim protocol on the item's comment log, hands the
//! item to a coding-agent tool, and classifies the tool's transcript to decide
//! whether to retry, move on, or stop the whole run.
//!
//! - **[`core`]**: Pure, deterministic logic (priority, ordering, claim
//!   resolution, transcript classification, retry policy). No I/O.
//! - **[`io`]**: Side-effecting operations (tracker backends, agent processes,
//!   configuration, sleeping). Isolated behind traits for tests.
//!
//! Orchestration modules ([`claim`], [`select`], [`iteration`], [`looping`])
//! wire core logic to I/O and back the CLI.

pub mod claim;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod iteration;
pub mod logging;
pub mod looping;
pub mod select;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
