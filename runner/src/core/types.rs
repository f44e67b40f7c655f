//! Shared deterministic types for the coordination core.
//!
//! These types define stable contracts between core components and the
//! tracker/agent adapters. They carry no I/O and compare by value.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one tracker issue, fetched per selection round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

/// One entry of an item's append-only comment log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Named category of work items. Analysis is always drained before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    /// Items needing refinement before they can be executed.
    Analysis,
    /// Items ready to run.
    Execution,
}

impl Pool {
    /// Pools in the order they must be consulted.
    pub const ORDERED: [Pool; 2] = [Pool::Analysis, Pool::Execution];

    pub fn as_str(self) -> &'static str {
        match self {
            Pool::Analysis => "analysis",
            Pool::Execution => "execution",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort key derived from an item's body. Lower sorts first; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    pub const UNKNOWN: Priority = Priority(99);
}

/// Opaque identity of one running worker process.
///
/// Built once at process start and passed explicitly to every coordinator call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    /// Wrap a raw token. Tokens must not contain whitespace or `-->`.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A claim attempt recovered from an item's comment log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRecord {
    pub item_id: u64,
    pub worker_id: WorkerId,
    pub posted_at: DateTime<Utc>,
}

/// Result of resolving a claim attempt against the comment log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller's claim record is the earliest one.
    Won,
    /// Another worker's claim record is earlier (or the claim comment could not be posted).
    Lost,
    /// No claim records were visible; callers proceed as if `Won`.
    Inconclusive,
}

impl ClaimOutcome {
    /// Whether the caller should proceed with the item.
    pub fn proceeds(self) -> bool {
        matches!(self, ClaimOutcome::Won | ClaimOutcome::Inconclusive)
    }
}

/// Category assigned to a tool transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    EmptyOutput,
    NoMessagesTransient,
    NetworkTransient,
    GenericError,
    Success,
}

impl ErrorCategory {
    pub fn is_error(self) -> bool {
        self != ErrorCategory::Success
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::EmptyOutput => "empty output",
            ErrorCategory::NoMessagesTransient => "no messages (transient)",
            ErrorCategory::NetworkTransient => "network (transient)",
            ErrorCategory::GenericError => "generic error",
            ErrorCategory::Success => "success",
        };
        f.write_str(name)
    }
}

/// Classifier verdict. `work_completed` is independent of `category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub work_completed: bool,
}
