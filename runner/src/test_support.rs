//! Test-only doubles: an in-memory tracker, a scripted agent, and a recording sleeper.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};

use crate::core::types::{Comment, WorkItem};
use crate::io::agent::{Agent, AgentRequest, AgentTranscript};
use crate::io::sleep::Sleeper;
use crate::io::tracker::{BoardUpdate, Tracker, last_n};

/// Fixed epoch for deterministic timestamps.
pub fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// Create a work item with deterministic title and creation time.
pub fn work_item(id: u64, body: &str, labels: &[&str]) -> WorkItem {
    WorkItem {
        id,
        title: format!("Issue {id}"),
        body: body.to_string(),
        labels: labels.iter().map(|label| label.to_string()).collect(),
        created_at: t0() + chrono::Duration::seconds(id as i64),
    }
}

/// Operations on [`MemoryTracker`] that can be made to fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    pub list_items: bool,
    pub add_label: bool,
    pub remove_label: bool,
    pub post_comment: bool,
    pub get_comments: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: Vec<WorkItem>,
    closed: BTreeSet<u64>,
    comments: BTreeMap<u64, Vec<Comment>>,
    board: BTreeMap<u64, String>,
    /// Logical clock in seconds after `t0`, advanced by every posted comment.
    clock: i64,
    faults: Faults,
}

/// In-memory tracker with a logical clock and failure injection.
///
/// Comments get strictly increasing timestamps in posting order unless inserted
/// with [`MemoryTracker::insert_comment_at`].
#[derive(Debug, Default)]
pub struct MemoryTracker {
    state: Mutex<MemoryState>,
}

impl MemoryTracker {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                items,
                clock: 1_000,
                ..MemoryState::default()
            }),
        }
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state.lock().unwrap().faults = faults;
    }

    pub fn push_item(&self, item: WorkItem) {
        self.state.lock().unwrap().items.push(item);
    }

    /// Insert a comment with an explicit timestamp (simulating clock skew).
    pub fn insert_comment_at(&self, id: u64, body: &str, created_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        let log = state.comments.entry(id).or_default();
        log.push(Comment {
            body: body.to_string(),
            created_at,
        });
        log.sort_by_key(|comment| comment.created_at);
    }

    pub fn item(&self, id: u64) -> Option<WorkItem> {
        let state = self.state.lock().unwrap();
        state.items.iter().find(|item| item.id == id).cloned()
    }

    pub fn comments(&self, id: u64) -> Vec<Comment> {
        let state = self.state.lock().unwrap();
        state.comments.get(&id).cloned().unwrap_or_default()
    }

    pub fn is_closed(&self, id: u64) -> bool {
        self.state.lock().unwrap().closed.contains(&id)
    }

    pub fn board_status(&self, id: u64) -> Option<String> {
        self.state.lock().unwrap().board.get(&id).cloned()
    }

    fn with_item<R>(&self, id: u64, f: impl FnOnce(&mut WorkItem) -> R) -> Result<R> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| anyhow!("unknown item #{id}"))?;
        Ok(f(item))
    }
}

impl Tracker for MemoryTracker {
    fn list_items(&self, label: &str) -> Result<Vec<WorkItem>> {
        let state = self.state.lock().unwrap();
        if state.faults.list_items {
            return Err(anyhow!("injected list failure"));
        }
        Ok(state
            .items
            .iter()
            .filter(|item| !state.closed.contains(&item.id) && item.has_label(label))
            .cloned()
            .collect())
    }

    fn add_label(&self, id: u64, label: &str) -> Result<()> {
        if self.state.lock().unwrap().faults.add_label {
            return Err(anyhow!("injected add_label failure"));
        }
        self.with_item(id, |item| {
            item.labels.insert(label.to_string());
        })
    }

    fn remove_label(&self, id: u64, label: &str) -> Result<()> {
        if self.state.lock().unwrap().faults.remove_label {
            return Err(anyhow!("injected remove_label failure"));
        }
        self.with_item(id, |item| {
            item.labels.remove(label);
        })
    }

    fn post_comment(&self, id: u64, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.faults.post_comment {
            return Err(anyhow!("injected post_comment failure"));
        }
        state.clock += 1;
        let created_at = t0() + chrono::Duration::seconds(state.clock);
        state.comments.entry(id).or_default().push(Comment {
            body: body.to_string(),
            created_at,
        });
        Ok(())
    }

    fn get_comments(&self, id: u64, limit: usize) -> Result<Vec<Comment>> {
        let state = self.state.lock().unwrap();
        if state.faults.get_comments {
            return Err(anyhow!("injected get_comments failure"));
        }
        let comments = state.comments.get(&id).cloned().unwrap_or_default();
        Ok(last_n(comments, limit))
    }

    fn close_item(&self, id: u64, _summary: &str) -> Result<()> {
        self.state.lock().unwrap().closed.insert(id);
        Ok(())
    }

    fn set_board_status(&self, id: u64, _field: &str, value: &str) -> Result<BoardUpdate> {
        self.state
            .lock()
            .unwrap()
            .board
            .insert(id, value.to_string());
        Ok(BoardUpdate::Applied)
    }
}

type AgentHook = Box<dyn Fn(&AgentRequest) + Send + Sync>;

/// Agent returning queued transcripts, then `fallback` once the queue is empty.
#[derive(Default)]
pub struct ScriptedAgent {
    queue: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    hook: Option<AgentHook>,
}

impl ScriptedAgent {
    pub fn new(transcripts: Vec<&str>) -> Self {
        Self {
            queue: Mutex::new(transcripts.into_iter().map(str::to_string).collect()),
            ..Self::default()
        }
    }

    /// Always return `transcript`.
    pub fn repeating(transcript: &str) -> Self {
        Self {
            fallback: Some(transcript.to_string()),
            ..Self::default()
        }
    }

    /// Run `hook` at the start of every invocation.
    pub fn with_hook(mut self, hook: impl Fn(&AgentRequest) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn invocations(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentTranscript> {
        if let Some(hook) = &self.hook {
            hook(request);
        }
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let text = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("scripted agent exhausted"))?;
        Ok(AgentTranscript {
            text,
            exit_code: Some(0),
            timed_out: false,
        })
    }
}

type SleepHook = Box<dyn Fn(Duration) + Send + Sync>;

/// Sleeper that records requested durations instead of blocking.
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    hook: Option<SleepHook>,
}

impl RecordingSleeper {
    /// Run `hook` on every sleep, e.g. to let competing workers act during a jitter window.
    pub fn with_hook(hook: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        Self {
            sleeps: Mutex::default(),
            hook: Some(Box::new(hook)),
        }
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        if let Some(hook) = &self.hook {
            hook(duration);
        }
    }
}
