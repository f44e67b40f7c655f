//! File-backed work source (`.issue-runner/issues.json`).
//!
//! Stores items and their comment logs in one JSON document. Every call
//! re-reads the file and mutations are written atomically (temp file +
//! rename), so several workers on one machine see each other's claims.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::{Comment, WorkItem};
use crate::io::tracker::{BoardUpdate, Tracker, last_n};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStore {
    #[serde(default)]
    pub items: Vec<LocalItem>,
    #[serde(default)]
    pub comments: BTreeMap<u64, Vec<Comment>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalItem {
    #[serde(flatten)]
    pub item: WorkItem,
    #[serde(default)]
    pub closed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_summary: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub board: BTreeMap<String, String>,
}

impl LocalItem {
    pub fn open(item: WorkItem) -> Self {
        Self {
            item,
            closed: false,
            closed_summary: None,
            board: BTreeMap::new(),
        }
    }
}

/// Tracker implementation over a local JSON file.
#[derive(Debug, Clone)]
pub struct LocalTracker {
    path: PathBuf,
}

impl LocalTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<LocalStore> {
        load_store(&self.path)
    }

    fn update<T>(&self, f: impl FnOnce(&mut LocalStore) -> Result<T>) -> Result<T> {
        let mut store = self.load()?;
        let value = f(&mut store)?;
        write_store(&self.path, &store)?;
        Ok(value)
    }
}

fn item_mut(store: &mut LocalStore, id: u64) -> Result<&mut LocalItem> {
    store
        .items
        .iter_mut()
        .find(|entry| entry.item.id == id)
        .ok_or_else(|| anyhow!("unknown item #{id}"))
}

impl Tracker for LocalTracker {
    #[instrument(skip(self))]
    fn list_items(&self, label: &str) -> Result<Vec<WorkItem>> {
        let store = self.load()?;
        Ok(store
            .items
            .into_iter()
            .filter(|entry| !entry.closed && entry.item.has_label(label))
            .map(|entry| entry.item)
            .collect())
    }

    fn add_label(&self, id: u64, label: &str) -> Result<()> {
        self.update(|store| {
            item_mut(store, id)?.item.labels.insert(label.to_string());
            Ok(())
        })
    }

    fn remove_label(&self, id: u64, label: &str) -> Result<()> {
        self.update(|store| {
            item_mut(store, id)?.item.labels.remove(label);
            Ok(())
        })
    }

    fn post_comment(&self, id: u64, body: &str) -> Result<()> {
        self.update(|store| {
            item_mut(store, id)?;
            store.comments.entry(id).or_default().push(Comment {
                body: body.to_string(),
                created_at: Utc::now(),
            });
            Ok(())
        })
    }

    fn get_comments(&self, id: u64, limit: usize) -> Result<Vec<Comment>> {
        let mut store = self.load()?;
        let mut comments = store.comments.remove(&id).unwrap_or_default();
        comments.sort_by_key(|comment| comment.created_at);
        Ok(last_n(comments, limit))
    }

    #[instrument(skip(self, summary))]
    fn close_item(&self, id: u64, summary: &str) -> Result<()> {
        self.update(|store| {
            let entry = item_mut(store, id)?;
            entry.closed = true;
            entry.closed_summary = Some(summary.to_string());
            Ok(())
        })
    }

    fn set_board_status(&self, id: u64, field: &str, value: &str) -> Result<BoardUpdate> {
        self.update(|store| {
            item_mut(store, id)?
                .board
                .insert(field.to_string(), value.to_string());
            Ok(BoardUpdate::Applied)
        })
    }
}

/// Load a store from disk.
pub fn load_store(path: &Path) -> Result<LocalStore> {
    debug!(path = %path.display(), "loading local issues");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read issues file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parse issues file {}", path.display()))
}

/// Atomically write a store to disk (temp file + rename).
pub fn write_store(path: &Path, store: &LocalStore) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(store).context("serialize issues")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("issues path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp issues {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace issues {}", path.display()))?;
    Ok(())
}
