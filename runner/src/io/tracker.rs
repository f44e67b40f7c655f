//! Issue tracker abstraction.
//!
//! The [`Tracker`] trait is the only shared mutable resource between workers:
//! a label set and an append-only comment log per item. Implementations make
//! no atomicity or exclusivity promises; the claim protocol tolerates that.

use anyhow::Result;

use crate::core::types::{Comment, WorkItem};

/// Result of an optional board status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardUpdate {
    Applied,
    /// The tracker has no board; callers carry on silently.
    Unsupported,
}

pub trait Tracker {
    /// List open items carrying `label`, in the tracker's native order.
    fn list_items(&self, label: &str) -> Result<Vec<WorkItem>>;

    fn add_label(&self, id: u64, label: &str) -> Result<()>;

    fn remove_label(&self, id: u64, label: &str) -> Result<()>;

    /// Append a comment to the item's log. The tracker stamps the creation time.
    fn post_comment(&self, id: u64, body: &str) -> Result<()>;

    /// Return at most `limit` most recent comments, ordered by creation time.
    fn get_comments(&self, id: u64, limit: usize) -> Result<Vec<Comment>>;

    fn close_item(&self, id: u64, summary: &str) -> Result<()>;

    fn set_board_status(&self, _id: u64, _field: &str, _value: &str) -> Result<BoardUpdate> {
        Ok(BoardUpdate::Unsupported)
    }
}

/// Keep the last `limit` entries of an already time-ordered comment list.
pub fn last_n(mut comments: Vec<Comment>, limit: usize) -> Vec<Comment> {
    let skip = comments.len().saturating_sub(limit);
    comments.drain(..skip);
    comments
}
