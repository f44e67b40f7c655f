//! GitHub adapter backed by the `gh` CLI.
//!
//! Each tracker call is one `gh issue ...` subprocess. JSON output is parsed
//! into core types; authentication and pagination are left to `gh`.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::types::{Comment, WorkItem};
use crate::io::tracker::{Tracker, last_n};

/// Upper bound on items fetched per pool listing.
const LIST_LIMIT: &str = "200";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhComment {
    #[serde(default)]
    body: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GhCommentList {
    #[serde(default)]
    comments: Vec<GhComment>,
}

/// Tracker implementation that shells out to `gh`.
///
/// Project boards are not supported: `set_board_status` keeps the trait's
/// `Unsupported` default, so the `board.*` config has no effect with this source.
#[derive(Debug, Clone)]
pub struct GhTracker {
    workdir: PathBuf,
    repo: Option<String>,
}

impl GhTracker {
    /// `repo` is `OWNER/NAME`; when `None`, `gh` infers it from `workdir`.
    pub fn new(workdir: impl Into<PathBuf>, repo: Option<String>) -> Self {
        Self {
            workdir: workdir.into(),
            repo,
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("gh {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new("gh");
        cmd.args(args).current_dir(&self.workdir);
        if let Some(repo) = &self.repo {
            cmd.arg("--repo").arg(repo);
        }
        debug!(args = %args.join(" "), "running gh");
        cmd.output()
            .with_context(|| format!("spawn gh {}", args.join(" ")))
    }
}

impl Tracker for GhTracker {
    #[instrument(skip(self))]
    fn list_items(&self, label: &str) -> Result<Vec<WorkItem>> {
        let out = self.run_capture(&[
            "issue",
            "list",
            "--state",
            "open",
            "--label",
            label,
            "--limit",
            LIST_LIMIT,
            "--json",
            "number,title,body,labels,createdAt",
        ])?;
        parse_issue_list(&out)
    }

    #[instrument(skip(self))]
    fn add_label(&self, id: u64, label: &str) -> Result<()> {
        self.run_checked(&["issue", "edit", &id.to_string(), "--add-label", label])?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove_label(&self, id: u64, label: &str) -> Result<()> {
        self.run_checked(&["issue", "edit", &id.to_string(), "--remove-label", label])?;
        Ok(())
    }

    #[instrument(skip(self, body))]
    fn post_comment(&self, id: u64, body: &str) -> Result<()> {
        self.run_checked(&["issue", "comment", &id.to_string(), "--body", body])?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn get_comments(&self, id: u64, limit: usize) -> Result<Vec<Comment>> {
        let out = self.run_capture(&["issue", "view", &id.to_string(), "--json", "comments"])?;
        Ok(last_n(parse_comment_list(&out)?, limit))
    }

    #[instrument(skip(self, summary))]
    fn close_item(&self, id: u64, summary: &str) -> Result<()> {
        self.run_checked(&["issue", "close", &id.to_string(), "--comment", summary])?;
        Ok(())
    }
}

fn parse_issue_list(json: &str) -> Result<Vec<WorkItem>> {
    let issues: Vec<GhIssue> = serde_json::from_str(json).context("parse gh issue list")?;
    Ok(issues
        .into_iter()
        .map(|issue| WorkItem {
            id: issue.number,
            title: issue.title,
            body: issue.body,
            labels: issue.labels.into_iter().map(|label| label.name).collect(),
            created_at: issue.created_at,
        })
        .collect())
}

fn parse_comment_list(json: &str) -> Result<Vec<Comment>> {
    let list: GhCommentList = serde_json::from_str(json).context("parse gh issue comments")?;
    let mut comments: Vec<Comment> = list
        .comments
        .into_iter()
        .map(|comment| Comment {
            body: comment.body,
            created_at: comment.created_at,
        })
        .collect();
    comments.sort_by_key(|comment| comment.created_at);
    Ok(comments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_issue_list_json() {
        let json = r#"[
          {"number": 42, "title": "Fix login", "body": "Priority: 2 - High",
           "labels": [{"name": "ready"}, {"name": "bug"}],
           "createdAt": "2025-01-02T03:04:05Z"},
          {"number": 43, "title": "Docs", "body": "",
           "labels": [], "createdAt": "2025-01-03T00:00:00Z"}
        ]"#;
        let items = parse_issue_list(json).expect("parse");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 42);
        assert!(items[0].has_label("ready"));
        assert!(items[0].has_label("bug"));
        assert_eq!(items[1].body, "");
    }

    #[test]
    fn parses_comments_sorted_by_creation_time() {
        let json = r#"{"comments": [
          {"body": "second", "createdAt": "2025-01-02T00:00:05Z", "author": {"login": "a"}},
          {"body": "first", "createdAt": "2025-01-02T00:00:01Z", "author": {"login": "b"}}
        ]}"#;
        let comments = parse_comment_list(json).expect("parse");
        let bodies: Vec<&str> = comments.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_issue_list("not json").unwrap_err();
        assert!(err.to_string().contains("parse gh issue list"));
    }
}
