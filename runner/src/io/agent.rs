//! Coding-agent tool abstraction.
//!
//! The [`Agent`] trait decouples the iteration driver from the actual tool
//! binary. The driver only ever looks at the returned transcript text; tests
//! use scripted agents that return canned transcripts without spawning
//! processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Built-in coding-agent tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AgentKind {
    Claude,
    Codex,
    Amp,
}

impl AgentKind {
    /// Argv for a non-interactive run that reads the prompt from stdin.
    fn argv(self) -> Vec<&'static str> {
        match self {
            AgentKind::Claude => vec![
                "claude",
                "--print",
                "--dangerously-skip-permissions",
                "--output-format",
                "text",
            ],
            AgentKind::Codex => vec![
                "codex",
                "exec",
                "--sandbox",
                "danger-full-access",
                "--skip-git-repo-check",
                "-",
            ],
            AgentKind::Amp => vec!["amp", "--dangerously-allow-all", "--execute"],
        }
    }
}

/// Parameters for one tool invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the tool process.
    pub workdir: PathBuf,
    pub prompt: String,
    pub timeout: Duration,
    /// Per-stream output bound.
    pub output_limit_bytes: usize,
    /// Where to write the transcript for later inspection.
    pub log_path: Option<PathBuf>,
}

/// Merged stdout+stderr of one invocation plus its exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTranscript {
    pub text: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl AgentTranscript {
    /// Transcript for an invocation that produced nothing (e.g. spawn failure).
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            exit_code: None,
            timed_out: false,
        }
    }
}

/// Abstraction over coding-agent backends.
pub trait Agent {
    /// Run the tool to completion with `request.prompt` and return its transcript.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentTranscript>;
}

/// Agent that spawns the tool binary, or a configured custom argv.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    argv: Vec<String>,
}

impl CommandAgent {
    pub fn builtin(kind: AgentKind) -> Self {
        Self {
            argv: kind.argv().into_iter().map(str::to_string).collect(),
        }
    }

    /// Use `custom` when configured, the built-in command for `kind` otherwise.
    pub fn new(kind: AgentKind, custom: Option<&[String]>) -> Self {
        match custom {
            Some(argv) if !argv.is_empty() => Self {
                argv: argv.to_vec(),
            },
            _ => Self::builtin(kind),
        }
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(program = %self.program(), timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentTranscript> {
        info!(workdir = %request.workdir.display(), "invoking agent");
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]).current_dir(&request.workdir);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .with_context(|| format!("run {}", self.program()))?;

        if let Some(path) = &request.log_path
            && let Err(err) = write_transcript_log(path, &output)
        {
            warn!(err = %format!("{err:#}"), "failed to write transcript log");
        }
        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent exited with failure");
        }

        let transcript = AgentTranscript {
            text: output.merged_text(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        };
        debug!(bytes = transcript.text.len(), "agent transcript captured");
        Ok(transcript)
    }
}

fn write_transcript_log(path: &Path, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create transcript log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.truncation_notice());
    buf.push_str(&format!("\n=== exit: {:?} ===\n", output.status.code()));
    fs::write(path, buf).with_context(|| format!("write transcript log {}", path.display()))
}
