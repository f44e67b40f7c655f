//! Orchestrator configuration stored under `.issue-runner/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;
use crate::core::types::Pool;

/// Orchestrator configuration (TOML).
///
/// Missing fields default to the values workers have historically run with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Literal token in a transcript that ends the whole run.
    pub completion_signal: String,
    pub labels: LabelConfig,
    pub claim: ClaimConfig,
    pub retry: RetryConfig,
    pub agent: AgentConfig,
    pub board: BoardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LabelConfig {
    /// Items needing refinement.
    pub analysis: String,
    /// Items ready to execute.
    pub execution: String,
    /// Advisory "someone believes they own this" marker.
    pub claimed: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            analysis: "needs-analysis".to_string(),
            execution: "ready".to_string(),
            claimed: "claimed".to_string(),
        }
    }
}

impl LabelConfig {
    pub fn for_pool(&self, pool: Pool) -> &str {
        match pool {
            Pool::Analysis => &self.analysis,
            Pool::Execution => &self.execution,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClaimConfig {
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// Number of most recent comments read when resolving a claim.
    pub comment_window: usize,
    /// Distinct claim attempts per selection round, across both pools.
    pub max_attempts_per_round: usize,
    /// Selection rounds before the iteration is abandoned.
    pub max_rounds: u32,
    pub round_backoff_secs: u64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            jitter_min_ms: 3_000,
            jitter_max_ms: 7_000,
            comment_window: 10,
            max_attempts_per_round: 5,
            max_rounds: 3,
            round_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_unit_secs: u64,
    pub empty_output_multiplier: u32,
    pub no_messages_multiplier: u32,
    pub network_multiplier: u32,
    pub generic_error_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            backoff_unit_secs: policy.unit.as_secs(),
            empty_output_multiplier: policy.empty_output_multiplier,
            no_messages_multiplier: policy.no_messages_multiplier,
            network_multiplier: policy.network_multiplier,
            generic_error_multiplier: policy.generic_error_multiplier,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            unit: Duration::from_secs(self.backoff_unit_secs),
            empty_output_multiplier: self.empty_output_multiplier,
            no_messages_multiplier: self.no_messages_multiplier,
            network_multiplier: self.network_multiplier,
            generic_error_multiplier: self.generic_error_multiplier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Wall-clock budget for one tool invocation.
    pub timeout_secs: u64,
    /// Transcript bytes kept per stream; the rest is drained and dropped.
    pub output_limit_bytes: usize,
    /// Custom argv replacing the built-in tool command (prompt goes to stdin).
    pub command: Option<Vec<String>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
            command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BoardConfig {
    pub field: String,
    pub in_progress: String,
    pub done: String,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            field: "Status".to_string(),
            in_progress: "In Progress".to_string(),
            done: "Done".to_string(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            completion_signal: "<promise>COMPLETE</promise>".to_string(),
            labels: LabelConfig::default(),
            claim: ClaimConfig::default(),
            retry: RetryConfig::default(),
            agent: AgentConfig::default(),
            board: BoardConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.completion_signal.trim().is_empty() {
            return Err(anyhow!("completion_signal must be non-empty"));
        }
        for (key, label) in [
            ("labels.analysis", &self.labels.analysis),
            ("labels.execution", &self.labels.execution),
            ("labels.claimed", &self.labels.claimed),
        ] {
            if label.trim().is_empty() {
                return Err(anyhow!("{key} must be non-empty"));
            }
        }
        if self.labels.analysis == self.labels.execution {
            return Err(anyhow!("labels.analysis and labels.execution must differ"));
        }
        if self.claim.jitter_min_ms > self.claim.jitter_max_ms {
            return Err(anyhow!("claim.jitter_min_ms must be <= claim.jitter_max_ms"));
        }
        if self.claim.comment_window == 0 {
            return Err(anyhow!("claim.comment_window must be > 0"));
        }
        if self.claim.max_attempts_per_round == 0 {
            return Err(anyhow!("claim.max_attempts_per_round must be > 0"));
        }
        if self.claim.max_rounds == 0 {
            return Err(anyhow!("claim.max_rounds must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if let Some(command) = &self.agent.command
            && command.first().is_none_or(|program| program.trim().is_empty())
        {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[labels]\nexecution = \"todo\"\n\n[retry]\nnetwork_multiplier = 3\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.labels.execution, "todo");
        assert_eq!(cfg.labels.claimed, "claimed");
        assert_eq!(cfg.retry.network_multiplier, 3);
        assert_eq!(cfg.retry.max_attempts, 5);
    }

    #[test]
    fn default_retry_config_matches_policy() {
        assert_eq!(RetryConfig::default().policy(), RetryPolicy::default());
    }

    #[test]
    fn inverted_jitter_window_is_rejected() {
        let mut cfg = RunnerConfig::default();
        cfg.claim.jitter_min_ms = 10;
        cfg.claim.jitter_max_ms = 5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("jitter_min_ms"));
    }

    #[test]
    fn empty_custom_command_is_rejected() {
        let mut cfg = RunnerConfig::default();
        cfg.agent.command = Some(Vec::new());
        assert!(cfg.validate().is_err());
    }
}
