//! Prompt rendering for one claimed work item.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::{Pool, WorkItem, WorkerId};
use crate::io::config::RunnerConfig;

const ITEM_TEMPLATE: &str = include_str!("prompts/item.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("item", ITEM_TEMPLATE)
            .expect("item template should be valid");
        Self { env }
    }

    pub fn render(
        &self,
        item: &WorkItem,
        pool: Pool,
        worker: &WorkerId,
        cfg: &RunnerConfig,
    ) -> Result<String> {
        let template = self.env.get_template("item")?;
        let rendered = template.render(context! {
            item => item,
            pool => pool.as_str(),
            worker => worker.as_str(),
            completion_signal => &cfg.completion_signal,
            claimed_label => &cfg.labels.claimed,
            analysis_label => &cfg.labels.analysis,
            execution_label => &cfg.labels.execution,
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::work_item;

    #[test]
    fn execution_prompt_names_completion_markers() {
        let engine = PromptEngine::new();
        let item = work_item(42, "Priority: 2 - High\nFix the login form.", &["ready"]);
        let prompt = engine
            .render(
                &item,
                Pool::Execution,
                &WorkerId::new("w1"),
                &RunnerConfig::default(),
            )
            .expect("render");
        assert!(prompt.contains("issue #42"));
        assert!(prompt.contains("Fix the login form."));
        assert!(prompt.contains("closed issue #42"));
        assert!(prompt.contains("<promise>COMPLETE</promise>"));
        assert!(!prompt.contains("refine this issue"));
    }

    #[test]
    fn analysis_prompt_asks_for_relabel() {
        let engine = PromptEngine::new();
        let item = work_item(7, "", &["needs-analysis"]);
        let prompt = engine
            .render(
                &item,
                Pool::Analysis,
                &WorkerId::new("w1"),
                &RunnerConfig::default(),
            )
            .expect("render");
        assert!(prompt.contains("refine this issue"));
        assert!(prompt.contains("`needs-analysis` label with\n`ready`"));
        assert!(prompt.contains("(empty)"));
    }
}
