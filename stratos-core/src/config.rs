//! Process-level configuration: provider selection, per-task model
//! overrides, step timeout, and debug logging verbosity.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::{Provider, TaskKind};

const DEFAULT_SOFT_TIMEOUT_SECS: u64 = 120;

/// Configuration assembled at process start and handed to the
/// orchestrator and workflow engine. Mirrors what a real deployment
/// would read from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub provider: Provider,
    /// Per-task model identifier overrides. Tasks without an entry use
    /// the provider's default model.
    #[serde(default)]
    pub task_models: HashMap<String, String>,
    #[serde(default = "default_soft_timeout_secs")]
    pub soft_step_timeout_secs: u64,
    #[serde(default)]
    pub debug: bool,
}

fn default_soft_timeout_secs() -> u64 {
    DEFAULT_SOFT_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::Anthropic,
            task_models: HashMap::new(),
            soft_step_timeout_secs: DEFAULT_SOFT_TIMEOUT_SECS,
            debug: false,
        }
    }
}

impl Config {
    pub fn soft_step_timeout(&self) -> Duration {
        Duration::from_secs(self.soft_step_timeout_secs)
    }

    pub fn model_for(&self, task: TaskKind) -> Option<&str> {
        self.task_models.get(task.as_str()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_120_seconds() {
        let config = Config::default();
        assert_eq!(config.soft_step_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn model_override_lookup_by_task() {
        let mut config = Config::default();
        config
            .task_models
            .insert(TaskKind::Insights.as_str().to_string(), "claude-haiku".into());
        assert_eq!(config.model_for(TaskKind::Insights), Some("claude-haiku"));
        assert_eq!(config.model_for(TaskKind::Brief), None);
    }
}
