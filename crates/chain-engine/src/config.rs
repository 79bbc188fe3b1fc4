//! Executor configuration

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Options for one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Run the optimizer before executing
    pub optimize: bool,
    /// Emit a `NodeProgress` event after every stream item
    pub item_progress: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            item_progress: true,
        }
    }
}

impl ExecutorConfig {
    /// Parse a config, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn with_item_progress(mut self, item_progress: bool) -> Self {
        self.item_progress = item_progress;
        self
    }
}
