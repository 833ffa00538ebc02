//! Graph configuration.
//!
//! Hosts usually build a [`GraphConfig`] in code, but the type is
//! serde-friendly so it can also be loaded from a settings file. Missing
//! fields fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default ceiling on invocations executed by a single step.
pub const DEFAULT_MAX_INVOCATIONS_PER_STEP: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Label attached to the graph's log records.
    pub name: String,

    /// A step that executes more invocations than this aborts with
    /// [`Error::StepLimit`]. Guards against runtime loops through
    /// non-relay nodes (e.g. an event forwarded back into its own map).
    pub max_invocations_per_step: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            name: "graph".to_string(),
            max_invocations_per_step: DEFAULT_MAX_INVOCATIONS_PER_STEP,
        }
    }
}

impl GraphConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_invocations_per_step(mut self, limit: usize) -> Self {
        self.max_invocations_per_step = limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_invocations_per_step == 0 {
            return Err(Error::Config(
                "max_invocations_per_step must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
