//! Executor-wide settings, loadable from JSON.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Drop a producer's cached output once every consumer in the current update has
    /// generated from it. Saves memory at the cost of re-running the producer later.
    pub release_data_flag: bool,
    /// Filters that support it split work across `rayon` threads at or above this
    /// many output samples. `0` keeps everything on the calling thread.
    pub parallel_threshold: usize,
    /// Log every cache hit at `debug` instead of `trace`.
    pub verbose_cache: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            release_data_flag: false,
            parallel_threshold: 1 << 16,
            verbose_cache: false,
        }
    }
}

impl PipelineSettings {
    pub fn from_json_str(text: &str) -> PipelineResult<Self> {
        serde_json::from_str(text).map_err(|e| PipelineError::Settings(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Settings(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> PipelineResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::Settings(e.to_string()))
    }
}
