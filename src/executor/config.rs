use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read executor config")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse executor config")]
    Parse(#[from] serde_json::Error),
}

/// Tunables of an [`Executor`](super::Executor). Every field has a default, so a JSON config
/// only needs to name the settings it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on `Loop` iterations. `None` runs unbounded loops until they end or the run
    /// is cancelled.
    pub max_loop_iterations: Option<u64>,
    /// Bound on live tensor bytes during a run.
    pub memory_budget_bytes: Option<usize>,
    /// Dispatch the independent nodes of a plan level on the rayon pool.
    pub parallel: bool,
    /// Run shape inference before scheduling each graph and sub-graph.
    pub infer_shapes: bool,
    /// Check bound inputs and produced values against declared and inferred types.
    pub validate_types: bool,
    pub max_subgraph_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: None,
            memory_budget_bytes: None,
            parallel: false,
            infer_shapes: true,
            validate_types: false,
            max_subgraph_depth: 64,
        }
    }
}

impl ExecutorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = ExecutorConfig::from_json_str(r#"{"parallel": true, "max_loop_iterations": 10}"#).unwrap();
        assert!(config.parallel);
        assert_eq!(config.max_loop_iterations, Some(10));
        assert!(config.infer_shapes);
        assert_eq!(config.max_subgraph_depth, 64);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            ExecutorConfig::from_json_str("{parallel: yes}"),
            Err(ConfigError::Parse(_))
        ));
    }
}
