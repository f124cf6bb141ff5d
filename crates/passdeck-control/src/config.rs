//! Tunables for the orchestration core

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator limits and windows
///
/// Every field has a default, so a partial JSON object (or `{}`) is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// How long delete-and-wait waits for the agent's confirmation
    pub delete_timeout_ms: u64,

    /// Maximum number of items in one batch
    pub max_batch_size: usize,

    /// Concurrent items per batch
    pub batch_workers: usize,

    /// Upper bound on log lines returned per read
    pub log_window: usize,

    /// Number of traffic samples returned by the trend read
    pub trend_window: usize,

    /// Default number of audit entries returned by `recent`
    pub operation_log_limit: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            delete_timeout_ms: 3000,
            max_batch_size: 50,
            batch_workers: 4,
            log_window: 200,
            trend_window: 100,
            operation_log_limit: 50,
        }
    }
}

impl ControlConfig {
    pub fn delete_timeout(&self) -> Duration {
        Duration::from_millis(self.delete_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ControlConfig =
            serde_json::from_str(r#"{"delete_timeout_ms": 500}"#).unwrap();
        assert_eq!(config.delete_timeout(), Duration::from_millis(500));
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.batch_workers, 4);
        assert_eq!(config.log_window, 200);
        assert_eq!(config.trend_window, 100);
    }
}
