//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the pipeline orchestrator and its stage workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Run stage workers in this process.
    /// When disabled, pipelines are created and queued but only advance manually.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often an idle worker polls its queue (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Concurrent workers per stage queue.
    #[serde(default = "default_workers_per_queue")]
    pub workers_per_queue: usize,

    /// Wait between provider status checks while an order is in manufacturing.
    #[serde(default = "default_fulfillment_poll")]
    pub fulfillment_poll_secs: u64,

    /// Wait between delivery checks for a shipped order.
    #[serde(default = "default_delivery_poll")]
    pub delivery_poll_secs: u64,

    /// Used for `estimated_completion` on new pipelines.
    #[serde(default = "default_turnaround")]
    pub estimated_turnaround_hours: u64,

    /// Compare-and-swap attempts before a conflict is surfaced.
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

fn default_workers_per_queue() -> usize {
    2
}

fn default_fulfillment_poll() -> u64 {
    900 // 15 minutes
}

fn default_delivery_poll() -> u64 {
    3600 // 1 hour
}

fn default_turnaround() -> u64 {
    168 // 7 days
}

fn default_conflict_retries() -> usize {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_ms: default_poll_interval(),
            workers_per_queue: default_workers_per_queue(),
            fulfillment_poll_secs: default_fulfillment_poll(),
            delivery_poll_secs: default_delivery_poll(),
            estimated_turnaround_hours: default_turnaround(),
            max_conflict_retries: default_conflict_retries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert!(config.enabled);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.workers_per_queue, 2);
        assert_eq!(config.max_conflict_retries, 5);
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            enabled = false
            workers_per_queue = 4
            fulfillment_poll_secs = 60
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.workers_per_queue, 4);
        assert_eq!(config.fulfillment_poll_secs, 60);
        assert_eq!(config.delivery_poll_secs, 3600);
    }
}
