//! Poller configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the ingestion poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Enable/disable polling. When disabled, nothing is ingested.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Delay between listing calls (milliseconds).
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Maximum handlers running at once (values below 1 are treated as 1).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_max_concurrent() -> usize {
    2
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_interval(),
            max_concurrent: default_max_concurrent(),
        }
    }
}
