//! Pipeline registry configuration.

use std::time::Duration;

/// Pipeline registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Evict pipelines with no activity for this long
    pub idle_ttl: Duration,
    /// Evict completed/failed pipelines after this long
    pub terminal_ttl: Duration,
    /// How often the sweeper runs
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(3600), // 1 hour
            terminal_ttl: Duration::from_secs(600), // 10 minutes
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RegistryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            idle_ttl: Duration::from_secs(
                std::env::var("PIPELINE_IDLE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            terminal_ttl: Duration::from_secs(
                std::env::var("PIPELINE_TERMINAL_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            sweep_interval: Duration::from_secs(
                std::env::var("PIPELINE_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|&secs: &u64| secs > 0)
                    .unwrap_or(60),
            ),
        }
    }
}
