// Configuration for the mock API, the orchestrators and the demonstration flows

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ERROR_MESSAGE: &str = "Failed to load data.";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    // Published when a failure carries no message of its own
    pub error_fallback_message: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            error_fallback_message: DEFAULT_ERROR_MESSAGE.to_string(),
        }
    }
}

// Artificial latency applied by the mock API
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MockApiConfig {
    pub min_delay_ms: u64,
    pub mars_extra_delay_ms: u64,
    pub cost_extra_delay_ms: u64,
    pub place_extra_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for MockApiConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1000,
            mars_extra_delay_ms: 2000,
            cost_extra_delay_ms: 500,
            place_extra_delay_ms: 1000,
            jitter_ms: 0,
        }
    }
}

impl MockApiConfig {
    /// No artificial latency at all, handy for tests and benchmarks.
    pub fn immediate() -> Self {
        Self {
            min_delay_ms: 0,
            mars_extra_delay_ms: 0,
            cost_extra_delay_ms: 0,
            place_extra_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    pub fn earth_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn mars_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms + self.mars_extra_delay_ms)
    }

    pub fn cost_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms + self.cost_extra_delay_ms)
    }

    pub fn place_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms + self.place_extra_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SplashConfig {
    pub place_insert_delay_ms: u64,
    pub cost_insert_delay_ms: u64,
}

impl Default for SplashConfig {
    fn default() -> Self {
        Self {
            place_insert_delay_ms: 2000,
            cost_insert_delay_ms: 1000,
        }
    }
}

// Tick periods and window lengths used by the switch/join demonstrations
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DemoConfig {
    pub switch_outer_period_ms: u64,
    pub switch_inner_period_ms: u64,
    pub join_left_period_ms: u64,
    pub join_right_period_ms: u64,
    pub join_left_window_ms: u64,
    pub join_right_window_ms: u64,
    pub group_left_period_ms: u64,
    pub group_right_period_ms: u64,
    pub group_left_window_ms: u64,
    pub group_right_window_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            switch_outer_period_ms: 3000,
            switch_inner_period_ms: 1000,
            join_left_period_ms: 1000,
            join_right_period_ms: 3000,
            join_left_window_ms: 0,
            join_right_window_ms: 0,
            group_left_period_ms: 1000,
            group_right_period_ms: 5000,
            group_left_window_ms: 0,
            group_right_window_ms: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_delays_follow_minimum() {
        let config = MockApiConfig::default();
        assert_eq!(config.earth_delay(), Duration::from_millis(1000));
        assert_eq!(config.mars_delay(), Duration::from_millis(3000));
        assert_eq!(config.cost_delay(), Duration::from_millis(1500));
        assert_eq!(config.place_delay(), Duration::from_millis(2000));
        assert!(config.earth_delay() < config.mars_delay());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: MockApiConfig = serde_json::from_str(r#"{"min_delay_ms": 10}"#).unwrap();
        assert_eq!(config.min_delay_ms, 10);
        assert_eq!(config.mars_extra_delay_ms, 2000);

        let orchestrator: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(orchestrator.error_fallback_message, DEFAULT_ERROR_MESSAGE);
    }
}
