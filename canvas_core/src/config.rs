//! Per-node configuration.

use canvas_env::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration rejected by [`NodeConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Slice dimensions must be non-zero (got {width}x{height})")]
    EmptySlice { width: u32, height: u32 },

    #[error("Interval '{0}' must be non-zero")]
    ZeroInterval(&'static str),

    #[error("Membership timeout {timeout_ms}ms must exceed two heartbeat intervals ({heartbeat_ms}ms each)")]
    TimeoutTooShort { timeout_ms: u64, heartbeat_ms: u64 },

    #[error("Topic prefix must not be empty")]
    EmptyTopicPrefix,
}

/// Configuration for one canvas node.
///
/// Loaded once at startup. Intervals are stored as milliseconds so the
/// struct round-trips through JSON config files unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's identity
    pub node_id: NodeId,

    /// Width of the slice this node displays (columns)
    pub slice_width: u32,

    /// Height of the slice, and of the whole canvas (rows)
    pub slice_height: u32,

    /// Heartbeat emission cadence
    pub heartbeat_interval_ms: u64,

    /// Silence after which a peer is evicted from membership
    pub membership_timeout_ms: u64,

    /// Simulation tick cadence (leader only)
    pub tick_interval_ms: u64,

    /// Pause between two event-loop passes
    pub poll_interval_ms: u64,

    /// Pause before the supervisor reconnects after a fault
    pub restart_backoff_ms: u64,

    /// Velocity of a freshly created shared object
    pub initial_velocity: [i32; 2],

    /// Prefix for the heartbeat and shared-state topics
    pub topic_prefix: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(0),
            slice_width: 8,
            slice_height: 16,
            heartbeat_interval_ms: 1000,
            membership_timeout_ms: 3500,
            tick_interval_ms: 100,
            poll_interval_ms: 10,
            restart_backoff_ms: 5000,
            initial_velocity: [1, 1],
            topic_prefix: "canvas".to_string(),
        }
    }
}

impl NodeConfig {
    /// Default configuration for the given node.
    pub fn for_node(node_id: NodeId) -> Self {
        Self {
            node_id,
            ..Self::default()
        }
    }

    /// Checks the invariants the event loop relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slice_width == 0 || self.slice_height == 0 {
            return Err(ConfigError::EmptySlice {
                width: self.slice_width,
                height: self.slice_height,
            });
        }

        let intervals = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("membership_timeout_ms", self.membership_timeout_ms),
            ("tick_interval_ms", self.tick_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }

        // A timeout at or under two intervals evicts live peers after a single lost heartbeat.
        if self.membership_timeout_ms <= self.heartbeat_interval_ms.saturating_mul(2) {
            return Err(ConfigError::TimeoutTooShort {
                timeout_ms: self.membership_timeout_ms,
                heartbeat_ms: self.heartbeat_interval_ms,
            });
        }

        if self.topic_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyTopicPrefix);
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn membership_timeout(&self) -> Duration {
        Duration::from_millis(self.membership_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    /// Topic carrying `{ id }` heartbeats.
    pub fn heartbeat_topic(&self) -> String {
        format!("{}/heartbeat", self.topic_prefix)
    }

    /// Retained topic carrying the canonical shared state.
    pub fn shared_state_topic(&self) -> String {
        format!("{}/shared-state", self.topic_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.membership_timeout(), Duration::from_millis(3500));
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_timeout_must_exceed_heartbeats() {
        let config = NodeConfig {
            heartbeat_interval_ms: 1000,
            membership_timeout_ms: 2000,
            ..NodeConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TimeoutTooShort {
                timeout_ms: 2000,
                heartbeat_ms: 1000
            })
        );
    }

    #[test]
    fn test_rejects_empty_slice_and_zero_tick() {
        let config = NodeConfig {
            slice_width: 0,
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptySlice { .. })));

        let config = NodeConfig {
            tick_interval_ms: 0,
            ..NodeConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroInterval("tick_interval_ms")));
    }

    #[test]
    fn test_topics_and_partial_json() {
        let config: NodeConfig =
            serde_json::from_str(r#"{ "node_id": 2, "topic_prefix": "pico" }"#).unwrap();
        assert_eq!(config.node_id, NodeId(2));
        assert_eq!(config.slice_width, 8);
        assert_eq!(config.heartbeat_topic(), "pico/heartbeat");
        assert_eq!(config.shared_state_topic(), "pico/shared-state");
    }
}
