//! Engine configuration.

use serde::Deserialize;
use serde::Serialize;

/// Tunables shared by every document an engine hosts.
///
/// Deserializes with defaults for missing fields, so an embedding server
/// can load it from whatever config format it already uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of remote operations a causal buffer holds at once.
    /// Submissions beyond it are rejected as unresolvable.
    pub backlog_ceiling: usize,
    /// Number of successful applications a buffered operation may wait
    /// through before it is expired as unresolvable.
    pub max_wait: u64,
    /// Length of generated share codes, in characters.
    pub share_code_len: usize,
    /// Capacity of the cursor and presence broadcast channels.
    /// Slow subscribers lose the oldest updates beyond it.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        return EngineConfig {
            backlog_ceiling: 4096,
            max_wait: 65536,
            share_code_len: 10,
            event_capacity: 256,
        };
    }
}

impl EngineConfig {
    pub fn with_backlog_ceiling(mut self, backlog_ceiling: usize) -> EngineConfig {
        self.backlog_ceiling = backlog_ceiling;
        return self;
    }

    pub fn with_max_wait(mut self, max_wait: u64) -> EngineConfig {
        self.max_wait = max_wait;
        return self;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "backlog_ceiling": 8 }"#).unwrap();
        assert_eq!(config.backlog_ceiling, 8);
        assert_eq!(config.max_wait, EngineConfig::default().max_wait);
        assert_eq!(config.share_code_len, 10);
    }

    #[test]
    fn builders_override() {
        let config = EngineConfig::default().with_backlog_ceiling(3).with_max_wait(7);
        assert_eq!(config.backlog_ceiling, 3);
        assert_eq!(config.max_wait, 7);
    }
}
