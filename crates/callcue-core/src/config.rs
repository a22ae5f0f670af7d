use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the user-message aggregator.
///
/// Hosting shells may override these as part of their call configuration;
/// the defaults match production behavior.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AggregatorConfig {
    /// How long "no other participant has a stream" must hold before the
    /// left-alone alert is raised, in milliseconds.
    #[serde(default = "default_left_alone_debounce_ms")]
    pub left_alone_debounce_ms: u64,
    /// How long "still waiting for others" must hold before the
    /// waiting-for-others alert is raised, in milliseconds.
    #[serde(default = "default_waiting_for_others_debounce_ms")]
    pub waiting_for_others_debounce_ms: u64,
    /// Capacity of the per-session user-message queue.
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,
}

fn default_left_alone_debounce_ms() -> u64 {
    5000
}

fn default_waiting_for_others_debounce_ms() -> u64 {
    3000
}

fn default_message_buffer() -> usize {
    64
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            left_alone_debounce_ms: default_left_alone_debounce_ms(),
            waiting_for_others_debounce_ms: default_waiting_for_others_debounce_ms(),
            message_buffer: default_message_buffer(),
        }
    }
}

impl AggregatorConfig {
    /// Parse a configuration blob passed by the hosting shell.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn left_alone_debounce(&self) -> Duration {
        Duration::from_millis(self.left_alone_debounce_ms)
    }

    pub fn waiting_for_others_debounce(&self) -> Duration {
        Duration::from_millis(self.waiting_for_others_debounce_ms)
    }
}
