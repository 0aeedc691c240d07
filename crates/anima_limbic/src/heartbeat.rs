//! Heartbeat pacing for the regulatory loop
//!
//! The heartbeat decides how often the runtime checks for an idle interval.
//! A heartbeat only fires when no event arrived during that interval, and it
//! advances the cycle exactly like an event does.

use std::time::Duration;

use anima_core::RuntimeConfig;

/// Configuration for the idle heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How long an interval must stay silent before a heartbeat cycle (default: 100ms)
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
        }
    }
}

impl HeartbeatConfig {
    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self {
            interval: Duration::from_millis(runtime.heartbeat_interval_ms.max(1)),
        }
    }

    /// Very short heartbeat for tests
    pub fn testing() -> Self {
        Self {
            interval: Duration::from_millis(10),
        }
    }
}
