//! Service definitions as seen by the monitor

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity of a monitored service
pub type ServiceId = i64;

/// A monitored HTTP endpoint.
///
/// Owned by whatever surface defines services; the monitor only ever reads a
/// snapshot of it per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: i32,
    #[serde(default)]
    pub timeout_ms: i64,
    #[serde(default)]
    pub interval_sec: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> i32 {
    200
}

fn default_active() -> bool {
    true
}

impl Service {
    /// Create an active GET service expecting 200
    pub fn new(id: ServiceId, url: impl Into<String>) -> Self {
        Self {
            id,
            name: format!("service-{}", id),
            url: url.into(),
            method: default_method(),
            expected_status: default_expected_status(),
            timeout_ms: 0,
            interval_sec: 0,
            is_active: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_expected_status(mut self, status: i32) -> Self {
        self.expected_status = status;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_interval_sec(mut self, interval_sec: i64) -> Self {
        self.interval_sec = interval_sec;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Configured timeout, or `fallback` when it is not positive
    pub fn timeout_or(&self, fallback: Duration) -> Duration {
        if self.timeout_ms > 0 {
            Duration::from_millis(self.timeout_ms as u64)
        } else {
            fallback
        }
    }

    /// Configured check interval, or `fallback` when it is not positive
    pub fn interval_or(&self, fallback: Duration) -> Duration {
        if self.interval_sec > 0 {
            Duration::from_secs(self.interval_sec as u64)
        } else {
            fallback
        }
    }
}
