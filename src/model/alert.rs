//! Transition alerts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::service::ServiceId;

/// Direction of a status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    Down,
    Recovered,
}

impl AlertKind {
    /// Kind of alert raised when a service becomes `is_up`
    pub fn for_state(is_up: bool) -> Self {
        if is_up {
            AlertKind::Recovered
        } else {
            AlertKind::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Down => "DOWN",
            AlertKind::Recovered => "RECOVERED",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AlertKind::Down => "Service is DOWN",
            AlertKind::Recovered => "Service has recovered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DOWN" => Some(AlertKind::Down),
            "RECOVERED" => Some(AlertKind::Recovered),
            _ => None,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert to be written inside a status transaction
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub service_id: ServiceId,
    pub kind: AlertKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl NewAlert {
    pub fn new(service_id: ServiceId, kind: AlertKind, created_at: DateTime<Utc>) -> Self {
        Self {
            service_id,
            kind,
            message: kind.message().to_string(),
            created_at,
        }
    }
}

/// A persisted alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub service_id: ServiceId,
    pub kind: AlertKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn from_new(id: i64, alert: NewAlert) -> Self {
        Self {
            id,
            service_id: alert.service_id,
            kind: alert.kind,
            message: alert.message,
            created_at: alert.created_at,
        }
    }
}
