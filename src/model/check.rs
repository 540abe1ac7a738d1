//! Check history, latest status and the live status payload

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::service::ServiceId;

/// Outcome of one probe, before it is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCheck {
    pub service_id: ServiceId,
    /// Observed HTTP status, 0 when no response was received
    pub status_code: i32,
    /// End-to-end elapsed time in whole milliseconds
    pub response_time_ms: i64,
    pub is_up: bool,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// A persisted, immutable check record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: i64,
    pub service_id: ServiceId,
    pub status_code: i32,
    pub response_time_ms: i64,
    pub is_up: bool,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn from_new(id: i64, check: NewCheck) -> Self {
        Self {
            id,
            service_id: check.service_id,
            status_code: check.status_code,
            response_time_ms: check.response_time_ms,
            is_up: check.is_up,
            error: check.error,
            checked_at: check.checked_at,
        }
    }
}

/// Latest known state of a service, one per service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service_id: ServiceId,
    pub is_up: bool,
    pub status_code: i32,
    pub response_time_ms: i64,
    pub last_checked: DateTime<Utc>,
}

/// Payload pushed to live subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub service_id: ServiceId,
    pub is_up: bool,
    pub status_code: i32,
    pub response_time: i64,
    /// RFC 3339, second precision
    pub checked_at: String,
}

impl StatusMessage {
    pub fn new(status: &ServiceStatus, at: DateTime<Utc>) -> Self {
        Self {
            service_id: status.service_id,
            is_up: status.is_up,
            status_code: status.status_code,
            response_time: status.response_time_ms,
            checked_at: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Aggregate over a window of checks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UptimeSummary {
    pub service_id: ServiceId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_checks: usize,
    pub up_checks: usize,
    pub down_checks: usize,
    pub uptime_percent: f64,
    pub avg_response_time: f64,
}

impl UptimeSummary {
    /// Summarise `checks`, which must already be restricted to the window
    pub fn compute(
        service_id: ServiceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        checks: &[CheckResult],
    ) -> Self {
        let total_checks = checks.len();
        let up_checks = checks.iter().filter(|c| c.is_up).count();
        let (uptime_percent, avg_response_time) = if total_checks > 0 {
            let sum: i64 = checks.iter().map(|c| c.response_time_ms).sum();
            (
                up_checks as f64 / total_checks as f64 * 100.0,
                sum as f64 / total_checks as f64,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            service_id,
            from,
            to,
            total_checks,
            up_checks,
            down_checks: total_checks - up_checks,
            uptime_percent,
            avg_response_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn check(id: i64, is_up: bool, response_time_ms: i64) -> CheckResult {
        CheckResult {
            id,
            service_id: 1,
            status_code: if is_up { 200 } else { 500 },
            response_time_ms,
            is_up,
            error: None,
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_message_fields() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let status = ServiceStatus {
            service_id: 3,
            is_up: false,
            status_code: 503,
            response_time_ms: 87,
            last_checked: at,
        };

        let json = serde_json::to_value(StatusMessage::new(&status, at)).unwrap();
        assert_eq!(json["service_id"], 3);
        assert_eq!(json["is_up"], false);
        assert_eq!(json["status_code"], 503);
        assert_eq!(json["response_time"], 87);
        assert_eq!(json["checked_at"], "2024-05-01T12:30:00Z");
    }

    #[test]
    fn test_uptime_summary() {
        let now = Utc::now();
        let checks = vec![check(1, true, 100), check(2, true, 200), check(3, false, 300), check(4, true, 400)];

        let summary = UptimeSummary::compute(1, now, now, &checks);
        assert_eq!(summary.total_checks, 4);
        assert_eq!(summary.up_checks, 3);
        assert_eq!(summary.down_checks, 1);
        assert!((summary.uptime_percent - 75.0).abs() < f64::EPSILON);
        assert!((summary.avg_response_time - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_uptime_summary_empty() {
        let now = Utc::now();
        let summary = UptimeSummary::compute(1, now, now, &[]);
        assert_eq!(summary.total_checks, 0);
        assert_eq!(summary.uptime_percent, 0.0);
        assert_eq!(summary.avg_response_time, 0.0);
    }
}
