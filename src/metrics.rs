//! Per-request metric records and scenario-level error records.
//!
//! Both types are appended to a user's context while it runs and handed to
//! the stats aggregator in bulk when the user retires. Neither is shared
//! across tasks before that hand-off.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::TransportKind;

/// One HTTP request observation.
///
/// `status` and `error` are mutually exclusive: a record with `error` set
/// never produced a status line, and vice versa.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    /// HTTP method, upper-cased at aggregation time.
    pub method: String,

    /// Metric path: the explicit request name when one was given, otherwise
    /// the raw request path.
    pub path: String,

    /// Status code, when the server answered.
    pub status: Option<u16>,

    /// Round-trip latency in milliseconds, rounded to one decimal.
    pub latency_ms: Option<f64>,

    /// Transport failure kind, when the round-trip never produced a status.
    pub error: Option<TransportKind>,

    /// Screen that issued the request, if any.
    pub screen: Option<String>,

    /// Wall-clock time the request completed.
    pub time: DateTime<Utc>,
}

/// Round to one decimal place, the precision latencies are recorded at.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl MetricRecord {
    /// True when this record counts as an error for aggregation: a transport
    /// failure or a functional (4xx/5xx) status.
    pub fn is_error(&self) -> bool {
        self.error.is_some() || matches!(self.status, Some(status) if status >= 400)
    }
}

/// A scenario-level failure: a screen raised, a named screen or sub-scenario
/// was missing at execution time, or user code recorded one directly.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioError {
    /// Screen that was executing, when known.
    pub screen: Option<String>,

    pub message: String,

    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(status: Option<u16>, error: Option<TransportKind>) -> MetricRecord {
        MetricRecord {
            method: "GET".to_string(),
            path: "/".to_string(),
            status,
            latency_ms: Some(1.0),
            error,
            screen: None,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_is_error_on_transport_failure() {
        assert!(metric(None, Some(TransportKind::Connect)).is_error());
    }

    #[test]
    fn test_is_error_on_functional_status() {
        assert!(metric(Some(404), None).is_error());
        assert!(metric(Some(500), None).is_error());
        assert!(!metric(Some(200), None).is_error());
        assert!(!metric(Some(301), None).is_error());
    }

    #[test]
    fn test_serializes_error_as_label() {
        let json = serde_json::to_value(metric(None, Some(TransportKind::Timeout))).unwrap();
        assert_eq!(json["error"], "timeout");
        assert_eq!(json["status"], serde_json::Value::Null);
    }
}
