//! Error classification and run-level error types.
//!
//! Transport failures are classified into coarse kinds so that metrics and
//! reports can group them meaningfully. A transport failure is any HTTP
//! round-trip that never produced a status code: connection refused or reset,
//! open/read timeouts, DNS failures, or an unexpected EOF mid-body.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Kinds of transport-layer failure.
///
/// A metric carrying one of these has `status = None`; the two are mutually
/// exclusive on a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Connection could not be established (refused, reset, unreachable).
    Connect,

    /// Open or read timeout elapsed.
    Timeout,

    /// Name resolution failed.
    Dns,

    /// The response body could not be read (unexpected EOF, decode failure).
    Body,

    /// The request could not be built or sent.
    Request,

    /// Anything that does not fit the categories above.
    Other,
}

impl TransportKind {
    /// Classify a reqwest error into a transport kind.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportKind::Timeout
        } else if error.is_connect() {
            TransportKind::Connect
        } else if error.is_body() || error.is_decode() {
            TransportKind::Body
        } else if error.is_request() {
            TransportKind::Request
        } else {
            let message = error.to_string().to_lowercase();
            if message.contains("dns") || message.contains("resolve") {
                TransportKind::Dns
            } else if message.contains("timeout") {
                TransportKind::Timeout
            } else if message.contains("connect") || message.contains("connection") {
                TransportKind::Connect
            } else {
                TransportKind::Other
            }
        }
    }

    /// Stable label used in metrics and JSON reports.
    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::Connect => "connect",
            TransportKind::Timeout => "timeout",
            TransportKind::Dns => "dns",
            TransportKind::Body => "body",
            TransportKind::Request => "request",
            TransportKind::Other => "other",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Errors that abort a run before any virtual user is spawned, plus the one
/// fatal condition a dashboard embedder can hit.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("unknown scenario: '{0}'")]
    UnknownScenario(String),

    #[error("scenario '{scenario}' references unregistered symbols: {missing}")]
    MissingSymbols {
        scenario: String,
        /// Comma-separated list of the unresolved names.
        missing: String,
    },

    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("failed to bind dashboard port: {0}")]
    DashboardBind(#[from] hyper::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_labels() {
        assert_eq!(TransportKind::Connect.label(), "connect");
        assert_eq!(TransportKind::Timeout.label(), "timeout");
        assert_eq!(TransportKind::Dns.label(), "dns");
        assert_eq!(TransportKind::Body.label(), "body");
        assert_eq!(TransportKind::Request.label(), "request");
        assert_eq!(TransportKind::Other.label(), "other");
    }

    #[test]
    fn test_transport_kind_serializes_as_label() {
        let json = serde_json::to_string(&TransportKind::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
    }

    #[test]
    fn test_missing_symbols_message_names_the_symbols() {
        let err = RunError::MissingSymbols {
            scenario: "main".to_string(),
            missing: "screen 'login', screen 'cart'".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("login"));
        assert!(message.contains("cart"));
        assert!(message.contains("main"));
    }
}
