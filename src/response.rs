//! Uniform wrapper over an HTTP reply or a transport failure.
//!
//! Every context HTTP call returns a [`Response`], never an error: callers
//! inside screens branch on `ok()` / `error()` instead of unwrapping. The
//! JSON body is parsed lazily and cached; a missing or malformed body parses
//! to an empty object so lookups stay total.

use std::sync::OnceLock;

use serde_json::{Map, Value};

use crate::errors::TransportKind;

static EMPTY_JSON: OnceLock<Value> = OnceLock::new();

fn empty_json() -> &'static Value {
    EMPTY_JSON.get_or_init(|| Value::Object(Map::new()))
}

/// Outcome of a single HTTP round-trip.
#[derive(Debug)]
pub enum Response {
    /// The server answered with a status line; the body may be empty.
    Http {
        status: u16,
        body: Vec<u8>,
        parsed: OnceLock<Value>,
    },

    /// The round-trip never produced a status.
    Transport { kind: TransportKind },
}

impl Response {
    /// Wrap a served reply.
    pub fn http(status: u16, body: Vec<u8>) -> Self {
        Response::Http {
            status,
            body,
            parsed: OnceLock::new(),
        }
    }

    /// Wrap a transport failure.
    pub fn transport(kind: TransportKind) -> Self {
        Response::Transport { kind }
    }

    /// The HTTP status, or `None` on transport failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Response::Http { status, .. } => Some(*status),
            Response::Transport { .. } => None,
        }
    }

    /// True when the status is in `200..=299`.
    pub fn ok(&self) -> bool {
        matches!(self.status(), Some(status) if (200..=299).contains(&status))
    }

    /// Alias for [`Response::ok`].
    pub fn success(&self) -> bool {
        self.ok()
    }

    /// The transport failure kind, if any.
    pub fn error(&self) -> Option<TransportKind> {
        match self {
            Response::Http { .. } => None,
            Response::Transport { kind } => Some(*kind),
        }
    }

    /// Raw body bytes; empty on transport failure.
    pub fn body(&self) -> &[u8] {
        match self {
            Response::Http { body, .. } => body,
            Response::Transport { .. } => &[],
        }
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.body()).into_owned()
    }

    /// The body parsed as JSON, cached after the first call.
    ///
    /// An empty or malformed body parses to `{}`.
    pub fn json(&self) -> &Value {
        match self {
            Response::Http { body, parsed, .. } => parsed.get_or_init(|| {
                if body.is_empty() {
                    empty_json().clone()
                } else {
                    serde_json::from_slice(body).unwrap_or_else(|_| empty_json().clone())
                }
            }),
            Response::Transport { .. } => empty_json(),
        }
    }

    /// Look up a top-level key in the cached JSON parse.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.json().get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_response_status_and_ok() {
        let resp = Response::http(200, b"{}".to_vec());
        assert_eq!(resp.status(), Some(200));
        assert!(resp.ok());
        assert!(resp.success());
        assert_eq!(resp.error(), None);
    }

    #[test]
    fn test_non_2xx_is_not_ok() {
        assert!(!Response::http(301, Vec::new()).ok());
        assert!(!Response::http(404, Vec::new()).ok());
        assert!(!Response::http(500, Vec::new()).ok());
        assert!(Response::http(204, Vec::new()).ok());
    }

    #[test]
    fn test_transport_response_is_total() {
        let resp = Response::transport(TransportKind::Connect);
        assert_eq!(resp.status(), None);
        assert!(!resp.ok());
        assert!(!resp.success());
        assert_eq!(resp.error(), Some(TransportKind::Connect));
        assert_eq!(resp.json(), &json!({}));
        assert_eq!(resp.get("anything"), None);
    }

    #[test]
    fn test_json_parse_is_cached() {
        let resp = Response::http(200, br#"{"token":"abc","n":3}"#.to_vec());
        let first = resp.json() as *const Value;
        let second = resp.json() as *const Value;
        assert_eq!(first, second);
        assert_eq!(resp.get("token"), Some(&json!("abc")));
        assert_eq!(resp.get("n"), Some(&json!(3)));
    }

    #[test]
    fn test_malformed_body_parses_to_empty_object() {
        let resp = Response::http(200, b"not json at all".to_vec());
        assert_eq!(resp.json(), &json!({}));
        assert_eq!(resp.get("key"), None);
    }

    #[test]
    fn test_empty_body_parses_to_empty_object() {
        let resp = Response::http(204, Vec::new());
        assert_eq!(resp.json(), &json!({}));
    }
}
