//! Per-user execution context.
//!
//! Each virtual user exclusively owns one [`UserContext`]: its HTTP client,
//! scratch store, header table, and metric/error buffers. Nothing here is
//! shared across tasks; the stats aggregator only sees the buffers once, via
//! [`UserContext::take_buffers`] at retirement.
//!
//! # Cookie and session isolation
//!
//! The lazy client enables reqwest's cookie store, so cookies set by one
//! user's responses never leak into another user's requests. The same goes
//! for `default_headers`: a screen that caches an `Authorization` header
//! there only affects its own user.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::TransportKind;
use crate::metrics::{round1, MetricRecord, ScenarioError};
use crate::response::Response;

/// Optional parts of a single HTTP call. All fields default to empty.
#[derive(Debug, Default, Clone)]
pub struct RequestOptions {
    /// Query parameters, urlencoded into the request URL.
    pub params: Vec<(String, String)>,

    /// Per-call headers; these win over the context's `default_headers`.
    pub headers: HashMap<String, String>,

    /// Raw request body, used when `json` is absent.
    pub body: Option<String>,

    /// JSON body. A `Value::String` is sent verbatim; anything else is
    /// serialized. Takes precedence over `body`.
    pub json: Option<Value>,

    /// Metric name recorded instead of the raw path.
    pub name: Option<String>,
}

impl RequestOptions {
    /// Options carrying only a JSON body.
    pub fn json(value: Value) -> Self {
        RequestOptions {
            json: Some(value),
            ..Default::default()
        }
    }

    /// Options carrying only a metric name.
    pub fn named(name: impl Into<String>) -> Self {
        RequestOptions {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// State owned by one virtual user for the span of one scenario execution.
pub struct UserContext {
    /// Positive id, unique within a run.
    pub user_id: u64,

    /// The run's frozen configuration.
    pub config: Arc<Config>,

    /// User-level scratch space for screens to pass artifacts forward.
    pub store: HashMap<String, Value>,

    /// Headers sent with every request unless overridden per call.
    pub default_headers: HashMap<String, String>,

    metrics: Vec<MetricRecord>,
    scenario_errors: Vec<ScenarioError>,
    current_screen: Option<String>,
    aborted: bool,
    client: Option<reqwest::Client>,
}

impl UserContext {
    pub fn new(user_id: u64, config: Arc<Config>) -> Self {
        let mut default_headers = HashMap::new();
        default_headers.insert(
            "Content-Type".to_string(),
            "application/json".to_string(),
        );
        default_headers.insert(
            "User-Agent".to_string(),
            concat!("loadsmith/", env!("CARGO_PKG_VERSION")).to_string(),
        );

        Self {
            user_id,
            config,
            store: HashMap::new(),
            default_headers,
            metrics: Vec::new(),
            scenario_errors: Vec::new(),
            current_screen: None,
            aborted: false,
            client: None,
        }
    }

    /// The screen currently executing, if any.
    pub fn current_screen(&self) -> Option<&str> {
        self.current_screen.as_deref()
    }

    pub(crate) fn set_current_screen(&mut self, screen: Option<String>) {
        self.current_screen = screen;
    }

    /// Monotonic abort flag: once set, the executor stops at the next step
    /// boundary and never runs another step on this context.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }

    /// Append a scenario-level error to this user's buffer.
    pub fn record_scenario_error(&mut self, screen: Option<&str>, message: impl Into<String>) {
        self.scenario_errors.push(ScenarioError {
            screen: screen.map(str::to_string),
            message: message.into(),
            time: Utc::now(),
        });
    }

    /// Metrics recorded so far, in issue order.
    pub fn metrics(&self) -> &[MetricRecord] {
        &self.metrics
    }

    /// Scenario errors recorded so far.
    pub fn scenario_errors(&self) -> &[ScenarioError] {
        &self.scenario_errors
    }

    /// Move the metric and error buffers out for the stats hand-off.
    pub fn take_buffers(&mut self) -> (Vec<MetricRecord>, Vec<ScenarioError>) {
        (
            std::mem::take(&mut self.metrics),
            std::mem::take(&mut self.scenario_errors),
        )
    }

    /// Release the HTTP client. Safe to call when never opened, and again
    /// after a previous close.
    pub fn close(&mut self) {
        self.client = None;
    }

    pub async fn get(&mut self, path: &str, opts: RequestOptions) -> Response {
        self.request(Method::GET, path, opts).await
    }

    pub async fn post(&mut self, path: &str, opts: RequestOptions) -> Response {
        self.request(Method::POST, path, opts).await
    }

    pub async fn put(&mut self, path: &str, opts: RequestOptions) -> Response {
        self.request(Method::PUT, path, opts).await
    }

    pub async fn patch(&mut self, path: &str, opts: RequestOptions) -> Response {
        self.request(Method::PATCH, path, opts).await
    }

    pub async fn delete(&mut self, path: &str, opts: RequestOptions) -> Response {
        self.request(Method::DELETE, path, opts).await
    }

    /// Perform one HTTP round-trip and record exactly one metric for it.
    ///
    /// Always returns a [`Response`]; transport failures are absorbed and the
    /// client is discarded so the next call rebuilds it lazily.
    pub async fn request(&mut self, method: Method, path: &str, opts: RequestOptions) -> Response {
        let url = self.resolve_url(path);
        let metric_path = opts.name.clone().unwrap_or_else(|| path.to_string());
        let started = Instant::now();

        let client = match self.client() {
            Ok(client) => client.clone(),
            Err(kind) => {
                self.push_transport_metric(&method, metric_path, kind, started);
                return Response::transport(kind);
            }
        };

        let mut builder = client.request(method.clone(), &url);
        if !opts.params.is_empty() {
            builder = builder.query(&opts.params);
        }

        // Merge headers up front so a per-call header replaces the default
        // rather than being appended next to it.
        let mut headers = self.default_headers.clone();
        headers.extend(opts.headers.clone());
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(json) = &opts.json {
            let body = match json {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            builder = builder.body(body);
        } else if let Some(body) = &opts.body {
            builder = builder.body(body.clone());
        }

        debug!(
            user_id = self.user_id,
            method = %method,
            url = %url,
            "Issuing request"
        );

        let reply = match builder.send().await {
            Ok(reply) => reply,
            Err(e) => {
                let kind = TransportKind::from_reqwest_error(&e);
                warn!(
                    user_id = self.user_id,
                    url = %url,
                    error = %e,
                    kind = %kind,
                    "Request failed in transport"
                );
                self.client = None;
                self.push_transport_metric(&method, metric_path, kind, started);
                return Response::transport(kind);
            }
        };

        let status = reply.status().as_u16();
        let body = match reply.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                let kind = TransportKind::from_reqwest_error(&e);
                warn!(
                    user_id = self.user_id,
                    url = %url,
                    error = %e,
                    kind = %kind,
                    "Response body read failed"
                );
                self.client = None;
                self.push_transport_metric(&method, metric_path, kind, started);
                return Response::transport(kind);
            }
        };

        let latency_ms = round1(started.elapsed().as_secs_f64() * 1000.0);
        self.metrics.push(MetricRecord {
            method: method.to_string(),
            path: metric_path,
            status: Some(status),
            latency_ms: Some(latency_ms),
            error: None,
            screen: self.current_screen.clone(),
            time: Utc::now(),
        });

        Response::http(status, body)
    }

    fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
        }
    }

    fn client(&mut self) -> Result<&reqwest::Client, TransportKind> {
        if self.client.is_none() {
            let built = reqwest::Client::builder()
                .cookie_store(true)
                .connect_timeout(self.config.open_timeout_duration())
                .timeout(self.config.total_timeout_duration())
                .build();
            match built {
                Ok(client) => self.client = Some(client),
                Err(e) => {
                    warn!(user_id = self.user_id, error = %e, "Failed to build HTTP client");
                    return Err(TransportKind::from_reqwest_error(&e));
                }
            }
        }
        match &self.client {
            Some(client) => Ok(client),
            None => Err(TransportKind::Other),
        }
    }

    fn push_transport_metric(
        &mut self,
        method: &Method,
        metric_path: String,
        kind: TransportKind,
        started: Instant,
    ) {
        let latency_ms = round1(started.elapsed().as_secs_f64() * 1000.0);
        self.metrics.push(MetricRecord {
            method: method.to_string(),
            path: metric_path,
            status: None,
            latency_ms: Some(latency_ms),
            error: Some(kind),
            screen: self.current_screen.clone(),
            time: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> UserContext {
        UserContext::new(1, Arc::new(Config::default()))
    }

    #[test]
    fn test_default_headers_seeded() {
        let ctx = ctx();
        assert_eq!(
            ctx.default_headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert!(ctx
            .default_headers
            .get("User-Agent")
            .is_some_and(|ua| ua.starts_with("loadsmith/")));
    }

    #[test]
    fn test_abort_is_monotonic() {
        let mut ctx = ctx();
        assert!(!ctx.aborted());
        ctx.abort();
        ctx.abort();
        assert!(ctx.aborted());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut ctx = ctx();
        ctx.close();
        ctx.close();
    }

    #[test]
    fn test_take_buffers_moves_everything_out() {
        let mut ctx = ctx();
        ctx.record_scenario_error(Some("login"), "boom");
        let (metrics, errors) = ctx.take_buffers();
        assert!(metrics.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].screen.as_deref(), Some("login"));

        let (_, errors_again) = ctx.take_buffers();
        assert!(errors_again.is_empty());
    }

    #[test]
    fn test_resolve_url_joins_base_and_path() {
        let config = Config {
            base_url: "http://example.test:8080/".to_string(),
            ..Config::default()
        };
        let ctx = UserContext::new(1, Arc::new(config));
        assert_eq!(
            ctx.resolve_url("/api/items"),
            "http://example.test:8080/api/items"
        );
        assert_eq!(ctx.resolve_url("https://other.test/x"), "https://other.test/x");
    }
}
