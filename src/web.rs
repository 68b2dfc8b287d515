//! Dashboard HTTP surface: status, start/stop control, and an SSE stream of
//! live snapshots.
//!
//! The dashboard replaces the terminal renderer in `--web` mode. It serves a
//! self-contained HTML page and a small JSON API; the stream endpoint relays
//! the snapshot JSON the run's monitor task caches once per second, so any
//! number of stream clients observe the same intervals.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::errors::RunError;
use crate::registry::{default_handle, RegistryHandle};
use crate::runner::{RunControl, Runner};
use crate::stats::RunState;

/// Default dashboard port.
pub const DEFAULT_PORT: u16 = 8089;

const INDEX_HTML: &str = include_str!("dashboard.html");

#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    scenario: Option<String>,
    users: Option<u64>,
    spawn_rate: Option<f64>,
    workers: Option<u64>,
}

/// Dashboard state: the registry it starts runs from and the run in flight.
pub struct Dashboard {
    registry: RegistryHandle,
    current: Mutex<Option<Arc<RunControl>>>,
}

impl Dashboard {
    pub fn new(registry: RegistryHandle) -> Self {
        Self {
            registry,
            current: Mutex::new(None),
        }
    }

    fn current_control(&self) -> Option<Arc<RunControl>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    // A control whose run future has not been polled yet still reads Idle;
    // it was launched, so it counts as in progress.
    fn running(&self) -> bool {
        matches!(
            self.current_control().map(|c| c.state()),
            Some(RunState::Running) | Some(RunState::Stopping) | Some(RunState::Idle)
        )
    }

    /// `GET /api/status` payload.
    pub fn status(&self) -> Value {
        let state = self
            .current_control()
            .map(|c| c.state())
            .unwrap_or(RunState::Idle);
        let registry = self
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let config = registry.config();
        json!({
            "state": state.as_str(),
            "scenarios": registry.scenario_names(),
            "config": {
                "base_url": config.base_url,
                "users": config.users,
                "spawn_rate": config.spawn_rate,
                "workers": config.workers,
            },
        })
    }

    /// `POST /api/start`: apply positive numeric overrides, pick the
    /// scenario, validate, and launch a run in the background.
    pub fn start(&self, body: &[u8]) -> (StatusCode, Value) {
        if self.running() {
            return (
                StatusCode::CONFLICT,
                json!({ "error": "a run is already in progress" }),
            );
        }

        let request: StartRequest = if body.is_empty() {
            StartRequest::default()
        } else {
            match serde_json::from_slice(body) {
                Ok(request) => request,
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        json!({ "error": format!("invalid JSON body: {}", e) }),
                    )
                }
            }
        };

        let runner = {
            let mut registry = self
                .registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            registry.configure(|config| {
                if let Some(users) = request.users.filter(|&n| n > 0) {
                    config.users = users as usize;
                }
                if let Some(rate) = request.spawn_rate.filter(|&r| r > 0.0) {
                    config.spawn_rate = rate;
                }
                if let Some(workers) = request.workers.filter(|&n| n > 0) {
                    config.workers = workers as usize;
                }
            });

            let scenario = match &request.scenario {
                Some(name) => name.clone(),
                None => {
                    let names = registry.scenario_names();
                    if names.iter().any(|n| n == "main") {
                        "main".to_string()
                    } else {
                        match names.first() {
                            Some(first) => first.clone(),
                            None => {
                                return (
                                    StatusCode::BAD_REQUEST,
                                    json!({ "error": "no scenarios registered" }),
                                )
                            }
                        }
                    }
                }
            };

            match Runner::new(&registry, &scenario, false) {
                Ok(runner) => runner,
                Err(e) => {
                    return (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }))
                }
            }
        };

        let control = runner.control();
        let scenario = control.scenario().to_string();
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(control);
        tokio::spawn(runner.run());

        info!(scenario = %scenario, "Run started from dashboard");
        (
            StatusCode::OK,
            json!({ "state": "running", "scenario": scenario }),
        )
    }

    /// `POST /api/stop`.
    pub fn stop(&self) -> (StatusCode, Value) {
        match self.current_control() {
            Some(control) if self.running() => {
                control.request_stop();
                (StatusCode::OK, json!({ "state": "stopping" }))
            }
            _ => (
                StatusCode::CONFLICT,
                json!({ "error": "no run in progress" }),
            ),
        }
    }

    /// Payload for one SSE tick.
    pub fn stream_payload(&self) -> String {
        match self.current_control().and_then(|c| c.latest_snapshot_json()) {
            Some(json) => json,
            None => json!({ "state": "idle" }).to_string(),
        }
    }
}

async fn handle(
    req: Request<Body>,
    dashboard: Arc<Dashboard>,
) -> Result<Response<Body>, hyper::Error> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => html_response(INDEX_HTML),
        (&Method::GET, "/api/status") => json_response(StatusCode::OK, dashboard.status()),
        (&Method::POST, "/api/start") => {
            let body = hyper::body::to_bytes(req.into_body()).await?;
            let (status, payload) = dashboard.start(&body);
            json_response(status, payload)
        }
        (&Method::POST, "/api/stop") => {
            let (status, payload) = dashboard.stop();
            json_response(status, payload)
        }
        (&Method::GET, "/api/stream") => stream_response(dashboard.clone()),
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
    };
    Ok(response)
}

fn json_response(status: StatusCode, payload: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap_or_default()
}

fn html_response(html: &'static str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(Body::from(html))
        .unwrap_or_default()
}

/// Open-ended event stream: one `data: <snapshot-json>` frame per second
/// until the client disconnects.
fn stream_response(dashboard: Arc<Dashboard>) -> Response<Body> {
    let ticks = IntervalStream::new(tokio::time::interval(std::time::Duration::from_secs(1)));
    let stream = ticks.map(move |_| {
        Ok::<_, Infallible>(hyper::body::Bytes::from(format!(
            "data: {}\n\n",
            dashboard.stream_payload()
        )))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .body(Body::wrap_stream(stream))
        .unwrap_or_default()
}

/// Serve the dashboard until the process exits.
///
/// A bind failure is returned to the embedder; it never corrupts a run that
/// is already in progress.
pub async fn serve(port: u16) -> Result<(), RunError> {
    serve_with_registry(port, default_handle()).await
}

/// Serve the dashboard over an explicit registry.
pub async fn serve_with_registry(port: u16, registry: RegistryHandle) -> Result<(), RunError> {
    let dashboard = Arc::new(Dashboard::new(registry));
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let dashboard = dashboard.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| handle(req, dashboard.clone())))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(port, "Dashboard listening");
    println!("Dashboard listening on http://0.0.0.0:{}", port);

    if let Err(e) = server.await {
        warn!(error = %e, "Dashboard server error");
        return Err(RunError::DashboardBind(e));
    }
    Ok(())
}
