//! Thread-safe metric aggregation.
//!
//! One coarse mutex guards the flat metric log; contention stays low because
//! every critical section is an append or a swap. Per-endpoint maps are built
//! lazily at snapshot time from the flat log, keeping the hot path O(1).
//!
//! Snapshots are interval-consuming: taking one swaps out and zeroes the
//! interval buffer, so the windows seen by consecutive snapshots never
//! overlap. The terminal monitor and the dashboard must share snapshots or
//! each will see disjoint intervals.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::context::UserContext;
use crate::metrics::{round1, MetricRecord};

/// Lifecycle of a run, stamped onto every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopping,
    Complete,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Complete => "complete",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Stopping,
            3 => RunState::Complete,
            _ => RunState::Idle,
        }
    }
}

/// A scenario error attributed to the user that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct UserScenarioError {
    pub user_id: u64,
    pub screen: Option<String>,
    pub message: String,
}

/// Full per-endpoint aggregate, computed from a group of metrics.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointAggregate {
    /// `"<METHOD:6-pad> <path>"`, e.g. `"GET    /api/items"`.
    pub name: String,
    pub count: u64,
    pub errors: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Interval slice of the snapshot payload.
#[derive(Debug, Clone, Serialize)]
pub struct IntervalEndpoint {
    pub name: String,
    pub count: u64,
    pub avg: f64,
    pub p95: f64,
    pub p99: f64,
    pub errors: u64,
}

/// Cumulative slice of the snapshot payload.
#[derive(Debug, Clone, Serialize)]
pub struct CumulativeEndpoint {
    pub name: String,
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub errors: u64,
}

impl From<&EndpointAggregate> for IntervalEndpoint {
    fn from(a: &EndpointAggregate) -> Self {
        IntervalEndpoint {
            name: a.name.clone(),
            count: a.count,
            avg: a.avg,
            p95: a.p95,
            p99: a.p99,
            errors: a.errors,
        }
    }
}

impl From<&EndpointAggregate> for CumulativeEndpoint {
    fn from(a: &EndpointAggregate) -> Self {
        CumulativeEndpoint {
            name: a.name.clone(),
            count: a.count,
            avg: a.avg,
            min: a.min,
            max: a.max,
            p50: a.p50,
            p95: a.p95,
            p99: a.p99,
            errors: a.errors,
        }
    }
}

/// Live view emitted once per second to the terminal or the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub state: String,
    pub rps: f64,
    pub error_count: u64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub elapsed: f64,
    pub active_users: usize,
    pub total_users: u64,
    pub finished_users: u64,
    pub endpoints: Vec<IntervalEndpoint>,
    pub cumulative_endpoints: Vec<CumulativeEndpoint>,
    /// Last five scenario errors.
    pub recent_errors: Vec<UserScenarioError>,
}

/// Read-only final aggregate.
#[derive(Debug, Clone)]
pub struct Summary {
    pub duration_seconds: f64,
    pub total_requests: u64,
    pub total_users: u64,
    pub total_errors: u64,
    pub endpoints: Vec<EndpointAggregate>,
    pub scenario_error_count: u64,
}

/// Per-endpoint entry of the persisted report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEndpoint {
    pub endpoint: String,
    pub count: u64,
    pub errors: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Deterministic serializable form of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub timestamp: String,
    pub duration_seconds: f64,
    pub total_requests: u64,
    pub total_users: u64,
    pub total_errors: u64,
    pub endpoints: Vec<ReportEndpoint>,
    pub scenario_errors: Vec<UserScenarioError>,
    pub raw_metrics: Vec<MetricRecord>,
}

struct StatsInner {
    all_metrics: Vec<MetricRecord>,
    interval_metrics: Vec<MetricRecord>,
    scenario_errors: Vec<UserScenarioError>,
    started: u64,
    finished: u64,
    last_snapshot: Instant,
    duration_seconds: Option<f64>,
}

/// The one resource shared across user tasks.
pub struct Stats {
    inner: Mutex<StatsInner>,
    state: AtomicU8,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                all_metrics: Vec::new(),
                interval_metrics: Vec::new(),
                scenario_errors: Vec::new(),
                started: 0,
                finished: 0,
                last_snapshot: Instant::now(),
                duration_seconds: None,
            }),
            state: AtomicU8::new(0),
        }
    }

    pub fn set_state(&self, state: RunState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Ingest a single metric.
    pub fn record_metric(&self, metric: MetricRecord) {
        let mut inner = self.lock();
        inner.interval_metrics.push(metric.clone());
        inner.all_metrics.push(metric);
    }

    /// Retirement hand-off: move the context's metric and error buffers in
    /// bulk. The context is left empty and is not touched again.
    pub fn record_user(&self, ctx: &mut UserContext) {
        let user_id = ctx.user_id;
        let (metrics, errors) = ctx.take_buffers();
        let mut inner = self.lock();
        inner.interval_metrics.extend(metrics.iter().cloned());
        inner.all_metrics.extend(metrics);
        inner
            .scenario_errors
            .extend(errors.into_iter().map(|e| UserScenarioError {
                user_id,
                screen: e.screen,
                message: e.message,
            }));
    }

    pub fn user_started(&self) {
        self.lock().started += 1;
    }

    pub fn user_finished(&self) {
        self.lock().finished += 1;
    }

    /// Swap out the interval buffer and compute the live view.
    pub fn snapshot(&self, elapsed: f64, active: usize, total: u64) -> Snapshot {
        let state = self.state();
        let mut inner = self.lock();

        let interval = std::mem::take(&mut inner.interval_metrics);
        let interval_secs = inner.last_snapshot.elapsed().as_secs_f64();
        inner.last_snapshot = Instant::now();

        let rps = if interval_secs > 0.0 {
            round1(interval.len() as f64 / interval_secs)
        } else {
            0.0
        };
        let error_count = interval.iter().filter(|m| m.is_error()).count() as u64;
        let total_errors = inner.all_metrics.iter().filter(|m| m.is_error()).count() as u64;

        let recent_errors = inner
            .scenario_errors
            .iter()
            .rev()
            .take(5)
            .rev()
            .cloned()
            .collect();

        Snapshot {
            state: state.as_str().to_string(),
            rps,
            error_count,
            total_requests: inner.all_metrics.len() as u64,
            total_errors,
            elapsed: round1(elapsed),
            active_users: active,
            total_users: total,
            finished_users: inner.finished,
            endpoints: aggregate(&interval).iter().map(IntervalEndpoint::from).collect(),
            cumulative_endpoints: aggregate(&inner.all_metrics)
                .iter()
                .map(CumulativeEndpoint::from)
                .collect(),
            recent_errors,
        }
    }

    /// Stamp the run's elapsed duration.
    pub fn finalize(&self, duration_seconds: f64) {
        self.lock().duration_seconds = Some(duration_seconds);
    }

    /// Read-only final aggregate.
    pub fn summary(&self) -> Summary {
        let inner = self.lock();
        Summary {
            duration_seconds: inner.duration_seconds.unwrap_or(0.0),
            total_requests: inner.all_metrics.len() as u64,
            total_users: inner.started,
            total_errors: inner.all_metrics.iter().filter(|m| m.is_error()).count() as u64,
            endpoints: aggregate(&inner.all_metrics),
            scenario_error_count: inner.scenario_errors.len() as u64,
        }
    }

    /// Deterministic serializable form of the whole run.
    pub fn serialize(&self) -> FinalReport {
        let inner = self.lock();
        let endpoints = aggregate(&inner.all_metrics)
            .into_iter()
            .map(|a| ReportEndpoint {
                endpoint: a.name,
                count: a.count,
                errors: a.errors,
                avg_ms: a.avg,
                min_ms: a.min,
                max_ms: a.max,
                p50_ms: a.p50,
                p90_ms: a.p90,
                p95_ms: a.p95,
                p99_ms: a.p99,
            })
            .collect();

        FinalReport {
            timestamp: Utc::now().to_rfc3339(),
            duration_seconds: inner.duration_seconds.unwrap_or(0.0),
            total_requests: inner.all_metrics.len() as u64,
            total_users: inner.started,
            total_errors: inner.all_metrics.iter().filter(|m| m.is_error()).count() as u64,
            endpoints,
            scenario_errors: inner.scenario_errors.clone(),
            raw_metrics: inner.all_metrics.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Group metrics by `upper(method) + " " + path` and aggregate each group.
/// Groups come out sorted by key ascending.
pub fn aggregate(metrics: &[MetricRecord]) -> Vec<EndpointAggregate> {
    let mut groups: BTreeMap<String, Vec<&MetricRecord>> = BTreeMap::new();
    for metric in metrics {
        let key = format!("{:<6} {}", metric.method.to_uppercase(), metric.path);
        groups.entry(key).or_default().push(metric);
    }

    groups
        .into_iter()
        .map(|(name, group)| {
            let count = group.len() as u64;
            let errors = group.iter().filter(|m| m.is_error()).count() as u64;

            let mut latencies: Vec<f64> =
                group.iter().filter_map(|m| m.latency_ms).collect();
            latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let avg = if latencies.is_empty() {
                0.0
            } else {
                round1(latencies.iter().sum::<f64>() / latencies.len() as f64)
            };

            EndpointAggregate {
                name,
                count,
                errors,
                avg,
                min: latencies.first().copied().unwrap_or(0.0),
                max: latencies.last().copied().unwrap_or(0.0),
                p50: percentile(&latencies, 50.0),
                p90: percentile(&latencies, 90.0),
                p95: percentile(&latencies, 95.0),
                p99: percentile(&latencies, 99.0),
            }
        })
        .collect()
}

/// Nearest-rank percentile with ceiling: `idx = max(ceil(n·p/100) − 1, 0)`.
/// Returns 0 for an empty set.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len() as f64;
    let idx = ((n * p / 100.0).ceil() as usize).saturating_sub(1);
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportKind;

    fn metric(method: &str, path: &str, status: u16, latency: f64) -> MetricRecord {
        MetricRecord {
            method: method.to_string(),
            path: path.to_string(),
            status: Some(status),
            latency_ms: Some(latency),
            error: None,
            screen: None,
            time: Utc::now(),
        }
    }

    fn transport_metric(path: &str) -> MetricRecord {
        MetricRecord {
            method: "GET".to_string(),
            path: path.to_string(),
            status: None,
            latency_ms: Some(0.5),
            error: Some(TransportKind::Connect),
            screen: None,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_endpoint_key_is_method_padded_to_six() {
        let stats = Stats::new();
        stats.record_metric(metric("get", "/api/items", 200, 25.0));
        stats.record_metric(metric("get", "/api/items", 200, 75.0));

        let snapshot = stats.snapshot(1.0, 0, 0);
        let entry = &snapshot.cumulative_endpoints[0];
        assert_eq!(entry.name, "GET    /api/items");
        assert_eq!(entry.count, 2);
        assert_eq!(entry.avg, 50.0);
        assert_eq!(entry.min, 25.0);
        assert_eq!(entry.max, 75.0);
        assert_eq!(entry.errors, 0);
    }

    #[test]
    fn test_percentile_index_formula() {
        let sorted: Vec<f64> = (1..=100).map(|n| n as f64).collect();
        assert_eq!(percentile(&sorted, 50.0), 50.0);
        assert_eq!(percentile(&sorted, 90.0), 90.0);
        assert_eq!(percentile(&sorted, 95.0), 95.0);
        assert_eq!(percentile(&sorted, 99.0), 99.0);

        let small = vec![10.0, 20.0, 30.0];
        assert_eq!(percentile(&small, 50.0), 20.0);
        assert_eq!(percentile(&small, 99.0), 30.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[7.5], 99.0), 7.5);
    }

    #[test]
    fn test_percentiles_monotonic_and_bounded() {
        let stats = Stats::new();
        for latency in [12.0, 3.0, 47.0, 8.0, 90.0, 15.0, 2.0] {
            stats.record_metric(metric("GET", "/x", 200, latency));
        }
        let aggregates = aggregate(&stats.serialize().raw_metrics);
        let a = &aggregates[0];
        assert!(a.p50 <= a.p95);
        assert!(a.p95 <= a.p99);
        assert!(a.min <= a.p50 && a.p99 <= a.max);
    }

    #[test]
    fn test_errors_count_transport_and_functional() {
        let stats = Stats::new();
        stats.record_metric(metric("GET", "/x", 200, 1.0));
        stats.record_metric(metric("GET", "/x", 404, 1.0));
        stats.record_metric(metric("GET", "/x", 500, 1.0));
        stats.record_metric(transport_metric("/x"));

        let summary = stats.summary();
        assert_eq!(summary.total_requests, 4);
        assert_eq!(summary.total_errors, 3);
        assert_eq!(summary.endpoints[0].errors, 3);
        assert_eq!(summary.endpoints[0].count, 4);
    }

    #[test]
    fn test_snapshots_consume_the_interval() {
        let stats = Stats::new();
        stats.record_metric(metric("GET", "/a", 200, 5.0));
        stats.record_metric(metric("GET", "/b", 200, 5.0));

        let first = stats.snapshot(1.0, 1, 1);
        assert_eq!(first.endpoints.len(), 2);
        assert_eq!(first.total_requests, 2);

        let second = stats.snapshot(2.0, 1, 1);
        assert_eq!(second.rps, 0.0);
        assert!(second.endpoints.is_empty());
        assert_eq!(second.total_requests, 2);
        assert_eq!(second.cumulative_endpoints.len(), 2);
    }

    #[test]
    fn test_total_requests_grows_monotonically() {
        let stats = Stats::new();
        stats.record_metric(metric("GET", "/a", 200, 5.0));
        let first = stats.snapshot(1.0, 1, 1);
        stats.record_metric(metric("GET", "/a", 200, 5.0));
        let second = stats.snapshot(2.0, 1, 1);
        assert!(second.total_requests >= first.total_requests);
    }

    #[test]
    fn test_record_user_moves_buffers() {
        use crate::config::Config;
        use std::sync::Arc;

        let stats = Stats::new();
        let mut ctx = UserContext::new(7, Arc::new(Config::default()));
        ctx.record_scenario_error(Some("login"), "boom");

        stats.record_user(&mut ctx);
        assert!(ctx.scenario_errors().is_empty());

        let snapshot = stats.snapshot(1.0, 0, 1);
        assert_eq!(snapshot.recent_errors.len(), 1);
        assert_eq!(snapshot.recent_errors[0].user_id, 7);
        assert_eq!(snapshot.recent_errors[0].screen.as_deref(), Some("login"));
    }

    #[test]
    fn test_recent_errors_keeps_last_five() {
        use crate::config::Config;
        use std::sync::Arc;

        let stats = Stats::new();
        let mut ctx = UserContext::new(1, Arc::new(Config::default()));
        for n in 0..8 {
            ctx.record_scenario_error(None, format!("error {}", n));
        }
        stats.record_user(&mut ctx);

        let snapshot = stats.snapshot(1.0, 0, 1);
        assert_eq!(snapshot.recent_errors.len(), 5);
        assert_eq!(snapshot.recent_errors[0].message, "error 3");
        assert_eq!(snapshot.recent_errors[4].message, "error 7");
    }

    #[test]
    fn test_user_counters() {
        let stats = Stats::new();
        stats.user_started();
        stats.user_started();
        stats.user_finished();

        let snapshot = stats.snapshot(1.0, 1, 2);
        assert_eq!(snapshot.total_users, 2);
        assert_eq!(snapshot.finished_users, 1);
        assert_eq!(stats.summary().total_users, 2);
    }

    #[test]
    fn test_serialize_shape() {
        let stats = Stats::new();
        stats.user_started();
        stats.record_metric(metric("POST", "/api/orders", 201, 42.0));
        stats.finalize(12.5);

        let report = stats.serialize();
        assert_eq!(report.duration_seconds, 12.5);
        assert_eq!(report.total_requests, 1);
        assert_eq!(report.total_users, 1);
        assert_eq!(report.endpoints.len(), 1);
        assert_eq!(report.endpoints[0].endpoint, "POST   /api/orders");
        assert_eq!(report.raw_metrics.len(), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["timestamp"].is_string());
        assert_eq!(json["endpoints"][0]["avg_ms"], 42.0);
    }

    #[test]
    fn test_groups_sorted_by_key() {
        let stats = Stats::new();
        stats.record_metric(metric("GET", "/z", 200, 1.0));
        stats.record_metric(metric("GET", "/a", 200, 1.0));
        stats.record_metric(metric("DELETE", "/m", 200, 1.0));

        let names: Vec<String> = stats
            .summary()
            .endpoints
            .iter()
            .map(|e| e.name.clone())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_state_roundtrip() {
        let stats = Stats::new();
        assert_eq!(stats.state(), RunState::Idle);
        stats.set_state(RunState::Running);
        assert_eq!(stats.state(), RunState::Running);
        assert_eq!(stats.snapshot(0.0, 0, 0).state, "running");
        stats.set_state(RunState::Complete);
        assert_eq!(stats.state(), RunState::Complete);
    }
}
