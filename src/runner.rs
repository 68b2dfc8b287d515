//! Run orchestration: the virtual-user pool, scaler, monitor, and shutdown.
//!
//! The runner owns a pool of user tasks. A scaler task spawns one task per
//! `1 / spawn_rate` seconds until the pool reaches its target, then idles at
//! a 100 ms poll. Each task loops virtual users: fresh context, hooks,
//! scenario walk, retirement hand-off. Reshaping is live: scale-up spawns at
//! the new cadence, scale-down happens passively as tasks notice the pool is
//! over target at their next loop boundary and retire themselves.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::UserContext;
use crate::errors::RunError;
use crate::executor::ScenarioExecutor;
use crate::monitor;
use crate::registry::{Registry, RegistrySnapshot};
use crate::report;
use crate::scenario::Step;
use crate::stats::{FinalReport, RunState, Stats};

/// Grace period for each user task to finish after stop is signalled.
const JOIN_BUDGET: Duration = Duration::from_secs(2);

/// Cadence of the stop-flag and deadline poll.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared handle onto a run in progress.
///
/// `target_pool` and `spawn_rate` are single-writer (a dashboard control
/// task), many-reader (the scaler); plain relaxed atomics are enough.
pub struct RunControl {
    stop: Arc<AtomicBool>,
    active: AtomicUsize,
    user_counter: AtomicU64,
    target_pool: AtomicUsize,
    spawn_rate_bits: AtomicU64,
    stats: Arc<Stats>,
    latest_snapshot: Mutex<Option<String>>,
    scenario: String,
}

impl RunControl {
    fn new(scenario: String, users: usize, spawn_rate: f64) -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            active: AtomicUsize::new(0),
            user_counter: AtomicU64::new(0),
            target_pool: AtomicUsize::new(users),
            spawn_rate_bits: AtomicU64::new(spawn_rate.to_bits()),
            stats: Arc::new(Stats::new()),
            latest_snapshot: Mutex::new(None),
            scenario,
        }
    }

    /// Signal the run to stop; user tasks exit at their next loop boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Reshape the target pool size mid-run.
    pub fn update_pool(&self, users: usize) {
        info!(users, "Reshaping target pool");
        self.target_pool.store(users, Ordering::Relaxed);
    }

    /// Reshape the spawn cadence mid-run.
    pub fn update_spawn_rate(&self, rate: f64) {
        info!(rate, "Reshaping spawn rate");
        self.spawn_rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn target_pool(&self) -> usize {
        self.target_pool.load(Ordering::Relaxed)
    }

    pub fn spawn_rate(&self) -> f64 {
        f64::from_bits(self.spawn_rate_bits.load(Ordering::Relaxed))
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Total virtual users started so far.
    pub fn total_spawned(&self) -> u64 {
        self.user_counter.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> RunState {
        self.stats.state()
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// JSON of the most recent snapshot, produced once per second by the
    /// monitor task. Shared by the terminal and every dashboard stream so
    /// the interval-consuming snapshot is taken exactly once per tick.
    pub fn latest_snapshot_json(&self) -> Option<String> {
        self.latest_snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn store_snapshot_json(&self, json: String) {
        *self
            .latest_snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(json);
    }

    fn next_user_id(&self) -> u64 {
        self.user_counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Owns one run from validation to the final report.
pub struct Runner {
    control: Arc<RunControl>,
    registry: Arc<RegistrySnapshot>,
    steps: Arc<Vec<Step>>,
    terminal: bool,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").field("terminal", &self.terminal).finish()
    }
}

impl Runner {
    /// Validate the registry against the chosen scenario and freeze it.
    ///
    /// Fails before any user is spawned when the scenario is unknown or any
    /// reachable `Visit` names an unregistered screen.
    pub fn new(registry: &Registry, scenario: &str, terminal: bool) -> Result<Self, RunError> {
        registry.validate(scenario)?;
        let snapshot = registry.freeze();
        let steps = snapshot
            .scenario(scenario)
            .ok_or_else(|| RunError::UnknownScenario(scenario.to_string()))?;
        let control = Arc::new(RunControl::new(
            scenario.to_string(),
            snapshot.config.users,
            snapshot.config.spawn_rate,
        ));
        Ok(Self {
            control,
            registry: snapshot,
            steps,
            terminal,
        })
    }

    /// Handle for reshaping, stopping, and observing this run.
    pub fn control(&self) -> Arc<RunControl> {
        self.control.clone()
    }

    /// Drive the run to completion and return the final report.
    ///
    /// The report file is written on normal termination; a write failure is
    /// logged and does not fail the run.
    pub async fn run(self) -> FinalReport {
        let config = Arc::new(self.registry.config.clone());
        let stats = self.control.stats.clone();
        let start = Instant::now();

        stats.set_state(RunState::Running);
        info!(
            scenario = %self.control.scenario,
            base_url = %config.base_url,
            users = config.users,
            spawn_rate = config.spawn_rate,
            duration = ?config.duration,
            "Run starting"
        );
        if self.terminal {
            monitor::print_banner(
                &self.control.scenario,
                &config.base_url,
                config.users,
                config.spawn_rate,
            );
        }

        let monitor_handle = tokio::spawn(monitor_loop(
            self.control.clone(),
            start,
            self.terminal,
        ));

        let interrupt_handle = if self.terminal {
            let control = self.control.clone();
            Some(tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping run");
                    control.request_stop();
                }
            }))
        } else {
            None
        };

        let handles: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let scaler_handle = tokio::spawn(scaler_loop(
            self.control.clone(),
            self.registry.clone(),
            self.steps.clone(),
            config.clone(),
            handles.clone(),
        ));

        let deadline = config
            .duration
            .map(|seconds| start + Duration::from_secs_f64(seconds));
        let mut poll = interval(POLL_INTERVAL);
        loop {
            poll.tick().await;
            if self.control.stopped() {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("Duration elapsed, stopping run");
                    self.control.request_stop();
                    break;
                }
            }
        }

        stats.set_state(RunState::Stopping);
        drain_users(&handles).await;
        scaler_handle.abort();
        monitor_handle.abort();
        if let Some(handle) = interrupt_handle {
            handle.abort();
        }

        stats.finalize(start.elapsed().as_secs_f64());
        stats.set_state(RunState::Complete);
        info!(
            requests = stats.summary().total_requests,
            users = stats.summary().total_users,
            "Run complete"
        );

        if self.terminal {
            monitor::print_summary(&stats.summary());
        }

        let final_report = stats.serialize();
        let results_dir =
            std::env::var("LOADSMITH_RESULTS_DIR").unwrap_or_else(|_| ".".to_string());
        match report::write_results(&final_report, Path::new(&results_dir)) {
            Ok(path) => {
                if self.terminal {
                    println!("Results written to {}", path.display());
                }
            }
            Err(e) => warn!(error = %e, "Failed to write results file"),
        }

        final_report
    }
}

/// Wait up to the join budget per user task, then abort stragglers.
///
/// A user stuck deep in a read timeout can outlive the budget; its metrics
/// are discarded with the abort.
async fn drain_users(handles: &Arc<Mutex<Vec<JoinHandle<()>>>>) {
    let mut handles = {
        let mut guard = handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *guard)
    };
    for handle in &mut handles {
        if timeout(JOIN_BUDGET, &mut *handle).await.is_err() {
            warn!("User task exceeded join budget, aborting");
            handle.abort();
        }
    }
}

/// Spawns user tasks at the configured cadence until the pool is full, then
/// polls for reshapes.
async fn scaler_loop(
    control: Arc<RunControl>,
    registry: Arc<RegistrySnapshot>,
    steps: Arc<Vec<Step>>,
    config: Arc<Config>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    loop {
        if control.stopped() {
            break;
        }

        if control.active_count() < control.target_pool() {
            control.active.fetch_add(1, Ordering::Relaxed);
            let task = tokio::spawn(user_task(
                control.clone(),
                registry.clone(),
                steps.clone(),
                config.clone(),
            ));
            handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(task);

            let rate = control.spawn_rate().max(0.1);
            sleep(Duration::from_secs_f64(1.0 / rate)).await;
        } else {
            sleep(POLL_INTERVAL).await;
        }
    }
}

/// One pool slot: loops complete virtual-user journeys until stopped or
/// retired by a shrink.
async fn user_task(
    control: Arc<RunControl>,
    registry: Arc<RegistrySnapshot>,
    steps: Arc<Vec<Step>>,
    config: Arc<Config>,
) {
    loop {
        if control.stopped() {
            break;
        }
        if control.active_count() > control.target_pool() {
            debug!("Pool over target, retiring user slot");
            break;
        }

        let user_id = control.next_user_id();
        control.stats.user_started();

        let mut ctx = UserContext::new(user_id, config.clone());
        let mut executor = ScenarioExecutor::new(registry.clone(), control.stop.clone());

        if let Some(hook) = &registry.on_start {
            if let Err(e) = hook.call(&mut ctx).await {
                ctx.record_scenario_error(None, format!("on_start hook error: {}", e));
            }
        }

        executor.execute(&steps, &mut ctx).await;

        if let Some(hook) = &registry.on_stop {
            if let Err(e) = hook.call(&mut ctx).await {
                ctx.record_scenario_error(None, format!("on_stop hook error: {}", e));
            }
        }

        ctx.close();
        control.stats.record_user(&mut ctx);
        control.stats.user_finished();
    }

    control.active.fetch_sub(1, Ordering::Relaxed);
}

/// Takes one interval-consuming snapshot per second, caches its JSON for
/// dashboard streams, and prints a frame on terminal runs.
async fn monitor_loop(control: Arc<RunControl>, start: Instant, terminal: bool) {
    let mut tick = interval(Duration::from_secs(1));
    tick.tick().await;
    loop {
        tick.tick().await;
        let snapshot = control.stats.snapshot(
            start.elapsed().as_secs_f64(),
            control.active_count(),
            control.total_spawned(),
        );
        match serde_json::to_string(&snapshot) {
            Ok(json) => control.store_snapshot_json(json),
            Err(e) => warn!(error = %e, "Failed to serialize snapshot"),
        }
        if terminal {
            monitor::print_frame(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_reshape_roundtrip() {
        let control = RunControl::new("main".to_string(), 10, 2.0);
        assert_eq!(control.target_pool(), 10);
        assert_eq!(control.spawn_rate(), 2.0);

        control.update_pool(3);
        control.update_spawn_rate(7.5);
        assert_eq!(control.target_pool(), 3);
        assert_eq!(control.spawn_rate(), 7.5);
    }

    #[test]
    fn test_user_ids_are_positive_and_unique() {
        let control = RunControl::new("main".to_string(), 1, 1.0);
        let a = control.next_user_id();
        let b = control.next_user_id();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(control.total_spawned(), 2);
    }

    #[test]
    fn test_stop_is_monotonic() {
        let control = RunControl::new("main".to_string(), 1, 1.0);
        assert!(!control.stopped());
        control.request_stop();
        control.request_stop();
        assert!(control.stopped());
    }
}
