//! Screen-based HTTP load generator.
//!
//! Virtual users are modelled as state-bearing agents navigating a graph of
//! named screens. Each screen issues HTTP requests through a per-user
//! context; scenarios describe user flows as data (visit / think / choose
//! steps) so they can be validated before a run. A run maintains a target
//! pool of concurrent users at a bounded spawn rate, aggregates per-endpoint
//! latency and error statistics, and reports live (terminal or dashboard)
//! plus a persisted JSON artifact.
//!
//! # Quick start
//! ```no_run
//! use loadsmith::context::{RequestOptions, UserContext};
//! use loadsmith::registry::ScreenFuture;
//!
//! fn home(ctx: &mut UserContext) -> ScreenFuture<'_> {
//!     Box::pin(async move {
//!         ctx.get("/", RequestOptions::default()).await;
//!         Ok(())
//!     })
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     loadsmith::configure(|c| {
//!         c.base_url = "http://localhost:3000".to_string();
//!         c.users = 20;
//!         c.spawn_rate = 5.0;
//!         c.duration = Some(60.0);
//!     });
//!
//!     loadsmith::screen("home", home);
//!
//!     loadsmith::scenario("main", |b| {
//!         b.visit("home").think((1.0, 3.0));
//!     })?;
//!
//!     loadsmith::run("main").await?;
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod config;
pub mod context;
pub mod errors;
pub mod executor;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod report;
pub mod response;
pub mod runner;
pub mod scenario;
pub mod stats;
pub mod web;

use registry::{with_default, ScreenFuture};
use runner::Runner;
use stats::FinalReport;

/// Mutate the default registry's configuration.
pub fn configure(f: impl FnOnce(&mut config::Config)) {
    with_default(|registry| registry.configure(f));
}

/// Register a closure-based screen on the default registry.
pub fn screen<F>(name: impl Into<String>, f: F)
where
    F: for<'a> Fn(&'a mut context::UserContext) -> ScreenFuture<'a> + Send + Sync + 'static,
{
    with_default(|registry| registry.screen_fn(name, f));
}

/// Register a scenario on the default registry through the builder DSL.
pub fn scenario(
    name: impl Into<String>,
    configure: impl FnOnce(&mut scenario::ScenarioBuilder),
) -> Result<(), scenario::BuildError> {
    with_default(|registry| registry.scenario(name, configure))
}

/// Hook run once per virtual user before its scenario.
pub fn on_start<F>(f: F)
where
    F: for<'a> Fn(&'a mut context::UserContext) -> ScreenFuture<'a> + Send + Sync + 'static,
{
    with_default(|registry| registry.on_start(registry::screen_fn(f)));
}

/// Hook run once per virtual user after its scenario.
pub fn on_stop<F>(f: F)
where
    F: for<'a> Fn(&'a mut context::UserContext) -> ScreenFuture<'a> + Send + Sync + 'static,
{
    with_default(|registry| registry.on_stop(registry::screen_fn(f)));
}

/// Clear the default registry.
pub fn reset() {
    with_default(|registry| registry.reset());
}

/// Validate the default registry and run the named scenario in terminal
/// mode, returning the final report.
pub async fn run(scenario: &str) -> Result<FinalReport, errors::RunError> {
    let runner = with_default(|registry| Runner::new(registry, scenario, true))?;
    Ok(runner.run().await)
}

/// Start the dashboard over the default registry instead of running a
/// scenario directly.
pub async fn serve_dashboard(port: u16) -> Result<(), errors::RunError> {
    web::serve(port).await
}
