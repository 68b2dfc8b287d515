//! Step-tree execution engine.
//!
//! The executor walks a scenario's steps against one user's context. It never
//! terminates the run: screen failures and unresolved names become scenario
//! errors on the context and execution continues with the next step. Only an
//! aborted context or the run's stop flag cuts a walk short.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::context::UserContext;
use crate::registry::RegistrySnapshot;
use crate::scenario::{total_weight, OptionBody, Step};

/// Walks step-trees for one virtual user.
///
/// The RNG drives think times and weighted choices; seeding it makes the
/// sequence of screens a user visits reproducible for a given step-tree.
pub struct ScenarioExecutor {
    registry: Arc<RegistrySnapshot>,
    stop: Arc<AtomicBool>,
    rng: SmallRng,
}

impl ScenarioExecutor {
    pub fn new(registry: Arc<RegistrySnapshot>, stop: Arc<AtomicBool>) -> Self {
        Self {
            registry,
            stop,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Executor with a fixed RNG seed; the walk is deterministic.
    pub fn with_seed(registry: Arc<RegistrySnapshot>, stop: Arc<AtomicBool>, seed: u64) -> Self {
        Self {
            registry,
            stop,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Walk `steps` in order against `ctx`.
    pub async fn execute(&mut self, steps: &[Step], ctx: &mut UserContext) {
        self.run_steps(steps, ctx).await;
    }

    // Boxed for recursion through inline steps and scenario refs.
    fn run_steps<'a>(
        &'a mut self,
        steps: &'a [Step],
        ctx: &'a mut UserContext,
    ) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            for step in steps {
                if ctx.aborted() || self.stop.load(Ordering::Relaxed) {
                    debug!(user_id = ctx.user_id, "Stopping walk at step boundary");
                    return;
                }

                match step {
                    Step::Visit { screen } => self.visit(screen, ctx).await,
                    Step::Think { lo, hi } => self.think(*lo, *hi).await,
                    Step::Choose { options } => {
                        let total = total_weight(options);
                        if total == 0 {
                            continue;
                        }
                        let mut draw = self.rng.gen_range(1..=total);
                        for option in options {
                            let weight = option.weight as u64;
                            if draw <= weight {
                                match &option.body {
                                    OptionBody::Inline(inner) => {
                                        self.run_steps(inner, ctx).await;
                                    }
                                    OptionBody::ScenarioRef(name) => {
                                        match self.registry.scenario(name) {
                                            Some(inner) => {
                                                self.run_steps(&inner, ctx).await;
                                            }
                                            None => {
                                                warn!(
                                                    user_id = ctx.user_id,
                                                    scenario = %name,
                                                    "Scenario ref did not resolve"
                                                );
                                                let screen =
                                                    ctx.current_screen().map(str::to_string);
                                                ctx.record_scenario_error(
                                                    screen.as_deref(),
                                                    format!(
                                                        "scenario '{}' is not registered",
                                                        name
                                                    ),
                                                );
                                            }
                                        }
                                    }
                                }
                                break;
                            }
                            draw -= weight;
                        }
                    }
                }
            }
        })
    }

    async fn visit(&mut self, screen_name: &str, ctx: &mut UserContext) {
        let Some(screen) = self.registry.screen(screen_name) else {
            warn!(
                user_id = ctx.user_id,
                screen = %screen_name,
                "Visit to unregistered screen"
            );
            ctx.record_scenario_error(
                Some(screen_name),
                format!("screen '{}' is not registered", screen_name),
            );
            return;
        };

        ctx.set_current_screen(Some(screen_name.to_string()));
        debug!(user_id = ctx.user_id, screen = %screen_name, "Visiting screen");

        if let Err(e) = screen.call(ctx).await {
            warn!(
                user_id = ctx.user_id,
                screen = %screen_name,
                error = %e,
                "Screen raised"
            );
            ctx.record_scenario_error(Some(screen_name), format!("screen error: {}", e));
        }
    }

    async fn think(&mut self, lo: f64, hi: f64) {
        let base = if hi > lo {
            self.rng.gen_range(lo..hi)
        } else {
            lo
        };
        // Sub-second fractional jitter in [0, 1).
        let jitter: f64 = self.rng.gen();
        sleep(Duration::from_secs_f64(base + jitter)).await;
    }
}
