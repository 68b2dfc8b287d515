//! Named screens, named scenarios, hooks, and pre-run validation.
//!
//! A [`Registry`] is assembled while the specification is written, then
//! frozen into an immutable [`RegistrySnapshot`] when a run starts. The
//! snapshot is what executors resolve names against; the live registry can
//! keep changing for the next run.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::Config;
use crate::context::UserContext;
use crate::errors::RunError;
use crate::scenario::{OptionBody, ScenarioBuilder, Step};

/// Failure type screens report; absorbed into scenario errors, never fatal.
pub type ScreenError = Box<dyn std::error::Error + Send + Sync>;

/// A named callable representing a logical UI page.
///
/// Screens issue requests through the context they are handed; the executor
/// treats them as opaque. The same trait serves for the on-start and on-stop
/// hooks.
#[async_trait]
pub trait Screen: Send + Sync {
    async fn call(&self, ctx: &mut UserContext) -> Result<(), ScreenError>;
}

/// Boxed future returned by closure-based screens.
pub type ScreenFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ScreenError>> + Send + 'a>>;

struct FnScreen<F>(F);

#[async_trait]
impl<F> Screen for FnScreen<F>
where
    F: for<'a> Fn(&'a mut UserContext) -> ScreenFuture<'a> + Send + Sync,
{
    async fn call(&self, ctx: &mut UserContext) -> Result<(), ScreenError> {
        (self.0)(ctx).await
    }
}

/// Wrap a function as a [`Screen`].
///
/// ```
/// use loadsmith::context::UserContext;
/// use loadsmith::registry::{screen_fn, ScreenFuture};
///
/// fn health(ctx: &mut UserContext) -> ScreenFuture<'_> {
///     Box::pin(async move {
///         ctx.get("/health", Default::default()).await;
///         Ok(())
///     })
/// }
///
/// let screen = screen_fn(health);
/// ```
pub fn screen_fn<F>(f: F) -> Arc<dyn Screen>
where
    F: for<'a> Fn(&'a mut UserContext) -> ScreenFuture<'a> + Send + Sync + 'static,
{
    Arc::new(FnScreen(f))
}

/// Process-scoped collection holding one run specification.
pub struct Registry {
    config: Config,
    screens: HashMap<String, Arc<dyn Screen>>,
    scenarios: HashMap<String, Arc<Vec<Step>>>,
    scenario_order: Vec<String>,
    on_start: Option<Arc<dyn Screen>>,
    on_stop: Option<Arc<dyn Screen>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            screens: HashMap::new(),
            scenarios: HashMap::new(),
            scenario_order: Vec::new(),
            on_start: None,
            on_stop: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mutate the active configuration. Only meaningful before a run; the
    /// snapshot taken at run start is what the run observes.
    pub fn configure(&mut self, f: impl FnOnce(&mut Config)) {
        f(&mut self.config);
    }

    /// Register a screen under a unique name. Re-registering replaces.
    pub fn screen(&mut self, name: impl Into<String>, screen: Arc<dyn Screen>) {
        self.screens.insert(name.into(), screen);
    }

    /// Register a closure-based screen.
    pub fn screen_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: for<'a> Fn(&'a mut UserContext) -> ScreenFuture<'a> + Send + Sync + 'static,
    {
        self.screen(name, screen_fn(f));
    }

    /// Build and register a scenario through the DSL.
    pub fn scenario(
        &mut self,
        name: impl Into<String>,
        configure: impl FnOnce(&mut ScenarioBuilder),
    ) -> Result<(), crate::scenario::BuildError> {
        let mut builder = ScenarioBuilder::new();
        configure(&mut builder);
        let steps = builder.build()?;
        let name = name.into();
        if !self.scenarios.contains_key(&name) {
            self.scenario_order.push(name.clone());
        }
        self.scenarios.insert(name, Arc::new(steps));
        Ok(())
    }

    /// Hook run once per virtual user before the scenario.
    pub fn on_start(&mut self, hook: Arc<dyn Screen>) {
        self.on_start = Some(hook);
    }

    /// Hook run once per virtual user after the scenario.
    pub fn on_stop(&mut self, hook: Arc<dyn Screen>) {
        self.on_stop = Some(hook);
    }

    /// Registered scenario names, in registration order.
    pub fn scenario_names(&self) -> Vec<String> {
        self.scenario_order.clone()
    }

    /// Drop every screen, scenario, and hook and restore default config.
    pub fn reset(&mut self) {
        *self = Registry::new();
    }

    /// Pre-run check: the named scenario must exist, and every `Visit`
    /// reachable from it (transitively through scenario refs) must name a
    /// registered screen.
    ///
    /// Reports all missing symbols at once so the specification can be fixed
    /// in one pass.
    pub fn validate(&self, scenario: &str) -> Result<(), RunError> {
        let steps = self
            .scenarios
            .get(scenario)
            .ok_or_else(|| RunError::UnknownScenario(scenario.to_string()))?;

        let mut missing: HashSet<String> = HashSet::new();
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(scenario);
        self.walk(steps, &mut seen, &mut missing);

        if missing.is_empty() {
            Ok(())
        } else {
            let mut missing: Vec<String> = missing.into_iter().collect();
            missing.sort();
            Err(RunError::MissingSymbols {
                scenario: scenario.to_string(),
                missing: missing.join(", "),
            })
        }
    }

    fn walk<'a>(
        &'a self,
        steps: &'a [Step],
        seen: &mut HashSet<&'a str>,
        missing: &mut HashSet<String>,
    ) {
        for step in steps {
            match step {
                Step::Visit { screen } => {
                    if !self.screens.contains_key(screen) {
                        missing.insert(format!("screen '{}'", screen));
                    }
                }
                Step::Think { .. } => {}
                Step::Choose { options } => {
                    for option in options {
                        match &option.body {
                            OptionBody::Inline(inner) => self.walk(inner, seen, missing),
                            OptionBody::ScenarioRef(name) => match self.scenarios.get(name) {
                                Some(inner) if seen.insert(name) => {
                                    self.walk(inner, seen, missing)
                                }
                                Some(_) => {}
                                None => {
                                    missing.insert(format!("scenario '{}'", name));
                                }
                            },
                        }
                    }
                }
            }
        }
    }

    /// Freeze the registry into the immutable form a run observes.
    pub fn freeze(&self) -> Arc<RegistrySnapshot> {
        Arc::new(RegistrySnapshot {
            config: self.config.clone(),
            screens: self.screens.clone(),
            scenarios: self.scenarios.clone(),
            on_start: self.on_start.clone(),
            on_stop: self.on_stop.clone(),
        })
    }
}

/// Immutable view of a registry, shared by every task in a run.
pub struct RegistrySnapshot {
    pub config: Config,
    screens: HashMap<String, Arc<dyn Screen>>,
    scenarios: HashMap<String, Arc<Vec<Step>>>,
    pub on_start: Option<Arc<dyn Screen>>,
    pub on_stop: Option<Arc<dyn Screen>>,
}

impl RegistrySnapshot {
    pub fn screen(&self, name: &str) -> Option<Arc<dyn Screen>> {
        self.screens.get(name).cloned()
    }

    pub fn scenario(&self, name: &str) -> Option<Arc<Vec<Step>>> {
        self.scenarios.get(name).cloned()
    }
}

/// Shareable handle onto a registry, used by the dashboard and embedders.
pub type RegistryHandle = Arc<Mutex<Registry>>;

lazy_static::lazy_static! {
    static ref DEFAULT_REGISTRY: RegistryHandle = Arc::new(Mutex::new(Registry::new()));
}

/// The process-wide default registry.
pub fn default_handle() -> RegistryHandle {
    DEFAULT_REGISTRY.clone()
}

/// Run a closure against the process-wide default registry.
pub fn with_default<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    let mut registry = DEFAULT_REGISTRY
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_screen() -> Arc<dyn Screen> {
        screen_fn(|_ctx| Box::pin(async { Ok(()) }))
    }

    fn registry_with(screens: &[&str]) -> Registry {
        let mut registry = Registry::new();
        for name in screens {
            registry.screen(*name, noop_screen());
        }
        registry
    }

    #[test]
    fn test_validate_unknown_top_level_scenario() {
        let registry = Registry::new();
        assert!(matches!(
            registry.validate("main"),
            Err(RunError::UnknownScenario(name)) if name == "main"
        ));
    }

    #[test]
    fn test_validate_reports_missing_screen_by_name() {
        let mut registry = registry_with(&["home"]);
        registry
            .scenario("main", |b| {
                b.visit("home").visit("ghost");
            })
            .unwrap();

        let err = registry.validate("main").unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_validate_walks_scenario_refs_transitively() {
        let mut registry = registry_with(&["x"]);
        registry
            .scenario("sub", |b| {
                b.visit("missing_screen");
            })
            .unwrap();
        registry
            .scenario("main", |b| {
                b.choose(|c| {
                    c.percent(100, "sub");
                });
            })
            .unwrap();

        let err = registry.validate("main").unwrap_err();
        assert!(err.to_string().contains("missing_screen"));
    }

    #[test]
    fn test_validate_reports_missing_scenario_ref() {
        let mut registry = registry_with(&["x"]);
        registry
            .scenario("main", |b| {
                b.choose(|c| {
                    c.percent(100, "nonexistent");
                });
            })
            .unwrap();

        let err = registry.validate("main").unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_validate_tolerates_scenario_cycles() {
        let mut registry = registry_with(&["x"]);
        registry
            .scenario("a", |b| {
                b.visit("x").choose(|c| {
                    c.percent(100, "b");
                });
            })
            .unwrap();
        registry
            .scenario("b", |b| {
                b.choose(|c| {
                    c.percent(100, "a");
                });
            })
            .unwrap();

        registry.validate("a").unwrap();
    }

    #[test]
    fn test_scenario_names_keep_registration_order() {
        let mut registry = registry_with(&["x"]);
        registry.scenario("zeta", |b| { b.visit("x"); }).unwrap();
        registry.scenario("alpha", |b| { b.visit("x"); }).unwrap();
        assert_eq!(registry.scenario_names(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut registry = registry_with(&["x"]);
        registry.scenario("main", |b| { b.visit("x"); }).unwrap();
        registry.reset();
        assert!(registry.scenario_names().is_empty());
        assert!(matches!(
            registry.validate("main"),
            Err(RunError::UnknownScenario(_))
        ));
    }
}
