//! Scenario step-tree and the builder DSL that produces it.
//!
//! A scenario is recorded as data, not as an opaque callable, so it can be
//! validated before a run, carried across tasks, and resolved by name from
//! other scenarios. Screens stay opaque; the tree only names them.
//!
//! # Example
//! ```
//! use loadsmith::scenario::ScenarioBuilder;
//!
//! let mut builder = ScenarioBuilder::new();
//! builder
//!     .visit("home")
//!     .think(2.0)
//!     .choose(|c| {
//!         c.percent(70, "browse_flow");
//!         c.percent_steps(30, |b| {
//!             b.visit("checkout");
//!         });
//!     });
//! let steps = builder.build().unwrap();
//! assert_eq!(steps.len(), 3);
//! ```

use thiserror::Error;

/// A unit of scenario work.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Invoke the named screen.
    Visit { screen: String },

    /// Suspend the user for a uniformly random duration in `[lo, hi)`
    /// seconds, plus a sub-second jitter.
    Think { lo: f64, hi: f64 },

    /// Pick one option by weighted random draw.
    Choose { options: Vec<ChoiceOption> },
}

/// One branch of a [`Step::Choose`].
///
/// A zero weight is legal and is never selected; the total weight across a
/// choice must be at least 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceOption {
    pub weight: u32,
    pub body: OptionBody,
}

/// What a chosen option executes.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionBody {
    /// Steps nested inline in the choice.
    Inline(Vec<Step>),

    /// A named scenario, resolved at execution time.
    ScenarioRef(String),
}

/// A think-time range in seconds. A single numeric collapses to `[n, n]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThinkTime {
    pub lo: f64,
    pub hi: f64,
}

impl From<f64> for ThinkTime {
    fn from(n: f64) -> Self {
        ThinkTime { lo: n, hi: n }
    }
}

impl From<u64> for ThinkTime {
    fn from(n: u64) -> Self {
        ThinkTime {
            lo: n as f64,
            hi: n as f64,
        }
    }
}

impl From<(f64, f64)> for ThinkTime {
    fn from((lo, hi): (f64, f64)) -> Self {
        ThinkTime { lo, hi }
    }
}

/// Input-validation errors raised when a step-tree is built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("think range is invalid: lo={lo}, hi={hi} (need 0 <= lo <= hi)")]
    InvalidThinkRange { lo: f64, hi: f64 },

    #[error("choose block has no options")]
    EmptyChoice,

    #[error("choose block has total weight 0; at least one option needs a positive weight")]
    ZeroTotalWeight,
}

/// Accumulates steps in insertion order and freezes them on `build`.
///
/// Validation errors are deferred: the first one encountered is kept and
/// returned by [`ScenarioBuilder::build`], so chained calls never panic.
#[derive(Default)]
pub struct ScenarioBuilder {
    steps: Vec<Step>,
    error: Option<BuildError>,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a screen visit.
    pub fn visit(&mut self, screen: impl Into<String>) -> &mut Self {
        self.steps.push(Step::Visit {
            screen: screen.into(),
        });
        self
    }

    /// Append a think pause. Accepts a number (`think(2.0)`) or a range
    /// (`think((1.0, 3.0))`).
    pub fn think(&mut self, time: impl Into<ThinkTime>) -> &mut Self {
        let ThinkTime { lo, hi } = time.into();
        if lo < 0.0 || hi < lo {
            self.fail(BuildError::InvalidThinkRange { lo, hi });
            return self;
        }
        self.steps.push(Step::Think { lo, hi });
        self
    }

    /// Append a weighted choice, configured through the closure.
    pub fn choose(&mut self, configure: impl FnOnce(&mut ChoiceBuilder)) -> &mut Self {
        let mut choice = ChoiceBuilder::default();
        configure(&mut choice);
        match choice.build() {
            Ok(options) => self.steps.push(Step::Choose { options }),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Freeze the accumulated steps, or surface the first validation error.
    pub fn build(self) -> Result<Vec<Step>, BuildError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.steps),
        }
    }

    fn fail(&mut self, error: BuildError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

/// Accumulates the options of one `choose` block.
#[derive(Default)]
pub struct ChoiceBuilder {
    options: Vec<ChoiceOption>,
    error: Option<BuildError>,
}

impl ChoiceBuilder {
    /// Record an option that runs a named scenario.
    pub fn percent(&mut self, weight: u32, scenario: impl Into<String>) -> &mut Self {
        self.options.push(ChoiceOption {
            weight,
            body: OptionBody::ScenarioRef(scenario.into()),
        });
        self
    }

    /// Record an option whose steps are built inline by the closure.
    pub fn percent_steps(
        &mut self,
        weight: u32,
        configure: impl FnOnce(&mut ScenarioBuilder),
    ) -> &mut Self {
        let mut nested = ScenarioBuilder::new();
        configure(&mut nested);
        match nested.build() {
            Ok(steps) => self.options.push(ChoiceOption {
                weight,
                body: OptionBody::Inline(steps),
            }),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self
    }

    fn build(self) -> Result<Vec<ChoiceOption>, BuildError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.options.is_empty() {
            return Err(BuildError::EmptyChoice);
        }
        let total: u64 = self.options.iter().map(|o| o.weight as u64).sum();
        if total == 0 {
            return Err(BuildError::ZeroTotalWeight);
        }
        Ok(self.options)
    }
}

/// Sum of option weights in a choice.
pub fn total_weight(options: &[ChoiceOption]) -> u64 {
    options.iter().map(|o| o.weight as u64).sum()
}
