//! Run configuration.
//!
//! A [`Config`] is mutable while a specification is being assembled and is
//! frozen (cloned into the registry snapshot) when a run starts. Mid-run the
//! only sanctioned mutations are the runner's reshape operations, which do
//! not go through this struct.

use std::env;

use thiserror::Error;
use tokio::time::Duration;

/// Configuration errors with descriptive messages.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("base_url must be an absolute http(s) URL, got '{0}'")]
    InvalidBaseUrl(String),

    #[error("users must be at least 1, got {0}")]
    InvalidUsers(usize),

    #[error("spawn_rate must be at least 0.1 users/s, got {0}")]
    InvalidSpawnRate(f64),

    #[error("workers must be at least 1, got {0}")]
    InvalidWorkers(usize),
}

/// Main configuration for a load run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute base URL every context client is bound to.
    pub base_url: String,

    /// Target size of the active virtual-user pool.
    pub users: usize,

    /// Users spawned per second while scaling up.
    pub spawn_rate: f64,

    /// Advisory concurrency ceiling.
    pub workers: usize,

    /// Connection-open timeout in seconds.
    pub open_timeout: f64,

    /// Read timeout in seconds.
    pub read_timeout: f64,

    /// Run duration in seconds; `None` runs until stopped.
    pub duration: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            users: 1,
            spawn_rate: 1.0,
            workers: 4,
            open_timeout: 5.0,
            read_timeout: 30.0,
            duration: None,
        }
    }
}

/// Helper to parse an environment variable with a default value.
fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables: `BASE_URL`, `USERS`, `SPAWN_RATE`, `WORKERS`,
    /// `OPEN_TIMEOUT`, `READ_TIMEOUT`, `DURATION` (seconds; unset or 0 means
    /// unbounded).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let base_url = env::var("BASE_URL").unwrap_or(defaults.base_url);
        let users = env_parse_or("USERS", defaults.users)?;
        let spawn_rate = env_parse_or("SPAWN_RATE", defaults.spawn_rate)?;
        let workers = env_parse_or("WORKERS", defaults.workers)?;
        let open_timeout = env_parse_or("OPEN_TIMEOUT", defaults.open_timeout)?;
        let read_timeout = env_parse_or("READ_TIMEOUT", defaults.read_timeout)?;
        let duration_secs: f64 = env_parse_or("DURATION", 0.0)?;
        let duration = if duration_secs > 0.0 {
            Some(duration_secs)
        } else {
            None
        };

        let config = Config {
            base_url,
            users,
            spawn_rate,
            workers,
            open_timeout,
            read_timeout,
            duration,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates field bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }
        if self.users < 1 {
            return Err(ConfigError::InvalidUsers(self.users));
        }
        if self.spawn_rate < 0.1 {
            return Err(ConfigError::InvalidSpawnRate(self.spawn_rate));
        }
        if self.workers < 1 {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }
        Ok(())
    }

    /// Connection-open timeout as a [`Duration`].
    pub fn open_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.open_timeout)
    }

    /// Total per-request budget: open plus read timeout.
    pub fn total_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.open_timeout + self.read_timeout)
    }
}
