//! Configuration types

use crate::{ConfigError, ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default retry budget for one optimistic update.
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// Default upper bound of the randomized backoff between attempts.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(100);

/// Default number of lazy-load passes.
pub const DEFAULT_MAX_LOAD_ITERATIONS: usize = 5;

/// Keys a TOML configuration document must set.
const REQUIRED_FIELDS: [&str; 4] = [
    "max_iterations",
    "max_backoff",
    "max_load_iterations",
    "allow_ambient_transaction",
];

fn parse_error(e: impl std::fmt::Display) -> ModelError {
    ModelError::Config(ConfigError::Parse {
        reason: e.to_string(),
    })
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Attempts before an optimistic update gives up.
    pub max_iterations: u32,
    /// Upper bound of the random sleep after a conflict, in milliseconds
    /// when read from TOML or the environment.
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    /// Passes the lazy loader makes before leaving relations unresolved.
    pub max_load_iterations: usize,
    /// Run a single unretried attempt inside an ambient transaction instead
    /// of failing fast.
    pub allow_ambient_transaction: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_load_iterations: DEFAULT_MAX_LOAD_ITERATIONS,
            allow_ambient_transaction: false,
        }
    }
}

impl ModelConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `MODELKIT_MAX_ITERATIONS`: Retry budget per update (default: 20)
    /// - `MODELKIT_MAX_BACKOFF_MS`: Backoff upper bound in ms (default: 100)
    /// - `MODELKIT_MAX_LOAD_ITERATIONS`: Lazy-load passes (default: 5)
    /// - `MODELKIT_ALLOW_AMBIENT_TRANSACTION`: `true`/`false` (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_iterations: std::env::var("MODELKIT_MAX_ITERATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_iterations),
            max_backoff: std::env::var("MODELKIT_MAX_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            max_load_iterations: std::env::var("MODELKIT_MAX_LOAD_ITERATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_load_iterations),
            allow_ambient_transaction: std::env::var("MODELKIT_ALLOW_AMBIENT_TRANSACTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.allow_ambient_transaction),
        }
    }

    /// Parse and validate a TOML document. Every field must be present.
    pub fn from_toml_str(contents: &str) -> ModelResult<Self> {
        let table: toml::Table = contents.parse().map_err(parse_error)?;
        if let Some(field) = REQUIRED_FIELDS.iter().find(|f| !table.contains_key(**f)) {
            return Err(ModelError::Config(ConfigError::MissingRequired {
                field: field.to_string(),
            }));
        }

        let config: ModelConfig = toml::Value::Table(table).try_into().map_err(parse_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_max_load_iterations(mut self, max_load_iterations: usize) -> Self {
        self.max_load_iterations = max_load_iterations;
        self
    }

    pub fn with_ambient_transaction(mut self, allowed: bool) -> Self {
        self.allow_ambient_transaction = allowed;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_iterations > 0
    /// - max_load_iterations > 0
    ///
    /// A zero `max_backoff` is allowed and disables the sleep.
    pub fn validate(&self) -> ModelResult<()> {
        if self.max_iterations == 0 {
            return Err(ModelError::Config(ConfigError::InvalidValue {
                field: "max_iterations".to_string(),
                value: self.max_iterations.to_string(),
                reason: "max_iterations must be greater than 0".to_string(),
            }));
        }

        if self.max_load_iterations == 0 {
            return Err(ModelError::Config(ConfigError::InvalidValue {
                field: "max_load_iterations".to_string(),
                value: self.max_load_iterations.to_string(),
                reason: "max_load_iterations must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// =============================================================================
// TESTS
// =============================================================================
