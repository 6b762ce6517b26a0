//! Configuration
//!
//! Layered loading through the `config` crate, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. A TOML file: the explicit path, or `cadence.toml` in the working
//!    directory when it exists
//! 3. Environment variables prefixed `CADENCE__`, e.g.
//!    `CADENCE__INTERPRETER__MAX_CALL_DEPTH=256` (a `.env` file is loaded
//!    first)
//!
//! ```no_run
//! use cadence_core::config::Config;
//!
//! let config = Config::builder()
//!     .config_path(Some("cadence.toml".into()))
//!     .build()
//!     .expect("valid configuration");
//! assert!(config.interpreter.max_call_depth > 0);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::optimizer::OptimizerOptions;

const DEFAULT_CONFIG_FILE: &str = "cadence.toml";
const ENV_PREFIX: &str = "CADENCE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub interpreter: InterpreterConfig,
    pub optimizer: OptimizerConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Real (non-inlined) calls allowed on one call stack
    pub max_call_depth: usize,
    /// Nested real calls run before execution hops to a fresh worker thread
    pub calls_per_worker: usize,
    /// Stack size of those worker threads, in bytes
    pub worker_stack_size: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 1024,
            calls_per_worker: 32,
            worker_stack_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub inline: bool,
    pub recursion_inline_limit: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        let options = OptimizerOptions::default();
        Self {
            inline: options.inline,
            recursion_inline_limit: options.recursion_inline_limit,
        }
    }
}

impl From<&OptimizerConfig> for OptimizerOptions {
    fn from(config: &OptimizerConfig) -> Self {
        Self {
            inline: config.inline,
            recursion_inline_limit: config.recursion_inline_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Stay Idle after the entry point finishes instead of stopping
    pub keep_alive: bool,
    /// Install the tracing observer (per-statement `trace!` events)
    pub trace_statements: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive: false,
            trace_statements: true,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load with the default search: `cadence.toml` if present, then env
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interpreter.max_call_depth == 0 {
            return Err(ConfigError::Invalid(
                "interpreter.max_call_depth must be at least 1".to_string(),
            ));
        }
        if self.interpreter.calls_per_worker == 0 {
            return Err(ConfigError::Invalid(
                "interpreter.calls_per_worker must be at least 1".to_string(),
            ));
        }
        if self.interpreter.worker_stack_size < 64 * 1024 {
            return Err(ConfigError::Invalid(
                "interpreter.worker_stack_size must be at least 64 KiB".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigBuilder {
    /// Explicit config file; it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Ignore environment variables and `.env`
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if !self.skip_env {
            // A missing .env is normal
            let _ = dotenvy::dotenv();
        }

        let defaults = config::Config::try_from(&Config::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        match &self.config_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.clone()));
                }
                builder = builder.add_source(config::File::from(path.as_path()));
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(config::File::from(default_path));
                }
            }
        }

        if !self.skip_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
