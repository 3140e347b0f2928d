use std::{collections::HashSet, fmt, fs, path::Path, path::PathBuf, time::Duration};

use comms::specs::StartSpec;
use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorErr, Result};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_CONNECT_RETRIES: usize = 3;
const DEFAULT_CONNECT_BACKOFF_MS: u64 = 500;
const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// How rounds are synchronized between the coordinator and the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Two barriers per round, every worker submits exactly one delta.
    Synchronous,
    /// No barrier, deltas are folded whenever enough volume has accumulated.
    Asynchronous,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Synchronous => f.write_str("synchronous"),
            Mode::Asynchronous => f.write_str("asynchronous"),
        }
    }
}

/// The immutable configuration of a single training run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// The address advertised to workers, defaults to the bound listener address.
    #[serde(default)]
    pub coordinator_address: Option<String>,
    pub worker_addresses: Vec<String>,
    pub mode: Mode,
    pub learning_rate: f32,
    pub lambda_reg: f32,
    pub epochs: usize,
    pub subset_size: usize,
    pub validation_split: f32,
    pub persistence: usize,
    pub train_file: PathBuf,
    /// Where to persist the run log, nothing is written when absent.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_connect_retries() -> usize {
    DEFAULT_CONNECT_RETRIES
}

fn default_connect_backoff_ms() -> u64 {
    DEFAULT_CONNECT_BACKOFF_MS
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

impl RunConfig {
    /// Loads, overrides and validates a `RunConfig` from a JSON file.
    ///
    /// The `PORT` environment variable takes precedence over the file's port.
    ///
    /// # Arguments
    /// * `path` - The path to the JSON document.
    ///
    /// # Returns
    /// A validated config or the reason it was rejected.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CoordinatorErr::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;

        let mut config: Self = serde_json::from_str(&content)?;
        config.apply_overrides(std::env::var("PORT").ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the externally provided overrides on top of the parsed document.
    ///
    /// # Arguments
    /// * `port` - An optional port given as text.
    pub fn apply_overrides(&mut self, port: Option<String>) -> Result<()> {
        if let Some(port) = port {
            self.port = port
                .parse()
                .map_err(|e| CoordinatorErr::InvalidConfig(format!("invalid PORT '{port}': {e}")))?;
        }

        Ok(())
    }

    /// Checks every field for values that would make the run meaningless or stall it.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CoordinatorErr::InvalidConfig(msg));

        if self.worker_addresses.is_empty() {
            return invalid("at least one worker address is required".into());
        }

        let mut seen = HashSet::with_capacity(self.worker_addresses.len());
        if let Some(dup) = self.worker_addresses.iter().find(|addr| !seen.insert(*addr)) {
            return invalid(format!("worker address {dup} is listed more than once"));
        }

        if self.epochs == 0 {
            return invalid("epochs must be greater than 0".into());
        }

        if self.subset_size == 0 {
            return invalid("subset_size must be greater than 0".into());
        }

        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }

        if !self.lambda_reg.is_finite() || self.lambda_reg < 0.0 {
            return invalid(format!(
                "lambda_reg must not be negative, got {}",
                self.lambda_reg
            ));
        }

        if !(0.0..1.0).contains(&self.validation_split) {
            return invalid(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            ));
        }

        if self.max_connections < self.worker_addresses.len() {
            return invalid(format!(
                "max_connections ({}) cannot be smaller than the number of workers ({})",
                self.max_connections,
                self.worker_addresses.len()
            ));
        }

        Ok(())
    }

    /// The address the coordination service listens on.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The amount of accumulated delta entries that triggers an asynchronous fold.
    pub fn volume_threshold(&self) -> usize {
        self.subset_size * self.worker_addresses.len()
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    /// Builds the start message for every worker.
    ///
    /// # Arguments
    /// * `dim` - The model dimension computed from the training data.
    pub fn start_spec(&self, dim: usize) -> StartSpec {
        StartSpec {
            learning_rate: self.learning_rate,
            lambda_reg: self.lambda_reg,
            epochs: self.epochs,
            subset_size: self.subset_size,
            dim,
        }
    }
}
