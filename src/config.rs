//! Job configuration
//!
//! The control file is YAML with the upper-case keys the coordinator
//! recognizes. The key set is closed: an unknown key is a configuration
//! error, not a silent no-op. Scheme plug-ins get their own namespace under
//! the `SCHEME` mapping and validate it themselves via `check_input`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::SpmdMode;
use crate::error::{AsyncReError, Result};

fn default_one() -> usize {
    1
}

fn default_buffer() -> f64 {
    0.5
}

fn default_cycle_time() -> f64 {
    30.0
}

fn default_checkpoint_interval() -> u64 {
    5
}

/// Validated configuration record for one campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Engine family tag routed to the engine adapter
    #[serde(rename = "ENGINE")]
    pub engine: String,

    /// Scheme tag routed to the exchange plug-in
    #[serde(rename = "RE_TYPE")]
    pub re_type: String,

    /// Basename for all per-replica files and the checkpoint
    #[serde(rename = "ENGINE_INPUT_BASENAME")]
    pub basename: String,

    /// Comma-separated files staged into each replica directory at setup
    #[serde(rename = "ENGINE_INPUT_EXTFILES", default)]
    pub extfiles: Option<String>,

    /// Comma-separated NAME=value pairs exported in each subjob run script
    #[serde(rename = "ENGINE_ENVIRONMENT", default)]
    pub engine_environment: Option<String>,

    /// Explicit engine executable; otherwise resolved from ENGINE via PATH
    #[serde(rename = "ENGINE_EXECUTABLE", default)]
    pub engine_executable: Option<PathBuf>,

    /// Create directories and stage files; otherwise restart from checkpoint
    #[serde(rename = "RE_SETUP", default)]
    pub re_setup: bool,

    /// Emit progress diagnostics
    #[serde(rename = "VERBOSE", default)]
    pub verbose: bool,

    /// Replica count M; required unless the scheme derives it
    #[serde(rename = "NREPLICAS", default)]
    pub nreplicas: Option<usize>,

    #[serde(rename = "TOTAL_CORES", default = "default_one")]
    pub total_cores: usize,

    #[serde(rename = "SUBJOB_CORES", default = "default_one")]
    pub subjob_cores: usize,

    /// Processors per node, passed through to the pilot
    #[serde(rename = "PPN", default = "default_one")]
    pub ppn: usize,

    #[serde(rename = "SPMD", default)]
    pub spmd: SpmdMode,

    /// Over-admit ratio for the pilot
    #[serde(rename = "SUBJOBS_BUFFER_SIZE", default = "default_buffer")]
    pub subjobs_buffer_size: f64,

    /// Minutes before drain
    #[serde(rename = "WALL_TIME")]
    pub wall_time: f64,

    /// Estimated minutes per cycle; drain safety margin
    #[serde(rename = "REPLICA_RUN_TIME", default)]
    pub replica_run_time: Option<f64>,

    /// Seconds per scheduler tick
    #[serde(rename = "CYCLE_TIME", default = "default_cycle_time")]
    pub cycle_time: f64,

    /// Pairwise swap attempts per exchange round; defaults to |S|
    #[serde(rename = "NEXCHG_ATTEMPTS", default)]
    pub nexchg_attempts: Option<usize>,

    /// PRNG seed for reproducible exchange sequences
    #[serde(rename = "EXCHANGE_SEED", default)]
    pub exchange_seed: Option<u64>,

    /// Checkpoint every K ticks (always on shutdown)
    #[serde(rename = "CHECKPOINT_INTERVAL", default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    // Pilot passthrough
    #[serde(rename = "QUEUE", default)]
    pub queue: Option<String>,

    #[serde(rename = "PROJECT", default)]
    pub project: Option<String>,

    #[serde(rename = "BJ_WORKING_DIR", default)]
    pub bj_working_dir: Option<PathBuf>,

    #[serde(rename = "COORDINATION_URL", default)]
    pub coordination_url: Option<String>,

    #[serde(rename = "RESOURCE_URL", default)]
    pub resource_url: Option<String>,

    /// Opaque scheme-specific settings, validated by the plug-in
    #[serde(rename = "SCHEME", default)]
    pub scheme: HashMap<String, serde_yaml::Value>,
}

impl Config {
    /// Load and validate a control file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AsyncReError::Config(format!("cannot read control file {}: {}", path.display(), e))
        })?;
        Self::from_str(&content)
    }

    /// Parse a control file from a string (unknown keys are fatal)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| AsyncReError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.basename.trim().is_empty() {
            return Err(AsyncReError::Config(
                "ENGINE_INPUT_BASENAME needs to be specified".to_string(),
            ));
        }
        if self.engine.trim().is_empty() {
            return Err(AsyncReError::Config("ENGINE needs to be specified".to_string()));
        }
        if self.re_type.trim().is_empty() {
            return Err(AsyncReError::Config("RE_TYPE needs to be specified".to_string()));
        }
        if self.wall_time <= 0.0 {
            return Err(AsyncReError::Config(
                "WALL_TIME (in minutes) must be positive".to_string(),
            ));
        }
        if self.total_cores == 0 || self.subjob_cores == 0 {
            return Err(AsyncReError::Config(
                "TOTAL_CORES and SUBJOB_CORES must be positive".to_string(),
            ));
        }
        if self.subjobs_buffer_size < 0.0 {
            return Err(AsyncReError::Config(
                "SUBJOBS_BUFFER_SIZE must be non-negative".to_string(),
            ));
        }
        if self.cycle_time <= 0.0 {
            return Err(AsyncReError::Config("CYCLE_TIME must be positive".to_string()));
        }
        if self.checkpoint_interval == 0 {
            return Err(AsyncReError::Config(
                "CHECKPOINT_INTERVAL must be at least 1".to_string(),
            ));
        }
        if let Some(n) = self.nreplicas {
            if n == 0 {
                return Err(AsyncReError::Config("NREPLICAS must be positive".to_string()));
            }
        }
        Ok(())
    }

    /// Files to stage into each replica directory at setup time
    pub fn extfiles(&self) -> Vec<String> {
        match &self.extfiles {
            Some(s) if !s.trim().is_empty() => {
                s.split(',').map(|f| f.trim().to_string()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// NAME=value pairs exported in each subjob run script
    pub fn engine_env(&self) -> Vec<String> {
        match &self.engine_environment {
            Some(s) if !s.trim().is_empty() => {
                s.split(',').map(|f| f.trim().to_string()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Estimated minutes per cycle; defaults to 10% of the wall time
    pub fn replica_run_time(&self) -> f64 {
        self.replica_run_time.unwrap_or(self.wall_time / 10.0)
    }

    /// Required scheme setting, or a ConfigError naming the missing key
    pub fn scheme_str(&self, key: &str) -> Result<String> {
        match self.scheme.get(key) {
            Some(serde_yaml::Value::String(s)) => Ok(s.clone()),
            Some(v) => serde_yaml::to_string(v)
                .map(|s| s.trim().to_string())
                .map_err(|e| AsyncReError::Config(format!("SCHEME.{}: {}", key, e))),
            None => Err(AsyncReError::Config(format!(
                "SCHEME.{} needs to be specified for RE_TYPE {}",
                key, self.re_type
            ))),
        }
    }

    /// Required numeric scheme setting
    pub fn scheme_f64(&self, key: &str) -> Result<f64> {
        let raw = self.scheme_str(key)?;
        raw.parse::<f64>().map_err(|_| {
            AsyncReError::Config(format!("SCHEME.{} is not a number: {}", key, raw))
        })
    }
}
