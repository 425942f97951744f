//! Subjob descriptors and pilot capacity
//!
//! A subjob is one MD run of one replica, executed by the external pilot.
//! The descriptor carries everything the pilot needs; the handle it returns
//! is opaque and only valid within the current coordinator process.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque, comparable handle to a submitted subjob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjobHandle(pub u64);

impl fmt::Display for SubjobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sj-{}", self.0)
    }
}

/// Pilot-reported state of a subjob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Unknown,
}

impl SubjobStatus {
    /// Done and Failed are terminal; Unknown is transient and re-polled
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubjobStatus::Done | SubjobStatus::Failed)
    }
}

/// SPMD variation requested from the pilot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpmdMode {
    #[default]
    Single,
    Mpi,
}

impl fmt::Display for SpmdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpmdMode::Single => write!(f, "single"),
            SpmdMode::Mpi => write!(f, "mpi"),
        }
    }
}

/// Everything the pilot needs to execute one subjob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjobSpec {
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub working_directory: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub processes: usize,
    pub spmd: SpmdMode,
}

/// Core accounting reported by the pilot at admission time
#[derive(Debug, Clone, Copy)]
pub struct PilotCapacity {
    /// Cores the pilot claims in total
    pub total_cores: usize,
    /// Cores currently allocated to live subjobs
    pub in_use_cores: usize,
    /// Over-admission ratio used to hide launch latency
    pub buffer_size: f64,
}

impl PilotCapacity {
    /// Maximum concurrent subjobs: floor(total * (1 + buffer) / subjob_cores)
    pub fn max_subjobs(&self, subjob_cores: usize) -> usize {
        let cores = subjob_cores.max(1) as f64;
        ((self.total_cores as f64) * (1.0 + self.buffer_size) / cores).floor() as usize
    }

    /// Whether one more subjob of the given width fits under the bound
    pub fn has_room(&self, subjob_cores: usize) -> bool {
        let cores = subjob_cores.max(1);
        self.in_use_cores + cores <= self.max_subjobs(cores) * cores
    }
}
