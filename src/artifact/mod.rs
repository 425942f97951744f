//! Cycle artifact layer
//!
//! Names and inspects the per-cycle files each replica produces. Replica i
//! owns `r{i}/` under the job root; every cycle-scoped file is named
//! `{basename}_{cycle}.{ext}`. Artifact presence (non-empty) is the
//! engine-independent completion heuristic, and the only one available
//! after a restart when no pilot handle exists.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::ReplicaId;

/// Canonical path naming for one campaign
#[derive(Debug, Clone)]
pub struct CycleLayout {
    root: PathBuf,
    basename: String,
}

impl CycleLayout {
    pub fn new(root: impl Into<PathBuf>, basename: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            basename: basename.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Private working directory of replica i: `r{i}/`
    pub fn replica_dir(&self, replica: ReplicaId) -> PathBuf {
        self.root.join(format!("r{}", replica))
    }

    /// `r{i}/{basename}_{cycle}.{ext}`
    pub fn cycle_file(&self, replica: ReplicaId, cycle: u64, ext: &str) -> PathBuf {
        self.replica_dir(replica)
            .join(format!("{}_{}.{}", self.basename, cycle, ext))
    }

    /// Subjob stdout capture for one cycle
    pub fn stdout_path(&self, replica: ReplicaId, cycle: u64) -> PathBuf {
        self.cycle_file(replica, cycle, "log")
    }

    /// Subjob stderr capture for one cycle
    pub fn stderr_path(&self, replica: ReplicaId, cycle: u64) -> PathBuf {
        self.cycle_file(replica, cycle, "err")
    }

    /// Per-replica run script rewritten before every launch
    pub fn run_script_path(&self, replica: ReplicaId) -> PathBuf {
        self.replica_dir(replica).join("run")
    }

    /// True if the cycle artifact exists and is non-empty
    pub fn has_artifact(&self, replica: ReplicaId, cycle: u64, ext: &str) -> bool {
        file_is_nonempty(&self.cycle_file(replica, cycle, ext))
    }
}

/// Presence heuristic shared by the engine adapters
pub fn file_is_nonempty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}
