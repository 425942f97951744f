//! Replica status record
//!
//! A replica is a persistent logical simulation copy. It never terminates;
//! it alternates between waiting (eligible for exchange and launch) and
//! running (submitted to the pilot), advancing its cycle count on each
//! successful run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::SubjobHandle;

/// Replica identifier, dense in `[0, M)`
pub type ReplicaId = usize;

/// Thermodynamic state identifier, dense in `[0, N)`
pub type StateId = usize;

/// Whether a replica is executing in the pilot or waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunningStatus {
    /// Submitted to or executing in the pilot
    #[serde(rename = "R")]
    Running,
    /// Eligible for exchange and for a future launch
    #[serde(rename = "W")]
    Waiting,
}

impl RunningStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RunningStatus::Running)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, RunningStatus::Waiting)
    }
}

impl fmt::Display for RunningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningStatus::Running => write!(f, "R"),
            RunningStatus::Waiting => write!(f, "W"),
        }
    }
}

/// Mutable per-replica record held by the status store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    /// Currently assigned thermodynamic state
    pub stateid_current: StateId,

    /// Running or waiting
    pub running_status: RunningStatus,

    /// Cycle the replica is in or about to start; cycle k means k-1 completed
    pub cycle_current: u64,

    /// Pilot handle from the most recent launch. Handles do not survive a
    /// coordinator restart, so this is never persisted.
    #[serde(skip)]
    pub last_handle: Option<SubjobHandle>,
}

impl Replica {
    /// Fresh replica assigned to the given state, waiting at cycle 1
    pub fn new(stateid: StateId) -> Self {
        Self {
            stateid_current: stateid,
            running_status: RunningStatus::Waiting,
            cycle_current: 1,
            last_handle: None,
        }
    }

    /// Read-only snapshot row for the exchange engine and plug-ins
    pub fn view(&self, id: ReplicaId) -> ReplicaView {
        ReplicaView {
            id,
            stateid: self.stateid_current,
            cycle: self.cycle_current,
        }
    }
}

/// Point-in-time view of one replica, taken under the store lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaView {
    pub id: ReplicaId,
    pub stateid: StateId,
    pub cycle: u64,
}
