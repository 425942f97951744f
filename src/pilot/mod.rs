//! Subjob adapter
//!
//! Uniform interface to the external pilot that launches and monitors
//! subjobs. Handles are opaque and die with the coordinator process; on
//! startup every persisted handle is treated as dead and completion is
//! re-established from cycle artifacts instead.

use async_trait::async_trait;

use crate::domain::{PilotCapacity, SubjobHandle, SubjobSpec, SubjobStatus};
use crate::error::Result;

mod local;
mod mock;

pub use local::LocalPilot;
pub use mock::MockPilot;

/// Boundary contract with the external job launcher
#[async_trait]
pub trait Pilot: Send + Sync {
    /// Submit one subjob; the returned handle is only comparable
    async fn submit(&self, spec: SubjobSpec) -> Result<SubjobHandle>;

    /// Query a handle. Unknown handles report `SubjobStatus::Unknown`.
    async fn poll(&self, handle: SubjobHandle) -> Result<SubjobStatus>;

    /// Core accounting used by the admission gate
    fn capacity(&self) -> PilotCapacity;
}
