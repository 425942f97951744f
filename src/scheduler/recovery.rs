//! Crash recovery
//!
//! Rebuilds the status store from the durable checkpoint after a restart.
//! Pilot handles never survive the coordinator process, so every replica
//! persisted as running is forced back to waiting; if its cycle artifact
//! proves the run actually finished after the last checkpoint, the cycle
//! advances so the invisible success is not repeated.

use log::{info, warn};

use crate::artifact::CycleLayout;
use crate::domain::{Replica, RunningStatus};
use crate::engine::MdEngine;
use crate::error::Result;
use crate::exchange::ExchangePlugin;
use crate::store::StatusStore;

/// What happened to one replica during recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Was waiting in the checkpoint; nothing to reconcile
    Untouched,
    /// Was running; its artifact proves completion, cycle advanced
    Advanced,
    /// Was running; no artifact, same cycle will be re-launched
    Restarted,
}

/// Load the checkpoint and reconcile every persisted-R replica against the
/// externally observable cycle artifacts
pub fn restore_job(
    layout: &CycleLayout,
    plugin: &dyn ExchangePlugin,
    engine: &dyn MdEngine,
) -> Result<(StatusStore, Vec<RecoveryAction>)> {
    let mut replicas = StatusStore::read_checkpoint(layout.root(), layout.basename())?;
    let mut actions = Vec::with_capacity(replicas.len());

    for (id, replica) in replicas.iter_mut().enumerate() {
        actions.push(reconcile(id, replica, plugin, engine));
    }

    let advanced = actions
        .iter()
        .filter(|a| **a == RecoveryAction::Advanced)
        .count();
    info!(
        "restored {} replicas from checkpoint ({} recovered completions)",
        replicas.len(),
        advanced
    );
    Ok((StatusStore::from_replicas(replicas), actions))
}

fn reconcile(
    id: usize,
    replica: &mut Replica,
    plugin: &dyn ExchangePlugin,
    engine: &dyn MdEngine,
) -> RecoveryAction {
    replica.last_handle = None;
    if replica.running_status != RunningStatus::Running {
        return RecoveryAction::Untouched;
    }
    replica.running_status = RunningStatus::Waiting;

    let cycle = replica.cycle_current;
    let completed = plugin
        .has_completed(id, cycle)
        .unwrap_or_else(|| engine.has_completed(id, cycle));
    if completed {
        replica.cycle_current += 1;
        info!("replica {} completed cycle {} before the crash", id, cycle);
        RecoveryAction::Advanced
    } else {
        warn!("restarting replica {} (cycle {})", id, cycle);
        RecoveryAction::Restarted
    }
}
