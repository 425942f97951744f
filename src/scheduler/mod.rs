//! Scheduler loop
//!
//! The coordinator owns every component and drives the campaign with a
//! strictly sequential tick: poll running replicas, checkpoint, exchange,
//! admit waiting replicas up to the pilot's capacity, check the wall-time
//! budget. A POSIX interrupt or an exhausted budget switches to drain mode:
//! no new launches, keep polling and checkpointing until every replica is
//! back in the wait state or the hard deadline expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::artifact::CycleLayout;
use crate::config::Config;
use crate::domain::{ReplicaId, RunningStatus};
use crate::engine::MdEngine;
use crate::error::Result;
use crate::exchange::{ExchangeEngine, ExchangePlugin};
use crate::pilot::Pilot;
use crate::store::StatusStore;

pub mod recovery;

pub use recovery::{restore_job, RecoveryAction};

/// Consecutive ticks of pilot failures tolerated before draining
const MAX_PILOT_ERROR_TICKS: u32 = 10;

/// Consecutive checkpoint failures tolerated before draining
const MAX_CHECKPOINT_FAILURES: u32 = 3;

/// Counters accumulated across the coordinator's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub launched: u64,
    pub completed: u64,
    pub failed: u64,
    pub exchange_rounds: u64,
}

/// True once the remaining budget no longer covers another cycle
pub fn drain_due(elapsed_minutes: f64, replica_run_time: f64, wall_time: f64) -> bool {
    elapsed_minutes + replica_run_time >= wall_time
}

/// Top-level periodic controller for one campaign
pub struct Coordinator {
    config: Config,
    layout: CycleLayout,
    store: StatusStore,
    pilot: Arc<dyn Pilot>,
    engine: Box<dyn MdEngine>,
    plugin: Box<dyn ExchangePlugin>,
    exchange: ExchangeEngine,
    stats: TickStats,
    next_launch: ReplicaId,
    drain_deadline: Option<Instant>,
    pilot_error_ticks: u32,
    checkpoint_failures: u32,
    started: Instant,
}

impl Coordinator {
    pub fn new(
        config: Config,
        layout: CycleLayout,
        store: StatusStore,
        pilot: Arc<dyn Pilot>,
        engine: Box<dyn MdEngine>,
        plugin: Box<dyn ExchangePlugin>,
    ) -> Self {
        let exchange = ExchangeEngine::new(config.exchange_seed, config.nexchg_attempts);
        Self {
            config,
            layout,
            store,
            pilot,
            engine,
            plugin,
            exchange,
            stats: TickStats::default(),
            next_launch: 0,
            drain_deadline: None,
            pilot_error_ticks: 0,
            checkpoint_failures: 0,
            started: Instant::now(),
        }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    pub fn is_draining(&self) -> bool {
        self.drain_deadline.is_some()
    }

    /// Stop admitting new replicas; polling and checkpoints continue until
    /// every replica is waiting or the drain timeout expires. The timeout
    /// is twice the per-cycle estimate so current runs can finish.
    pub fn begin_drain(&mut self) {
        if self.drain_deadline.is_none() {
            let timeout = Duration::from_secs_f64(self.config.replica_run_time() * 2.0 * 60.0);
            info!("entering drain mode ({:.0} s timeout)", timeout.as_secs_f64());
            self.drain_deadline = Some(Instant::now() + timeout);
        }
    }

    /// Run ticks until the campaign drains, then write the final checkpoint
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "scheduling {} replicas, tick every {:.0} s, wall time {:.0} min",
            self.store.len(),
            self.config.cycle_time,
            self.config.wall_time
        );
        let tick_interval = Duration::from_secs_f64(self.config.cycle_time);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(tick_interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received");
                    self.begin_drain();
                }
            }

            self.tick().await?;

            if self.is_draining() {
                let running = self.store.running()?;
                if running.is_empty() {
                    info!("drain complete, all replicas waiting");
                    break;
                }
                if self.hard_deadline_passed() {
                    warn!(
                        "hard deadline expired with {} replica(s) still running",
                        running.len()
                    );
                    break;
                }
                debug!("draining, {} replica(s) still running", running.len());
            }
        }

        self.store
            .checkpoint(self.layout.root(), self.layout.basename())?;
        info!(
            "done after {} ticks: {} launched, {} completed, {} failed",
            self.stats.ticks, self.stats.launched, self.stats.completed, self.stats.failed
        );
        Ok(())
    }

    /// One strictly sequential scheduling pass
    pub async fn tick(&mut self) -> Result<()> {
        self.stats.ticks += 1;
        self.poll_running().await?;
        if self.stats.ticks % self.config.checkpoint_interval == 0 {
            self.try_checkpoint();
        }
        self.run_exchange();
        self.admit().await?;
        self.wall_time_gate();
        if let Err(e) = self
            .store
            .write_status_text(self.layout.root(), self.layout.basename())
        {
            debug!("status table write failed: {}", e);
        }
        Ok(())
    }

    /// Step 1: route every terminal handle through the completion heuristic
    pub async fn poll_running(&mut self) -> Result<()> {
        let running = self.store.running()?;
        let mut pilot_ok = true;

        for id in running {
            let replica = self.store.get(id)?;
            let Some(handle) = replica.last_handle else {
                // R without a handle cannot be polled; treat as a failed run
                warn!("replica {} is running without a handle", id);
                self.complete_fail(id, replica.cycle_current, "no pilot handle")?;
                continue;
            };
            match self.pilot.poll(handle).await {
                Ok(status) if status.is_terminal() => {
                    if self.has_completed(id, replica.cycle_current) {
                        self.complete_ok(id, replica.cycle_current)?;
                    } else {
                        self.complete_fail(
                            id,
                            replica.cycle_current,
                            &format!("pilot reported {:?}, artifact missing", status),
                        )?;
                    }
                }
                Ok(_) => {} // Pending/Running/Unknown: re-poll next tick
                Err(e) => {
                    warn!("poll of {} failed: {}", handle, e);
                    pilot_ok = false;
                }
            }
        }

        if pilot_ok {
            self.pilot_error_ticks = 0;
        } else {
            self.pilot_error_ticks += 1;
            if self.pilot_error_ticks >= MAX_PILOT_ERROR_TICKS {
                error!(
                    "pilot unreachable for {} consecutive ticks",
                    self.pilot_error_ticks
                );
                self.begin_drain();
            }
        }
        Ok(())
    }

    /// Step 3: one exchange round over the current waiting set. A plug-in
    /// failure aborts the round and scheduling continues unchanged.
    pub fn run_exchange(&mut self) {
        match self.exchange.run(&self.store, self.plugin.as_ref()) {
            Ok(report) => {
                if report.participants >= 2 {
                    self.stats.exchange_rounds += 1;
                }
            }
            Err(e) => warn!("exchange round aborted: {}", e),
        }
    }

    /// Step 4: launch waiting replicas round-robin until the pilot is full
    pub async fn admit(&mut self) -> Result<()> {
        if self.is_draining() {
            return Ok(());
        }
        loop {
            if drain_due(
                self.elapsed_minutes(),
                self.config.replica_run_time(),
                self.config.wall_time,
            ) {
                break;
            }
            if !self.pilot.capacity().has_room(self.config.subjob_cores) {
                break;
            }
            let waiting = self.store.waiting()?;
            if waiting.is_empty() {
                break;
            }
            let n = self.store.len();
            let Some(id) = (0..n)
                .map(|k| (self.next_launch + k) % n)
                .find(|id| waiting.contains(id))
            else {
                break;
            };
            self.next_launch = (id + 1) % n;
            if let Err(e) = self.launch(id).await {
                warn!("launch of replica {} failed: {}", id, e);
                self.pilot_error_ticks += 1;
                break;
            }
        }
        Ok(())
    }

    /// Step 5: stop admitting once the budget cannot cover another cycle
    pub fn wall_time_gate(&mut self) {
        if drain_due(
            self.elapsed_minutes(),
            self.config.replica_run_time(),
            self.config.wall_time,
        ) {
            self.begin_drain();
        }
    }

    /// W -> R: build inputs, submit, record the handle
    pub async fn launch(&mut self, id: ReplicaId) -> Result<()> {
        let replica = self.store.get(id)?;
        debug_assert_eq!(replica.running_status, RunningStatus::Waiting);
        let view = replica.view(id);
        self.plugin.build_input(&view)?;
        let spec = self.engine.prepare(id, replica.cycle_current)?;
        let handle = self.pilot.submit(spec).await?;
        self.store.update(id, |r| {
            r.running_status = RunningStatus::Running;
            r.last_handle = Some(handle);
        })?;
        self.stats.launched += 1;
        info!(
            "launched replica {} cycle {} as {}",
            id, replica.cycle_current, handle
        );
        Ok(())
    }

    /// R -> W on success: the cycle advances
    fn complete_ok(&mut self, id: ReplicaId, cycle: u64) -> Result<()> {
        self.store.update(id, |r| {
            r.cycle_current += 1;
            r.running_status = RunningStatus::Waiting;
            r.last_handle = None;
        })?;
        self.stats.completed += 1;
        info!("replica {} completed cycle {}", id, cycle);
        Ok(())
    }

    /// R -> W on failure: same cycle, same state, eligible for re-launch
    fn complete_fail(&mut self, id: ReplicaId, cycle: u64, reason: &str) -> Result<()> {
        self.store.update(id, |r| {
            r.running_status = RunningStatus::Waiting;
            r.last_handle = None;
        })?;
        self.stats.failed += 1;
        warn!("replica {} failed cycle {}: {}", id, cycle, reason);
        Ok(())
    }

    fn has_completed(&self, id: ReplicaId, cycle: u64) -> bool {
        match self.plugin.has_completed(id, cycle) {
            Some(answer) => answer,
            None => self.engine.has_completed(id, cycle),
        }
    }

    fn try_checkpoint(&mut self) {
        match self
            .store
            .checkpoint(self.layout.root(), self.layout.basename())
        {
            Ok(()) => {
                self.checkpoint_failures = 0;
                debug!("checkpoint written");
            }
            Err(e) => {
                self.checkpoint_failures += 1;
                warn!(
                    "checkpoint failed ({} consecutive): {}",
                    self.checkpoint_failures, e
                );
                if self.checkpoint_failures >= MAX_CHECKPOINT_FAILURES {
                    error!("giving up on checkpoints, draining");
                    self.begin_drain();
                }
            }
        }
    }

    fn elapsed_minutes(&self) -> f64 {
        self.started.elapsed().as_secs_f64() / 60.0
    }

    fn hard_deadline_passed(&self) -> bool {
        self.drain_deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_due_boundary() {
        assert!(!drain_due(7.9, 2.0, 10.0));
        assert!(drain_due(8.0, 2.0, 10.0));
        assert!(drain_due(9.0, 2.0, 10.0));
    }

    #[test]
    fn test_tick_stats_default() {
        let stats = TickStats::default();
        assert_eq!(stats.ticks, 0);
        assert_eq!(stats.launched, 0);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.exchange_rounds, 0);
    }
}
