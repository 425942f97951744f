//! Status store
//!
//! The single source of truth for replica status. All mutation funnels
//! through one lock; readers get consistent snapshots. The store also owns
//! the durable checkpoint protocol: a versioned JSON document written to a
//! temporary file and atomically renamed to `{basename}.stat`, with a
//! human-readable mirror at `{basename}_stat.txt`.
//!
//! The checkpoint persists `running_status` verbatim (a crash can leave R
//! rows in the durable file); resetting to W is the restore side's job
//! because pilot handles never survive a restart.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::domain::{Replica, ReplicaId, ReplicaView, RunningStatus, StateId};
use crate::error::{AsyncReError, Result};

/// Bumped whenever the persisted layout changes
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDoc {
    version: u32,
    replicas: Vec<Replica>,
}

/// In-memory replica table under a single logical lock
#[derive(Debug)]
pub struct StatusStore {
    replicas: RwLock<Vec<Replica>>,
}

impl StatusStore {
    /// Fresh table with the identity state assignment, all waiting at cycle 1
    pub fn new(nreplicas: usize) -> Self {
        let replicas = (0..nreplicas).map(Replica::new).collect();
        Self {
            replicas: RwLock::new(replicas),
        }
    }

    /// Table restored from previously persisted records
    pub fn from_replicas(replicas: Vec<Replica>) -> Self {
        Self {
            replicas: RwLock::new(replicas),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Replica>>> {
        self.replicas
            .read()
            .map_err(|e| AsyncReError::Store(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Replica>>> {
        self.replicas
            .write()
            .map_err(|e| AsyncReError::Store(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.replicas.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of one replica record
    pub fn get(&self, id: ReplicaId) -> Result<Replica> {
        let guard = self.read()?;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| AsyncReError::Store(format!("no such replica: {}", id)))
    }

    /// Apply a mutation to one replica under the lock
    pub fn update<F>(&self, id: ReplicaId, mutator: F) -> Result<()>
    where
        F: FnOnce(&mut Replica),
    {
        let mut guard = self.write()?;
        let replica = guard
            .get_mut(id)
            .ok_or_else(|| AsyncReError::Store(format!("no such replica: {}", id)))?;
        mutator(replica);
        Ok(())
    }

    /// Consistent clone of the whole table
    pub fn table(&self) -> Result<Vec<Replica>> {
        Ok(self.read()?.clone())
    }

    /// Consistent (running, waiting) id partition
    pub fn partition(&self) -> Result<(Vec<ReplicaId>, Vec<ReplicaId>)> {
        let guard = self.read()?;
        let mut running = Vec::new();
        let mut waiting = Vec::new();
        for (id, replica) in guard.iter().enumerate() {
            match replica.running_status {
                RunningStatus::Running => running.push(id),
                RunningStatus::Waiting => waiting.push(id),
            }
        }
        Ok((running, waiting))
    }

    pub fn running(&self) -> Result<Vec<ReplicaId>> {
        Ok(self.partition()?.0)
    }

    pub fn waiting(&self) -> Result<Vec<ReplicaId>> {
        Ok(self.partition()?.1)
    }

    /// Snapshot of the waiting set, taken under one read lock
    pub fn snapshot_waiting(&self) -> Result<Vec<ReplicaView>> {
        let guard = self.read()?;
        Ok(guard
            .iter()
            .enumerate()
            .filter(|(_, r)| r.running_status.is_waiting())
            .map(|(id, r)| r.view(id))
            .collect())
    }

    /// Apply a state permutation inside one critical section.
    ///
    /// A replica is only written if it is still waiting and its cycle has
    /// not changed since the snapshot was taken; anything else keeps its
    /// old state id. Returns (applied, skipped) counts, where applied only
    /// counts actual state changes.
    pub fn apply_permutation(
        &self,
        snapshot: &[ReplicaView],
        permutation: &HashMap<ReplicaId, StateId>,
    ) -> Result<(usize, usize)> {
        let mut guard = self.write()?;
        let mut applied = 0;
        let mut skipped = 0;
        for view in snapshot {
            let Some(&new_state) = permutation.get(&view.id) else {
                continue;
            };
            let Some(replica) = guard.get_mut(view.id) else {
                skipped += 1;
                continue;
            };
            if replica.running_status.is_waiting() && replica.cycle_current == view.cycle {
                if replica.stateid_current != new_state {
                    debug!(
                        "replica {} state {} -> {}",
                        view.id, replica.stateid_current, new_state
                    );
                    replica.stateid_current = new_state;
                    applied += 1;
                }
            } else {
                skipped += 1;
            }
        }
        Ok((applied, skipped))
    }

    /// Serialize the table plus a format version
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let doc = CheckpointDoc {
            version: CHECKPOINT_VERSION,
            replicas: self.table()?,
        };
        Ok(serde_json::to_vec(&doc)?)
    }

    /// Inverse of `snapshot`; the raw records, statuses as persisted
    pub fn restore(bytes: &[u8]) -> Result<Vec<Replica>> {
        let doc: CheckpointDoc = serde_json::from_slice(bytes)
            .map_err(|e| AsyncReError::CorruptCheckpoint(e.to_string()))?;
        if doc.version != CHECKPOINT_VERSION {
            return Err(AsyncReError::CorruptCheckpoint(format!(
                "checkpoint version {} but this coordinator writes {}",
                doc.version, CHECKPOINT_VERSION
            )));
        }
        Ok(doc.replicas)
    }

    /// Durable checkpoint path: `{basename}.stat`
    pub fn checkpoint_path(root: &Path, basename: &str) -> PathBuf {
        root.join(format!("{}.stat", basename))
    }

    /// Human-readable mirror path: `{basename}_stat.txt`
    pub fn status_text_path(root: &Path, basename: &str) -> PathBuf {
        root.join(format!("{}_stat.txt", basename))
    }

    /// Write the checkpoint atomically, then refresh the text mirror.
    ///
    /// The write goes to a temporary sibling first, is flushed to disk, and
    /// is renamed onto `{basename}.stat` so a crash mid-write never leaves
    /// a truncated authoritative file.
    pub fn checkpoint(&self, root: &Path, basename: &str) -> Result<()> {
        let bytes = self.snapshot()?;
        let tmp_path = root.join(format!("{}.stat.tmp", basename));
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, Self::checkpoint_path(root, basename))?;
        self.write_status_text(root, basename)?;
        Ok(())
    }

    /// Non-atomic text table, handy to `watch cat` while a campaign runs
    pub fn write_status_text(&self, root: &Path, basename: &str) -> Result<()> {
        let table = self.table()?;
        let mut text = String::from("Replica  State  Status  Cycle \n");
        let mut running = 0;
        let mut waiting = 0;
        for (id, replica) in table.iter().enumerate() {
            text.push_str(&format!(
                "{:6}   {:5}  {:>5}  {:5} \n",
                id, replica.stateid_current, replica.running_status, replica.cycle_current
            ));
            match replica.running_status {
                RunningStatus::Running => running += 1,
                RunningStatus::Waiting => waiting += 1,
            }
        }
        text.push_str(&format!("Running = {}\n", running));
        text.push_str(&format!("Waiting = {}\n", waiting));
        fs::write(Self::status_text_path(root, basename), text)?;
        Ok(())
    }

    /// Read the durable checkpoint; any failure is a corrupt checkpoint as
    /// far as a restart is concerned
    pub fn read_checkpoint(root: &Path, basename: &str) -> Result<Vec<Replica>> {
        let path = Self::checkpoint_path(root, basename);
        let bytes = fs::read(&path).map_err(|e| {
            AsyncReError::CorruptCheckpoint(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::restore(&bytes)
    }
}
