//! Local process pilot
//!
//! Runs subjobs as child processes of the coordinator. This stands in for
//! a batch-system pilot on a workstation: same boundary contract, no queue.

use std::collections::HashMap;
use std::fs::File;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::{Child, Command};

use crate::domain::{PilotCapacity, SubjobHandle, SubjobSpec, SubjobStatus};
use crate::error::{AsyncReError, Result};
use crate::pilot::Pilot;

enum Slot {
    Active(Child),
    Terminal(SubjobStatus),
}

/// Pilot that spawns subjobs directly on the local machine
pub struct LocalPilot {
    total_cores: usize,
    subjob_cores: usize,
    buffer_size: f64,
    next_handle: AtomicU64,
    slots: Mutex<HashMap<SubjobHandle, Slot>>,
}

impl LocalPilot {
    pub fn new(total_cores: usize, subjob_cores: usize, buffer_size: f64) -> Self {
        Self {
            total_cores,
            subjob_cores,
            buffer_size,
            next_handle: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SubjobHandle, Slot>>> {
        self.slots
            .lock()
            .map_err(|e| AsyncReError::Pilot(e.to_string()))
    }

    fn active_count(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| {
                slots
                    .values()
                    .filter(|s| matches!(s, Slot::Active(_)))
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl Pilot for LocalPilot {
    async fn submit(&self, spec: SubjobSpec) -> Result<SubjobHandle> {
        let stdout = File::create(&spec.stdout_path)
            .map_err(|e| AsyncReError::Pilot(format!("cannot open subjob stdout: {}", e)))?;
        let stderr = File::create(&spec.stderr_path)
            .map_err(|e| AsyncReError::Pilot(format!("cannot open subjob stderr: {}", e)))?;

        let child = Command::new(&spec.executable)
            .args(&spec.arguments)
            .current_dir(&spec.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| {
                AsyncReError::Pilot(format!(
                    "failed to spawn {}: {}",
                    spec.executable.display(),
                    e
                ))
            })?;

        let handle = SubjobHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        debug!(
            "spawned {} in {} as {}",
            spec.executable.display(),
            spec.working_directory.display(),
            handle
        );
        self.lock()?.insert(handle, Slot::Active(child));
        Ok(handle)
    }

    async fn poll(&self, handle: SubjobHandle) -> Result<SubjobStatus> {
        let mut slots = self.lock()?;
        let Some(slot) = slots.get_mut(&handle) else {
            warn!("poll of unknown handle {}", handle);
            return Ok(SubjobStatus::Unknown);
        };
        match slot {
            Slot::Terminal(status) => Ok(*status),
            Slot::Active(child) => match child.try_wait() {
                Ok(None) => Ok(SubjobStatus::Running),
                Ok(Some(exit)) => {
                    let status = if exit.success() {
                        SubjobStatus::Done
                    } else {
                        SubjobStatus::Failed
                    };
                    *slot = Slot::Terminal(status);
                    Ok(status)
                }
                Err(e) => Err(AsyncReError::Pilot(format!("wait on {}: {}", handle, e))),
            },
        }
    }

    fn capacity(&self) -> PilotCapacity {
        PilotCapacity {
            total_cores: self.total_cores,
            in_use_cores: self.active_count() * self.subjob_cores,
            buffer_size: self.buffer_size,
        }
    }
}
