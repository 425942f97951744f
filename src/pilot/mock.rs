//! Scripted pilot for tests
//!
//! Records every submitted descriptor and reports whatever status the test
//! scripted for each handle. Lives in the library so integration tests can
//! drive the coordinator against it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{PilotCapacity, SubjobHandle, SubjobSpec, SubjobStatus};
use crate::error::{AsyncReError, Result};
use crate::pilot::Pilot;

/// Pilot double with per-handle scripted statuses
pub struct MockPilot {
    total_cores: usize,
    subjob_cores: usize,
    buffer_size: f64,
    next_handle: AtomicU64,
    statuses: Mutex<HashMap<SubjobHandle, SubjobStatus>>,
    submitted: Mutex<Vec<(SubjobHandle, SubjobSpec)>>,
    fail_submissions: Mutex<bool>,
}

impl MockPilot {
    pub fn new(total_cores: usize, subjob_cores: usize, buffer_size: f64) -> Self {
        Self {
            total_cores,
            subjob_cores,
            buffer_size,
            next_handle: AtomicU64::new(1),
            statuses: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            fail_submissions: Mutex::new(false),
        }
    }

    /// Script the status reported for a handle from now on
    pub fn set_status(&self, handle: SubjobHandle, status: SubjobStatus) {
        self.statuses.lock().unwrap().insert(handle, status);
    }

    /// Move every live subjob to the given terminal status
    pub fn finish_all(&self, status: SubjobStatus) {
        let mut statuses = self.statuses.lock().unwrap();
        for s in statuses.values_mut() {
            if !s.is_terminal() {
                *s = status;
            }
        }
    }

    /// Make future submissions fail with a pilot error
    pub fn refuse_submissions(&self, refuse: bool) {
        *self.fail_submissions.lock().unwrap() = refuse;
    }

    pub fn submitted(&self) -> Vec<(SubjobHandle, SubjobSpec)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    fn live_count(&self) -> usize {
        self.statuses
            .lock()
            .unwrap()
            .values()
            .filter(|s| !s.is_terminal())
            .count()
    }
}

#[async_trait]
impl Pilot for MockPilot {
    async fn submit(&self, spec: SubjobSpec) -> Result<SubjobHandle> {
        if *self.fail_submissions.lock().unwrap() {
            return Err(AsyncReError::Pilot("submission refused".to_string()));
        }
        let handle = SubjobHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.statuses
            .lock()
            .unwrap()
            .insert(handle, SubjobStatus::Running);
        self.submitted.lock().unwrap().push((handle, spec));
        Ok(handle)
    }

    async fn poll(&self, handle: SubjobHandle) -> Result<SubjobStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&handle)
            .copied()
            .unwrap_or(SubjobStatus::Unknown))
    }

    fn capacity(&self) -> PilotCapacity {
        PilotCapacity {
            total_cores: self.total_cores,
            in_use_cores: self.live_count() * self.subjob_cores,
            buffer_size: self.buffer_size,
        }
    }
}
