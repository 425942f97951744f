//! Core domain records shared across the coordinator
//!
//! Replica status records, subjob descriptors, and pilot capacity math.

mod replica;
mod subjob;

pub use replica::{Replica, ReplicaId, ReplicaView, RunningStatus, StateId};
pub use subjob::{PilotCapacity, SpmdMode, SubjobHandle, SubjobSpec, SubjobStatus};
