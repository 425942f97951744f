//! Campaign setup
//!
//! With RE_SETUP enabled, creates the per-replica directories, stages the
//! configured external files into each one, and writes the first
//! checkpoint. Restarting a campaign goes through `scheduler::restore_job`
//! instead.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use log::info;

use crate::artifact::CycleLayout;
use crate::config::Config;
use crate::error::{AsyncReError, Result};
use crate::store::StatusStore;

/// Create and populate r0..r{M-1}, then persist the initial status table
pub fn setup_job(config: &Config, layout: &CycleLayout, nreplicas: usize) -> Result<StatusStore> {
    for id in 0..nreplicas {
        if layout.replica_dir(id).exists() {
            return Err(AsyncReError::Config(
                "replica directories already exist; either turn off RE_SETUP or remove them"
                    .to_string(),
            ));
        }
    }
    for id in 0..nreplicas {
        fs::create_dir_all(layout.replica_dir(id))?;
    }

    for file in config.extfiles() {
        for id in 0..nreplicas {
            stage_replica_file(layout, &file, id)?;
        }
    }

    let store = StatusStore::new(nreplicas);
    store.checkpoint(layout.root(), layout.basename())?;
    info!("set up {} replica directories", nreplicas);
    Ok(store)
}

/// Link a job-root file into a replica directory, replacing a stale link
/// from a previous setup
fn stage_replica_file(layout: &CycleLayout, name: &str, id: usize) -> Result<()> {
    let source = layout.root().join(name);
    if !source.exists() {
        return Err(AsyncReError::Config(format!("no such file: {}", name)));
    }
    let link_name = Path::new(name)
        .file_name()
        .ok_or_else(|| AsyncReError::Config(format!("bad external file name: {}", name)))?;
    let link = layout.replica_dir(id).join(link_name);
    if link.exists() || link.symlink_metadata().is_ok() {
        fs::remove_file(&link)?;
    }
    symlink(Path::new("..").join(name), &link)?;
    Ok(())
}
