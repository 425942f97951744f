//! Engine adapters
//!
//! One adapter per MD engine family. An adapter turns a (replica, cycle)
//! into a subjob descriptor for the pilot and supplies the engine's
//! completion heuristic for that cycle. The coordinator holds the adapter
//! by trait and never learns the engine's file conventions.

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::artifact::CycleLayout;
use crate::config::Config;
use crate::domain::{ReplicaId, SpmdMode, SubjobSpec};
use crate::error::{AsyncReError, Result};

/// Launch preparation and completion detection for one engine family
pub trait MdEngine: Send + Sync + std::fmt::Debug {
    /// Build the subjob descriptor for one cycle of one replica. Must be
    /// idempotent: rewriting scripts for the same (replica, cycle, state)
    /// overwrites deterministically.
    fn prepare(&self, replica: ReplicaId, cycle: u64) -> Result<SubjobSpec>;

    /// Engine-specific completion heuristic for a (replica, cycle)
    fn has_completed(&self, replica: ReplicaId, cycle: u64) -> bool;
}

/// Resolve the adapter for the configured ENGINE tag
pub fn create_engine(config: &Config, layout: &CycleLayout) -> Result<Box<dyn MdEngine>> {
    let tag = config.engine.to_uppercase();
    match tag.as_str() {
        "DATE" => Ok(Box::new(DateEngine::new(layout.clone(), config.subjob_cores))),
        "AMBER" | "SANDER" | "AMBER-SANDER" => {
            Ok(Box::new(SanderEngine::from_config(config, layout, "sander")?))
        }
        "PMEMD" | "AMBER-PMEMD" => {
            Ok(Box::new(SanderEngine::from_config(config, layout, "pmemd")?))
        }
        other => Err(AsyncReError::Config(format!(
            "requested ENGINE ({}) is either invalid or not currently supported",
            other
        ))),
    }
}

/// PATH lookup for an executable name; absolute paths are checked directly
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|exe| is_executable(exe))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// sander/pmemd-style engine: a per-replica `run` script wraps the MD
/// executable with the cycle-dependent argument vector, and the restart
/// file is the completion artifact.
#[derive(Debug)]
pub struct SanderEngine {
    executable: PathBuf,
    shell: PathBuf,
    layout: CycleLayout,
    environment: Vec<String>,
    subjob_cores: usize,
    spmd: SpmdMode,
}

impl SanderEngine {
    pub fn from_config(config: &Config, layout: &CycleLayout, program: &str) -> Result<Self> {
        let mut exe_name = program.to_string();
        let spmd = if config.subjob_cores > 1 {
            exe_name.push_str(".MPI");
            SpmdMode::Mpi
        } else {
            config.spmd
        };
        let executable = match &config.engine_executable {
            Some(path) => path.clone(),
            None => resolve_executable(&exe_name).ok_or_else(|| {
                AsyncReError::Config(format!(
                    "cannot find {} on PATH; set ENGINE_EXECUTABLE",
                    exe_name
                ))
            })?,
        };
        let shell = resolve_executable("bash")
            .ok_or_else(|| AsyncReError::Config("cannot find bash on PATH".to_string()))?;
        Ok(Self {
            executable,
            shell,
            layout: layout.clone(),
            environment: config.engine_env(),
            subjob_cores: config.subjob_cores,
            spmd,
        })
    }

    fn write_run_script(&self, replica: ReplicaId, cycle: u64) -> Result<()> {
        let base = self.layout.basename();
        let wdir = self.layout.replica_dir(replica);

        let inpcrd = format!("{}_{}.rst7", base, cycle - 1);
        let mdout = format!("{}_{}.out", base, cycle);
        let mdcrd = format!("{}_{}.nc", base, cycle);
        let restrt = format!("{}_{}.rst7", base, cycle);

        let mut script = String::from("#!/bin/sh\n");
        for pair in &self.environment {
            script.push_str(&format!("export {}\n", pair));
        }
        script.push_str(&format!("EXE={}\n\n", self.executable.display()));
        script.push_str(&format!("cd {}\n", wdir.display()));
        script.push_str(&format!(
            "$EXE -O -i mdin -c {} -o {} -x {} -r {}\n",
            inpcrd, mdout, mdcrd, restrt
        ));

        let path = self.layout.run_script_path(replica);
        fs::write(&path, script)?;
        let mut perms = fs::metadata(&path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms)?;
        Ok(())
    }
}

impl MdEngine for SanderEngine {
    fn prepare(&self, replica: ReplicaId, cycle: u64) -> Result<SubjobSpec> {
        self.write_run_script(replica, cycle)?;
        debug!(
            "prepared run script for replica {} cycle {}",
            replica, cycle
        );
        Ok(SubjobSpec {
            executable: self.shell.clone(),
            arguments: vec!["run".to_string()],
            working_directory: self.layout.replica_dir(replica),
            stdout_path: self.layout.stdout_path(replica, cycle),
            stderr_path: self.layout.stderr_path(replica, cycle),
            processes: self.subjob_cores,
            spmd: self.spmd,
        })
    }

    fn has_completed(&self, replica: ReplicaId, cycle: u64) -> bool {
        self.layout.has_artifact(replica, cycle, "rst7")
    }
}

/// Trivial engine used for wiring smoke tests; runs /bin/date
#[derive(Debug)]
pub struct DateEngine {
    layout: CycleLayout,
    subjob_cores: usize,
}

impl DateEngine {
    pub fn new(layout: CycleLayout, subjob_cores: usize) -> Self {
        Self {
            layout,
            subjob_cores,
        }
    }
}

impl MdEngine for DateEngine {
    fn prepare(&self, replica: ReplicaId, cycle: u64) -> Result<SubjobSpec> {
        Ok(SubjobSpec {
            executable: PathBuf::from("/bin/date"),
            arguments: vec![],
            working_directory: self.layout.replica_dir(replica),
            stdout_path: self.layout.stdout_path(replica, cycle),
            stderr_path: self.layout.stderr_path(replica, cycle),
            processes: self.subjob_cores,
            spmd: SpmdMode::Single,
        })
    }

    fn has_completed(&self, replica: ReplicaId, cycle: u64) -> bool {
        // date's only output is its stdout capture
        crate::artifact::file_is_nonempty(&self.layout.stdout_path(replica, cycle))
    }
}
