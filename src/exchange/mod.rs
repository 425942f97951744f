//! Exchange plug-in contract
//!
//! A scheme implements this trait and nothing else sees its physics. The
//! coordinator guarantees `build_input` and `extract_energies` never run
//! concurrently for the same replica; no guarantee is made across replicas.

use std::collections::HashMap;

use rand::rngs::StdRng;

use crate::config::Config;
use crate::domain::{ReplicaId, ReplicaView, StateId};
use crate::error::{AsyncReError, Result};

mod engine;

pub use engine::{ExchangeEngine, ExchangeReport};

/// Reduced energies u(replica, s) for each state the scheme considers
/// swappable for that replica. "Reduced" means the quantity entering the
/// Metropolis criterion directly.
pub type ReducedEnergies = HashMap<StateId, f64>;

/// How the engine obtains a permutation from the plug-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    /// The engine drives random pair attempts from the extracted energies
    Pairwise,
    /// The plug-in samples a whole permutation from the joint posterior
    Gibbs,
}

/// Scheme contract consumed by the coordinator
pub trait ExchangePlugin: Send + Sync + std::fmt::Debug {
    /// Scheme tag, for logs
    fn name(&self) -> &str;

    /// Validate scheme-specific configuration; fail fast on missing keys
    fn check_input(&self, config: &Config) -> Result<()>;

    /// Materialize the next-cycle input files for a replica at its current
    /// state. Called exactly once before each launch of that (replica,
    /// cycle) and must overwrite deterministically under retry.
    fn build_input(&self, replica: &ReplicaView) -> Result<()>;

    /// Reduced energies for a waiting replica. A replica with nothing to
    /// offer (e.g. no completed cycle yet) returns an empty map and simply
    /// never wins a pair.
    fn extract_energies(&self, replica: &ReplicaView) -> Result<ReducedEnergies>;

    fn mode(&self) -> ExchangeMode {
        ExchangeMode::Pairwise
    }

    /// Full-permutation sampler for Gibbs-mode schemes. The default is an
    /// error so pairwise schemes cannot be mis-declared.
    fn propose_permutation(
        &self,
        snapshot: &[ReplicaView],
        energies: &HashMap<ReplicaId, ReducedEnergies>,
        rng: &mut StdRng,
    ) -> Result<HashMap<ReplicaId, StateId>> {
        let _ = (snapshot, energies, rng);
        Err(AsyncReError::ExchangePlugin(format!(
            "{}: Gibbs mode declared but propose_permutation not implemented",
            self.name()
        )))
    }

    /// Scheme-level completion override for a (replica, cycle); None defers
    /// to the engine adapter's heuristic. Essential after a restart, when
    /// no pilot handle exists.
    fn has_completed(&self, _replica: ReplicaId, _cycle: u64) -> Option<bool> {
        None
    }
}
