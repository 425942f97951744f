//! Exchange engine
//!
//! Drives one exchange round over the waiting set: snapshot under the
//! store lock, extract energies with the lock released, obtain a state
//! permutation (pairwise Metropolis attempts or a Gibbs proposal from the
//! plug-in), then reacquire the lock and apply only to replicas still
//! waiting at their snapshot cycle.

use std::collections::HashMap;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::{ReplicaId, ReplicaView, StateId};
use crate::error::{AsyncReError, Result};
use crate::exchange::{ExchangeMode, ExchangePlugin, ReducedEnergies};
use crate::store::StatusStore;

/// Outcome of one exchange round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Waiting replicas in the snapshot
    pub participants: usize,
    /// Pair attempts made (1 for a Gibbs proposal)
    pub attempts: usize,
    /// Attempts accepted by the Metropolis criterion
    pub accepted: usize,
    /// Replicas whose state id actually changed
    pub applied: usize,
    /// Snapshot members that transitioned during the unlocked phase
    pub skipped: usize,
}

/// Stateful driver owning the exchange PRNG
pub struct ExchangeEngine {
    rng: StdRng,
    attempts: Option<usize>,
}

impl ExchangeEngine {
    /// A fixed seed reproduces the exchange sequence given identical
    /// energies and waiting sets; attempts defaults to |S| per round.
    pub fn new(seed: Option<u64>, attempts: Option<usize>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, attempts }
    }

    /// Run one exchange round against the store
    pub fn run(
        &mut self,
        store: &StatusStore,
        plugin: &dyn ExchangePlugin,
    ) -> Result<ExchangeReport> {
        let snapshot = store.snapshot_waiting()?;
        if snapshot.len() < 2 {
            debug!("exchange skipped: {} waiting replica(s)", snapshot.len());
            return Ok(ExchangeReport {
                participants: snapshot.len(),
                ..ExchangeReport::default()
            });
        }

        // Lock released: energy extraction may read files
        let mut energies: HashMap<ReplicaId, ReducedEnergies> = HashMap::new();
        for view in &snapshot {
            energies.insert(view.id, plugin.extract_energies(view)?);
        }

        let (permutation, attempts, accepted) = match plugin.mode() {
            ExchangeMode::Pairwise => self.pairwise(&snapshot, &energies),
            ExchangeMode::Gibbs => {
                let permutation = plugin.propose_permutation(&snapshot, &energies, &mut self.rng)?;
                validate_permutation(&snapshot, &permutation)?;
                (permutation, 1, 1)
            }
        };

        let (applied, skipped) = store.apply_permutation(&snapshot, &permutation)?;
        info!(
            "exchange round: {} participants, {}/{} attempts accepted, {} applied, {} skipped",
            snapshot.len(),
            accepted,
            attempts,
            applied,
            skipped
        );
        Ok(ExchangeReport {
            participants: snapshot.len(),
            attempts,
            accepted,
            applied,
            skipped,
        })
    }

    /// Metropolis over random pairs drawn without replacement within one
    /// attempt. Δ = (u_a(s_b) + u_b(s_a)) − (u_a(s_a) + u_b(s_b)); accept
    /// with probability min(1, exp(−Δ)). A pair missing any of the four
    /// energies is not swappable and the attempt is a rejection.
    fn pairwise(
        &mut self,
        snapshot: &[ReplicaView],
        energies: &HashMap<ReplicaId, ReducedEnergies>,
    ) -> (HashMap<ReplicaId, StateId>, usize, usize) {
        let n = snapshot.len();
        let attempts = self.attempts.unwrap_or(n);
        let mut assignment: Vec<StateId> = snapshot.iter().map(|v| v.stateid).collect();
        let mut accepted = 0;

        for _ in 0..attempts {
            let a = self.rng.gen_range(0..n);
            let mut b = self.rng.gen_range(0..n - 1);
            if b >= a {
                b += 1;
            }
            let (sa, sb) = (assignment[a], assignment[b]);
            let ua = &energies[&snapshot[a].id];
            let ub = &energies[&snapshot[b].id];
            let (Some(&ua_sb), Some(&ub_sa), Some(&ua_sa), Some(&ub_sb)) =
                (ua.get(&sb), ub.get(&sa), ua.get(&sa), ub.get(&sb))
            else {
                continue;
            };
            let delta = (ua_sb + ub_sa) - (ua_sa + ub_sb);
            if delta <= 0.0 || self.rng.gen::<f64>() < (-delta).exp() {
                assignment.swap(a, b);
                accepted += 1;
            }
        }

        let permutation = snapshot
            .iter()
            .zip(assignment)
            .map(|(view, state)| (view.id, state))
            .collect();
        (permutation, attempts, accepted)
    }
}

/// A Gibbs proposal must permute exactly the snapshot's states
fn validate_permutation(
    snapshot: &[ReplicaView],
    permutation: &HashMap<ReplicaId, StateId>,
) -> Result<()> {
    if permutation.len() != snapshot.len() {
        return Err(AsyncReError::ExchangePlugin(format!(
            "proposal covers {} replicas, snapshot has {}",
            permutation.len(),
            snapshot.len()
        )));
    }
    let mut before: Vec<StateId> = snapshot.iter().map(|v| v.stateid).collect();
    let mut after: Vec<StateId> = Vec::with_capacity(snapshot.len());
    for view in snapshot {
        match permutation.get(&view.id) {
            Some(&state) => after.push(state),
            None => {
                return Err(AsyncReError::ExchangePlugin(format!(
                    "proposal is missing replica {}",
                    view.id
                )))
            }
        }
    }
    before.sort_unstable();
    after.sort_unstable();
    if before != after {
        return Err(AsyncReError::ExchangePlugin(
            "proposal is not a permutation of the snapshot states".to_string(),
        ));
    }
    Ok(())
}
