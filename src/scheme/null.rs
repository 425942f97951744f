//! Null exchange scheme
//!
//! Zero reduced energy everywhere, so every pairwise attempt has delta 0
//! and accepts. Pairs with the trivial date engine for end-to-end smoke
//! runs of the scheduling machinery.

use crate::config::Config;
use crate::domain::ReplicaView;
use crate::error::Result;
use crate::exchange::{ExchangePlugin, ReducedEnergies};

#[derive(Debug)]
pub struct NullExchange {
    nstates: usize,
}

impl NullExchange {
    pub fn new(nstates: usize) -> Self {
        Self { nstates }
    }
}

impl ExchangePlugin for NullExchange {
    fn name(&self) -> &str {
        "null"
    }

    fn check_input(&self, _config: &Config) -> Result<()> {
        Ok(())
    }

    fn build_input(&self, _replica: &ReplicaView) -> Result<()> {
        // The date engine consumes no input files
        Ok(())
    }

    fn extract_energies(&self, _replica: &ReplicaView) -> Result<ReducedEnergies> {
        Ok((0..self.nstates).map(|s| (s, 0.0)).collect())
    }
}
