//! Bundled exchange schemes
//!
//! The RE_TYPE tag selects one scheme; the registry also resolves the
//! replica count, which some schemes derive from their own state tables.

mod null;
mod template;
mod umbrella;

pub use null::NullExchange;
pub use template::render_template;
pub use umbrella::UmbrellaExchange;

use crate::artifact::CycleLayout;
use crate::config::Config;
use crate::error::{AsyncReError, Result};
use crate::exchange::ExchangePlugin;

/// Resolve the plug-in for the configured RE_TYPE along with the replica
/// count it implies
pub fn create_scheme(
    config: &Config,
    layout: &CycleLayout,
) -> Result<(Box<dyn ExchangePlugin>, usize)> {
    let tag = config.re_type.to_uppercase();
    match tag.as_str() {
        "NULL" | "DATE" => {
            let nreplicas = config.nreplicas.ok_or_else(|| {
                AsyncReError::Config(format!(
                    "NREPLICAS needs to be specified for RE_TYPE {}",
                    tag
                ))
            })?;
            Ok((Box::new(NullExchange::new(nreplicas)), nreplicas))
        }
        "UMBRELLA" | "AMBER-US" => {
            let scheme = UmbrellaExchange::from_config(config, layout)?;
            let nreplicas = scheme.nstates();
            if let Some(configured) = config.nreplicas {
                if configured != nreplicas {
                    return Err(AsyncReError::Config(format!(
                        "NREPLICAS is {} but SCHEME defines {} umbrella states",
                        configured, nreplicas
                    )));
                }
            }
            Ok((Box::new(scheme), nreplicas))
        }
        other => Err(AsyncReError::Config(format!(
            "requested RE_TYPE ({}) is either invalid or not currently supported",
            other
        ))),
    }
}
