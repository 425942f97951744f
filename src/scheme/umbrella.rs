//! Umbrella sampling exchange scheme
//!
//! States are harmonic biases u_s(x) = beta * sum_d k_sd (x_d - c_sd)^2 on
//! a reaction coordinate. All replicas run at one temperature, so state
//! differences involve only the bias terms and the reduced energy of a
//! replica in any candidate state follows from its latest restraint trace.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use log::debug;

use crate::artifact::CycleLayout;
use crate::config::Config;
use crate::domain::{ReplicaId, ReplicaView};
use crate::error::{AsyncReError, Result};
use crate::exchange::{ExchangePlugin, ReducedEnergies};
use crate::scheme::render_template;

/// Extension of the per-cycle restraint coordinate trace
const TRACE_EXT: &str = "trace";

/// One umbrella state: bias center and force constant per dimension
#[derive(Debug, Clone, PartialEq)]
pub struct BiasState {
    pub centers: Vec<f64>,
    pub force_constants: Vec<f64>,
}

#[derive(Debug)]
pub struct UmbrellaExchange {
    layout: CycleLayout,
    beta: f64,
    states: Vec<BiasState>,
    template_path: PathBuf,
}

impl UmbrellaExchange {
    pub fn from_config(config: &Config, layout: &CycleLayout) -> Result<Self> {
        let beta = config.scheme_f64("BETA")?;
        if beta <= 0.0 {
            return Err(AsyncReError::Config("SCHEME.BETA must be positive".to_string()));
        }
        let centers = parse_state_params(&config.scheme_str("BIAS_POSITIONS")?)
            .map_err(|e| AsyncReError::Config(format!("SCHEME.BIAS_POSITIONS: {}", e)))?;
        let force_constants = parse_state_params(&config.scheme_str("FORCE_CONSTANTS")?)
            .map_err(|e| AsyncReError::Config(format!("SCHEME.FORCE_CONSTANTS: {}", e)))?;
        if centers.len() != force_constants.len() {
            return Err(AsyncReError::Config(format!(
                "{} BIAS_POSITIONS but {} FORCE_CONSTANTS",
                centers.len(),
                force_constants.len()
            )));
        }
        let states: Vec<BiasState> = centers
            .into_iter()
            .zip(force_constants)
            .map(|(centers, force_constants)| BiasState {
                centers,
                force_constants,
            })
            .collect();
        for (sid, state) in states.iter().enumerate() {
            if state.centers.len() != state.force_constants.len() {
                return Err(AsyncReError::Config(format!(
                    "state {}: {} bias dimensions but {} force constants",
                    sid,
                    state.centers.len(),
                    state.force_constants.len()
                )));
            }
        }
        let template_path = match config.scheme.get("TEMPLATE") {
            Some(_) => layout.root().join(config.scheme_str("TEMPLATE")?),
            None => layout.root().join(format!("{}.tmpl", layout.basename())),
        };
        Ok(Self {
            layout: layout.clone(),
            beta,
            states,
            template_path,
        })
    }

    pub fn nstates(&self) -> usize {
        self.states.len()
    }

    /// Restraint coordinates from the last completed cycle, or None when
    /// the replica has not completed one yet
    fn read_coordinates(&self, replica: ReplicaId, cycle: u64) -> Result<Option<Vec<f64>>> {
        if cycle == 0 {
            return Ok(None);
        }
        let path = self.layout.cycle_file(replica, cycle, TRACE_EXT);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Ok(None),
        };
        let ndim = self.states[0].centers.len();
        let last_line = content
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
            .next_back()
            .ok_or_else(|| {
                AsyncReError::ExchangePlugin(format!("empty trace file {}", path.display()))
            })?;
        let tokens: Vec<f64> = last_line
            .split_whitespace()
            .map(|t| t.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| {
                AsyncReError::ExchangePlugin(format!("bad trace line in {}: {}", path.display(), e))
            })?;
        if tokens.len() < ndim {
            return Err(AsyncReError::ExchangePlugin(format!(
                "trace line in {} has {} columns, need {}",
                path.display(),
                tokens.len(),
                ndim
            )));
        }
        // Engines prepend a step index; the coordinates are the last ndim columns
        Ok(Some(tokens[tokens.len() - ndim..].to_vec()))
    }
}

impl ExchangePlugin for UmbrellaExchange {
    fn name(&self) -> &str {
        "umbrella"
    }

    fn check_input(&self, _config: &Config) -> Result<()> {
        if !self.template_path.is_file() {
            return Err(AsyncReError::Config(format!(
                "restraint template not found: {}",
                self.template_path.display()
            )));
        }
        Ok(())
    }

    fn build_input(&self, replica: &ReplicaView) -> Result<()> {
        let state = self.states.get(replica.stateid).ok_or_else(|| {
            AsyncReError::ExchangePlugin(format!("no umbrella state {}", replica.stateid))
        })?;
        let template = fs::read_to_string(&self.template_path)?;
        let values: HashMap<&str, String> = [
            ("BASENAME", self.layout.basename().to_string()),
            ("REPLICA", replica.id.to_string()),
            ("STATE", replica.stateid.to_string()),
            ("CYCLE", replica.cycle.to_string()),
            ("CENTER", join_floats(&state.centers)),
            ("FORCE", join_floats(&state.force_constants)),
        ]
        .into_iter()
        .collect();
        let rendered = render_template(&template, &values)?;
        let path = self.layout.cycle_file(replica.id, replica.cycle, "in");
        fs::write(&path, rendered)?;
        debug!(
            "built input for replica {} state {} cycle {}",
            replica.id, replica.stateid, replica.cycle
        );
        Ok(())
    }

    fn extract_energies(&self, replica: &ReplicaView) -> Result<ReducedEnergies> {
        let Some(coords) = self.read_coordinates(replica.id, replica.cycle - 1)? else {
            return Ok(ReducedEnergies::new());
        };
        let mut energies = ReducedEnergies::new();
        for (sid, state) in self.states.iter().enumerate() {
            let bias: f64 = coords
                .iter()
                .zip(state.centers.iter().zip(&state.force_constants))
                .map(|(x, (c, k))| k * (x - c) * (x - c))
                .sum();
            energies.insert(sid, self.beta * bias);
        }
        Ok(energies)
    }

    fn has_completed(&self, replica: ReplicaId, cycle: u64) -> Option<bool> {
        Some(self.layout.has_artifact(replica, cycle, TRACE_EXT))
    }
}

/// Parse the original delimited state-parameter format: states separated by
/// ':', dimensions by ','. A bare comma list is a set of 1-D states.
fn parse_state_params(line: &str) -> std::result::Result<Vec<Vec<f64>>, String> {
    let parse_one = |token: &str| {
        token
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("not a number: {}", token.trim()))
    };
    let params: Vec<Vec<f64>> = if line.contains(':') {
        line.split(':')
            .map(|state| state.split(',').map(parse_one).collect())
            .collect::<std::result::Result<_, _>>()?
    } else {
        line.split(',')
            .map(|token| parse_one(token).map(|v| vec![v]))
            .collect::<std::result::Result<_, _>>()?
    };
    if params.is_empty() || params.iter().any(|p| p.is_empty()) {
        return Err("empty parameter list".to_string());
    }
    Ok(params)
}

fn join_floats(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn umbrella_config(extra_scheme: &str) -> Config {
        let yaml = format!(
            "\
ENGINE: SANDER
RE_TYPE: UMBRELLA
ENGINE_INPUT_BASENAME: us
WALL_TIME: 10
SCHEME:
  BETA: 2.0
  BIAS_POSITIONS: \"0.0:1.0\"
  FORCE_CONSTANTS: \"3.0:3.0\"
{}",
            extra_scheme
        );
        Config::from_str(&yaml).unwrap()
    }

    fn scheme_in(temp: &TempDir) -> UmbrellaExchange {
        let layout = CycleLayout::new(temp.path(), "us");
        UmbrellaExchange::from_config(&umbrella_config(""), &layout).unwrap()
    }

    #[test]
    fn test_parse_one_dimensional_states() {
        assert_eq!(
            parse_state_params("1.0,2.0,3.0").unwrap(),
            vec![vec![1.0], vec![2.0], vec![3.0]]
        );
    }

    #[test]
    fn test_parse_multi_dimensional_states() {
        assert_eq!(
            parse_state_params("1.0,1.0:1.0,2.0").unwrap(),
            vec![vec![1.0, 1.0], vec![1.0, 2.0]]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_state_params("1.0,abc").is_err());
    }

    #[test]
    fn test_from_config_counts_must_match() {
        let temp = TempDir::new().unwrap();
        let layout = CycleLayout::new(temp.path(), "us");
        let yaml = "\
ENGINE: SANDER
RE_TYPE: UMBRELLA
ENGINE_INPUT_BASENAME: us
WALL_TIME: 10
SCHEME:
  BETA: 2.0
  BIAS_POSITIONS: \"0.0:1.0:2.0\"
  FORCE_CONSTANTS: \"3.0:3.0\"
";
        let config = Config::from_str(yaml).unwrap();
        let err = UmbrellaExchange::from_config(&config, &layout).unwrap_err();
        assert!(matches!(err, AsyncReError::Config(_)));
    }

    #[test]
    fn test_missing_beta_fails_fast() {
        let temp = TempDir::new().unwrap();
        let layout = CycleLayout::new(temp.path(), "us");
        let yaml = "\
ENGINE: SANDER
RE_TYPE: UMBRELLA
ENGINE_INPUT_BASENAME: us
WALL_TIME: 10
SCHEME:
  BIAS_POSITIONS: \"0.0:1.0\"
  FORCE_CONSTANTS: \"3.0:3.0\"
";
        let config = Config::from_str(yaml).unwrap();
        let err = UmbrellaExchange::from_config(&config, &layout).unwrap_err();
        assert!(err.to_string().contains("BETA"));
    }

    #[test]
    fn test_check_input_requires_template() {
        let temp = TempDir::new().unwrap();
        let scheme = scheme_in(&temp);
        let config = umbrella_config("");
        assert!(scheme.check_input(&config).is_err());

        fs::write(temp.path().join("us.tmpl"), "r0={CENTER} k={FORCE}\n").unwrap();
        assert!(scheme.check_input(&config).is_ok());
    }

    #[test]
    fn test_build_input_renders_state_params() {
        let temp = TempDir::new().unwrap();
        let scheme = scheme_in(&temp);
        let layout = CycleLayout::new(temp.path(), "us");
        fs::create_dir_all(layout.replica_dir(1)).unwrap();
        fs::write(
            temp.path().join("us.tmpl"),
            "title replica {REPLICA} cycle {CYCLE}\nr0={CENTER} k={FORCE}\n",
        )
        .unwrap();

        let view = ReplicaView {
            id: 1,
            stateid: 1,
            cycle: 3,
        };
        scheme.build_input(&view).unwrap();
        let input = fs::read_to_string(layout.cycle_file(1, 3, "in")).unwrap();
        assert_eq!(input, "title replica 1 cycle 3\nr0=1 k=3\n");

        // Idempotent under retry
        scheme.build_input(&view).unwrap();
        let again = fs::read_to_string(layout.cycle_file(1, 3, "in")).unwrap();
        assert_eq!(input, again);
    }

    #[test]
    fn test_build_input_unresolved_placeholder_fatal() {
        let temp = TempDir::new().unwrap();
        let scheme = scheme_in(&temp);
        let layout = CycleLayout::new(temp.path(), "us");
        fs::create_dir_all(layout.replica_dir(0)).unwrap();
        fs::write(temp.path().join("us.tmpl"), "bad {LAMBDA}\n").unwrap();

        let view = ReplicaView {
            id: 0,
            stateid: 0,
            cycle: 1,
        };
        let err = scheme.build_input(&view).unwrap_err();
        assert!(matches!(err, AsyncReError::Template(_)));
    }

    #[test]
    fn test_energies_empty_before_first_completed_cycle() {
        let temp = TempDir::new().unwrap();
        let scheme = scheme_in(&temp);
        let view = ReplicaView {
            id: 0,
            stateid: 0,
            cycle: 1,
        };
        assert!(scheme.extract_energies(&view).unwrap().is_empty());
    }

    #[test]
    fn test_energies_from_trace() {
        let temp = TempDir::new().unwrap();
        let scheme = scheme_in(&temp);
        let layout = CycleLayout::new(temp.path(), "us");
        fs::create_dir_all(layout.replica_dir(0)).unwrap();
        // Step index column then the coordinate; last line wins
        fs::write(
            layout.cycle_file(0, 2, "trace"),
            "# restraint trace\n100 0.2\n200 0.5\n",
        )
        .unwrap();

        let view = ReplicaView {
            id: 0,
            stateid: 0,
            cycle: 3,
        };
        let energies = scheme.extract_energies(&view).unwrap();
        // beta=2, k=3: state 0 center 0.0 -> 2*3*0.25 = 1.5; state 1 center 1.0 -> 2*3*0.25 = 1.5
        assert_eq!(energies.len(), 2);
        assert!((energies[&0] - 1.5).abs() < 1e-12);
        assert!((energies[&1] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_corrupt_trace_is_plugin_error() {
        let temp = TempDir::new().unwrap();
        let scheme = scheme_in(&temp);
        let layout = CycleLayout::new(temp.path(), "us");
        fs::create_dir_all(layout.replica_dir(0)).unwrap();
        fs::write(layout.cycle_file(0, 1, "trace"), "not numbers\n").unwrap();

        let view = ReplicaView {
            id: 0,
            stateid: 0,
            cycle: 2,
        };
        let err = scheme.extract_energies(&view).unwrap_err();
        assert!(matches!(err, AsyncReError::ExchangePlugin(_)));
    }

    #[test]
    fn test_completion_override_tracks_trace() {
        let temp = TempDir::new().unwrap();
        let scheme = scheme_in(&temp);
        let layout = CycleLayout::new(temp.path(), "us");
        fs::create_dir_all(layout.replica_dir(0)).unwrap();

        assert_eq!(scheme.has_completed(0, 1), Some(false));
        fs::write(layout.cycle_file(0, 1, "trace"), "0 0.1\n").unwrap();
        assert_eq!(scheme.has_completed(0, 1), Some(true));
    }
}
