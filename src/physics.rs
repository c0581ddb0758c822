//! Physics descriptor: what the solver is expected to produce.
//!
//! Derived once from a [`Config`] and read-only afterwards. The descriptor
//! enumerates the zones of the problem and, per zone, the solver kind and the
//! output artifact categories a completed run deposits. Deriving twice from
//! the same configuration yields an identical descriptor.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError};

/// Solver kind, parsed from the `SOLVER` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolverKind {
    Euler,
    NavierStokes,
    Rans,
}

impl SolverKind {
    fn parse(text: &str) -> Option<Self> {
        match text.to_uppercase().as_str() {
            "EULER" => Some(SolverKind::Euler),
            "NAVIER_STOKES" => Some(SolverKind::NavierStokes),
            "RANS" => Some(SolverKind::Rans),
            _ => None,
        }
    }

    /// Artifact categories a successful run of this solver deposits.
    pub fn expected_artifacts(self) -> &'static [ArtifactKind] {
        match self {
            SolverKind::Euler => &[ArtifactKind::History, ArtifactKind::Restart],
            SolverKind::NavierStokes | SolverKind::Rans => &[
                ArtifactKind::History,
                ArtifactKind::Restart,
                ArtifactKind::Surface,
            ],
        }
    }
}

/// A named class of solver output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Per-iteration convergence log (`history.*`).
    History,
    /// Restart / solution file (`restart.*`).
    Restart,
    /// Surface data (`surface.*`).
    Surface,
}

impl ArtifactKind {
    pub fn stem(self) -> &'static str {
        match self {
            ArtifactKind::History => "history",
            ArtifactKind::Restart => "restart",
            ArtifactKind::Surface => "surface",
        }
    }

    /// Filename pattern for this artifact in the given zone.
    ///
    /// Single-zone problems use bare names (`history.dat`); multizone runs
    /// suffix the zone index before the extension (`history_0.dat`). Any
    /// extension and an optional tag after the stem are accepted
    /// (`restart_flow.dat` counts as a restart file).
    pub fn pattern(self, zone: usize, nzones: usize) -> Regex {
        let stem = self.stem();
        let expr = if nzones > 1 {
            format!(r"^{stem}(?:_[A-Za-z]+)?_{zone}\.[A-Za-z0-9]+$")
        } else {
            format!(r"^{stem}(?:_[A-Za-z]+)?\.[A-Za-z0-9]+$")
        };
        // Patterns are built from static stems and an integer; they always compile.
        Regex::new(&expr).unwrap_or_else(|_| unreachable!("artifact pattern {expr}"))
    }
}

/// One zone's slice of the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub index: usize,
    pub solver: SolverKind,
    pub artifacts: Vec<ArtifactKind>,
}

/// Read-only view over a [`Config`]: zones, solvers, expected artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Physics {
    pub zones: Vec<Zone>,
}

impl Physics {
    /// Derive the descriptor from a configuration. Pure; no I/O.
    pub fn derive(config: &Config) -> Result<Self, ConfigError> {
        let solver_text = config
            .get_str("SOLVER")
            .ok_or(ConfigError::Inconsistent {
                key: "SOLVER",
                reason: "key is required".to_string(),
            })?;
        let solver = SolverKind::parse(solver_text).ok_or_else(|| ConfigError::Inconsistent {
            key: "SOLVER",
            reason: format!("unknown solver {solver_text:?}"),
        })?;

        let nzones = config.get_i64_or("NZONES", 1);
        if nzones <= 0 {
            return Err(ConfigError::Inconsistent {
                key: "NZONES",
                reason: format!("must be positive, got {nzones}"),
            });
        }

        let zones = (0..nzones as usize)
            .map(|index| Zone {
                index,
                solver,
                artifacts: solver.expected_artifacts().to_vec(),
            })
            .collect();
        Ok(Physics { zones })
    }

    pub fn nzones(&self) -> usize {
        self.zones.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn euler_config(nzones: i64) -> Config {
        let mut config = Config::new();
        config.set_scalar("SOLVER", "EULER");
        config.set_scalar("NZONES", nzones);
        config
    }

    #[test]
    fn derive_is_deterministic() {
        let config = euler_config(3);
        let first = Physics::derive(&config).expect("derive");
        let second = Physics::derive(&config).expect("derive again");
        assert_eq!(first, second);
    }

    #[test]
    fn euler_expects_history_and_restart() {
        let physics = Physics::derive(&euler_config(1)).expect("derive");
        assert_eq!(physics.nzones(), 1);
        assert_eq!(
            physics.zones[0].artifacts,
            vec![ArtifactKind::History, ArtifactKind::Restart]
        );
    }

    #[test]
    fn viscous_solvers_add_surface_data() {
        let mut config = euler_config(1);
        config.set_scalar("SOLVER", "RANS");
        let physics = Physics::derive(&config).expect("derive");
        assert!(physics.zones[0].artifacts.contains(&ArtifactKind::Surface));
    }

    #[test]
    fn derive_rejects_missing_solver_and_bad_zone_count() {
        let mut config = Config::new();
        config.set_scalar("NZONES", 1);
        assert!(matches!(
            Physics::derive(&config),
            Err(ConfigError::Inconsistent { key: "SOLVER", .. })
        ));

        let config = euler_config(0);
        assert!(matches!(
            Physics::derive(&config),
            Err(ConfigError::Inconsistent { key: "NZONES", .. })
        ));
    }

    #[test]
    fn single_zone_patterns_match_bare_and_tagged_names() {
        let pattern = ArtifactKind::Restart.pattern(0, 1);
        assert!(pattern.is_match("restart.dat"));
        assert!(pattern.is_match("restart_flow.dat"));
        assert!(!pattern.is_match("restart_flow_0.dat"));
        assert!(!pattern.is_match("history.dat"));
    }

    #[test]
    fn multizone_patterns_require_zone_suffix() {
        let pattern = ArtifactKind::History.pattern(1, 2);
        assert!(pattern.is_match("history_1.dat"));
        assert!(pattern.is_match("history_flow_1.csv"));
        assert!(!pattern.is_match("history.dat"));
        assert!(!pattern.is_match("history_0.dat"));
    }
}
