//! Filesystem probe: populate a run state from artifacts already on disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::physics::Physics;
use crate::state::RunState;

#[derive(Debug, Error)]
#[error("probe directory {}: {source}", path.display())]
pub struct ProbeError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Probe `root` for the artifacts the physics descriptor expects and insert
/// what is found into the state's FILES section.
///
/// Absent artifacts are the normal "nothing computed yet" case and are not an
/// error; only an inaccessible `root` fails. Paths come from the directory
/// listing itself, so the state never claims a file that did not exist at
/// probe time.
pub fn find_files(state: &mut RunState, physics: &Physics, root: &Path) -> Result<(), ProbeError> {
    debug!(root = %root.display(), nzones = physics.nzones(), "probing for solver artifacts");

    let mut names: Vec<(String, PathBuf)> = Vec::new();
    let entries = fs::read_dir(root).map_err(|source| ProbeError {
        path: root.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ProbeError {
            path: root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file()
            && let Some(name) = entry.file_name().into_string().ok()
        {
            names.push((name, path));
        }
    }
    // Directory order is filesystem-dependent; sort for deterministic FILES.
    names.sort();

    let nzones = physics.nzones();
    for zone in &physics.zones {
        for kind in &zone.artifacts {
            let pattern = kind.pattern(zone.index, nzones);
            let found: Vec<PathBuf> = names
                .iter()
                .filter(|(name, _)| pattern.is_match(name))
                .map(|(_, path)| path.clone())
                .collect();
            if !found.is_empty() {
                debug!(zone = zone.index, kind = ?kind, count = found.len(), "artifacts found");
                state.insert_files(zone.index, *kind, found);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::physics::ArtifactKind;

    fn physics(solver: &str, nzones: i64) -> Physics {
        let mut config = Config::new();
        config.set_scalar("SOLVER", solver);
        config.set_scalar("NZONES", nzones);
        Physics::derive(&config).expect("derive")
    }

    /// Fresh probe of an empty directory yields an empty FILES section; after
    /// the solver deposits its outputs, a second probe finds them.
    #[test]
    fn probe_before_and_after_solver_outputs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let physics = physics("EULER", 1);

        let mut state = RunState::new();
        find_files(&mut state, &physics, temp.path()).expect("probe empty dir");
        assert!(state.files.is_empty());

        fs::write(temp.path().join("history.dat"), "\"ITER\"\n1\n").expect("write history");
        fs::write(temp.path().join("restart.dat"), "binary").expect("write restart");

        let mut state = RunState::new();
        find_files(&mut state, &physics, temp.path()).expect("probe again");
        assert_eq!(
            state.files[&0][&ArtifactKind::History],
            vec![temp.path().join("history.dat")]
        );
        assert_eq!(
            state.files[&0][&ArtifactKind::Restart],
            vec![temp.path().join("restart.dat")]
        );
    }

    #[test]
    fn probe_matches_only_its_zone_in_multizone_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("history_0.dat"), "h0").expect("write");
        fs::write(temp.path().join("history_1.dat"), "h1").expect("write");
        fs::write(temp.path().join("unrelated.dat"), "x").expect("write");

        let mut state = RunState::new();
        find_files(&mut state, &physics("EULER", 2), temp.path()).expect("probe");

        assert_eq!(
            state.files[&0][&ArtifactKind::History],
            vec![temp.path().join("history_0.dat")]
        );
        assert_eq!(
            state.files[&1][&ArtifactKind::History],
            vec![temp.path().join("history_1.dat")]
        );
    }

    #[test]
    fn probe_of_inaccessible_root_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut state = RunState::new();
        let err = find_files(&mut state, &physics("EULER", 1), &temp.path().join("nope"))
            .unwrap_err();
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn probe_ignores_directories_with_matching_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("history.dat")).expect("mkdir");

        let mut state = RunState::new();
        find_files(&mut state, &physics("EULER", 1), temp.path()).expect("probe");
        assert!(!state.has_result(0, ArtifactKind::History));
    }
}
