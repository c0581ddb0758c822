//! Run-state persistence (`state.json` checkpoint).
//!
//! Saves and loads are guarded by the lock keyed on the checkpoint path and
//! write atomically (temp file + rename), so a concurrent reader never
//! observes a partially written checkpoint. The checkpoint is a cache: when
//! it is missing or corrupt, [`load_or_rebuild`] falls back to re-probing the
//! filesystem, which is the ground truth.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::io::lock::{self, LockError};
use crate::io::probe::{self, ProbeError};
use crate::physics::Physics;
use crate::state::RunState;

/// How long checkpoint operations wait for the state-file lock. Critical
/// sections are short (read/modify/persist, never a solver run), so
/// contention beyond this means a stale lock or a wedged process.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no checkpoint at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("corrupt checkpoint {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint io {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Atomically persist the run state, guarded by the lock on `path`.
pub fn save(state: &RunState, path: &Path) -> Result<(), StateError> {
    let mut guard = lock::acquire(path, LOCK_TIMEOUT)?;
    let result = write_atomic(state, path);
    guard.release();
    result
}

/// Read-merge-write under a single lock hold.
///
/// Racing processes serialize through the lock; each one loads the latest
/// checkpoint, merges its own state over it, and writes the result
/// atomically, so no process's recorded values are lost regardless of which
/// one wins the race. A corrupt checkpoint is treated as empty rather than
/// failing the commit (the filesystem, not the checkpoint, is ground truth).
pub fn commit(state: &RunState, path: &Path) -> Result<RunState, StateError> {
    let mut guard = lock::acquire(path, LOCK_TIMEOUT)?;
    let result = commit_locked(state, path);
    guard.release();
    result
}

fn commit_locked(state: &RunState, path: &Path) -> Result<RunState, StateError> {
    let base = match read(path) {
        Ok(existing) => existing,
        Err(StateError::NotFound { .. }) => RunState::new(),
        Err(StateError::Corrupt { path, source }) => {
            warn!(path = %path.display(), err = %source, "corrupt checkpoint, overwriting");
            RunState::new()
        }
        Err(err) => return Err(err),
    };
    let merged = base.merge(state);
    write_atomic(&merged, path)?;
    Ok(merged)
}

/// Load the run state, guarded by the lock on `path`.
///
/// Absence is [`StateError::NotFound`]; callers decide whether that means
/// "start fresh" or is itself an error.
pub fn load(path: &Path) -> Result<RunState, StateError> {
    let mut guard = lock::acquire(path, LOCK_TIMEOUT)?;
    let result = read(path);
    guard.release();
    result
}

/// Load the checkpoint and reconcile it with a fresh filesystem probe.
///
/// A missing or corrupt checkpoint degrades to an empty state rather than
/// failing, and the probed FILES section is merged over whatever loaded so
/// the result always reflects what is actually on disk. Function and
/// gradient values survive from the checkpoint (the probe never writes
/// those sections).
pub fn load_or_rebuild(
    path: &Path,
    physics: &Physics,
    root: &Path,
) -> Result<RunState, StateError> {
    let mut loaded = match load(path) {
        Ok(state) => state,
        Err(StateError::NotFound { .. }) => {
            debug!(path = %path.display(), "no checkpoint, starting fresh");
            RunState::new()
        }
        Err(StateError::Corrupt { path, source }) => {
            warn!(path = %path.display(), err = %source, "corrupt checkpoint, rebuilding from disk");
            RunState::new()
        }
        Err(err) => return Err(err),
    };

    // The checkpoint may claim files deleted since it was written; only the
    // probe is allowed to populate FILES.
    loaded.files.clear();
    let mut probed = RunState::new();
    probe::find_files(&mut probed, physics, root)?;
    Ok(loaded.merge(&probed))
}

fn read(path: &Path) -> Result<RunState, StateError> {
    debug!(path = %path.display(), "loading checkpoint");
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(StateError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&contents).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomic(state: &RunState, path: &Path) -> Result<(), StateError> {
    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };

    debug!(path = %path.display(), "writing checkpoint");
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut buf = serde_json::to_string_pretty(state).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::physics::ArtifactKind;

    fn euler_physics() -> Physics {
        let mut config = Config::new();
        config.set_scalar("SOLVER", "EULER");
        config.set_scalar("NZONES", 1);
        Physics::derive(&config).expect("derive")
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let mut state = RunState::new();
        state.record_function("DRAG", 0.021);
        state.record_gradient(2, "DRAG", -3.0e-4);

        save(&state, &path).expect("save");
        let loaded = load(&path).expect("load");
        assert_eq!(loaded, state);
    }

    /// Two processes recording different deltas both survive a pair of
    /// commits, whichever order they land in.
    #[test]
    fn sequential_commits_preserve_both_deltas() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");

        let mut first = RunState::new();
        first.record_gradient(0, "DRAG", 1.0e-3);
        let mut second = RunState::new();
        second.record_gradient(1, "DRAG", -2.0e-3);

        commit(&first, &path).expect("commit first");
        let merged = commit(&second, &path).expect("commit second");

        assert_eq!(merged.gradients[&0]["DRAG"], 1.0e-3);
        assert_eq!(merged.gradients[&1]["DRAG"], -2.0e-3);
        assert_eq!(load(&path).expect("load"), merged);
    }

    #[test]
    fn load_of_missing_checkpoint_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load(&temp.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, StateError::NotFound { .. }));
    }

    #[test]
    fn load_of_garbage_is_corrupt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(&path, "not json{").expect("write garbage");

        let err = load(&path).unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    /// A checkpoint written before a section existed must still load, with
    /// that section empty.
    #[test]
    fn load_tolerates_missing_optional_sections() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(&path, "{\n  \"functions\": { \"DRAG\": 0.02 }\n}\n").expect("write old schema");

        let loaded = load(&path).expect("load");
        assert_eq!(loaded.functions["DRAG"], 0.02);
        assert!(loaded.files.is_empty());
        assert!(loaded.history.is_empty());
        assert!(loaded.gradients.is_empty());
    }

    #[test]
    fn rebuild_falls_back_to_probe_on_corrupt_checkpoint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(&path, "garbage").expect("write garbage");
        fs::write(temp.path().join("history.dat"), "\"ITER\"\n1\n").expect("write artifact");

        let state = load_or_rebuild(&path, &euler_physics(), temp.path()).expect("rebuild");
        assert!(state.has_result(0, ArtifactKind::History));
        assert!(state.functions.is_empty());
    }

    #[test]
    fn rebuild_keeps_checkpoint_values_and_refreshes_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let mut state = RunState::new();
        state.record_function("DRAG", 0.021);
        // Claimed file that no longer exists on disk.
        state.insert_files(0, ArtifactKind::Restart, vec![temp.path().join("restart.dat")]);
        save(&state, &path).expect("save");
        fs::write(temp.path().join("history.dat"), "\"ITER\"\n1\n").expect("write artifact");

        let rebuilt = load_or_rebuild(&path, &euler_physics(), temp.path()).expect("rebuild");
        assert_eq!(rebuilt.functions["DRAG"], 0.021);
        assert!(rebuilt.has_result(0, ArtifactKind::History));
        assert!(!rebuilt.has_result(0, ArtifactKind::Restart));
    }
}
