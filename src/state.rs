//! Run state: the record of what has already been computed.
//!
//! A [`RunState`] is the hierarchical bookkeeping for one configuration:
//! which output files exist per zone, the convergence history, current
//! function values, and per-design-variable gradients. Construction is pure;
//! filesystem-dependent population lives in [`crate::io::probe::find_files`]
//! so the state model is testable without I/O.
//!
//! Cooperating processes never share memory; each reads the latest
//! checkpoint, computes a delta, and writes back a [`merged`](RunState::merge)
//! result under the state-file lock. Updates therefore have to be mergeable
//! rather than ordered, which is why `merge` is right-biased, associative,
//! and idempotent.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::physics::ArtifactKind;

/// One per-iteration row of named scalars from the solver's history log.
pub type HistoryRecord = BTreeMap<String, f64>;

/// Persistent record of computed results for one configuration.
///
/// Every section defaults to empty so a checkpoint written before a section
/// existed still loads (forward compatibility).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    /// Per zone, per artifact category: the files found on disk, in sorted
    /// order. A path is inserted only if it existed at probe time.
    pub files: BTreeMap<usize, BTreeMap<ArtifactKind, Vec<PathBuf>>>,
    /// Convergence history of the baseline run.
    pub history: Vec<HistoryRecord>,
    /// Current objective/constraint values by name.
    pub functions: BTreeMap<String, f64>,
    /// Per design-variable index: derivative value by function name.
    pub gradients: BTreeMap<usize, BTreeMap<String, f64>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether at least one file of this category was found for the zone.
    pub fn has_result(&self, zone: usize, kind: ArtifactKind) -> bool {
        self.files
            .get(&zone)
            .and_then(|by_kind| by_kind.get(&kind))
            .is_some_and(|paths| !paths.is_empty())
    }

    pub fn insert_files(&mut self, zone: usize, kind: ArtifactKind, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        self.files.entry(zone).or_default().insert(kind, paths);
    }

    /// Insert or overwrite a function value. Re-recording is allowed
    /// (re-run or refinement) and leaves unrelated entries untouched.
    pub fn record_function(&mut self, name: &str, value: f64) {
        self.functions.insert(name.to_string(), value);
    }

    /// Insert or overwrite one (design variable, function) derivative.
    pub fn record_gradient(&mut self, dv_index: usize, name: &str, value: f64) {
        self.gradients
            .entry(dv_index)
            .or_default()
            .insert(name.to_string(), value);
    }

    /// A gradient entry is complete once every named function has a recorded
    /// derivative; anything less is a partial entry from an interrupted run.
    pub fn gradient_complete(&self, dv_index: usize, functions: &[String]) -> bool {
        match self.gradients.get(&dv_index) {
            Some(entry) => functions.iter().all(|name| entry.contains_key(name)),
            None => functions.is_empty(),
        }
    }

    /// Right-biased merge: entries in `other` override ours.
    ///
    /// Map sections merge key-wise; list-valued leaves (file lists, history)
    /// are taken wholesale from `other` when present there. The operation is
    /// associative and idempotent so repeated resume attempts are safe.
    pub fn merge(&self, other: &RunState) -> RunState {
        let mut result = self.clone();

        for (zone, by_kind) in &other.files {
            let target = result.files.entry(*zone).or_default();
            for (kind, paths) in by_kind {
                target.insert(*kind, paths.clone());
            }
        }

        if !other.history.is_empty() {
            result.history = other.history.clone();
        }

        for (name, value) in &other.functions {
            result.functions.insert(name.clone(), *value);
        }

        for (dv, entry) in &other.gradients {
            let target = result.gradients.entry(*dv).or_default();
            for (name, value) in entry {
                target.insert(name.clone(), *value);
            }
        }

        result
    }
}
