//! Forward-difference gradient evaluation.
//!
//! For every design variable, the workflow asks the run state whether the
//! perturbed results already exist before invoking the solver — reuse is the
//! central cost-avoidance guarantee the state layer exists to provide. Each
//! completed perturbation is committed to the checkpoint immediately, so a
//! killed workflow resumes where it stopped rather than from scratch.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::io::checkpoint;
use crate::io::history::{final_functions, read_history};
use crate::io::probe::find_files;
use crate::io::solver::{Solver, SolverRequest};
use crate::physics::{ArtifactKind, Physics};
use crate::state::RunState;

/// Default forward-difference step when `FIN_DIFF_STEP` is not configured.
pub const DEFAULT_STEP: f64 = 1e-4;

/// Tuning the config file does not carry.
#[derive(Debug, Clone)]
pub struct FindiffOptions {
    /// Wall-clock budget per solver run.
    pub solver_timeout: Duration,
    /// Truncate captured solver output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for FindiffOptions {
    fn default() -> Self {
        Self {
            solver_timeout: Duration::from_secs(24 * 60 * 60),
            output_limit_bytes: 1_000_000,
        }
    }
}

/// Summary of a findiff invocation.
#[derive(Debug)]
pub struct FindiffOutcome {
    /// Final run state, as committed to the checkpoint.
    pub state: RunState,
    /// Solver invocations actually performed.
    pub solver_runs: u32,
    /// Runs satisfied from existing output files or checkpointed values.
    pub reused: u32,
}

/// Evaluate the forward-difference gradient of every configured objective
/// with respect to every design variable.
///
/// `root` is the working directory holding the baseline run; perturbations
/// live under `root/findiff/dv_<i>/`. The state checkpoint at `state_path`
/// is reconciled with the filesystem on entry and committed after the
/// baseline and after each completed perturbation.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn findiff<S: Solver>(
    config: &Config,
    physics: &Physics,
    solver: &S,
    root: &Path,
    state_path: &Path,
    options: &FindiffOptions,
) -> Result<FindiffOutcome> {
    let objectives = config
        .get_list("OBJECTIVE_FUNCTION")
        .ok_or_else(|| anyhow!("OBJECTIVE_FUNCTION is required"))?;
    let dv_values = design_variables(config)?;
    let step = config.get_f64_or("FIN_DIFF_STEP", DEFAULT_STEP);
    if step == 0.0 {
        return Err(anyhow!("FIN_DIFF_STEP must be nonzero"));
    }

    let mut state = checkpoint::load_or_rebuild(state_path, physics, root)
        .with_context(|| format!("load state {}", state_path.display()))?;
    let mut outcome = FindiffOutcome {
        state: RunState::new(),
        solver_runs: 0,
        reused: 0,
    };

    let pending: Vec<usize> = (0..dv_values.len())
        .filter(|dv| !state.gradient_complete(*dv, &objectives))
        .collect();
    if pending.is_empty() {
        info!(ndv = dv_values.len(), "all gradients already recorded");
        outcome.state = state;
        return Ok(outcome);
    }

    let baseline = ensure_baseline(
        config, physics, solver, root, state_path, options, &objectives, &mut state, &mut outcome,
    )?;

    for dv in pending {
        let values = perturbation_functions(
            config, physics, solver, root, options, dv, &dv_values, step, &mut outcome,
        )
        .with_context(|| format!("perturbation of design variable {dv}"))?;

        for name in &objectives {
            let perturbed = *values
                .get(name)
                .ok_or_else(|| anyhow!("objective {name} missing from history of dv {dv}"))?;
            state.record_gradient(dv, name, (perturbed - baseline[name]) / step);
        }
        state = checkpoint::commit(&state, state_path)
            .with_context(|| format!("checkpoint after dv {dv}"))?;
        debug!(dv, "gradient committed");
    }

    outcome.state = state;
    Ok(outcome)
}

/// Obtain baseline function values, preferring checkpointed values, then
/// existing output files, and only then a solver run.
#[allow(clippy::too_many_arguments)]
fn ensure_baseline<S: Solver>(
    config: &Config,
    physics: &Physics,
    solver: &S,
    root: &Path,
    state_path: &Path,
    options: &FindiffOptions,
    objectives: &[String],
    state: &mut RunState,
    outcome: &mut FindiffOutcome,
) -> Result<BTreeMap<String, f64>> {
    if objectives.iter().all(|o| state.functions.contains_key(o)) {
        debug!("baseline functions already recorded");
        return Ok(state.functions.clone());
    }

    if all_artifacts_present(state, physics) {
        info!("reusing baseline results found on disk");
        outcome.reused += 1;
    } else {
        let config_path = root.join("config_cfd.cfg");
        config
            .dump(&config_path)
            .context("dump baseline config")?;
        solver
            .run(&solver_request(config, root, &config_path, options))
            .context("baseline solver run")?;
        outcome.solver_runs += 1;
        find_files(state, physics, root).context("probe after baseline run")?;
    }

    let records = read_history(&history_path(state)?)?;
    let finals = final_functions(&records);
    for name in objectives {
        let value = *finals
            .get(name)
            .ok_or_else(|| anyhow!("objective {name} missing from baseline history"))?;
        state.record_function(name, value);
    }
    state.history = records;
    *state = checkpoint::commit(state, state_path).context("checkpoint baseline")?;
    Ok(state.functions.clone())
}

/// Function values for one perturbed run, reusing on-disk results when the
/// expected artifacts are already present.
#[allow(clippy::too_many_arguments)]
fn perturbation_functions<S: Solver>(
    config: &Config,
    physics: &Physics,
    solver: &S,
    root: &Path,
    options: &FindiffOptions,
    dv: usize,
    dv_values: &[f64],
    step: f64,
    outcome: &mut FindiffOutcome,
) -> Result<BTreeMap<String, f64>> {
    let workdir = root.join("findiff").join(format!("dv_{dv}"));
    fs::create_dir_all(&workdir).with_context(|| format!("create {}", workdir.display()))?;

    let mut pstate = RunState::new();
    find_files(&mut pstate, physics, &workdir)?;
    if all_artifacts_present(&pstate, physics) {
        info!(dv, "reusing existing perturbation results");
        outcome.reused += 1;
    } else {
        let config_path = workdir.join("config_findiff.cfg");
        perturbed_config(config, dv, dv_values, step)
            .dump(&config_path)
            .context("dump perturbed config")?;
        solver.run(&solver_request(config, &workdir, &config_path, options))?;
        outcome.solver_runs += 1;
        pstate = RunState::new();
        find_files(&mut pstate, physics, &workdir)?;
    }

    let records = read_history(&history_path(&pstate)?)?;
    Ok(final_functions(&records))
}

fn design_variables(config: &Config) -> Result<Vec<f64>> {
    let raw = config
        .get_list("DV_VALUE")
        .ok_or_else(|| anyhow!("DV_VALUE is required"))?;
    raw.iter()
        .map(|text| {
            text.parse()
                .with_context(|| format!("DV_VALUE element {text:?} is not a number"))
        })
        .collect()
}

/// Copy of the configuration with design variable `dv` offset by `step`.
fn perturbed_config(config: &Config, dv: usize, dv_values: &[f64], step: f64) -> Config {
    let mut perturbed = config.clone();
    let values = dv_values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            if i == dv {
                format!("{:e}", v + step)
            } else {
                format!("{v:e}")
            }
        })
        .collect();
    perturbed.set_list("DV_VALUE", values);
    perturbed
}

fn solver_request(
    config: &Config,
    workdir: &Path,
    config_path: &Path,
    options: &FindiffOptions,
) -> SolverRequest {
    SolverRequest {
        workdir: workdir.to_path_buf(),
        config_path: config_path.to_path_buf(),
        partitions: config.get_i64_or("NUMBER_PART", 1).max(1) as u32,
        timeout: options.solver_timeout,
        log_path: workdir.join("solver.log"),
        output_limit_bytes: options.output_limit_bytes,
    }
}

fn all_artifacts_present(state: &RunState, physics: &Physics) -> bool {
    physics
        .zones
        .iter()
        .all(|zone| zone.artifacts.iter().all(|kind| state.has_result(zone.index, *kind)))
}

/// The history log results are read from: zone 0's first history file.
fn history_path(state: &RunState) -> Result<PathBuf> {
    state
        .files
        .get(&0)
        .and_then(|by_kind| by_kind.get(&ArtifactKind::History))
        .and_then(|paths| paths.first())
        .cloned()
        .ok_or_else(|| anyhow!("no history file recorded for zone 0"))
}
