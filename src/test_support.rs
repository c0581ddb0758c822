//! Test-only helpers: scripted solver backends and config fixtures.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::Config;
use crate::io::solver::{Solver, SolverError, SolverRequest};

/// Files one scripted solver run deposits into its workdir.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub artifacts: Vec<(String, String)>,
}

impl ScriptedRun {
    /// A run that writes a two-row history log ending at the given values,
    /// plus a restart file (the Euler artifact set).
    pub fn euler(drag: f64, lift: f64) -> Self {
        Self {
            artifacts: vec![
                (
                    "history.dat".to_string(),
                    format!("\"ITER\", \"DRAG\", \"LIFT\"\n1, 1.0, 0.0\n2, {drag}, {lift}\n"),
                ),
                ("restart.dat".to_string(), "restart".to_string()),
            ],
        }
    }
}

/// Solver that replays a queue of scripted runs instead of spawning the CFD
/// executable. Running with an empty queue is a test failure: the workflow
/// invoked the solver when it should have reused existing results.
pub struct ScriptedSolver {
    runs: Mutex<VecDeque<ScriptedRun>>,
    invocations: Mutex<Vec<PathBuf>>,
}

impl ScriptedSolver {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Workdirs the solver was invoked in, in order.
    pub fn invocations(&self) -> Vec<PathBuf> {
        self.invocations.lock().expect("invocations lock").clone()
    }
}

impl Solver for ScriptedSolver {
    fn run(&self, request: &SolverRequest) -> Result<(), SolverError> {
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(request.workdir.clone());
        let Some(run) = self.runs.lock().expect("runs lock").pop_front() else {
            return Err(SolverError::Failed { code: Some(1) });
        };
        for (name, contents) in &run.artifacts {
            fs::write(request.workdir.join(name), contents)?;
        }
        Ok(())
    }
}

/// A minimal single-zone Euler configuration with `ndv` design variables.
pub fn euler_config(objectives: &[&str], ndv: usize, step: f64) -> Config {
    let mut config = Config::new();
    config.set_scalar("SOLVER", "EULER");
    config.set_scalar("NZONES", 1);
    config.set_scalar("NUMBER_PART", 1);
    config.set_list(
        "OBJECTIVE_FUNCTION",
        objectives.iter().map(|o| o.to_string()).collect(),
    );
    config.set_list("DV_VALUE", vec!["0.0".to_string(); ndv]);
    config.set_scalar("FIN_DIFF_STEP", step);
    config
}
