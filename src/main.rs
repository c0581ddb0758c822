//! Finite-difference gradient computation using an external CFD solver.
//!
//! Reads a solver configuration, probes the working directory for results
//! that already exist, and runs only the perturbed simulations that are
//! still missing, checkpointing progress in `state.json` along the way.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use findiff::config::Config;
use findiff::exit_codes;
use findiff::gradients::{self, FindiffOptions};
use findiff::io::lock::LockError;
use findiff::io::solver::{CommandSolver, SolverError};
use findiff::logging;
use findiff::physics::Physics;

#[derive(Parser)]
#[command(
    name = "findiff",
    version,
    about = "Finite-difference gradient workflow runner for external CFD solvers"
)]
struct Cli {
    /// Read config from FILE.
    #[arg(short = 'f', long = "file")]
    filename: PathBuf,

    /// Number of MPI partitions.
    #[arg(short = 'n', long = "partitions", default_value_t = 1)]
    partitions: u32,

    /// Number of zones.
    #[arg(short = 'z', long = "zones", default_value_t = 1)]
    zones: u32,

    /// Concise console output in the solver log files.
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Solver executable to invoke.
    #[arg(long = "solver", default_value = "SU2_CFD")]
    solver: String,
}

fn main() -> ExitCode {
    logging::init();
    match run() {
        Ok(()) => ExitCode::from(exit_codes::OK as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(classify(&err) as u8)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.filename)
        .with_context(|| format!("load config {}", cli.filename.display()))?;
    config.apply_overrides(cli.partitions, cli.zones, cli.quiet);
    let physics = Physics::derive(&config)?;

    let root = cli
        .filename
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let state_path = root.join("state.json");
    let solver = CommandSolver::new(cli.solver);

    let outcome = gradients::findiff(
        &config,
        &physics,
        &solver,
        &root,
        &state_path,
        &FindiffOptions::default(),
    )?;

    println!(
        "# {} solver run(s), {} reused",
        outcome.solver_runs, outcome.reused
    );
    println!("# {:<6} {:<24} {:>16}", "dv", "function", "gradient");
    for (dv, entry) in &outcome.state.gradients {
        for (name, value) in entry {
            println!("  {dv:<6} {name:<24} {value:>16.10e}");
        }
    }
    Ok(())
}

/// Map the error chain onto a stable exit code.
fn classify(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.downcast_ref::<SolverError>().is_some() {
            return exit_codes::SOLVER_FAILED;
        }
        if matches!(cause.downcast_ref::<LockError>(), Some(LockError::Timeout { .. })) {
            return exit_codes::LOCK_TIMEOUT;
        }
    }
    exit_codes::INVALID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["findiff", "-f", "inv_NACA0012.cfg"]);
        assert_eq!(cli.partitions, 1);
        assert_eq!(cli.zones, 1);
        assert!(!cli.quiet);
        assert_eq!(cli.solver, "SU2_CFD");
    }

    #[test]
    fn parse_overrides() {
        let cli = Cli::parse_from(["findiff", "-f", "case.cfg", "-n", "8", "-z", "2", "-q"]);
        assert_eq!(cli.partitions, 8);
        assert_eq!(cli.zones, 2);
        assert!(cli.quiet);
    }

    #[test]
    fn solver_failures_classify_to_their_exit_code() {
        let err = anyhow::Error::from(SolverError::Failed { code: Some(2) }).context("wrapped");
        assert_eq!(classify(&err), exit_codes::SOLVER_FAILED);

        let err = anyhow::Error::from(LockError::Timeout {
            path: PathBuf::from("state.json.lock"),
            timeout: std::time::Duration::from_secs(1),
        });
        assert_eq!(classify(&err), exit_codes::LOCK_TIMEOUT);

        let err = anyhow::anyhow!("bad config");
        assert_eq!(classify(&err), exit_codes::INVALID);
    }
}
