//! External solver invocation.
//!
//! The [`Solver`] trait decouples the gradient workflow from the actual CFD
//! executable. Tests use scripted solvers that deposit predetermined
//! artifacts without spawning processes; production uses [`CommandSolver`].
//!
//! No lock is held while a solver runs: the run can take hours, and the
//! state file only needs protecting around read/modify/persist.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("spawn solver {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("solver io: {0}")]
    Io(#[from] std::io::Error),

    /// Nonzero exit. The caller must surface this, not absorb the run into
    /// the state as "computed".
    #[error("solver exited with status {code:?}")]
    Failed { code: Option<i32> },

    #[error("solver timed out after {timeout:?}")]
    TimedOut { timeout: Duration },
}

/// Parameters for one solver run.
#[derive(Debug, Clone)]
pub struct SolverRequest {
    /// Working directory the solver deposits artifacts into.
    pub workdir: PathBuf,
    /// Config file the solver reads, relative to `workdir` or absolute.
    pub config_path: PathBuf,
    /// MPI partition count; 1 runs the bare executable.
    pub partitions: u32,
    /// Wall-clock budget for the run.
    pub timeout: Duration,
    /// Where to write captured stdout/stderr.
    pub log_path: PathBuf,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over solver backends.
pub trait Solver {
    /// Run the solver to completion. Success means artifacts are on disk in
    /// `request.workdir`.
    fn run(&self, request: &SolverRequest) -> Result<(), SolverError>;
}

/// Solver that spawns an external executable (optionally under `mpirun`).
pub struct CommandSolver {
    pub program: String,
}

impl CommandSolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, request: &SolverRequest) -> Command {
        let mut cmd = if request.partitions > 1 {
            let mut cmd = Command::new("mpirun");
            cmd.arg("-n")
                .arg(request.partitions.to_string())
                .arg(&self.program);
            cmd
        } else {
            Command::new(&self.program)
        };
        cmd.arg(&request.config_path)
            .current_dir(&request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Solver for CommandSolver {
    #[instrument(skip_all, fields(workdir = %request.workdir.display(), partitions = request.partitions))]
    fn run(&self, request: &SolverRequest) -> Result<(), SolverError> {
        info!(program = %self.program, "starting solver");
        let mut child = self
            .command(request)
            .spawn()
            .map_err(|source| SolverError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Drain pipes concurrently so a chatty solver never blocks on a full
        // pipe while we wait on it.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = request.output_limit_bytes;
        let stdout_handle = thread::spawn(move || read_limited(stdout, limit));
        let stderr_handle = thread::spawn(move || read_limited(stderr, limit));

        let mut timed_out = false;
        let status = match child.wait_timeout(request.timeout)? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = request.timeout.as_secs(), "solver timed out, killing");
                timed_out = true;
                child.kill()?;
                child.wait()?
            }
        };

        let (stdout, stdout_truncated) = join_reader(stdout_handle)?;
        let (stderr, stderr_truncated) = join_reader(stderr_handle)?;
        write_solver_log(
            &request.log_path,
            &stdout,
            stdout_truncated,
            &stderr,
            stderr_truncated,
            timed_out,
        )?;

        if timed_out {
            return Err(SolverError::TimedOut {
                timeout: request.timeout,
            });
        }
        if !status.success() {
            warn!(exit_code = ?status.code(), "solver failed");
            return Err(SolverError::Failed {
                code: status.code(),
            });
        }
        debug!("solver completed");
        Ok(())
    }
}

fn read_limited<R: Read>(reader: Option<R>, limit: usize) -> std::io::Result<(Vec<u8>, usize)> {
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), 0));
    };
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }
    Ok((buf, truncated))
}

fn join_reader(
    handle: thread::JoinHandle<std::io::Result<(Vec<u8>, usize)>>,
) -> Result<(Vec<u8>, usize), SolverError> {
    match handle.join() {
        Ok(result) => Ok(result?),
        Err(_) => Err(SolverError::Io(std::io::Error::other(
            "output reader thread panicked",
        ))),
    }
}

fn write_solver_log(
    path: &Path,
    stdout: &[u8],
    stdout_truncated: usize,
    stderr: &[u8],
    stderr_truncated: usize,
    timed_out: bool,
) -> Result<(), SolverError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(stdout));
    if stdout_truncated > 0 {
        buf.push_str(&format!("\n[solver stdout truncated {stdout_truncated} bytes]\n"));
    }
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(stderr));
    if stderr_truncated > 0 {
        buf.push_str(&format!("\n[solver stderr truncated {stderr_truncated} bytes]\n"));
    }
    if timed_out {
        buf.push_str("\n[solver timed out]\n");
    }
    fs::write(path, buf)?;
    Ok(())
}
