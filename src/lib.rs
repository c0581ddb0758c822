//! Finite-difference gradient workflow runner for external CFD solvers.
//!
//! This crate coordinates perturbed solver runs without re-running expensive
//! simulations: a persistent, lock-protected [`state::RunState`] records what
//! has already been computed for a configuration, and the workflow driver
//! consults it before invoking the solver. The architecture enforces a strict
//! separation:
//!
//! - Pure modules ([`config`], [`physics`], [`state`]): deterministic logic
//!   with no I/O, fully testable in isolation.
//! - **[`io`]**: side-effecting operations (filesystem probing, locking,
//!   checkpointing, solver execution). Isolated to enable scripted fakes in
//!   tests.
//!
//! [`gradients`] orchestrates the two to implement the forward-difference
//! workflow the `findiff` binary exposes.

pub mod config;
pub mod exit_codes;
pub mod gradients;
pub mod io;
pub mod logging;
pub mod physics;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
