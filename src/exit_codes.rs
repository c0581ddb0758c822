//! Stable exit codes for the findiff CLI.

/// Gradients evaluated (or satisfied from existing results).
pub const OK: i32 = 0;
/// Invalid configuration, unreadable files, or another fatal error.
pub const INVALID: i32 = 1;
/// A perturbed solver run exited nonzero; its gradient was not recorded.
pub const SOLVER_FAILED: i32 = 2;
/// The run-state lock could not be acquired within the retry budget.
pub const LOCK_TIMEOUT: i32 = 3;
