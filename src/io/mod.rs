//! Side-effecting operations: locking, checkpointing, probing, solver runs.

pub mod checkpoint;
pub mod history;
pub mod lock;
pub mod probe;
pub mod solver;
