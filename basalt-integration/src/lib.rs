//! Runs basalt physical plans over tables kept in memory.
//!
//! The executor is a reference implementation: it materializes every intermediate result
//! and evaluates one row at a time. Tests use it to check that plans optimized with any
//! subset of the logical rules return the same rows.
pub mod error;
pub mod eval;
pub mod executor;
pub mod storage;

pub use executor::Executor;
pub use storage::MemDatabase;
