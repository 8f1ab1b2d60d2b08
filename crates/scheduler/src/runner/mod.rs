//! Scheduler runner: owns the worker pool, the pending queue and the call
//! correlator, and drives every task from admission to completion.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, registration and accessors
//! - `admission`: worker choice, forced admission and queue rescans
//! - `dispatch`: per-task prepare/work lifecycle and cleanup

mod admission;
mod core;
mod dispatch;

pub use self::core::Scheduler;
