//! Sector sealing task scheduler.
//!
//! Matches queued sealing tasks to registered workers under per-worker
//! resource limits, drives each task through its prepare and work phases,
//! and routes asynchronous call results back to whoever is waiting on them.
//!
//! - `ledger`: per-worker resource accounting and admission checks
//! - `queue`: priority-ordered pending task queue
//! - `selector`: worker eligibility and preference policies
//! - `estimator`: recency-weighted per-worker duration history
//! - `correlator`: call id to completion rendezvous
//! - `work`: idempotent work tracking across restarts
//! - `runner`: the scheduler itself

pub mod config;
pub mod correlator;
pub mod error;
pub mod estimator;
pub mod ledger;
pub mod queue;
pub mod request;
pub mod runner;
pub mod selector;
pub mod status;
pub mod work;
pub mod worker;

pub use config::SchedulerConfig;
pub use correlator::{CallWaiter, Correlator};
pub use error::{SchedulerError, SelectorError};
pub use estimator::Estimator;
pub use ledger::{LedgerCounters, LedgerGuard, ResourceLedger};
pub use queue::TaskQueue;
pub use request::{TaskId, TaskRequest, TaskState, WorkerAction, DEFAULT_PRIORITY};
pub use runner::Scheduler;
pub use selector::{EstimateSelector, TaskSelector, WorkerSelector};
pub use status::{SchedulerStatus, TaskStatus, WorkerStatus, RECENT_OUTCOMES};
pub use work::{MemoryWorkStore, WorkId, WorkState, WorkStatus, WorkStore};
pub use worker::{SealWorker, WorkerHandle, WorkerId};
