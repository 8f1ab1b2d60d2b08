//! Worker selection policies.
//!
//! A policy answers two questions for the scheduler: can this worker ever
//! run the task (`is_satisfying`), and which of two capable workers is the
//! better pick (`is_preferred`). Policies compose by wrapping each other.

mod estimate;
mod task;

use std::sync::Arc;

use sealyard_core::{ProofVariant, TaskKind};

use crate::error::SelectorError;
use crate::worker::WorkerHandle;

pub use estimate::EstimateSelector;
pub use task::TaskSelector;

pub trait WorkerSelector: Send + Sync {
    /// Hard filter: does `worker` support this task at all.
    fn is_satisfying(
        &self,
        kind: TaskKind,
        proof: ProofVariant,
        worker: &WorkerHandle,
    ) -> Result<bool, SelectorError>;

    /// True if `a` should be chosen over `b`.
    fn is_preferred(
        &self,
        kind: TaskKind,
        a: &WorkerHandle,
        b: &WorkerHandle,
    ) -> Result<bool, SelectorError>;
}

impl<T: WorkerSelector + ?Sized> WorkerSelector for Arc<T> {
    fn is_satisfying(
        &self,
        kind: TaskKind,
        proof: ProofVariant,
        worker: &WorkerHandle,
    ) -> Result<bool, SelectorError> {
        (**self).is_satisfying(kind, proof, worker)
    }

    fn is_preferred(
        &self,
        kind: TaskKind,
        a: &WorkerHandle,
        b: &WorkerHandle,
    ) -> Result<bool, SelectorError> {
        (**self).is_preferred(kind, a, b)
    }
}

/// Stable insertion sort of `candidates` using only `is_preferred`, so
/// equally good workers keep their registration order. The first error
/// aborts the sort.
pub(crate) fn rank<W>(
    selector: &dyn WorkerSelector,
    kind: TaskKind,
    candidates: Vec<W>,
) -> Result<Vec<W>, SelectorError>
where
    W: AsRef<WorkerHandle>,
{
    let mut ranked: Vec<W> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let mut at = ranked.len();
        while at > 0 && selector.is_preferred(kind, candidate.as_ref(), ranked[at - 1].as_ref())? {
            at -= 1;
        }
        ranked.insert(at, candidate);
    }
    Ok(ranked)
}
