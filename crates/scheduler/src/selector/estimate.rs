use std::sync::Arc;

use sealyard_core::{ProofVariant, TaskKind};

use super::WorkerSelector;
use crate::error::SelectorError;
use crate::estimator::Estimator;
use crate::worker::WorkerHandle;

/// Wraps another policy and prefers the historically faster worker.
///
/// Workers without history for the task kind go first so that every worker
/// gets measured. Ties fall through to the wrapped policy, which also makes
/// the hard `is_satisfying` decision.
pub struct EstimateSelector<S> {
    inner: S,
    estimator: Arc<Estimator>,
}

impl<S: WorkerSelector> EstimateSelector<S> {
    pub fn new(inner: S, estimator: Arc<Estimator>) -> Self {
        Self { inner, estimator }
    }
}

impl<S: WorkerSelector> WorkerSelector for EstimateSelector<S> {
    fn is_satisfying(
        &self,
        kind: TaskKind,
        proof: ProofVariant,
        worker: &WorkerHandle,
    ) -> Result<bool, SelectorError> {
        self.inner.is_satisfying(kind, proof, worker)
    }

    fn is_preferred(
        &self,
        kind: TaskKind,
        a: &WorkerHandle,
        b: &WorkerHandle,
    ) -> Result<bool, SelectorError> {
        match (self.estimator.average(a.id, kind), self.estimator.average(b.id, kind)) {
            (None, Some(_)) => Ok(true),
            (Some(_), None) => Ok(false),
            (Some(ta), Some(tb)) if ta != tb => Ok(ta < tb),
            _ => self.inner.is_preferred(kind, a, b),
        }
    }
}
