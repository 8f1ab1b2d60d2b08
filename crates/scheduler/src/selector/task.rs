use sealyard_core::{ProofVariant, TaskKind};

use super::WorkerSelector;
use crate::error::SelectorError;
use crate::worker::WorkerHandle;

/// Picks any worker that advertises the task, preferring specialists: the
/// worker with fewer supported task kinds wins, then the less loaded one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSelector;

impl WorkerSelector for TaskSelector {
    fn is_satisfying(
        &self,
        kind: TaskKind,
        _proof: ProofVariant,
        worker: &WorkerHandle,
    ) -> Result<bool, SelectorError> {
        Ok(worker.worker.supported_tasks()?.contains(&kind))
    }

    fn is_preferred(
        &self,
        _kind: TaskKind,
        a: &WorkerHandle,
        b: &WorkerHandle,
    ) -> Result<bool, SelectorError> {
        let a_tasks = a.worker.supported_tasks()?.len();
        let b_tasks = b.worker.supported_tasks()?.len();
        if a_tasks != b_tasks {
            return Ok(a_tasks < b_tasks);
        }
        Ok(a.active.utilization(a.capacity()) < b.active.utilization(b.capacity()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sealyard_core::{ResourceProfile, WorkerInfo};

    use super::*;
    use crate::selector::testing::StubWorker;

    fn handle(id: u64, tasks: &[TaskKind], active_memory: u64) -> WorkerHandle {
        let stub = StubWorker::new(tasks);
        let info = WorkerInfo::new(format!("worker-{id}"), stub.capacity.clone());
        let handle = WorkerHandle::new(id, Arc::new(stub), info);
        let used = ResourceProfile {
            min_memory: active_memory,
            threads: Some(0),
            ..ResourceProfile::default()
        };
        handle.active.reserve(&used, handle.capacity());
        handle
    }

    #[test]
    fn worker_without_task_is_not_satisfying() {
        let worker = handle(1, &[], 0);
        let ok = TaskSelector
            .is_satisfying(TaskKind::AddPiece, ProofVariant::StackedDrg2KiBV1, &worker)
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn worker_with_task_is_satisfying() {
        let worker = handle(1, &[TaskKind::AddPiece], 0);
        let ok = TaskSelector
            .is_satisfying(TaskKind::AddPiece, ProofVariant::StackedDrg2KiBV1, &worker)
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn specialist_beats_generalist() {
        let best = handle(1, &[TaskKind::AddPiece], 0);
        let some = handle(2, &[TaskKind::AddPiece, TaskKind::Unseal], 0);
        assert!(!TaskSelector.is_preferred(TaskKind::AddPiece, &some, &best).unwrap());
        assert!(TaskSelector.is_preferred(TaskKind::AddPiece, &best, &some).unwrap());
    }

    #[test]
    fn less_loaded_wins_between_equals() {
        let not_best = handle(1, &[TaskKind::AddPiece], 2048);
        let some = handle(2, &[TaskKind::AddPiece], 1024);
        assert!(TaskSelector.is_preferred(TaskKind::AddPiece, &some, &not_best).unwrap());
        assert!(!TaskSelector.is_preferred(TaskKind::AddPiece, &not_best, &some).unwrap());
    }
}
