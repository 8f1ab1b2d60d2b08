use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use sealyard_core::{SectorId, TaskKind};
use serde::Serialize;

use crate::ledger::LedgerCounters;
use crate::request::{TaskId, TaskState};
use crate::worker::WorkerId;

/// Finished tasks kept for [`SchedulerStatus::recent`] and state lookups.
pub const RECENT_OUTCOMES: usize = 64;

/// Point-in-time view of the scheduler for dashboards and logs.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub generated_at: DateTime<Utc>,
    pub queued: usize,
    pub queued_by_kind: BTreeMap<TaskKind, usize>,
    pub active_jobs: usize,
    pub workers: Vec<WorkerStatus>,
    /// Every task not yet completed, ordered by id.
    pub tasks: Vec<TaskStatus>,
    /// The last [`RECENT_OUTCOMES`] finished tasks, newest first.
    pub recent: Vec<TaskStatus>,
    pub completed: BTreeMap<TaskKind, u64>,
    pub failed: BTreeMap<TaskKind, u64>,
    pub last_finished: BTreeMap<TaskKind, DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub hostname: String,
    pub preparing: LedgerCounters,
    pub active: LedgerCounters,
    pub preparing_utilization: f64,
    pub active_utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub sector: SectorId,
    pub kind: TaskKind,
    pub state: TaskState,
}

/// Mutable bookkeeping behind [`SchedulerStatus`].
#[derive(Debug, Default)]
pub(crate) struct StatusBook {
    tasks: HashMap<TaskId, TaskStatus>,
    recent: VecDeque<TaskStatus>,
    completed: BTreeMap<TaskKind, u64>,
    failed: BTreeMap<TaskKind, u64>,
    last_finished: BTreeMap<TaskKind, DateTime<Utc>>,
}

impl StatusBook {
    pub(crate) fn track(&mut self, id: TaskId, sector: SectorId, kind: TaskKind, state: TaskState) {
        self.tasks.insert(id, TaskStatus { id, sector, kind, state });
    }

    pub(crate) fn set_state(&mut self, id: TaskId, state: TaskState) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.state = state;
        }
    }

    pub(crate) fn forget(&mut self, id: TaskId) {
        self.tasks.remove(&id);
    }

    /// Move a task to its terminal state.
    pub(crate) fn record_outcome(&mut self, id: TaskId, kind: TaskKind, ok: bool) {
        if let Some(mut task) = self.tasks.remove(&id) {
            task.state = if ok { TaskState::Completed } else { TaskState::Failed };
            if self.recent.len() == RECENT_OUTCOMES {
                self.recent.pop_back();
            }
            self.recent.push_front(task);
        }
        let counter = if ok { &mut self.completed } else { &mut self.failed };
        *counter.entry(kind).or_default() += 1;
        self.last_finished.insert(kind, Utc::now());
    }

    pub(crate) fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks
            .get(&id)
            .or_else(|| self.recent.iter().find(|t| t.id == id))
            .map(|t| t.state)
    }

    pub(crate) fn snapshot(
        &self,
        queued_by_kind: BTreeMap<TaskKind, usize>,
        active_jobs: usize,
        workers: Vec<WorkerStatus>,
    ) -> SchedulerStatus {
        let mut tasks: Vec<TaskStatus> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        SchedulerStatus {
            generated_at: Utc::now(),
            queued: queued_by_kind.values().sum(),
            queued_by_kind,
            active_jobs,
            workers,
            tasks,
            recent: self.recent.iter().cloned().collect(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
            last_finished: self.last_finished.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_counted_per_kind() {
        let mut book = StatusBook::default();
        let sector = SectorId::new(1, 1);
        book.track(1, sector, TaskKind::AddPiece, TaskState::Queued);
        book.track(2, sector, TaskKind::AddPiece, TaskState::Queued);
        book.track(3, sector, TaskKind::Commit2, TaskState::Queued);

        book.set_state(1, TaskState::Executing);
        assert_eq!(book.state(1), Some(TaskState::Executing));

        book.record_outcome(1, TaskKind::AddPiece, true);
        book.record_outcome(2, TaskKind::AddPiece, true);
        book.record_outcome(3, TaskKind::Commit2, false);

        let status = book.snapshot(BTreeMap::new(), 0, Vec::new());
        assert_eq!(status.completed.get(&TaskKind::AddPiece), Some(&2));
        assert_eq!(status.failed.get(&TaskKind::Commit2), Some(&1));
        assert!(status.tasks.is_empty());
        assert!(status.last_finished.contains_key(&TaskKind::Commit2));

        assert_eq!(book.state(1), Some(TaskState::Completed));
        assert_eq!(book.state(3), Some(TaskState::Failed));
        let recent: Vec<_> = status.recent.iter().map(|t| (t.id, t.state)).collect();
        assert_eq!(
            recent,
            vec![
                (3, TaskState::Failed),
                (2, TaskState::Completed),
                (1, TaskState::Completed)
            ]
        );
    }

    #[test]
    fn recent_outcomes_are_bounded() {
        let mut book = StatusBook::default();
        let total = RECENT_OUTCOMES as u64 + 5;
        for id in 0..total {
            book.track(id, SectorId::new(1, id), TaskKind::AddPiece, TaskState::Executing);
            book.record_outcome(id, TaskKind::AddPiece, true);
        }
        let status = book.snapshot(BTreeMap::new(), 0, Vec::new());
        assert_eq!(status.recent.len(), RECENT_OUTCOMES);
        assert_eq!(status.recent[0].id, total - 1);
        assert_eq!(book.state(0), None);
        assert_eq!(status.completed.get(&TaskKind::AddPiece), Some(&total));
    }

    #[test]
    fn snapshot_orders_tasks_and_sums_queue() {
        let mut book = StatusBook::default();
        book.track(9, SectorId::new(1, 9), TaskKind::Finalize, TaskState::Queued);
        book.track(4, SectorId::new(1, 4), TaskKind::AddPiece, TaskState::Preparing);

        let queued = BTreeMap::from([(TaskKind::Finalize, 1), (TaskKind::PreCommit1, 2)]);
        let status = book.snapshot(queued, 1, Vec::new());
        assert_eq!(status.queued, 3);
        assert_eq!(status.tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![4, 9]);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["active_jobs"], 1);
        assert_eq!(json["queued_by_kind"]["Finalize"], 1);
    }
}
