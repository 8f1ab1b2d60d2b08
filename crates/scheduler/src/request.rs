use std::sync::{Arc, Mutex, PoisonError};

use sealyard_core::{CallError, CallId, CallResult, SectorRef, TaskKind};
use serde::{Deserialize, Serialize};

use crate::selector::WorkerSelector;
use crate::work::WorkId;
use crate::worker::SealWorker;

pub type TaskId = u64;

pub const DEFAULT_PRIORITY: u64 = 0;

/// Starts one phase of a task on the chosen worker and returns the id of
/// the asynchronous call it launched.
pub type WorkerAction = Box<dyn Fn(&dyn SealWorker) -> Result<CallId, CallError> + Send + Sync>;

pub(crate) type CompletionHandler = Box<dyn FnOnce(CallResult) + Send>;

/// Lifecycle of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Queued,
    Evaluating,
    Assigned,
    Preparing,
    Executing,
    Completed,
    Failed,
}

/// Shared cell holding a task's completion handler until it fires.
///
/// Cloned between the request and the work tracker so that a duplicate
/// submission can swap in its own handler.
#[derive(Clone, Default)]
pub(crate) struct CompletionSlot(Arc<Mutex<Option<CompletionHandler>>>);

impl CompletionSlot {
    pub(crate) fn new(handler: CompletionHandler) -> Self {
        Self(Arc::new(Mutex::new(Some(handler))))
    }

    /// Move the handler out of `other` into this slot, dropping the one
    /// held so far.
    pub(crate) fn take_over(&self, other: &CompletionSlot) {
        let incoming = other.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handler) = incoming {
            *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        }
    }

    /// Invoke the handler. Returns false if it already fired.
    pub(crate) fn complete(&self, result: CallResult) -> bool {
        let handler = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        match handler {
            Some(handler) => {
                handler(result);
                true
            }
            None => false,
        }
    }
}

/// A unit of scheduled work: one stage for one sector.
///
/// ```ignore
/// let request = TaskRequest::new(sector, TaskKind::PreCommit1, selector, move |w| {
///     w.seal_pre_commit1(&sector, &ticket, &pieces)
/// })
/// .priority(10)
/// .on_complete(|result| println!("{result:?}"));
/// scheduler.schedule(request)?;
/// ```
pub struct TaskRequest {
    pub(crate) id: TaskId,
    pub(crate) sector: SectorRef,
    pub(crate) kind: TaskKind,
    pub(crate) priority: u64,
    pub(crate) selector: Arc<dyn WorkerSelector>,
    pub(crate) prepare: Option<WorkerAction>,
    pub(crate) work: WorkerAction,
    pub(crate) completion: CompletionSlot,
    pub(crate) work_id: Option<WorkId>,
}

impl TaskRequest {
    pub fn new<F>(sector: SectorRef, kind: TaskKind, selector: Arc<dyn WorkerSelector>, work: F) -> Self
    where
        F: Fn(&dyn SealWorker) -> Result<CallId, CallError> + Send + Sync + 'static,
    {
        Self {
            id: 0,
            sector,
            kind,
            priority: DEFAULT_PRIORITY,
            selector,
            prepare: None,
            work: Box::new(work),
            completion: CompletionSlot::new(Box::new(|_| {})),
            work_id: None,
        }
    }

    pub fn priority(mut self, priority: u64) -> Self {
        self.priority = priority;
        self
    }

    /// Phase run before the work phase, typically fetching sector files
    /// onto the worker.
    pub fn prepare<F>(mut self, prepare: F) -> Self
    where
        F: Fn(&dyn SealWorker) -> Result<CallId, CallError> + Send + Sync + 'static,
    {
        self.prepare = Some(Box::new(prepare));
        self
    }

    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        self.completion = CompletionSlot::new(Box::new(handler));
        self
    }

    /// Make the request idempotent: resubmitting the same work id attaches
    /// to the running task instead of starting another one.
    pub fn work_id(mut self, work_id: WorkId) -> Self {
        self.work_id = Some(work_id);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn sector(&self) -> &SectorRef {
        &self.sector
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn task_priority(&self) -> u64 {
        self.priority
    }
}

impl std::fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRequest")
            .field("id", &self.id)
            .field("sector", &self.sector)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("work_id", &self.work_id)
            .finish_non_exhaustive()
    }
}
