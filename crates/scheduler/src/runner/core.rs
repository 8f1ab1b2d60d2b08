use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sealyard_core::{
    CallId, CallResult, CoreError, ProofVariant, ResourceProfile, ResourceTable, ResultSink,
    TaskKind, WorkerInfo,
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::correlator::Correlator;
use crate::error::SchedulerError;
use crate::estimator::Estimator;
use crate::queue::TaskQueue;
use crate::request::{TaskId, TaskState};
use crate::status::{SchedulerStatus, StatusBook, WorkerStatus};
use crate::work::{WorkStore, WorkTracker};
use crate::worker::{SealWorker, WorkerHandle, WorkerId};

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by every clone of a [`Scheduler`] and its spawned tasks.
///
/// Lock order, when more than one is held: `queue`, then `workers`.
/// `status` is a leaf: nothing else is locked while it is held.
pub(super) struct Shared {
    pub(super) config: SchedulerConfig,
    pub(super) resources: ResourceTable,
    pub(super) runtime: Handle,
    /// Keyed by registration order.
    pub(super) workers: Mutex<BTreeMap<WorkerId, Arc<WorkerHandle>>>,
    pub(super) queue: Mutex<TaskQueue>,
    pub(super) correlator: Correlator,
    pub(super) estimator: Arc<Estimator>,
    pub(super) tracker: WorkTracker,
    pub(super) status: Mutex<StatusBook>,
    /// Tasks in their work phase across all workers.
    pub(super) active_jobs: AtomicUsize,
    next_worker_id: AtomicU64,
    pub(super) next_task_id: AtomicU64,
}

/// The sealing scheduler. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Scheduler {
    pub(super) inner: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler on the current tokio runtime.
    ///
    /// Work records that never reached the work phase are discarded from
    /// `store` before the scheduler accepts anything.
    pub fn new(config: SchedulerConfig, store: Arc<dyn WorkStore>) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        Self::with_runtime(config, store, runtime)
    }

    pub fn with_runtime(
        config: SchedulerConfig,
        store: Arc<dyn WorkStore>,
        runtime: Handle,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let resources = config.resource_table()?;
        let tracker = WorkTracker::new(store);
        tracker.reset_works()?;

        info!(
            estimator_window = config.estimator_window,
            forced_admission = config.forced_admission,
            profiles = resources.len(),
            "scheduler ready"
        );

        Ok(Self {
            inner: Arc::new(Shared {
                estimator: Arc::new(Estimator::new(config.estimator_window)),
                correlator: Correlator::new(runtime.clone()),
                config,
                resources,
                runtime,
                workers: Mutex::new(BTreeMap::new()),
                queue: Mutex::new(TaskQueue::new()),
                tracker,
                status: Mutex::new(StatusBook::default()),
                active_jobs: AtomicUsize::new(0),
                next_worker_id: AtomicU64::new(0),
                next_task_id: AtomicU64::new(0),
            }),
        })
    }

    /// Add a worker to the pool and immediately offer it queued work.
    pub fn register_worker(&self, worker: Arc<dyn SealWorker>, info: WorkerInfo) -> WorkerId {
        let id = self.inner.next_worker_id.fetch_add(1, Ordering::SeqCst);
        info!(
            worker_id = id,
            hostname = %info.hostname,
            cpus = info.capacity.cpu_count,
            memory = info.capacity.physical_memory,
            gpus = info.capacity.gpu_ids.len(),
            "registered worker"
        );
        let handle = Arc::new(WorkerHandle::new(id, worker, info));
        lock(&self.inner.workers).insert(id, handle);
        self.free_worker(id);
        id
    }

    /// Take a worker out of consideration for new tasks. Tasks already
    /// dispatched to it keep their handle and finish normally.
    pub fn remove_worker(&self, id: WorkerId) -> bool {
        let removed = lock(&self.inner.workers).remove(&id).is_some();
        if removed {
            info!(worker_id = id, "removed worker");
        } else {
            warn!(worker_id = id, "remove requested for unknown worker");
        }
        removed
    }

    pub fn worker(&self, id: WorkerId) -> Option<Arc<WorkerHandle>> {
        lock(&self.inner.workers).get(&id).cloned()
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.inner.workers).len()
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    pub fn active_jobs(&self) -> usize {
        self.inner.active_jobs.load(Ordering::SeqCst)
    }

    pub fn estimator(&self) -> Arc<Estimator> {
        Arc::clone(&self.inner.estimator)
    }

    pub fn correlator(&self) -> &Correlator {
        &self.inner.correlator
    }

    pub fn resource_profile(&self, kind: TaskKind, proof: ProofVariant) -> ResourceProfile {
        self.inner.resources.profile(kind, proof)
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        lock(&self.inner.status).state(id)
    }

    /// Entry point for remote completions.
    pub fn return_result(&self, call_id: CallId, result: CallResult) -> Result<(), SchedulerError> {
        debug!(%call_id, ok = result.is_ok(), "call result returned");
        self.inner.correlator.deliver(call_id, result);
        Ok(())
    }

    pub fn status(&self) -> SchedulerStatus {
        let mut queued_by_kind = BTreeMap::new();
        {
            let queue = lock(&self.inner.queue);
            for request in queue.iter() {
                *queued_by_kind.entry(request.kind).or_insert(0) += 1;
            }
        }

        let workers = lock(&self.inner.workers)
            .values()
            .map(|w| WorkerStatus {
                id: w.id,
                hostname: w.info.hostname.clone(),
                preparing: w.preparing.snapshot(),
                active: w.active.snapshot(),
                preparing_utilization: w.preparing.utilization(w.capacity()),
                active_utilization: w.active.utilization(w.capacity()),
            })
            .collect();

        lock(&self.inner.status).snapshot(queued_by_kind, self.active_jobs(), workers)
    }

    pub(super) fn set_state(&self, id: TaskId, state: TaskState) {
        lock(&self.inner.status).set_state(id, state);
    }
}

impl ResultSink for Scheduler {
    fn return_result(&self, call_id: CallId, result: CallResult) -> Result<(), CoreError> {
        Scheduler::return_result(self, call_id.clone(), result).map_err(|e| CoreError::Sink {
            call_id: call_id.to_string(),
            reason: e.to_string(),
        })
    }
}
