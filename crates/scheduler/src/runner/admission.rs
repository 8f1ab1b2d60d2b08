use std::sync::atomic::Ordering;
use std::sync::Arc;

use sealyard_core::{CallError, CallErrorKind, CallResult};
use tracing::{debug, error, info, warn};

use super::core::{lock, Scheduler};
use crate::error::SchedulerError;
use crate::request::{TaskRequest, TaskState};
use crate::selector;
use crate::work::Admission;
use crate::worker::{WorkerHandle, WorkerId};

/// Outcome of one attempt to place a request on a worker.
pub(super) enum Placement {
    /// Reserved on a worker and handed to dispatch.
    Assigned,
    /// Some worker could run it, none has room right now.
    Deferred(TaskRequest),
    Rejected(TaskRequest, SchedulerError),
}

impl Scheduler {
    /// Submit a task.
    ///
    /// The task is either dispatched right away or queued until a worker
    /// frees up; its completion handler fires once in both cases. Fails
    /// with [`SchedulerError::NoWorkerFound`] when no registered worker
    /// supports the task at all; nothing is queued then. A selector failure
    /// leaves the task queued and is reported as
    /// [`SchedulerError::SelectionFailed`].
    pub fn schedule(&self, mut request: TaskRequest) -> Result<(), SchedulerError> {
        if let Some(work_id) = request.work_id.clone() {
            match self.inner.tracker.begin(&work_id, &request.completion)? {
                Admission::New => {}
                Admission::Attached => return Ok(()),
                Admission::Recovered(call_id) => {
                    self.resume(work_id, call_id, request.completion);
                    return Ok(());
                }
            }
        }

        request.id = self.inner.next_task_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.status).track(
            request.id,
            request.sector.id,
            request.kind,
            TaskState::Evaluating,
        );
        debug!(
            task_id = request.id,
            sector = %request.sector.id,
            kind = %request.kind,
            priority = request.priority,
            "scheduling task"
        );

        let mut queue = lock(&self.inner.queue);
        match self.place(request) {
            Placement::Assigned => Ok(()),
            Placement::Deferred(request) => {
                self.set_state(request.id, TaskState::Queued);
                queue.insert(request);
                Ok(())
            }
            Placement::Rejected(request, err @ SchedulerError::SelectionFailed(_)) => {
                warn!(task_id = request.id, error = %err, "selection failed, task stays queued");
                self.set_state(request.id, TaskState::Queued);
                queue.insert(request);
                Err(err)
            }
            Placement::Rejected(request, err) => {
                drop(queue);
                warn!(task_id = request.id, error = %err, "task rejected");
                lock(&self.inner.status).forget(request.id);
                if let Some(work_id) = &request.work_id {
                    self.inner.tracker.finish(work_id);
                }
                Err(err)
            }
        }
    }

    /// Offer queued work to `worker_id`, in queue order.
    ///
    /// Called whenever a worker registers or a task releases resources.
    pub fn free_worker(&self, worker_id: WorkerId) {
        let Some(worker) = self.worker(worker_id) else {
            debug!(worker_id, "free_worker for unknown worker");
            return;
        };

        let mut rejected = Vec::new();
        {
            let mut queue = lock(&self.inner.queue);
            let mut index = 0;
            while index < queue.len() {
                let Some(request) = queue.get(index) else { break };
                match request
                    .selector
                    .is_satisfying(request.kind, request.sector.proof, &worker)
                {
                    Ok(true) => {}
                    Ok(false) => {
                        index += 1;
                        continue;
                    }
                    Err(e) => {
                        error!(task_id = request.id, worker_id, error = %e, "selector failed");
                        index += 1;
                        continue;
                    }
                }

                let Some(request) = queue.remove(index) else { break };
                self.set_state(request.id, TaskState::Evaluating);
                match self.place(request) {
                    Placement::Assigned => {}
                    Placement::Deferred(request) => {
                        self.set_state(request.id, TaskState::Queued);
                        queue.restore(index, request);
                        index += 1;
                    }
                    Placement::Rejected(request, SchedulerError::SelectionFailed(e)) => {
                        error!(task_id = request.id, error = %e, "selection failed, task stays queued");
                        self.set_state(request.id, TaskState::Queued);
                        queue.restore(index, request);
                        index += 1;
                    }
                    Placement::Rejected(request, err) => rejected.push((request, err)),
                }
            }
        }

        // Handlers may schedule follow-up work, so they run with no lock held.
        for (request, err) in rejected {
            warn!(task_id = request.id, error = %err, "dropping queued task");
            let error = CallError::new(CallErrorKind::NoWorkerFound, err.to_string());
            self.finish_task(request, CallResult::failed(error));
        }
    }

    /// Pick a worker for `request`, reserve its preparing resources and
    /// spawn the dispatch. The caller holds the queue lock.
    pub(super) fn place(&self, request: TaskRequest) -> Placement {
        let profile = self.inner.resources.profile(request.kind, request.sector.proof);

        let chosen = {
            let workers = lock(&self.inner.workers);
            let forced = self.inner.config.forced_admission
                && workers.len() == 1
                && self.inner.active_jobs.load(Ordering::SeqCst) == 0;

            let mut capable = 0;
            let mut candidates: Vec<Arc<WorkerHandle>> = Vec::new();
            for worker in workers.values() {
                match request
                    .selector
                    .is_satisfying(request.kind, request.sector.proof, worker)
                {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => return Placement::Rejected(request, e.into()),
                }
                capable += 1;
                if !worker.preparing.can_admit(&profile, worker.capacity()) && !forced {
                    continue;
                }
                candidates.push(Arc::clone(worker));
            }

            if candidates.is_empty() {
                if capable == 0 {
                    let err = SchedulerError::NoWorkerFound {
                        kind: request.kind,
                        proof: request.sector.proof,
                    };
                    return Placement::Rejected(request, err);
                }
                return Placement::Deferred(request);
            }

            let ranked = match selector::rank(request.selector.as_ref(), request.kind, candidates) {
                Ok(ranked) => ranked,
                Err(e) => return Placement::Rejected(request, e.into()),
            };
            let Some(chosen) = ranked.into_iter().next() else {
                return Placement::Deferred(request);
            };

            if forced && !chosen.preparing.can_admit(&profile, chosen.capacity()) {
                info!(
                    task_id = request.id,
                    worker_id = chosen.id,
                    kind = %request.kind,
                    "forcing admission on the only idle worker"
                );
            }
            chosen.preparing.reserve(&profile, chosen.capacity());
            chosen
        };

        debug!(task_id = request.id, worker_id = chosen.id, kind = %request.kind, "task assigned");
        self.set_state(request.id, TaskState::Assigned);
        let this = self.clone();
        self.inner.runtime.spawn(async move {
            this.run_task(chosen, request, profile).await;
        });
        Placement::Assigned
    }
}
