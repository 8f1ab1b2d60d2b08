use std::sync::atomic::Ordering;
use std::sync::Arc;

use sealyard_core::{CallError, CallErrorKind, CallId, CallResult, ResourceProfile};
use tracing::{debug, info, warn};

use super::core::{lock, Scheduler};
use crate::request::{CompletionSlot, TaskRequest, TaskState};
use crate::work::WorkId;
use crate::worker::WorkerHandle;

impl Scheduler {
    /// Drive an assigned task to completion. Enters holding a `preparing`
    /// reservation of `profile` on `worker`; every path out releases it.
    pub(super) async fn run_task(
        self,
        worker: Arc<WorkerHandle>,
        request: TaskRequest,
        profile: ResourceProfile,
    ) {
        if let Some(prepare) = &request.prepare {
            self.set_state(request.id, TaskState::Preparing);
            let prepared = match prepare(worker.worker.as_ref()) {
                Ok(call_id) => self.inner.correlator.subscribe(call_id).wait().await,
                Err(e) => CallResult::failed(e),
            };
            if let Some(e) = prepared.error {
                warn!(task_id = request.id, worker_id = worker.id, error = %e, "prepare failed");
                worker.preparing.release(&profile, worker.capacity());
                let error = CallError::new(CallErrorKind::PrepareFailed, e.to_string());
                self.finish_task(request, CallResult::failed(error));
                self.free_worker(worker.id);
                return;
            }
        }

        // Move the reservation from `preparing` to `active`. Resources may
        // have been taken by other tasks while this one was preparing.
        let forced = {
            let workers = lock(&self.inner.workers);
            self.inner.config.forced_admission
                && workers.len() == 1
                && self.inner.active_jobs.load(Ordering::SeqCst) == 0
        };
        worker.preparing.release(&profile, worker.capacity());
        if !worker.active.try_reserve(&profile, worker.capacity()) {
            if !forced {
                debug!(task_id = request.id, worker_id = worker.id, "no room to start work, requeueing");
                self.set_state(request.id, TaskState::Queued);
                lock(&self.inner.queue).insert(request);
                // Whoever held `active` may have released it and rescanned
                // the queue before the insert. Once queued, a later release
                // rescans on its own, so only room seen now needs a wakeup.
                if worker.active.can_admit(&profile, worker.capacity()) {
                    self.free_worker(worker.id);
                }
                return;
            }
            info!(task_id = request.id, worker_id = worker.id, "forcing work start on the only idle worker");
            worker.active.reserve(&profile, worker.capacity());
        }

        self.inner.active_jobs.fetch_add(1, Ordering::SeqCst);
        self.set_state(request.id, TaskState::Executing);

        let result = match (request.work)(worker.worker.as_ref()) {
            Ok(call_id) => {
                debug!(task_id = request.id, worker_id = worker.id, %call_id, "work started");
                if let Some(work_id) = &request.work_id {
                    if let Err(e) = self.inner.tracker.mark_in_progress(work_id, &call_id) {
                        warn!(task_id = request.id, work_id = %work_id, error = %e, "failed to persist work state");
                    }
                }
                self.inner.estimator.start(worker.id, request.kind, call_id.clone());
                let result = self.inner.correlator.subscribe(call_id.clone()).wait().await;
                if result.is_ok() {
                    self.inner.estimator.finish(&call_id);
                } else {
                    self.inner.estimator.abort(&call_id);
                }
                result
            }
            Err(e) => {
                warn!(task_id = request.id, worker_id = worker.id, error = %e, "work failed to start");
                CallResult::failed(CallError::new(CallErrorKind::WorkFailed, e.to_string()))
            }
        };

        worker.active.release(&profile, worker.capacity());
        self.inner.active_jobs.fetch_sub(1, Ordering::SeqCst);
        self.finish_task(request, result);
        self.free_worker(worker.id);
    }

    /// Report the outcome and fire the completion handler. Must run with
    /// no scheduler lock held.
    pub(super) fn finish_task(&self, request: TaskRequest, result: CallResult) {
        let ok = result.is_ok();
        if ok {
            debug!(task_id = request.id, sector = %request.sector.id, kind = %request.kind, "task completed");
        } else if let Some(e) = &result.error {
            warn!(task_id = request.id, sector = %request.sector.id, kind = %request.kind, error = %e, "task failed");
        }

        if let Some(work_id) = &request.work_id {
            self.inner.tracker.finish(work_id);
        }
        lock(&self.inner.status).record_outcome(request.id, request.kind, ok);
        request.completion.complete(result);
    }

    /// Wait on a work call left running by a previous process.
    pub(super) fn resume(&self, work_id: WorkId, call_id: CallId, completion: CompletionSlot) {
        let waiter = self.inner.correlator.subscribe(call_id.clone());
        let this = self.clone();
        self.inner.runtime.spawn(async move {
            let result = waiter.wait().await;
            debug!(work_id = %work_id, %call_id, ok = result.is_ok(), "recovered work finished");
            this.inner.tracker.finish(&work_id);
            completion.complete(result);
        });
    }
}
