//! Idempotent work tracking.
//!
//! A caller may attach a [`WorkId`] to a request. While that work is
//! running, resubmitting the same id only swaps the completion handler.
//! Once the work call is in flight its [`CallId`] is persisted, so after a
//! restart a resubmission can wait on the original call instead of starting
//! it over.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use sealyard_core::{CallId, TaskKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::request::CompletionSlot;

/// Content hash of a task kind and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkId(String);

impl WorkId {
    pub fn derive<P: Serialize>(kind: TaskKind, params: &P) -> Result<Self, SchedulerError> {
        let encoded = rmp_serde::to_vec(params).map_err(|e| SchedulerError::Codec(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(kind.short_code().as_bytes());
        hasher.update(&encoded);
        let digest = hasher.finalize();
        Ok(WorkId(format!("{digest:x}")))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        WorkId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkStatus {
    /// Accepted but the work call has not been issued yet.
    Start,
    /// The work call is out; `call_id` names it.
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkState {
    pub id: WorkId,
    pub status: WorkStatus,
    pub call_id: Option<CallId>,
}

/// Durable key/value storage for [`WorkState`] records.
pub trait WorkStore: Send + Sync {
    fn put(&self, id: &WorkId, value: Vec<u8>) -> Result<(), SchedulerError>;
    fn get(&self, id: &WorkId) -> Result<Option<Vec<u8>>, SchedulerError>;
    fn remove(&self, id: &WorkId) -> Result<(), SchedulerError>;
    fn keys(&self) -> Result<Vec<WorkId>, SchedulerError>;
}

impl<T: WorkStore + ?Sized> WorkStore for Arc<T> {
    fn put(&self, id: &WorkId, value: Vec<u8>) -> Result<(), SchedulerError> {
        (**self).put(id, value)
    }

    fn get(&self, id: &WorkId) -> Result<Option<Vec<u8>>, SchedulerError> {
        (**self).get(id)
    }

    fn remove(&self, id: &WorkId) -> Result<(), SchedulerError> {
        (**self).remove(id)
    }

    fn keys(&self) -> Result<Vec<WorkId>, SchedulerError> {
        (**self).keys()
    }
}

/// In-process store, useful for tests and nodes without persistence.
#[derive(Debug, Default)]
pub struct MemoryWorkStore {
    entries: RwLock<BTreeMap<WorkId, Vec<u8>>>,
}

impl MemoryWorkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkStore for MemoryWorkStore {
    fn put(&self, id: &WorkId, value: Vec<u8>) -> Result<(), SchedulerError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), value);
        Ok(())
    }

    fn get(&self, id: &WorkId) -> Result<Option<Vec<u8>>, SchedulerError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    fn remove(&self, id: &WorkId) -> Result<(), SchedulerError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<WorkId>, SchedulerError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}

/// What [`WorkTracker::begin`] decided for a request carrying a work id.
#[derive(Debug)]
pub(crate) enum Admission {
    /// First sighting: schedule normally.
    New,
    /// Already running in this process; the handler was swapped in.
    Attached,
    /// Left in flight by a previous process under this call id.
    Recovered(CallId),
}

pub(crate) struct WorkTracker {
    store: Arc<dyn WorkStore>,
    live: Mutex<HashMap<WorkId, CompletionSlot>>,
}

impl WorkTracker {
    pub(crate) fn new(store: Arc<dyn WorkStore>) -> Self {
        Self {
            store,
            live: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkId, CompletionSlot>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self, id: &WorkId) -> Result<Option<WorkState>, SchedulerError> {
        match self.store.get(id)? {
            Some(bytes) => rmp_serde::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SchedulerError::Codec(e.to_string())),
            None => Ok(None),
        }
    }

    fn save(&self, state: &WorkState) -> Result<(), SchedulerError> {
        let bytes = rmp_serde::to_vec(state).map_err(|e| SchedulerError::Codec(e.to_string()))?;
        self.store.put(&state.id, bytes)
    }

    /// Drop every record that never reached `InProgress`. Those were
    /// accepted but never dispatched, so their callers will resubmit.
    pub(crate) fn reset_works(&self) -> Result<usize, SchedulerError> {
        let mut dropped = 0;
        for id in self.store.keys()? {
            let keep = match self.load(&id) {
                Ok(Some(state)) => state.status == WorkStatus::InProgress,
                Ok(None) => continue,
                Err(e) => {
                    warn!(work_id = %id, error = %e, "discarding unreadable work record");
                    false
                }
            };
            if !keep {
                self.store.remove(&id)?;
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!(dropped, "reset unfinished work records");
        }
        Ok(dropped)
    }

    pub(crate) fn begin(&self, id: &WorkId, slot: &CompletionSlot) -> Result<Admission, SchedulerError> {
        let mut live = self.lock();
        if let Some(running) = live.get(id) {
            debug!(work_id = %id, "attaching to running work");
            running.take_over(slot);
            return Ok(Admission::Attached);
        }

        if let Some(state) = self.load(id)? {
            if let (WorkStatus::InProgress, Some(call_id)) = (state.status, state.call_id) {
                info!(work_id = %id, %call_id, "resuming work left in flight");
                live.insert(id.clone(), slot.clone());
                return Ok(Admission::Recovered(call_id));
            }
        }

        self.save(&WorkState {
            id: id.clone(),
            status: WorkStatus::Start,
            call_id: None,
        })?;
        live.insert(id.clone(), slot.clone());
        Ok(Admission::New)
    }

    pub(crate) fn mark_in_progress(&self, id: &WorkId, call_id: &CallId) -> Result<(), SchedulerError> {
        self.save(&WorkState {
            id: id.clone(),
            status: WorkStatus::InProgress,
            call_id: Some(call_id.clone()),
        })
    }

    /// Forget the work id once its handler is about to fire.
    pub(crate) fn finish(&self, id: &WorkId) {
        self.lock().remove(id);
        if let Err(e) = self.store.remove(id) {
            warn!(work_id = %id, error = %e, "failed to remove work record");
        }
    }

    pub(crate) fn state(&self, id: &WorkId) -> Result<Option<WorkState>, SchedulerError> {
        self.load(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sealyard_core::{CallResult, SectorId};

    use super::*;

    fn counting_slot(counter: &Arc<AtomicUsize>) -> CompletionSlot {
        let counter = Arc::clone(counter);
        CompletionSlot::new(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn work_id_depends_on_kind_and_params() {
        let a = WorkId::derive(TaskKind::PreCommit1, &(1000u64, 7u64)).unwrap();
        let b = WorkId::derive(TaskKind::PreCommit1, &(1000u64, 7u64)).unwrap();
        let c = WorkId::derive(TaskKind::PreCommit2, &(1000u64, 7u64)).unwrap();
        let d = WorkId::derive(TaskKind::PreCommit1, &(1000u64, 8u64)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn duplicate_attaches_and_replaces_handler() {
        let tracker = WorkTracker::new(Arc::new(MemoryWorkStore::new()));
        let id = WorkId::from_raw("w1");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let running = counting_slot(&first);
        assert!(matches!(tracker.begin(&id, &running).unwrap(), Admission::New));
        assert!(matches!(
            tracker.begin(&id, &counting_slot(&second)).unwrap(),
            Admission::Attached
        ));

        running.complete(CallResult::done());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn in_progress_work_survives_reset() {
        let store: Arc<dyn WorkStore> = Arc::new(MemoryWorkStore::new());
        let call_id = CallId::new(SectorId::new(1, 1));
        let started = WorkId::from_raw("started");
        let running = WorkId::from_raw("running");

        {
            let tracker = WorkTracker::new(Arc::clone(&store));
            tracker.begin(&started, &CompletionSlot::default()).unwrap();
            tracker.begin(&running, &CompletionSlot::default()).unwrap();
            tracker.mark_in_progress(&running, &call_id).unwrap();
        }

        // next process
        let tracker = WorkTracker::new(Arc::clone(&store));
        assert_eq!(tracker.reset_works().unwrap(), 1);
        assert!(tracker.state(&started).unwrap().is_none());

        let state = tracker.state(&running).unwrap().unwrap();
        assert_eq!(state.status, WorkStatus::InProgress);

        match tracker.begin(&running, &CompletionSlot::default()).unwrap() {
            Admission::Recovered(id) => assert_eq!(id, call_id),
            other => panic!("expected recovery, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_records_are_dropped_on_reset() {
        let store = Arc::new(MemoryWorkStore::new());
        store.put(&WorkId::from_raw("junk"), vec![0xc1]).unwrap();
        let tracker = WorkTracker::new(store.clone());
        assert_eq!(tracker.reset_works().unwrap(), 1);
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn finish_forgets_work() {
        let store = Arc::new(MemoryWorkStore::new());
        let tracker = WorkTracker::new(store.clone());
        let id = WorkId::from_raw("w");
        tracker.begin(&id, &CompletionSlot::default()).unwrap();
        tracker.finish(&id);
        assert!(store.keys().unwrap().is_empty());
        assert!(matches!(
            tracker.begin(&id, &CompletionSlot::default()).unwrap(),
            Admission::New
        ));
    }
}
