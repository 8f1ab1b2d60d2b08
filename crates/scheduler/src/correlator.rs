//! Rendezvous between dispatched calls and their reported results.
//!
//! Each [`CallId`] owns at most one cell: either a waiter parked on it or a
//! result that arrived before anyone asked. Whichever side comes second
//! completes the cell and removes it, so the order in which a remote result
//! and the local subscription show up does not matter.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sealyard_core::{CallError, CallErrorKind, CallId, CallResult};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

enum Cell {
    Waiting(oneshot::Sender<CallResult>),
    Ready(CallResult),
}

/// Future side of a subscription.
#[derive(Debug)]
pub struct CallWaiter {
    call_id: CallId,
    state: WaiterState,
}

#[derive(Debug)]
enum WaiterState {
    Ready(CallResult),
    Pending(oneshot::Receiver<CallResult>),
}

impl CallWaiter {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Resolves once the result for this call is delivered. If the
    /// subscription is dropped or replaced before that, resolves to an
    /// error result.
    pub async fn wait(self) -> CallResult {
        match self.state {
            WaiterState::Ready(result) => result,
            WaiterState::Pending(rx) => rx.await.unwrap_or_else(|_| {
                CallResult::failed(CallError::new(
                    CallErrorKind::Unknown,
                    format!("call {} abandoned before its result arrived", self.call_id),
                ))
            }),
        }
    }
}

pub struct Correlator {
    cells: Mutex<HashMap<CallId, Cell>>,
    runtime: Handle,
}

impl Correlator {
    pub fn new(runtime: Handle) -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
            runtime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CallId, Cell>> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the result of `call_id`. Registration happens before this
    /// returns; only the wait is asynchronous.
    pub fn subscribe(&self, call_id: CallId) -> CallWaiter {
        let mut cells = self.lock();
        if let Some(Cell::Ready(result)) = cells.remove(&call_id) {
            debug!(%call_id, "result was already waiting");
            return CallWaiter {
                call_id,
                state: WaiterState::Ready(result),
            };
        }
        let (tx, rx) = oneshot::channel();
        if cells.insert(call_id.clone(), Cell::Waiting(tx)).is_some() {
            warn!(%call_id, "replacing an existing subscription");
        }
        CallWaiter {
            call_id,
            state: WaiterState::Pending(rx),
        }
    }

    /// Run `handler` on the runtime once the result for `call_id` arrives,
    /// or right away (still on the runtime) if it already has.
    pub fn register_callback<F>(&self, call_id: CallId, handler: F)
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        let waiter = self.subscribe(call_id);
        self.runtime.spawn(async move {
            handler(waiter.wait().await);
        });
    }

    /// Hand a reported result to its waiter, or keep it until one shows up.
    pub fn deliver(&self, call_id: CallId, result: CallResult) {
        let mut cells = self.lock();
        match cells.remove(&call_id) {
            Some(Cell::Waiting(tx)) => {
                drop(cells);
                if tx.send(result).is_err() {
                    warn!(%call_id, "waiter went away before its result arrived");
                }
            }
            Some(Cell::Ready(_)) => {
                warn!(%call_id, "duplicate result, keeping the latest");
                cells.insert(call_id, Cell::Ready(result));
            }
            None => {
                debug!(%call_id, "stashing result until a waiter subscribes");
                cells.insert(call_id, Cell::Ready(result));
            }
        }
    }

    /// Calls with a waiter parked on them.
    pub fn waiting(&self) -> usize {
        self.lock()
            .values()
            .filter(|c| matches!(c, Cell::Waiting(_)))
            .count()
    }

    /// Results that arrived with nobody waiting yet.
    pub fn stashed(&self) -> usize {
        self.lock()
            .values()
            .filter(|c| matches!(c, Cell::Ready(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use sealyard_core::{CallPayload, SectorId};
    use tokio::sync::mpsc;

    use super::*;

    fn call() -> CallId {
        CallId::new(SectorId::new(1, 1))
    }

    #[tokio::test]
    async fn result_before_callback_is_delivered_once() {
        let correlator = Correlator::new(Handle::current());
        let id = call();
        let result = CallResult::ok(CallPayload::ReadOk(true));

        correlator.deliver(id.clone(), result.clone());
        assert_eq!(correlator.stashed(), 1);

        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let counter = Arc::clone(&calls);
        correlator.register_callback(id.clone(), move |r| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(r);
        });

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got, Some(result));
        assert_eq!(correlator.stashed(), 0);
        assert_eq!(correlator.waiting(), 0);

        // a second delivery is stashed for nobody and never reaches the handler
        correlator.deliver(id, CallResult::done());
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callback_before_result_is_delivered_once() {
        let correlator = Correlator::new(Handle::current());
        let id = call();
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator.register_callback(id.clone(), move |r| {
            let _ = tx.send(r);
        });
        assert_eq!(correlator.waiting(), 1);

        let result = CallResult::failed(CallError::new(CallErrorKind::WorkerRestart, "restarted"));
        correlator.deliver(id, result.clone());

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got, Some(result));
        assert!(rx.recv().await.is_none());
        assert_eq!(correlator.waiting(), 0);
    }

    #[tokio::test]
    async fn subscribe_then_wait() {
        let correlator = Arc::new(Correlator::new(Handle::current()));
        let id = call();
        let waiter = correlator.subscribe(id.clone());
        assert_eq!(waiter.call_id(), &id);

        let remote = Arc::clone(&correlator);
        tokio::spawn(async move {
            remote.deliver(id, CallResult::ok(CallPayload::Proof(vec![1, 2, 3])));
        });

        let result = waiter.wait().await;
        assert_eq!(result.payload, Some(CallPayload::Proof(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn replaced_subscription_resolves_to_error() {
        let correlator = Correlator::new(Handle::current());
        let id = call();
        let first = correlator.subscribe(id.clone());
        let second = correlator.subscribe(id.clone());

        let abandoned = first.wait().await;
        assert!(!abandoned.is_ok());

        correlator.deliver(id, CallResult::done());
        assert!(second.wait().await.is_ok());
    }
}
