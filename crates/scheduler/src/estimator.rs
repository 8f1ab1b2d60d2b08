//! Per-worker execution time history.
//!
//! Feeds selector policies that prefer historically faster workers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use sealyard_core::{CallId, TaskKind};
use tracing::debug;

use crate::worker::WorkerId;

pub const DEFAULT_WINDOW: usize = 10;

/// Fixed-size window of samples backed by a `VecDeque`, oldest first.
#[derive(Debug, Clone)]
struct SampleWindow {
    buf: VecDeque<Duration>,
    capacity: usize,
}

impl SampleWindow {
    fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, sample: Duration) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
    }

    /// Sample `i` (1-based, oldest first) weighs `i`; weights sum to n(n+1)/2.
    fn weighted_average(&self) -> Option<Duration> {
        let n = self.buf.len() as u128;
        if n == 0 {
            return None;
        }
        let total: u128 = self
            .buf
            .iter()
            .zip(1u128..)
            .map(|(d, weight)| d.as_nanos() * weight)
            .sum();
        let nanos = total / (n * (n + 1) / 2);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }
}

#[derive(Debug)]
struct Running {
    worker: WorkerId,
    kind: TaskKind,
    started: Instant,
}

#[derive(Debug, Default)]
struct EstimatorState {
    running: HashMap<CallId, Running>,
    samples: HashMap<(WorkerId, TaskKind), SampleWindow>,
}

#[derive(Debug)]
pub struct Estimator {
    window: usize,
    state: Mutex<EstimatorState>,
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl Estimator {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            state: Mutex::new(EstimatorState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EstimatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self, worker: WorkerId, kind: TaskKind, call_id: CallId) {
        self.lock().running.insert(
            call_id,
            Running {
                worker,
                kind,
                started: Instant::now(),
            },
        );
    }

    /// Record the elapsed time of a started call.
    pub fn finish(&self, call_id: &CallId) {
        let mut state = self.lock();
        let Some(running) = state.running.remove(call_id) else {
            debug!(%call_id, "finish for a call that was never started");
            return;
        };
        let elapsed = running.started.elapsed();
        let window = self.window;
        state
            .samples
            .entry((running.worker, running.kind))
            .or_insert_with(|| SampleWindow::new(window))
            .push(elapsed);
    }

    /// Forget a started call without recording a sample.
    pub fn abort(&self, call_id: &CallId) {
        self.lock().running.remove(call_id);
    }

    /// Record a known duration directly, e.g. when seeding from history.
    pub fn record(&self, worker: WorkerId, kind: TaskKind, duration: Duration) {
        let window = self.window;
        self.lock()
            .samples
            .entry((worker, kind))
            .or_insert_with(|| SampleWindow::new(window))
            .push(duration);
    }

    pub fn average(&self, worker: WorkerId, kind: TaskKind) -> Option<Duration> {
        self.lock()
            .samples
            .get(&(worker, kind))
            .and_then(SampleWindow::weighted_average)
    }

    pub fn running(&self) -> usize {
        self.lock().running.len()
    }
}
