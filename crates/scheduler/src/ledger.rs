//! Per-worker resource accounting.
//!
//! Every worker owns two ledgers: `preparing` holds resources optimistically
//! reserved while a task's prepare phase runs, `active` holds resources of
//! tasks doing real work. Both use the same admission predicate.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use sealyard_core::{ResourceProfile, WorkerCapacity};
use serde::Serialize;
use tracing::warn;

/// Committed quantities of one ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounters {
    pub memory_committed_min: u64,
    pub memory_committed_max: u64,
    pub cpu_committed: u64,
    pub gpu_in_use: bool,
}

impl LedgerCounters {
    /// Does `profile` fit into what is left of `capacity`?
    pub fn can_admit(&self, profile: &ResourceProfile, capacity: &WorkerCapacity) -> bool {
        let base = capacity
            .reserved_memory
            .saturating_add(self.memory_committed_min)
            .saturating_add(profile.shared_min_memory);

        if base.saturating_add(profile.min_memory) > capacity.physical_memory {
            return false;
        }
        if base.saturating_add(profile.max_memory)
            > capacity.physical_memory.saturating_add(capacity.swap_memory)
        {
            return false;
        }

        match profile.threads {
            Some(threads) => {
                if self.cpu_committed.saturating_add(threads) > capacity.cpu_count {
                    return false;
                }
            }
            None => {
                if self.cpu_committed != 0 {
                    return false;
                }
            }
        }

        if uses_gpu(profile, capacity) && self.gpu_in_use {
            return false;
        }

        true
    }

    /// Highest of the CPU, RAM and RAM+swap load fractions.
    pub fn utilization(&self, capacity: &WorkerCapacity) -> f64 {
        let cpu = fraction(self.cpu_committed, capacity.cpu_count);
        let memory_min = fraction(
            capacity.reserved_memory.saturating_add(self.memory_committed_min),
            capacity.physical_memory,
        );
        let memory_max = fraction(
            capacity.reserved_memory.saturating_add(self.memory_committed_max),
            capacity.physical_memory.saturating_add(capacity.swap_memory),
        );
        cpu.max(memory_min).max(memory_max)
    }

    fn add(&mut self, profile: &ResourceProfile, capacity: &WorkerCapacity) {
        self.memory_committed_min = self.memory_committed_min.saturating_add(profile.min_memory);
        self.memory_committed_max = self.memory_committed_max.saturating_add(profile.max_memory);
        self.cpu_committed = self.cpu_committed.saturating_add(cpu_claim(profile, capacity));
        if uses_gpu(profile, capacity) {
            self.gpu_in_use = true;
        }
    }

    fn sub(&mut self, profile: &ResourceProfile, capacity: &WorkerCapacity) {
        self.memory_committed_min =
            checked_release("memory_committed_min", self.memory_committed_min, profile.min_memory);
        self.memory_committed_max =
            checked_release("memory_committed_max", self.memory_committed_max, profile.max_memory);
        self.cpu_committed =
            checked_release("cpu_committed", self.cpu_committed, cpu_claim(profile, capacity));
        if uses_gpu(profile, capacity) {
            self.gpu_in_use = false;
        }
    }
}

/// Exclusive tasks claim every CPU on the worker.
fn cpu_claim(profile: &ResourceProfile, capacity: &WorkerCapacity) -> u64 {
    profile.threads.unwrap_or(capacity.cpu_count)
}

fn uses_gpu(profile: &ResourceProfile, capacity: &WorkerCapacity) -> bool {
    profile.can_use_gpu && !capacity.gpu_ids.is_empty()
}

fn fraction(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64
    }
}

fn checked_release(counter: &'static str, current: u64, amount: u64) -> u64 {
    match current.checked_sub(amount) {
        Some(v) => v,
        None => {
            warn!(counter, current, amount, "ledger release exceeds committed amount, clamping to zero");
            0
        }
    }
}

// ── Ledger ────────────────────────────────────────────────────────────

/// Lock-guarded counters. Releases wake threads parked in
/// [`ResourceLedger::acquire_blocking`].
#[derive(Debug, Default)]
pub struct ResourceLedger {
    counters: Mutex<LedgerCounters>,
    released: Condvar,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> LedgerCounters {
        *self.lock()
    }

    pub fn can_admit(&self, profile: &ResourceProfile, capacity: &WorkerCapacity) -> bool {
        self.lock().can_admit(profile, capacity)
    }

    /// Commit `profile` unconditionally. Used after a successful
    /// [`can_admit`](Self::can_admit) under the caller's own serialization,
    /// and by forced admission.
    pub fn reserve(&self, profile: &ResourceProfile, capacity: &WorkerCapacity) {
        self.lock().add(profile, capacity);
    }

    /// Check and commit under one lock acquisition.
    pub fn try_reserve(&self, profile: &ResourceProfile, capacity: &WorkerCapacity) -> bool {
        let mut counters = self.lock();
        if counters.can_admit(profile, capacity) {
            counters.add(profile, capacity);
            true
        } else {
            false
        }
    }

    pub fn release(&self, profile: &ResourceProfile, capacity: &WorkerCapacity) {
        self.lock().sub(profile, capacity);
        self.released.notify_all();
    }

    pub fn utilization(&self, capacity: &WorkerCapacity) -> f64 {
        self.lock().utilization(capacity)
    }

    /// Park the calling thread until `profile` fits, then commit it.
    ///
    /// The returned guard releases on drop. This blocks an OS thread, so
    /// async callers must go through `tokio::task::spawn_blocking`.
    pub fn acquire_blocking<'a>(
        &'a self,
        profile: &ResourceProfile,
        capacity: &WorkerCapacity,
    ) -> LedgerGuard<'a> {
        let mut counters = self.lock();
        while !counters.can_admit(profile, capacity) {
            counters = self
                .released
                .wait(counters)
                .unwrap_or_else(PoisonError::into_inner);
        }
        counters.add(profile, capacity);
        LedgerGuard {
            ledger: self,
            profile: *profile,
            capacity: capacity.clone(),
        }
    }
}

/// Reservation held by [`ResourceLedger::acquire_blocking`].
#[derive(Debug)]
pub struct LedgerGuard<'a> {
    ledger: &'a ResourceLedger,
    profile: ResourceProfile,
    capacity: WorkerCapacity,
}

impl LedgerGuard<'_> {
    pub fn profile(&self) -> &ResourceProfile {
        &self.profile
    }
}

impl Drop for LedgerGuard<'_> {
    fn drop(&mut self) {
        self.ledger.release(&self.profile, &self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use sealyard_core::{ProofVariant, ResourceTable, TaskKind};

    use super::*;

    const MIB: u64 = 1 << 20;

    fn capacity(physical: u64, swap: u64, cpus: u64) -> WorkerCapacity {
        WorkerCapacity {
            physical_memory: physical,
            swap_memory: swap,
            reserved_memory: 0,
            cpu_count: cpus,
            gpu_ids: Vec::new(),
        }
    }

    fn profile(min: u64, max: u64, threads: Option<u64>) -> ResourceProfile {
        ResourceProfile {
            min_memory: min,
            max_memory: max,
            threads,
            can_use_gpu: false,
            shared_min_memory: 0,
        }
    }

    #[test]
    fn add_piece_2kib_passes_memory_but_needs_a_cpu() {
        let table = ResourceTable::builtin();
        let p = table.profile(TaskKind::AddPiece, ProofVariant::StackedDrg2KiBV1);
        let cap = capacity(1 << 20, 0, 0);
        let ledger = LedgerCounters::default();

        // 0 + 0 + 2048 + 2048 <= 1 MiB on both memory checks
        let with_cpu = WorkerCapacity { cpu_count: 1, ..cap.clone() };
        assert!(ledger.can_admit(&p, &with_cpu));

        // The AddPiece profile asks for one thread, so a worker reporting
        // zero CPUs fails the CPU check even though both memory checks pass.
        // That scenario is admitted by the forced-admission fallback
        // (see runner::tests::forced_admission_on_single_idle_worker).
        assert!(!ledger.can_admit(&p, &cap));
    }

    #[test]
    fn paired_reserve_release_restores_counters() {
        let ledger = ResourceLedger::new();
        let cap = capacity(64 * MIB, 16 * MIB, 8);
        let a = profile(MIB, 2 * MIB, Some(2));
        let b = profile(4 * MIB, 4 * MIB, Some(1));
        let before = ledger.snapshot();

        ledger.reserve(&a, &cap);
        ledger.reserve(&b, &cap);
        assert_eq!(ledger.snapshot().cpu_committed, 3);
        assert_eq!(ledger.snapshot().memory_committed_min, 5 * MIB);
        ledger.release(&a, &cap);
        assert_eq!(ledger.snapshot().cpu_committed, 1);
        ledger.release(&b, &cap);

        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn unpaired_release_clamps_at_zero() {
        let ledger = ResourceLedger::new();
        let cap = capacity(64 * MIB, 0, 8);
        ledger.release(&profile(MIB, MIB, Some(1)), &cap);
        assert_eq!(ledger.snapshot(), LedgerCounters::default());
    }

    #[test]
    fn memory_checks_count_committed_and_shared() {
        let cap = WorkerCapacity {
            reserved_memory: MIB,
            ..capacity(8 * MIB, 4 * MIB, 4)
        };
        let mut counters = LedgerCounters::default();
        counters.memory_committed_min = 4 * MIB;

        let mut p = profile(2 * MIB, 2 * MIB, Some(1));
        assert!(counters.can_admit(&p, &cap));

        p.shared_min_memory = 2 * MIB;
        assert!(!counters.can_admit(&p, &cap), "1 + 4 + 2 + 2 > 8 MiB of RAM");

        // max_memory may spill into swap
        let spill = profile(MIB, 5 * MIB, Some(1));
        assert!(counters.can_admit(&spill, &cap));
        let too_big = profile(MIB, 8 * MIB, Some(1));
        assert!(!counters.can_admit(&too_big, &cap));
    }

    #[test]
    fn exclusive_task_needs_idle_cpus() {
        let cap = capacity(64 * MIB, 0, 4);
        let ledger = ResourceLedger::new();
        let exclusive = profile(MIB, MIB, None);
        let single = profile(MIB, MIB, Some(1));

        ledger.reserve(&single, &cap);
        assert!(!ledger.can_admit(&exclusive, &cap));
        ledger.release(&single, &cap);

        assert!(ledger.try_reserve(&exclusive, &cap));
        assert_eq!(ledger.snapshot().cpu_committed, 4);
        assert!(!ledger.can_admit(&single, &cap));
        ledger.release(&exclusive, &cap);
        assert_eq!(ledger.snapshot().cpu_committed, 0);
    }

    #[test]
    fn gpu_is_exclusive_only_when_present() {
        let mut p = profile(MIB, MIB, Some(1));
        p.can_use_gpu = true;

        let no_gpu = capacity(64 * MIB, 0, 8);
        let ledger = ResourceLedger::new();
        assert!(ledger.try_reserve(&p, &no_gpu));
        assert!(ledger.try_reserve(&p, &no_gpu));
        assert!(!ledger.snapshot().gpu_in_use);

        let with_gpu = WorkerCapacity {
            gpu_ids: vec!["GeForce RTX 3090".into()],
            ..capacity(64 * MIB, 0, 8)
        };
        let ledger = ResourceLedger::new();
        assert!(ledger.try_reserve(&p, &with_gpu));
        assert!(ledger.snapshot().gpu_in_use);
        assert!(!ledger.try_reserve(&p, &with_gpu));
        ledger.release(&p, &with_gpu);
        assert!(ledger.try_reserve(&p, &with_gpu));
    }

    #[test]
    fn admission_is_monotonic_in_capacity() {
        let mut counters = LedgerCounters::default();
        counters.memory_committed_min = 2 * MIB;
        counters.cpu_committed = 1;
        let profiles = [
            profile(MIB, 2 * MIB, Some(1)),
            profile(3 * MIB, 6 * MIB, Some(2)),
            profile(MIB, MIB, None),
            profile(0, 0, Some(0)),
        ];
        let base = WorkerCapacity {
            reserved_memory: MIB,
            ..capacity(6 * MIB, 2 * MIB, 2)
        };

        type Grow = fn(&mut WorkerCapacity, bool);
        let fields: [Grow; 4] = [
            |c, up| c.physical_memory = if up { c.physical_memory + MIB } else { c.physical_memory - MIB },
            |c, up| c.swap_memory = if up { c.swap_memory + MIB } else { c.swap_memory - MIB },
            |c, up| c.reserved_memory = if up { c.reserved_memory - MIB } else { c.reserved_memory + MIB },
            |c, up| c.cpu_count = if up { c.cpu_count + 1 } else { c.cpu_count - 1 },
        ];

        for p in &profiles {
            let accepted = counters.can_admit(p, &base);
            for field in &fields {
                let mut grown = base.clone();
                field(&mut grown, true);
                let mut shrunk = base.clone();
                field(&mut shrunk, false);
                if accepted {
                    assert!(counters.can_admit(p, &grown), "growing rejected {p:?}");
                } else {
                    assert!(!counters.can_admit(p, &shrunk), "shrinking accepted {p:?}");
                }
            }
        }
    }

    #[test]
    fn utilization_takes_the_highest_load() {
        let cap = capacity(8 * MIB, 8 * MIB, 4);
        let ledger = ResourceLedger::new();
        assert_eq!(ledger.utilization(&cap), 0.0);

        ledger.reserve(&profile(2 * MIB, 2 * MIB, Some(1)), &cap);
        // cpu 0.25, ram 0.25, ram+swap 0.125
        assert!((ledger.utilization(&cap) - 0.25).abs() < f64::EPSILON);

        ledger.reserve(&profile(0, 0, Some(2)), &cap);
        assert!((ledger.utilization(&cap) - 0.75).abs() < f64::EPSILON);

        assert_eq!(ledger.utilization(&WorkerCapacity::default()), 0.0);
    }

    #[test]
    fn blocking_acquire_waits_for_release() {
        let cap = capacity(4 * MIB, 0, 1);
        let p = profile(MIB, MIB, Some(1));
        let ledger = Arc::new(ResourceLedger::new());
        ledger.reserve(&p, &cap);

        let waiter = {
            let ledger = Arc::clone(&ledger);
            let cap = cap.clone();
            thread::spawn(move || {
                let guard = ledger.acquire_blocking(&p, &cap);
                assert_eq!(guard.profile().threads, Some(1));
                drop(guard);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        ledger.release(&p, &cap);
        waiter.join().unwrap();

        assert_eq!(ledger.snapshot(), LedgerCounters::default());
    }
}
