//! Static resource requirements per (task kind, proof variant) and the
//! physical description of a worker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::sector::ProofVariant;
use crate::task::TaskKind;

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;

/// What one task needs from a worker while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    /// Must be resident in RAM for decent performance.
    pub min_memory: u64,
    /// Required in RAM plus swap.
    pub max_memory: u64,
    /// `None` marks an exclusive task that needs every CPU idle.
    pub threads: Option<u64>,
    pub can_use_gpu: bool,
    /// RAM shared between the threads of the task.
    pub shared_min_memory: u64,
}

impl ResourceProfile {
    pub fn is_exclusive(&self) -> bool {
        self.threads.is_none()
    }
}

/// The profile used for pairs missing from the table: no memory, but
/// exclusive, so the task waits for every CPU to be idle and claims them all.
impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            min_memory: 0,
            max_memory: 0,
            threads: None,
            can_use_gpu: false,
            shared_min_memory: 0,
        }
    }
}

/// Physical capacity a worker reports when it registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCapacity {
    pub physical_memory: u64,
    pub swap_memory: u64,
    /// Memory used by the OS and other processes, never available to tasks.
    pub reserved_memory: u64,
    pub cpu_count: u64,
    pub gpu_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub hostname: String,
    pub capacity: WorkerCapacity,
}

impl WorkerInfo {
    pub fn new(hostname: impl Into<String>, capacity: WorkerCapacity) -> Self {
        Self {
            hostname: hostname.into(),
            capacity,
        }
    }
}

// ── Resource table ────────────────────────────────────────────

/// Immutable lookup from (task kind, proof variant) to a [`ResourceProfile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTable {
    entries: HashMap<(TaskKind, ProofVariant), ResourceProfile>,
}

impl ResourceTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a profile. Pairs missing from the table get the zero profile.
    pub fn profile(&self, kind: TaskKind, proof: ProofVariant) -> ResourceProfile {
        self.entries.get(&(kind, proof)).copied().unwrap_or_default()
    }

    pub fn contains(&self, kind: TaskKind, proof: ProofVariant) -> bool {
        self.entries.contains_key(&(kind, proof))
    }

    pub fn insert(&mut self, kind: TaskKind, proof: ProofVariant, profile: ResourceProfile) {
        self.entries.insert((kind, proof), profile);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace entries key by key with those from `overrides`.
    pub fn merge(&mut self, overrides: ResourceTable) {
        self.entries.extend(overrides.entries);
    }

    /// Parse `[[profile]]` entries from TOML.
    ///
    /// ```toml
    /// [[profile]]
    /// task = "seal/v0/precommit/1"
    /// proof = "32GiB"
    /// min_memory = 60129542144
    /// max_memory = 68719476736
    /// threads = 1
    /// shared_min_memory = 1073741824
    /// ```
    ///
    /// Omitting `threads` declares the task exclusive.
    pub fn from_toml(toml_str: &str) -> Result<Self, CoreError> {
        let raw: RawTable = toml::from_str(toml_str)?;
        let mut table = ResourceTable::empty();
        for entry in raw.profile {
            let kind: TaskKind = entry.task.parse()?;
            let proof: ProofVariant = entry.proof.parse()?;
            if entry.min_memory > entry.max_memory {
                return Err(CoreError::InvalidProfile(format!(
                    "{kind} / {proof}: min_memory {} exceeds max_memory {}",
                    entry.min_memory, entry.max_memory
                )));
            }
            table.insert(
                kind,
                proof,
                ResourceProfile {
                    min_memory: entry.min_memory,
                    max_memory: entry.max_memory,
                    threads: entry.threads,
                    can_use_gpu: entry.can_use_gpu,
                    shared_min_memory: entry.shared_min_memory,
                },
            );
        }
        Ok(table)
    }

    /// Built-in requirements for the stacked DRG proofs.
    pub fn builtin() -> Self {
        use ProofVariant::*;

        let mut table = ResourceTable::empty();

        let fixed = |min, max, threads: Option<u64>, gpu, shared| ResourceProfile {
            min_memory: min,
            max_memory: max,
            threads,
            can_use_gpu: gpu,
            shared_min_memory: shared,
        };

        // AddPiece
        table.insert(TaskKind::AddPiece, StackedDrg64GiBV1, fixed(64 * GIB, 64 * GIB, Some(1), false, GIB));
        table.insert(TaskKind::AddPiece, StackedDrg32GiBV1, fixed(64 * GIB, 64 * GIB, Some(1), false, GIB));
        table.insert(TaskKind::AddPiece, StackedDrg512MiBV1, fixed(GIB, GIB, Some(1), false, GIB));
        table.insert(TaskKind::AddPiece, StackedDrg8MiBV1, fixed(8 * MIB, 8 * MIB, Some(1), false, 8 * MIB));
        table.insert(TaskKind::AddPiece, StackedDrg2KiBV1, fixed(2 * KIB, 2 * KIB, Some(1), false, 2 * KIB));

        // PreCommit1, and Unseal which replays it
        for kind in [TaskKind::PreCommit1, TaskKind::Unseal] {
            table.insert(kind, StackedDrg64GiBV1, fixed(112 * GIB, 128 * GIB, Some(1), false, 10 * MIB));
            table.insert(kind, StackedDrg32GiBV1, fixed(56 * GIB, 64 * GIB, Some(1), false, GIB));
            table.insert(kind, StackedDrg512MiBV1, fixed(768 * MIB, GIB, Some(1), false, MIB));
            table.insert(kind, StackedDrg8MiBV1, fixed(8 * MIB, 8 * MIB, Some(1), false, 8 * MIB));
            table.insert(kind, StackedDrg2KiBV1, fixed(2 * KIB, 2 * KIB, Some(1), false, 2 * KIB));
        }

        // PreCommit2
        table.insert(TaskKind::PreCommit2, StackedDrg64GiBV1, fixed(64 * GIB, 64 * GIB, None, true, 60 * GIB));
        table.insert(TaskKind::PreCommit2, StackedDrg32GiBV1, fixed(32 * GIB, 32 * GIB, None, true, 30 * GIB));
        table.insert(TaskKind::PreCommit2, StackedDrg512MiBV1, fixed(GIB, 3 * GIB / 2, None, false, GIB));
        table.insert(TaskKind::PreCommit2, StackedDrg8MiBV1, fixed(8 * MIB, 8 * MIB, None, false, 8 * MIB));
        table.insert(TaskKind::PreCommit2, StackedDrg2KiBV1, fixed(2 * KIB, 2 * KIB, None, false, 2 * KIB));

        // Commit1
        table.insert(TaskKind::Commit1, StackedDrg64GiBV1, fixed(GIB, GIB, Some(0), false, GIB));
        table.insert(TaskKind::Commit1, StackedDrg32GiBV1, fixed(GIB, GIB, Some(0), false, GIB));
        table.insert(TaskKind::Commit1, StackedDrg512MiBV1, fixed(GIB, GIB, Some(0), false, GIB));
        table.insert(TaskKind::Commit1, StackedDrg8MiBV1, fixed(8 * MIB, 8 * MIB, Some(0), false, 8 * MIB));
        table.insert(TaskKind::Commit1, StackedDrg2KiBV1, fixed(2 * KIB, 2 * KIB, Some(0), false, 2 * KIB));

        // Commit2
        table.insert(TaskKind::Commit2, StackedDrg64GiBV1, fixed(60 * GIB, 190 * GIB, None, true, 64 * GIB));
        table.insert(TaskKind::Commit2, StackedDrg32GiBV1, fixed(30 * GIB, 150 * GIB, None, true, 32 * GIB));
        table.insert(TaskKind::Commit2, StackedDrg512MiBV1, fixed(GIB, 3 * GIB / 2, Some(1), true, 10 * GIB));
        table.insert(TaskKind::Commit2, StackedDrg8MiBV1, fixed(8 * MIB, 8 * MIB, Some(1), true, 8 * MIB));
        table.insert(TaskKind::Commit2, StackedDrg2KiBV1, fixed(2 * KIB, 2 * KIB, Some(1), true, 2 * KIB));

        // Fetch and ReadUnsealed only move bytes around
        for kind in [TaskKind::Fetch, TaskKind::ReadUnsealed] {
            for proof in ProofVariant::ALL {
                table.insert(kind, proof, fixed(MIB, MIB, Some(0), false, 0));
            }
        }

        table
    }
}

#[derive(Debug, Deserialize)]
struct RawTable {
    #[serde(default)]
    profile: Vec<RawProfile>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    task: String,
    proof: String,
    #[serde(default)]
    min_memory: u64,
    #[serde(default)]
    max_memory: u64,
    #[serde(default)]
    threads: Option<u64>,
    #[serde(default)]
    can_use_gpu: bool,
    #[serde(default)]
    shared_min_memory: u64,
}
