//! Worker capability surface and the scheduler's per-worker entry.

use std::collections::BTreeSet;
use std::sync::Arc;

use sealyard_core::{
    AcquireMode, ByteRange, CallError, CallErrorKind, CallId, PieceInfo, SectorCids,
    SectorFileType, SectorRef, TaskKind, WorkerCapacity, WorkerInfo,
};

use crate::ledger::ResourceLedger;

pub type WorkerId = u64;

fn unsupported(kind: TaskKind) -> Result<CallId, CallError> {
    Err(CallError::new(
        CallErrorKind::Unknown,
        format!("{kind} is not implemented by this worker"),
    ))
}

/// A local or remote execution surface for sealing phases.
///
/// Every phase call only starts the work and returns the [`CallId`] under
/// which the result will later be delivered to the scheduler. Workers only
/// implement the phases they advertise through
/// [`supported_tasks`](SealWorker::supported_tasks).
pub trait SealWorker: Send + Sync {
    fn info(&self) -> Result<WorkerInfo, CallError>;

    fn supported_tasks(&self) -> Result<BTreeSet<TaskKind>, CallError>;

    fn add_piece(
        &self,
        _sector: &SectorRef,
        _existing_piece_sizes: &[u64],
        _new_piece_size: u64,
    ) -> Result<CallId, CallError> {
        unsupported(TaskKind::AddPiece)
    }

    fn seal_pre_commit1(
        &self,
        _sector: &SectorRef,
        _ticket: &[u8],
        _pieces: &[PieceInfo],
    ) -> Result<CallId, CallError> {
        unsupported(TaskKind::PreCommit1)
    }

    fn seal_pre_commit2(&self, _sector: &SectorRef, _pc1_output: &[u8]) -> Result<CallId, CallError> {
        unsupported(TaskKind::PreCommit2)
    }

    fn seal_commit1(
        &self,
        _sector: &SectorRef,
        _ticket: &[u8],
        _seed: &[u8],
        _pieces: &[PieceInfo],
        _cids: &SectorCids,
    ) -> Result<CallId, CallError> {
        unsupported(TaskKind::Commit1)
    }

    fn seal_commit2(&self, _sector: &SectorRef, _c1_output: &[u8]) -> Result<CallId, CallError> {
        unsupported(TaskKind::Commit2)
    }

    fn finalize_sector(&self, _sector: &SectorRef, _keep_unsealed: &[ByteRange]) -> Result<CallId, CallError> {
        unsupported(TaskKind::Finalize)
    }

    fn fetch(
        &self,
        _sector: &SectorRef,
        _file_types: &[SectorFileType],
        _mode: AcquireMode,
    ) -> Result<CallId, CallError> {
        unsupported(TaskKind::Fetch)
    }

    fn unseal_piece(
        &self,
        _sector: &SectorRef,
        _range: ByteRange,
        _randomness: &[u8],
        _unsealed_cid: &str,
    ) -> Result<CallId, CallError> {
        unsupported(TaskKind::Unseal)
    }

    fn read_piece(&self, _sector: &SectorRef, _range: ByteRange) -> Result<CallId, CallError> {
        unsupported(TaskKind::ReadUnsealed)
    }

    fn replica_update(&self, _sector: &SectorRef, _pieces: &[PieceInfo]) -> Result<CallId, CallError> {
        unsupported(TaskKind::ReplicaUpdate)
    }

    fn prove_replica_update1(
        &self,
        _sector: &SectorRef,
        _old_sealed: &str,
        _new_sealed: &str,
        _new_unsealed: &str,
    ) -> Result<CallId, CallError> {
        unsupported(TaskKind::ProveReplicaUpdate1)
    }

    fn prove_replica_update2(
        &self,
        _sector: &SectorRef,
        _old_sealed: &str,
        _new_sealed: &str,
        _new_unsealed: &str,
        _vanilla_proofs: &[Vec<u8>],
    ) -> Result<CallId, CallError> {
        unsupported(TaskKind::ProveReplicaUpdate2)
    }

    fn regen_sector_key(&self, _sector: &SectorRef, _pieces: &[PieceInfo]) -> Result<CallId, CallError> {
        unsupported(TaskKind::RegenSectorKey)
    }

    fn finalize_replica_update(
        &self,
        _sector: &SectorRef,
        _keep_unsealed: &[ByteRange],
    ) -> Result<CallId, CallError> {
        unsupported(TaskKind::FinalizeReplicaUpdate)
    }
}

/// A registered worker as the scheduler sees it.
pub struct WorkerHandle {
    pub id: WorkerId,
    pub worker: Arc<dyn SealWorker>,
    pub info: WorkerInfo,
    pub preparing: ResourceLedger,
    pub active: ResourceLedger,
}

impl WorkerHandle {
    pub fn new(id: WorkerId, worker: Arc<dyn SealWorker>, info: WorkerInfo) -> Self {
        Self {
            id,
            worker,
            info,
            preparing: ResourceLedger::new(),
            active: ResourceLedger::new(),
        }
    }

    pub fn capacity(&self) -> &WorkerCapacity {
        &self.info.capacity
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("hostname", &self.info.hostname)
            .field("preparing", &self.preparing.snapshot())
            .field("active", &self.active.snapshot())
            .finish()
    }
}
