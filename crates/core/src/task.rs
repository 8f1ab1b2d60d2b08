use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One stage of the sealing/proving pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    AddPiece,
    PreCommit1,
    PreCommit2,
    Commit1,
    Commit2,
    Finalize,
    Fetch,
    Unseal,
    ReadUnsealed,
    ReplicaUpdate,
    ProveReplicaUpdate1,
    ProveReplicaUpdate2,
    RegenSectorKey,
    FinalizeReplicaUpdate,
}

impl TaskKind {
    pub const ALL: [TaskKind; 14] = [
        TaskKind::AddPiece,
        TaskKind::PreCommit1,
        TaskKind::PreCommit2,
        TaskKind::Commit1,
        TaskKind::Commit2,
        TaskKind::Finalize,
        TaskKind::Fetch,
        TaskKind::Unseal,
        TaskKind::ReadUnsealed,
        TaskKind::ReplicaUpdate,
        TaskKind::ProveReplicaUpdate1,
        TaskKind::ProveReplicaUpdate2,
        TaskKind::RegenSectorKey,
        TaskKind::FinalizeReplicaUpdate,
    ];

    /// Position in the fixed scheduling order. Lower runs first.
    ///
    /// Stages that free resources (finalize, fetch) go before stages that
    /// start new sectors, so a busy pool drains before it fills up again.
    pub fn precedence(&self) -> i8 {
        match self {
            TaskKind::FinalizeReplicaUpdate => -2,
            TaskKind::Finalize => -2,
            TaskKind::Fetch => -1,
            TaskKind::ReadUnsealed => -1,
            TaskKind::Unseal => 1,
            TaskKind::Commit1 => 2,
            TaskKind::Commit2 => 3,
            TaskKind::PreCommit2 => 4,
            TaskKind::PreCommit1 => 5,
            TaskKind::ProveReplicaUpdate1 => 6,
            TaskKind::ProveReplicaUpdate2 => 7,
            TaskKind::ReplicaUpdate => 8,
            TaskKind::AddPiece => 9,
            TaskKind::RegenSectorKey => 10,
        }
    }

    /// Compare by scheduling precedence only.
    pub fn precedence_cmp(&self, other: &TaskKind) -> Ordering {
        self.precedence().cmp(&other.precedence())
    }

    /// Stable wire name, e.g. `seal/v0/precommit/1`.
    pub fn short_code(&self) -> &'static str {
        match self {
            TaskKind::AddPiece => "seal/v0/addpiece",
            TaskKind::PreCommit1 => "seal/v0/precommit/1",
            TaskKind::PreCommit2 => "seal/v0/precommit/2",
            TaskKind::Commit1 => "seal/v0/commit/1",
            TaskKind::Commit2 => "seal/v0/commit/2",
            TaskKind::Finalize => "seal/v0/finalize",
            TaskKind::Fetch => "seal/v0/fetch",
            TaskKind::Unseal => "seal/v0/unseal",
            TaskKind::ReadUnsealed => "seal/v0/unsealread",
            TaskKind::ReplicaUpdate => "seal/v0/replicaupdate",
            TaskKind::ProveReplicaUpdate1 => "seal/v0/provereplicaupdate/1",
            TaskKind::ProveReplicaUpdate2 => "seal/v0/provereplicaupdate/2",
            TaskKind::RegenSectorKey => "seal/v0/regensectorkey",
            TaskKind::FinalizeReplicaUpdate => "seal/v0/finalize/replicaupdate",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_code())
    }
}

impl FromStr for TaskKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.short_code() == s)
            .ok_or_else(|| CoreError::UnknownTaskKind(s.to_string()))
    }
}
