use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::CoreError;
use crate::sector::SectorId;

/// Identifies one in-flight asynchronous worker call for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId {
    pub sector: SectorId,
    pub token: String,
}

impl CallId {
    /// Fresh call id with a random token.
    pub fn new(sector: SectorId) -> Self {
        Self {
            sector,
            token: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_token(sector: SectorId, token: impl Into<String>) -> Self {
        Self {
            sector,
            token: token.into(),
        }
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sector, self.token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceInfo {
    pub size: u64,
    pub cid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorCids {
    pub sealed: String,
    pub unsealed: String,
}

/// Output of a finished call. Which variant arrives depends on the stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallPayload {
    Piece(PieceInfo),
    PreCommit1Output(Vec<u8>),
    SectorCids(SectorCids),
    Commit1Output(Vec<u8>),
    Proof(Vec<u8>),
    ReplicaUpdate(SectorCids),
    VanillaProofs(Vec<Vec<u8>>),
    ReadOk(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallErrorKind {
    Unknown,
    TempUnknown,
    WorkerRestart,
    AllocateSpace,
    PrepareFailed,
    WorkFailed,
    NoWorkerFound,
}

impl std::fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallErrorKind::Unknown => "unknown",
            CallErrorKind::TempUnknown => "temporary",
            CallErrorKind::WorkerRestart => "worker restarted",
            CallErrorKind::AllocateSpace => "allocate space",
            CallErrorKind::PrepareFailed => "prepare failed",
            CallErrorKind::WorkFailed => "work failed",
            CallErrorKind::NoWorkerFound => "no worker found",
        };
        f.write_str(s)
    }
}

/// Error carried through the completion channel. Serializable so a remote
/// worker can report it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Completion of an asynchronous call: a payload, an error, or neither
/// (stages that produce nothing, such as finalize).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    pub payload: Option<CallPayload>,
    pub error: Option<CallError>,
}

impl CallResult {
    pub fn ok(payload: CallPayload) -> Self {
        Self {
            payload: Some(payload),
            error: None,
        }
    }

    pub fn done() -> Self {
        Self::default()
    }

    pub fn failed(error: CallError) -> Self {
        Self {
            payload: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<CallError> for CallResult {
    fn from(error: CallError) -> Self {
        CallResult::failed(error)
    }
}

/// Receiving end of remote call completions.
pub trait ResultSink: Send + Sync {
    fn return_result(&self, call_id: CallId, result: CallResult) -> Result<(), CoreError>;
}

impl<T: ResultSink + ?Sized> ResultSink for Arc<T> {
    fn return_result(&self, call_id: CallId, result: CallResult) -> Result<(), CoreError> {
        (**self).return_result(call_id, result)
    }
}
