//! Envelopes exchanged on the result feed, MessagePack encoded.

use chrono::{DateTime, Utc};
use sealyard_core::{CallId, CallResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic frame sent ahead of a [`ReturnFrame`].
pub const RETURN_TOPIC: &str = "call.return";
/// Topic frame sent ahead of a [`ReturnAck`].
pub const ACK_TOPIC: &str = "call.return.ack";

/// Highest envelope version this build understands.
pub const WIRE_VERSION: u16 = 1;

/// A worker reporting the outcome of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnFrame {
    /// Matches the acknowledgement to this frame.
    pub frame_id: Uuid,
    pub call_id: CallId,
    pub result: CallResult,
    pub sent_at: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: u16,
}

fn default_version() -> u16 {
    WIRE_VERSION
}

impl ReturnFrame {
    pub fn new(call_id: CallId, result: CallResult) -> Self {
        Self {
            frame_id: Uuid::new_v4(),
            call_id,
            result,
            sent_at: Utc::now(),
            version: WIRE_VERSION,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// The listener's answer to a [`ReturnFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnAck {
    pub frame_id: Uuid,
    pub accepted: bool,
    /// Why the result was refused. Set only when `accepted` is false.
    pub error: Option<String>,
}

impl ReturnAck {
    pub fn accepted(frame_id: Uuid) -> Self {
        Self {
            frame_id,
            accepted: true,
            error: None,
        }
    }

    pub fn rejected(frame_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            frame_id,
            accepted: false,
            error: Some(reason.into()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealyard_core::{CallError, CallErrorKind, SectorId};

    #[test]
    fn frame_keeps_error_results() {
        let call_id = CallId::with_token(SectorId::new(1000, 3), "c1");
        let error = CallError::new(CallErrorKind::AllocateSpace, "disk full");
        let frame = ReturnFrame::new(call_id.clone(), CallResult::failed(error.clone()));

        let decoded = ReturnFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.frame_id, frame.frame_id);
        assert_eq!(decoded.call_id, call_id);
        assert_eq!(decoded.result.error, Some(error));
        assert_eq!(decoded.version, WIRE_VERSION);
    }

    #[test]
    fn rejection_carries_reason() {
        let id = Uuid::new_v4();
        let ack = ReturnAck::rejected(id, "unknown call");
        assert!(!ack.accepted);
        assert_eq!(ack.error.as_deref(), Some("unknown call"));
        assert!(ReturnAck::accepted(id).error.is_none());
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(ReturnFrame::from_bytes(b"not a frame").is_err());
    }
}
