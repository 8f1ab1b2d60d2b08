//! Scheduler side of the result feed: a ROUTER socket that hands each
//! reported result to a [`ResultSink`] and acknowledges it.

use std::sync::Arc;

use sealyard_core::ResultSink;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use zeromq::prelude::*;
use zeromq::{RouterSocket, ZmqMessage};

use crate::error::WireError;
use crate::frame::{ReturnAck, ReturnFrame, ACK_TOPIC, WIRE_VERSION};
use crate::transport::Transport;

/// Routing identity of the worker that sent a frame.
#[derive(Debug, Clone)]
struct Peer {
    identity: Vec<u8>,
}

pub struct ReturnListener {
    socket: Mutex<RouterSocket>,
}

impl ReturnListener {
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, WireError> {
        transport
            .ensure_ipc_dir()
            .map_err(|e| WireError::Transport(e.to_string()))?;
        transport
            .remove_stale_socket()
            .map_err(|e| WireError::Transport(e.to_string()))?;
        let mut socket = RouterSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding result listener");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Forward results to `sink` until the socket fails.
    pub async fn serve(&self, sink: Arc<dyn ResultSink>) -> Result<(), WireError> {
        loop {
            self.handle_next(sink.as_ref()).await?;
        }
    }

    /// Receive one frame, pass it to `sink` and acknowledge it.
    ///
    /// Returns `Ok(None)` for a frame that could not be decoded; it is
    /// logged and dropped without an ack. Only socket failures are errors.
    /// Holds the socket while waiting, so call it from one task at a time.
    pub async fn handle_next(&self, sink: &dyn ResultSink) -> Result<Option<ReturnAck>, WireError> {
        let zmq_msg = self.socket.lock().await.recv().await?;
        let (peer, frame) = match decode(&zmq_msg) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "skipping undecodable result frame");
                return Ok(None);
            }
        };

        let ack = if frame.version > WIRE_VERSION {
            warn!(frame_id = %frame.frame_id, version = frame.version, "unsupported frame version");
            ReturnAck::rejected(frame.frame_id, format!("unsupported version {}", frame.version))
        } else {
            debug!(
                frame_id = %frame.frame_id,
                call_id = %frame.call_id,
                ok = frame.result.is_ok(),
                "received call result"
            );
            match sink.return_result(frame.call_id.clone(), frame.result) {
                Ok(()) => ReturnAck::accepted(frame.frame_id),
                Err(e) => {
                    warn!(frame_id = %frame.frame_id, call_id = %frame.call_id, error = %e, "sink refused result");
                    ReturnAck::rejected(frame.frame_id, e.to_string())
                }
            }
        };

        self.send_ack(peer, &ack).await?;
        Ok(Some(ack))
    }

    /// Frames sent: `[identity, topic, envelope]`; the ROUTER pops the
    /// identity to pick the peer.
    async fn send_ack(&self, peer: Peer, ack: &ReturnAck) -> Result<(), WireError> {
        let mut zmq_msg = ZmqMessage::from(peer.identity);
        zmq_msg.push_back(ACK_TOPIC.as_bytes().to_vec().into());
        zmq_msg.push_back(ack.to_bytes()?.into());
        self.socket.lock().await.send(zmq_msg).await?;
        Ok(())
    }
}

/// Split `[identity, (empty)*, topic, envelope]` and decode the envelope.
fn decode(zmq_msg: &ZmqMessage) -> Result<(Peer, ReturnFrame), WireError> {
    let frames: Vec<_> = zmq_msg.iter().collect();
    let Some((identity, rest)) = frames.split_first() else {
        return Err(WireError::Transport("empty message".into()));
    };

    let data_frames: Vec<_> = rest.iter().skip_while(|f| f.as_ref().is_empty()).collect();
    if data_frames.len() < 2 {
        return Err(WireError::Transport(format!(
            "expected [topic, envelope] after identity, got {} data frames",
            data_frames.len()
        )));
    }

    let frame = ReturnFrame::from_bytes(data_frames[1].as_ref())?;
    let peer = Peer {
        identity: identity.as_ref().to_vec(),
    };
    Ok((peer, frame))
}
