//! Worker side of the result feed: a DEALER socket that sends
//! [`ReturnFrame`]s and matches [`ReturnAck`]s back by `frame_id`.
//!
//! Framing as seen by zeromq-rs 0.4: the DEALER sends `[topic, envelope]`,
//! the ROUTER receives `[identity, topic, envelope]` and replies with the
//! same shape, and the DEALER receives `[topic, envelope]` again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sealyard_core::{CallId, CallResult};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, ZmqMessage};

use crate::error::WireError;
use crate::frame::{ReturnAck, ReturnFrame, RETURN_TOPIC};
use crate::traits::ResultReporter;
use crate::transport::Transport;

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<ReturnAck>>>>;

/// Reports call results to a [`ReturnListener`](crate::ReturnListener).
///
/// The socket is owned by a background task that multiplexes outbound
/// frames and inbound acks, so concurrent `report` calls never contend on
/// it.
pub struct ReturnReporter {
    send_tx: mpsc::Sender<ZmqMessage>,
    pending: Pending,
    ack_timeout: Duration,
    _loop_handle: tokio::task::JoinHandle<()>,
}

impl ReturnReporter {
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, WireError> {
        let mut socket = DealerSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting result reporter");
        socket.connect(&endpoint).await?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel::<ZmqMessage>(256);

        let loop_pending = Arc::clone(&pending);
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, send_rx, loop_pending).await;
        });

        Ok(Self {
            send_tx,
            pending,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            _loop_handle: loop_handle,
        })
    }

    /// How long `report` waits for the listener to acknowledge.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    async fn event_loop(
        mut socket: DealerSocket,
        mut send_rx: mpsc::Receiver<ZmqMessage>,
        pending: Pending,
    ) {
        loop {
            tokio::select! {
                Some(zmq_msg) = send_rx.recv() => {
                    if let Err(e) = socket.send(zmq_msg).await {
                        warn!(error = %e, "reporter send failed");
                    }
                }
                received = socket.recv() => {
                    match received {
                        Ok(zmq_msg) => Self::dispatch_ack(&pending, zmq_msg).await,
                        Err(e) => {
                            debug!(error = %e, "reporter recv loop ending");
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    async fn dispatch_ack(pending: &Pending, zmq_msg: ZmqMessage) {
        let frames: Vec<_> = zmq_msg.iter().collect();
        // Leading empty delimiters depend on how the ROUTER framed the reply.
        let data_frames: Vec<_> = frames
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();

        if data_frames.len() < 2 {
            warn!(frame_count = frames.len(), "unexpected frame count on ack");
            return;
        }

        let ack = match ReturnAck::from_bytes(data_frames[1].as_ref()) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(error = %e, "failed to decode ack");
                return;
            }
        };

        match pending.lock().await.remove(&ack.frame_id) {
            Some(tx) => {
                let _ = tx.send(ack);
            }
            None => debug!(frame_id = %ack.frame_id, "ack for unknown or expired frame"),
        }
    }

    async fn send_frame(&self, frame: &ReturnFrame) -> Result<(), WireError> {
        let mut zmq_msg = ZmqMessage::from(RETURN_TOPIC);
        zmq_msg.push_back(frame.to_bytes()?.into());
        self.send_tx
            .send(zmq_msg)
            .await
            .map_err(|_| WireError::Transport("reporter event loop closed".into()))
    }
}

#[async_trait]
impl ResultReporter for ReturnReporter {
    /// Fails with [`WireError::Timeout`] when no ack arrives in time and
    /// with [`WireError::Rejected`] when the scheduler refused the result.
    async fn report(&self, call_id: CallId, result: CallResult) -> Result<(), WireError> {
        let frame = ReturnFrame::new(call_id, result);
        let frame_id = frame.frame_id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(frame_id, tx);

        if let Err(e) = self.send_frame(&frame).await {
            self.pending.lock().await.remove(&frame_id);
            return Err(e);
        }
        debug!(%frame_id, call_id = %frame.call_id, ok = frame.result.is_ok(), "reported call result");

        let ack = match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&frame_id);
                return Err(WireError::Transport("ack channel closed unexpectedly".into()));
            }
            Err(_) => {
                self.pending.lock().await.remove(&frame_id);
                return Err(WireError::Timeout(self.ack_timeout));
            }
        };

        if ack.accepted {
            Ok(())
        } else {
            Err(WireError::Rejected(
                ack.error.unwrap_or_else(|| "no reason given".into()),
            ))
        }
    }
}
