use thiserror::Error;

/// Errors raised by the result feed transport.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no acknowledgement after {0:?}")]
    Timeout(std::time::Duration),

    /// The listener received the frame but its sink refused the result.
    #[error("result rejected: {0}")]
    Rejected(String),
}
