//! Remote result feed for the sealing scheduler.
//!
//! Workers running outside the scheduler's process report call outcomes
//! with a [`ReturnReporter`] (ZeroMQ DEALER). The scheduler binds a
//! [`ReturnListener`] (ROUTER) that forwards each result to a
//! [`ResultSink`](sealyard_core::ResultSink) and acknowledges it.

pub mod error;
pub mod frame;
pub mod listener;
pub mod reporter;
pub mod traits;
pub mod transport;

pub use error::WireError;
pub use frame::{ReturnAck, ReturnFrame, ACK_TOPIC, RETURN_TOPIC, WIRE_VERSION};
pub use listener::ReturnListener;
pub use reporter::{ReturnReporter, DEFAULT_ACK_TIMEOUT};
pub use traits::ResultReporter;
pub use transport::Transport;
