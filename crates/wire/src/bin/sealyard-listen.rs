//! sealyard-listen: bind a result feed and log every reported call result.
//!
//! Useful for checking that remote workers can reach the scheduler host
//! and that their frames decode.
//!
//! ```bash
//! sealyard-listen --transport tcp --host 0.0.0.0 --port 7400
//! SEALYARD_TRANSPORT=ipc SEALYARD_IPC_NAME=returns sealyard-listen
//! ```

use std::sync::Arc;

use clap::Parser;
use sealyard_core::{CallId, CallResult, CoreError, ResultSink};
use sealyard_wire::{ReturnListener, Transport};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sealyard-listen", version, about)]
struct Cli {
    /// Transport type: "ipc" or "tcp".
    #[arg(long, env = "SEALYARD_TRANSPORT", default_value = "ipc")]
    transport: String,

    /// Bind host (tcp only).
    #[arg(long, env = "SEALYARD_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Bind port (tcp only).
    #[arg(long, env = "SEALYARD_PORT", default_value_t = 7400)]
    port: u16,

    /// Socket name under /tmp/sealyard/ (ipc only).
    #[arg(long, env = "SEALYARD_IPC_NAME", default_value = "returns")]
    ipc_name: String,
}

impl Cli {
    fn transport(&self) -> Transport {
        match self.transport.as_str() {
            "tcp" => Transport::tcp(&self.host, self.port),
            _ => Transport::ipc(&self.ipc_name),
        }
    }
}

/// Accepts everything and logs it.
struct LogSink;

impl ResultSink for LogSink {
    fn return_result(&self, call_id: CallId, result: CallResult) -> Result<(), CoreError> {
        match &result.error {
            None => info!(%call_id, payload = ?result.payload, "call succeeded"),
            Some(e) => warn!(%call_id, error = %e, "call failed"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let transport = cli.transport();
    let listener = ReturnListener::bind(&transport).await?;
    info!(endpoint = %transport, "listening for call results");

    tokio::select! {
        served = listener.serve(Arc::new(LogSink)) => served?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
