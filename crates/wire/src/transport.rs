use std::path::Path;

use serde::{Deserialize, Serialize};

/// Where the result feed listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Unix domain socket under `/tmp/sealyard/`, for workers on the
    /// scheduler's host.
    Ipc(String),

    Tcp { host: String, port: u16 },
}

impl Transport {
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// ZeroMQ endpoint address.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc:///tmp/sealyard/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    fn socket_path(&self) -> Option<String> {
        match self {
            Self::Ipc(_) => {
                let endpoint = self.endpoint();
                Some(
                    endpoint
                        .strip_prefix("ipc://")
                        .unwrap_or(&endpoint)
                        .to_string(),
                )
            }
            Self::Tcp { .. } => None,
        }
    }

    /// Create the socket directory before binding an IPC endpoint.
    /// No-op for TCP.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Some(path) = self.socket_path() {
            if let Some(parent) = Path::new(&path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Remove a `.sock` file left behind by a listener that exited without
    /// cleanup; binding over it fails with `EADDRINUSE`.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        if let Some(path) = self.socket_path() {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path, "removed stale IPC socket");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}
