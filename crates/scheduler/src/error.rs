use sealyard_core::{CallError, CoreError, ProofVariant, TaskKind};
use thiserror::Error;

/// Failure inside a selector policy while judging or ranking workers.
#[derive(Debug, Clone, Error)]
#[error("selector failed: {0}")]
pub struct SelectorError(pub String);

impl From<CallError> for SelectorError {
    fn from(e: CallError) -> Self {
        SelectorError(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no worker satisfies {kind} for {proof}")]
    NoWorkerFound { kind: TaskKind, proof: ProofVariant },

    #[error(transparent)]
    SelectionFailed(#[from] SelectorError),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config io error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("work store error: {0}")]
    WorkStore(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error(transparent)]
    Core(#[from] CoreError),
}
