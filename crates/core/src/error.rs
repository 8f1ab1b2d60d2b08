use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown task kind: {0}")]
    UnknownTaskKind(String),

    #[error("unknown proof variant: {0}")]
    UnknownProofVariant(String),

    #[error("resource table parse error: {0}")]
    ResourceTableParse(#[from] toml::de::Error),

    #[error("invalid resource profile for {0}")]
    InvalidProfile(String),

    #[error("result sink rejected {call_id}: {reason}")]
    Sink { call_id: String, reason: String },
}
