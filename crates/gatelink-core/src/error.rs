use thiserror::Error;

/// Errors produced by the gatelink protocol layer.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("watch stream closed")]
    StreamClosed,

    #[error("session already decided")]
    AlreadyDecided,

    #[error("virtual channel closed")]
    ChannelClosed,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("login error: {0}")]
    Login(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<ciborium::de::Error<std::io::Error>> for GateError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        GateError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for GateError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        GateError::Codec(e.to_string())
    }
}

pub type GateResult<T> = Result<T, GateError>;
