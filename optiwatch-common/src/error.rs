use thiserror::Error;

/// Common error type for optiwatch components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protobuf decode error: {0}")]
    Proto(#[from] prost::DecodeError),
}

/// Result type alias using optiwatch's Error.
pub type Result<T> = std::result::Result<T, Error>;
