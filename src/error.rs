use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("measurement error: {0}")]
    Measurement(String),

    #[error("session for {0} is closed")]
    SessionClosed(SocketAddr),
}

pub type Result<T> = std::result::Result<T, MeshError>;
