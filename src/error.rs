use thiserror::Error;

/// Error taxonomy shared by every layer of the proxy. Per-connection variants
/// are logged and drop only that connection; the `Config`/`UnknownProtocol`
/// variants are fatal at startup.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("config error: {0}")]
    Config(String),

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("invalid user for hash {hash_prefix}")]
    InvalidUser { hash_prefix: String },

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("truncated request: {0}")]
    Truncated(String),

    #[error("unexpected response header: expected {expected}, got {got}")]
    UnexpectedResponseHeader { expected: String, got: String },

    #[error("read timeout")]
    ReadTimeout,

    #[error("write timeout")]
    WriteTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
