use thiserror::Error;

/// Errors surfaced by the coaching service client.
///
/// Every variant carries only owned text so a single in-flight result can be
/// cloned out to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The request never produced an HTTP response.
    #[error("{0}")]
    Transport(String),
    /// The service reports the requested provider as switched off.
    #[error("{message}")]
    ApiDisabled { message: String },
    /// HTTP 429 with a retry hint.
    #[error("{message}")]
    RateLimited { message: String, retry_after: u64 },
    /// Non-success status with a structured error body.
    #[error("{message}")]
    Api { status: u16, message: String },
    /// Non-success status without a usable body.
    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },
    /// A success response whose body did not match the expected shape.
    #[error("failed to parse response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport(message.into())
    }

    pub fn decode<T: Into<String>>(message: T) -> Self {
        Self::Decode(message.into())
    }

    /// HTTP status attached to the error, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::RateLimited { .. } => Some(429),
            ClientError::Api { status, .. } | ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Faults raised by a key/value backend. These never leave the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("invalid key {0:?}")]
    InvalidKey(String),
}
