//! Error types for the BITS upload server

use axum::http::StatusCode;
use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, BitsError>;

/// Everything that can go wrong while handling a BITS packet.
///
/// Every variant maps to an HTTP status; the response body is always empty
/// and the BITS headers carry the acknowledgement (see `routes::bits`).
#[derive(Error, Debug)]
pub enum BitsError {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("file exceeds the configured maximum size")]
    TooLarge,

    #[error("range not satisfiable, {received} bytes on disk")]
    RangeNotSatisfiable { received: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BitsError {
    /// HTTP status code for the error acknowledgement
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Bytes committed to disk, if this error kind reports them back
    /// to the client (`BITS-Received-Content-Range` on the error ack).
    pub fn received_bytes(&self) -> Option<u64> {
        match self {
            Self::RangeNotSatisfiable { received } => Some(*received),
            _ => None,
        }
    }
}
