//! Centralized error types for the HTTP service

use http::StatusCode;
use thiserror::Error;

/// Service error types
#[derive(Debug, Error)]
pub enum ServiceError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// The listen address is already taken by another socket
    #[error("listen EADDRINUSE: address already in use {0}")]
    AddressInUse(String),

    /// Any other bind failure (permission denied, bad descriptor, ...)
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// No endpoint matched the request
    #[error("No endpoint for {method} {path}")]
    NoMatchingRoute { method: String, path: String },

    /// The connected handler failed
    #[error("{0}")]
    Handler(String),

    /// Request body content type is not supported by the decoder
    #[error("unsupported content type '{content_type}', supported types are {supported}")]
    UnsupportedMediaType {
        content_type: String,
        supported: String,
    },

    /// Request body could not be decoded
    #[error("{0}")]
    BadRequest(String),

    /// No bearer token present
    #[error("Missing token")]
    MissingToken,

    /// Bearer token failed verification
    #[error("{0}")]
    InvalidToken(String),

    /// Token lacks one of the required entitlements
    #[error("Insufficient entitlements")]
    InsufficientEntitlements,

    /// An interceptor aborted the chain with an explicit status
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// A pending start was cancelled by `stop()`
    #[error("start cancelled")]
    Cancelled,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// HTTP status used when this error terminates a request
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoMatchingRoute { .. } => StatusCode::NOT_FOUND,
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MissingToken | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientEntitlements => StatusCode::FORBIDDEN,
            Self::Rejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// `WWW-Authenticate` challenge for auth failures
    pub fn www_authenticate(&self) -> Option<String> {
        let code = match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken(_) => "invalid_token",
            Self::InsufficientEntitlements => "insufficient_scope",
            _ => return None,
        };
        Some(format!(
            "Bearer,error=\"{}\",description=\"{}\"",
            code,
            self.to_string().replace('"', "'")
        ))
    }

    /// Whether the error is answered with a 500 (its message may be hidden)
    pub fn is_internal(&self) -> bool {
        self.status() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ServiceError>;
