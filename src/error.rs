use std::fmt;
use std::net::SocketAddr;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;

/// Main error type for the Dipper datastore and rate limiting service
#[derive(Debug)]
pub enum DipperError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Caller supplied an unusable argument (e.g. a blank subject)
    InvalidArgument(String),

    /// A peer datastore request did not satisfy the wire contract
    MalformedCacheRequest(MalformedRequest),

    /// Peer unreachable or timed out
    Transport(String),

    /// Peer answered, but with an error status
    PeerRejected { peer: SocketAddr, status: u16 },

    /// Rate accounting decided the caller is over quota
    OverLimit {
        limit_id: String,
        next_available_at: DateTime<Utc>,
        retry_after_secs: u64,
    },

    /// API/HTTP related errors
    Api(String),

    /// System I/O errors
    Io(std::io::Error),

    /// Serialization/deserialization errors
    Serialization(SerializationError),

    /// Internal lock poisoning or contention errors
    Concurrency(String),
}

/// Ways a datastore request can be malformed. Always the caller's fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MalformedRequest {
    MissingHostKey,
    CacheKeyInvalid,
    ObjectTooLarge,
    TtlNotPositive,
    PatchUndecodable,
    MethodNotAllowed,
    UnexpectedRemoteBehavior,
}

/// Serialization related errors
#[derive(Debug)]
pub enum SerializationError {
    /// JSON serialization/deserialization errors
    Json(serde_json::Error),

    /// Binary serialization/deserialization errors
    Binary(String),
}

impl MalformedRequest {
    pub fn message(&self) -> &'static str {
        match self {
            MalformedRequest::MissingHostKey => "No host key specified in header x-pp-host-key",
            MalformedRequest::CacheKeyInvalid => "Cache key specified is invalid",
            MalformedRequest::ObjectTooLarge => "Object is too large to store into the cache",
            MalformedRequest::TtlNotPositive => "TTL header value must be a positive integer",
            MalformedRequest::PatchUndecodable => "Patch body could not be decoded",
            MalformedRequest::MethodNotAllowed => "Method not supported for datastore objects",
            MalformedRequest::UnexpectedRemoteBehavior => "Unexpected behavior from remote datastore peer",
        }
    }

    /// Wire status for this condition on a datastore request
    pub fn status_code(&self) -> StatusCode {
        match self {
            MalformedRequest::MissingHostKey => StatusCode::UNAUTHORIZED,
            MalformedRequest::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            MalformedRequest::CacheKeyInvalid
            | MalformedRequest::ObjectTooLarge
            | MalformedRequest::TtlNotPositive
            | MalformedRequest::PatchUndecodable
            | MalformedRequest::UnexpectedRemoteBehavior => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for MalformedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl fmt::Display for DipperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DipperError::Config(msg) => write!(f, "Configuration error: {}", msg),
            DipperError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            DipperError::MalformedCacheRequest(kind) => {
                write!(f, "Malformed cache request: {}", kind)
            }
            DipperError::Transport(msg) => write!(f, "Transport error: {}", msg),
            DipperError::PeerRejected { peer, status } => {
                write!(f, "Peer {} rejected request with status {}", peer, status)
            }
            DipperError::OverLimit {
                limit_id,
                next_available_at,
                ..
            } => write!(
                f,
                "Over limit for {}; next available at {}",
                limit_id,
                next_available_at.to_rfc3339()
            ),
            DipperError::Api(msg) => write!(f, "API error: {}", msg),
            DipperError::Io(err) => write!(f, "I/O error: {}", err),
            DipperError::Serialization(err) => write!(f, "Serialization error: {}", err),
            DipperError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Json(err) => write!(f, "JSON: {}", err),
            SerializationError::Binary(msg) => write!(f, "Binary codec: {}", msg),
        }
    }
}

impl std::error::Error for DipperError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DipperError::Io(err) => Some(err),
            DipperError::Serialization(SerializationError::Json(err)) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Json(err) => Some(err),
            SerializationError::Binary(_) => None,
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, DipperError>;

impl DipperError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DipperError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DipperError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            DipperError::MalformedCacheRequest(kind) => kind.status_code(),
            DipperError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            DipperError::PeerRejected { .. } => StatusCode::BAD_GATEWAY,
            DipperError::OverLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            DipperError::Api(_) => StatusCode::BAD_REQUEST,
            DipperError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DipperError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DipperError::Concurrency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            DipperError::Config(_) => "configuration_error",
            DipperError::InvalidArgument(_) => "invalid_argument",
            DipperError::MalformedCacheRequest(_) => "malformed_cache_request",
            DipperError::Transport(_) => "transport_error",
            DipperError::PeerRejected { .. } => "peer_rejected",
            DipperError::OverLimit { .. } => "rate_limit_exceeded",
            DipperError::Api(_) => "api_error",
            DipperError::Io(_) => "io_error",
            DipperError::Serialization(_) => "serialization_error",
            DipperError::Concurrency(_) => "concurrency_error",
        }
    }

    /// Transport failures are the only errors worth trying against another owner
    pub fn is_transport(&self) -> bool {
        matches!(self, DipperError::Transport(_))
    }
}

// Axum IntoResponse implementation for HTTP error responses
impl IntoResponse for DipperError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        let mut response = (status_code, Json(error_response)).into_response();
        if let DipperError::OverLimit {
            retry_after_secs, ..
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<std::io::Error> for DipperError {
    fn from(err: std::io::Error) -> Self {
        DipperError::Io(err)
    }
}

impl From<serde_json::Error> for DipperError {
    fn from(err: serde_json::Error) -> Self {
        DipperError::Serialization(SerializationError::Json(err))
    }
}

impl From<bincode::error::EncodeError> for DipperError {
    fn from(err: bincode::error::EncodeError) -> Self {
        DipperError::Serialization(SerializationError::Binary(err.to_string()))
    }
}

impl From<bincode::error::DecodeError> for DipperError {
    fn from(err: bincode::error::DecodeError) -> Self {
        DipperError::Serialization(SerializationError::Binary(err.to_string()))
    }
}

impl From<MalformedRequest> for DipperError {
    fn from(kind: MalformedRequest) -> Self {
        DipperError::MalformedCacheRequest(kind)
    }
}

impl From<regex::Error> for DipperError {
    fn from(err: regex::Error) -> Self {
        DipperError::Config(format!("Invalid uri regex: {}", err))
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::DipperError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::DipperError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! invalid_argument {
    ($msg:expr) => {
        $crate::error::DipperError::InvalidArgument($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::DipperError::InvalidArgument(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::DipperError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::DipperError::Transport(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! concurrency_error {
    ($msg:expr) => {
        $crate::error::DipperError::Concurrency($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::DipperError::Concurrency(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_err = DipperError::Config("Invalid port".to_string());
        assert_eq!(config_err.to_string(), "Configuration error: Invalid port");

        let io_err = DipperError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
        assert!(io_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_malformed_request_status() {
        assert_eq!(
            MalformedRequest::MissingHostKey.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            MalformedRequest::TtlNotPositive.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            MalformedRequest::ObjectTooLarge.status_code(),
            StatusCode::BAD_REQUEST
        );
        let err: DipperError = MalformedRequest::CacheKeyInvalid.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_over_limit_sets_retry_after() {
        let err = DipperError::OverLimit {
            limit_id: "one".to_string(),
            next_available_at: Utc::now(),
            retry_after_secs: 42,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_macros() {
        let err = config_error!("Port {} is invalid", 65536);
        assert_eq!(
            err.to_string(),
            "Configuration error: Port 65536 is invalid"
        );

        let err = invalid_argument!("subject must not be blank");
        assert!(matches!(err, DipperError::InvalidArgument(_)));

        let err = transport_error!("peer {} timed out", "10.0.0.2:8410");
        assert!(err.is_transport());
    }
}
