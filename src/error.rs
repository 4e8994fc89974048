//! Protocol-level error types.
//!
//! `GrpcError` covers faults in the engine itself: framing, compression,
//! message codecs, registration, and call-state misuse. Handler failures are
//! carried separately as [`StatusError`](crate::status::StatusError) values
//! inside `anyhow::Error` and mapped to a gRPC status at the dispatch
//! boundary.

use std::fmt;

/// gRPC engine error types
#[derive(Debug, Clone)]
pub enum GrpcError {
    /// Insufficient data in buffer
    InsufficientData {
        /// Required bytes
        required: usize,
        /// Available bytes
        available: usize,
    },
    /// Message size exceeds limit
    MessageTooLarge {
        /// Actual size
        size: usize,
        /// Maximum allowed
        max: usize,
    },
    /// Invalid frame format
    InvalidFrame(String),
    /// Compression error
    Compression(String),
    /// Message codec error
    Codec(String),
    /// Operation is not supported on this surface
    Unsupported(&'static str),
    /// A route was registered twice for the same wire format
    DuplicateRoute(String),
    /// A declared method has no handler at build time
    UnboundMethod(String),
    /// The call already reached its terminal state
    Terminated,
}

impl fmt::Display for GrpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData { required, available } => {
                write!(f, "Insufficient data: need {} bytes, have {}", required, available)
            }
            Self::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
            Self::InvalidFrame(msg) => write!(f, "Invalid gRPC frame: {}", msg),
            Self::Compression(msg) => write!(f, "Compression error: {}", msg),
            Self::Codec(msg) => write!(f, "Codec error: {}", msg),
            Self::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            Self::DuplicateRoute(route) => write!(f, "Duplicate route registration: {}", route),
            Self::UnboundMethod(name) => write!(f, "No handler bound for method: {}", name),
            Self::Terminated => write!(f, "Call already terminated"),
        }
    }
}

impl std::error::Error for GrpcError {}
