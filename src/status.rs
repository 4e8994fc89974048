//! gRPC Status Codes (0-16)
//!
//! gRPC uses numeric status codes transmitted via the `grpc-status` trailer.
//! See: https://grpc.github.io/grpc/core/md_doc_statuscodes.html
//!
//! [`StatusError`] is the failure value handlers return when they want a
//! specific status, message, and trailer metadata on the wire.

use std::fmt;

use crate::metadata::Metadata;

/// gRPC status code values (0-16)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrpcStatusCode {
    /// Not an error; returned on success
    Ok = 0,
    /// The operation was cancelled
    Cancelled = 1,
    /// Unknown error
    Unknown = 2,
    /// Client specified an invalid argument
    InvalidArgument = 3,
    /// Deadline expired before operation could complete
    DeadlineExceeded = 4,
    /// Requested entity was not found
    NotFound = 5,
    /// Entity that we attempted to create already exists
    AlreadyExists = 6,
    /// Caller does not have permission
    PermissionDenied = 7,
    /// Resource has been exhausted
    ResourceExhausted = 8,
    /// Operation rejected due to failed precondition
    FailedPrecondition = 9,
    /// Operation was aborted
    Aborted = 10,
    /// Operation was attempted past the valid range
    OutOfRange = 11,
    /// Operation is not implemented
    Unimplemented = 12,
    /// Internal error
    Internal = 13,
    /// Service is currently unavailable
    Unavailable = 14,
    /// Unrecoverable data loss or corruption
    DataLoss = 15,
    /// Request does not have valid authentication credentials
    Unauthenticated = 16,
}

impl GrpcStatusCode {
    /// Create from numeric value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Cancelled),
            2 => Some(Self::Unknown),
            3 => Some(Self::InvalidArgument),
            4 => Some(Self::DeadlineExceeded),
            5 => Some(Self::NotFound),
            6 => Some(Self::AlreadyExists),
            7 => Some(Self::PermissionDenied),
            8 => Some(Self::ResourceExhausted),
            9 => Some(Self::FailedPrecondition),
            10 => Some(Self::Aborted),
            11 => Some(Self::OutOfRange),
            12 => Some(Self::Unimplemented),
            13 => Some(Self::Internal),
            14 => Some(Self::Unavailable),
            15 => Some(Self::DataLoss),
            16 => Some(Self::Unauthenticated),
            _ => None,
        }
    }

    /// Parse from grpc-status header bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<u8>().ok())
            .and_then(Self::from_u8)
    }

    /// Get numeric value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a success status
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Get description string
    pub fn description(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "Cancelled",
            Self::Unknown => "Unknown",
            Self::InvalidArgument => "Invalid Argument",
            Self::DeadlineExceeded => "Deadline Exceeded",
            Self::NotFound => "Not Found",
            Self::AlreadyExists => "Already Exists",
            Self::PermissionDenied => "Permission Denied",
            Self::ResourceExhausted => "Resource Exhausted",
            Self::FailedPrecondition => "Failed Precondition",
            Self::Aborted => "Aborted",
            Self::OutOfRange => "Out of Range",
            Self::Unimplemented => "Unimplemented",
            Self::Internal => "Internal",
            Self::Unavailable => "Unavailable",
            Self::DataLoss => "Data Loss",
            Self::Unauthenticated => "Unauthenticated",
        }
    }
}

impl fmt::Display for GrpcStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl Default for GrpcStatusCode {
    fn default() -> Self {
        Self::Ok
    }
}

/// Complete gRPC status with optional message and details
#[derive(Debug, Clone, Default)]
pub struct GrpcStatus {
    /// Status code
    pub code: GrpcStatusCode,
    /// Human-readable error message (grpc-message trailer)
    pub message: Option<String>,
    /// Binary status details (google.rpc.Status, optional)
    pub details: Option<Vec<u8>>,
}

impl GrpcStatus {
    /// Create success status
    pub fn ok() -> Self {
        Self {
            code: GrpcStatusCode::Ok,
            message: None,
            details: None,
        }
    }

    /// Create error status with message
    pub fn error(code: GrpcStatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: None,
        }
    }

    /// Create error status from code only
    pub fn from_code(code: GrpcStatusCode) -> Self {
        Self {
            code,
            message: None,
            details: None,
        }
    }

    /// Check if success
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Percent-encode the message for the grpc-message trailer
    ///
    /// Encodes byte-wise so non-ASCII UTF-8 survives the round trip.
    pub fn encoded_message(&self) -> Option<String> {
        self.message.as_ref().map(|m| {
            let mut out = String::with_capacity(m.len());
            for b in m.bytes() {
                if (0x20..=0x7e).contains(&b) && b != b'%' {
                    out.push(b as char);
                } else {
                    out.push_str(&format!("%{:02X}", b));
                }
            }
            out
        })
    }

    /// Decode a percent-encoded grpc-message value
    pub fn decode_message(encoded: &[u8]) -> Option<String> {
        let s = std::str::from_utf8(encoded).ok()?;
        let mut bytes = Vec::with_capacity(s.len());
        let mut chars = s.bytes().peekable();

        while let Some(b) = chars.next() {
            if b == b'%' {
                let hi = chars.next()?;
                let lo = chars.next()?;
                let hex = [hi, lo];
                let hex = std::str::from_utf8(&hex).ok()?;
                bytes.push(u8::from_str_radix(hex, 16).ok()?);
            } else {
                bytes.push(b);
            }
        }

        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Format as trailers for the HTTP/2 response
    pub fn to_trailers(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut trailers = vec![(
            b"grpc-status".to_vec(),
            self.code.to_string().into_bytes(),
        )];

        if let Some(msg) = &self.encoded_message() {
            trailers.push((b"grpc-message".to_vec(), msg.as_bytes().to_vec()));
        }

        if let Some(details) = &self.details {
            use base64::engine::general_purpose::STANDARD;
            use base64::Engine as _;
            trailers.push((
                b"grpc-status-details-bin".to_vec(),
                STANDARD.encode(details).into_bytes(),
            ));
        }

        trailers
    }
}

impl From<GrpcStatusCode> for GrpcStatus {
    fn from(code: GrpcStatusCode) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for GrpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code.description(), self.code)?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

/// Status-carrying failure returned by handlers.
///
/// When a handler fails with a `StatusError`, the call terminates with
/// exactly this status, message, and trailer metadata. Any other error kind
/// maps to `UNKNOWN` at the dispatch boundary.
#[derive(Debug, Clone)]
pub struct StatusError {
    status: GrpcStatus,
    trailers: Metadata,
}

impl StatusError {
    /// Create with code and message
    pub fn new(code: GrpcStatusCode, message: impl Into<String>) -> Self {
        Self {
            status: GrpcStatus::error(code, message),
            trailers: Metadata::new(),
        }
    }

    /// Create with code only
    pub fn from_code(code: GrpcStatusCode) -> Self {
        Self {
            status: GrpcStatus::from_code(code),
            trailers: Metadata::new(),
        }
    }

    /// Attach trailer metadata delivered with the failure
    pub fn with_trailers(mut self, trailers: Metadata) -> Self {
        self.trailers = trailers;
        self
    }

    /// The status to put on the wire
    pub fn status(&self) -> &GrpcStatus {
        &self.status
    }

    /// Trailer metadata delivered with the failure
    pub fn trailers(&self) -> &Metadata {
        &self.trailers
    }

    /// Split into wire parts
    pub(crate) fn into_parts(self) -> (GrpcStatus, Metadata) {
        (self.status, self.trailers)
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)
    }
}

impl std::error::Error for StatusError {}

/// Map an arbitrary handler failure to the status that goes on the wire.
///
/// `StatusError` passes through as specified; engine faults map to
/// INTERNAL (RESOURCE_EXHAUSTED for oversized messages); everything else
/// becomes UNKNOWN carrying the error text.
pub fn status_of(err: anyhow::Error) -> (GrpcStatus, Metadata) {
    match err.downcast::<StatusError>() {
        Ok(status_err) => status_err.into_parts(),
        Err(err) => {
            if let Some(grpc_err) = err.downcast_ref::<crate::error::GrpcError>() {
                let code = match grpc_err {
                    crate::error::GrpcError::MessageTooLarge { .. } => {
                        GrpcStatusCode::ResourceExhausted
                    }
                    crate::error::GrpcError::Unsupported(_) => GrpcStatusCode::Unimplemented,
                    _ => GrpcStatusCode::Internal,
                };
                return (GrpcStatus::error(code, grpc_err.to_string()), Metadata::new());
            }
            (
                GrpcStatus::error(GrpcStatusCode::Unknown, err.to_string()),
                Metadata::new(),
            )
        }
    }
}
