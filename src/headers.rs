//! gRPC Header Handling
//!
//! gRPC uses specific HTTP/2 headers for request/response control:
//!
//! ## Request Headers
//! - `content-type`: `application/grpc[+proto|+json]`, or a plain JSON
//!   content type for transcoded requests
//! - `grpc-timeout`: Timeout value (e.g., "10S", "100m", "1H")
//! - `grpc-encoding`: Request message encoding (gzip, deflate, zstd, identity)
//! - `grpc-accept-encoding`: Accepted response encodings
//!
//! ## Response Trailers
//! - `grpc-status`: Numeric status code (0-16)
//! - `grpc-message`: Percent-encoded error message

use std::time::Duration;

use crate::deadline::parse_grpc_timeout;
use crate::metadata::Metadata;

/// gRPC content-type prefix
pub const GRPC_CONTENT_TYPE_PREFIX: &[u8] = b"application/grpc";

/// gRPC content-type for Protobuf (default)
pub const GRPC_CONTENT_TYPE_PROTO: &[u8] = b"application/grpc+proto";

/// gRPC content-type for JSON
pub const GRPC_CONTENT_TYPE_JSON: &[u8] = b"application/grpc+json";

/// Content-type for transcoded JSON-over-HTTP requests
pub const TRANSCODED_CONTENT_TYPE_JSON: &[u8] = b"application/json";

/// Serialization format of message payloads, independent of the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// Binary protobuf
    Proto,
    /// UTF-8 JSON text
    Json,
}

/// Check if content-type indicates a gRPC request
///
/// Returns true if content-type starts with "application/grpc"
#[inline]
pub fn is_grpc_content_type(content_type: &[u8]) -> bool {
    content_type.len() >= GRPC_CONTENT_TYPE_PREFIX.len()
        && content_type[..GRPC_CONTENT_TYPE_PREFIX.len()]
            .eq_ignore_ascii_case(GRPC_CONTENT_TYPE_PREFIX)
}

/// Classify a content-type into the wire format it selects
///
/// `application/grpc` and `application/grpc+proto` select protobuf;
/// `application/grpc+json` and `application/json` (transcoding) select
/// JSON. Anything else is not a gRPC request.
pub fn wire_format_of(content_type: &[u8]) -> Option<WireFormat> {
    if content_type.eq_ignore_ascii_case(GRPC_CONTENT_TYPE_JSON)
        || content_type.eq_ignore_ascii_case(TRANSCODED_CONTENT_TYPE_JSON)
    {
        return Some(WireFormat::Json);
    }
    if content_type.eq_ignore_ascii_case(GRPC_CONTENT_TYPE_PROTO)
        || content_type.eq_ignore_ascii_case(GRPC_CONTENT_TYPE_PREFIX)
    {
        return Some(WireFormat::Proto);
    }
    // "application/grpc+<something else>" is gRPC but an unknown format
    None
}

/// Parsed view of one request's headers
///
/// Everything the engine needs to dispatch a call: route, wire format,
/// timeout, compression negotiation inputs, and the application metadata.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request method (":method" pseudo-header)
    pub method: Option<String>,
    /// Request path ("/package.Service/Method")
    pub path: Option<String>,
    /// Raw content-type value, echoed on the response
    pub content_type: Vec<u8>,
    /// Wire format selected by the content-type
    pub format: Option<WireFormat>,
    /// Timeout from grpc-timeout header
    pub timeout: Option<Duration>,
    /// Request message encoding from grpc-encoding (None = identity)
    pub encoding: Option<String>,
    /// Accepted response encodings from grpc-accept-encoding
    pub accept_encoding: Vec<String>,
    /// Application metadata (reserved names already filtered)
    pub metadata: Metadata,
}

impl RequestHead {
    /// Parse gRPC-specific headers from an HTTP/2 header list
    pub fn parse(headers: &[(impl AsRef<[u8]>, impl AsRef<[u8]>)]) -> Self {
        let mut method = None;
        let mut path = None;
        let mut content_type = Vec::new();
        let mut timeout = None;
        let mut encoding = None;
        let mut accept_encoding = Vec::new();

        for (name, value) in headers {
            let name = name.as_ref();
            let value = value.as_ref();

            if name == b":method" {
                method = std::str::from_utf8(value).ok().map(String::from);
            } else if name == b":path" {
                path = std::str::from_utf8(value).ok().map(String::from);
            } else if name.eq_ignore_ascii_case(b"content-type") {
                content_type = value.to_vec();
            } else if name.eq_ignore_ascii_case(b"grpc-timeout") {
                timeout = parse_grpc_timeout(value);
            } else if name.eq_ignore_ascii_case(b"grpc-encoding") {
                encoding = std::str::from_utf8(value)
                    .ok()
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| s != "identity");
            } else if name.eq_ignore_ascii_case(b"grpc-accept-encoding") {
                accept_encoding = parse_accept_encoding(value);
            }
        }

        let format = wire_format_of(&content_type);

        Self {
            method,
            path,
            format,
            timeout,
            encoding,
            accept_encoding,
            metadata: Metadata::decode(headers),
            content_type,
        }
    }

    /// Get service name from path (e.g., "/package.Service/Method" -> "package.Service")
    pub fn service_name(&self) -> Option<&str> {
        self.path.as_ref().and_then(|p| {
            let p = p.strip_prefix('/')?;
            let idx = p.rfind('/')?;
            Some(&p[..idx])
        })
    }

    /// Get method name from path (e.g., "/package.Service/Method" -> "Method")
    pub fn method_name(&self) -> Option<&str> {
        self.path.as_ref().and_then(|p| {
            let idx = p.rfind('/')?;
            Some(&p[idx + 1..])
        })
    }
}

/// Parse grpc-accept-encoding header (comma-separated values)
fn parse_accept_encoding(value: &[u8]) -> Vec<String> {
    std::str::from_utf8(value)
        .ok()
        .map(|s| {
            s.split(',')
                .map(|part| part.trim().to_ascii_lowercase())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
