//! gRPC Metadata (headers/trailers)
//!
//! Application metadata travels as HTTP/2 headers and trailers. Keys are
//! case-insensitive ASCII tokens; a key ending in `-bin` carries a binary
//! value, base64-encoded on the wire and exposed as raw bytes here. The
//! protocol's own headers (`grpc-status`, `grpc-timeout`, `content-type`,
//! ...) never appear in the generic view — the engine consumes and produces
//! them itself. Metadata is a multi-map: repeated keys keep their insertion
//! order.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;

/// Binary metadata key suffix
pub const BINARY_KEY_SUFFIX: &str = "-bin";

/// Header names owned by the protocol engine, never exposed as metadata
const RESERVED_NAMES: &[&[u8]] = &[
    b"grpc-status",
    b"grpc-message",
    b"grpc-encoding",
    b"grpc-accept-encoding",
    b"content-type",
    b"grpc-timeout",
    b"te",
];

/// Check whether a header name is consumed by the engine itself
pub fn is_reserved_name(name: &[u8]) -> bool {
    RESERVED_NAMES.iter().any(|r| name.eq_ignore_ascii_case(r))
}

/// A single metadata value: ASCII text or raw bytes (for `-bin` keys)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    /// UTF-8 text value
    Ascii(String),
    /// Binary value, base64 on the wire
    Binary(Vec<u8>),
}

impl MetadataValue {
    /// Text value, if this is an ASCII entry
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Ascii(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// Byte value, if this is a binary entry
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Ascii(_) => None,
            Self::Binary(b) => Some(b),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Ascii(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Ascii(s)
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

/// Ordered multi-map of gRPC metadata
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value for a key
    ///
    /// Keys are normalized to lowercase. A `-bin` key must carry a binary
    /// value and a non-`-bin` key a text value; mismatched inserts are
    /// coerced (text under a `-bin` key becomes its bytes) so the wire form
    /// stays valid.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<MetadataValue>) {
        let key = key.as_ref().to_ascii_lowercase();
        let value = value.into();
        let value = if key.ends_with(BINARY_KEY_SUFFIX) {
            match value {
                MetadataValue::Ascii(s) => MetadataValue::Binary(s.into_bytes()),
                bin => bin,
            }
        } else {
            match value {
                MetadataValue::Binary(b) => {
                    MetadataValue::Ascii(String::from_utf8_lossy(&b).into_owned())
                }
                text => text,
            }
        };
        self.entries.push((key, value));
    }

    /// First value for a key, if any
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// All values for a key, in insertion order
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a MetadataValue> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Remove every value for a key
    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    /// Append every entry of `other`, keeping its order
    pub fn extend(&mut self, other: &Metadata) {
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Iterate all entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode transport headers into metadata
    ///
    /// Pseudo-headers, reserved protocol names, and entries that fail
    /// base64 or UTF-8 validation are skipped (lenient, like header parsing
    /// everywhere else in the engine).
    pub fn decode(headers: &[(impl AsRef<[u8]>, impl AsRef<[u8]>)]) -> Self {
        let mut metadata = Self::new();

        for (name, value) in headers {
            let name = name.as_ref();
            let value = value.as_ref();

            if name.starts_with(b":") || is_reserved_name(name) {
                continue;
            }
            let Ok(key) = std::str::from_utf8(name) else {
                continue;
            };
            let key = key.to_ascii_lowercase();

            if key.ends_with(BINARY_KEY_SUFFIX) {
                // Padding is optional on the wire; accept both forms.
                let decoded = STANDARD
                    .decode(value)
                    .or_else(|_| STANDARD_NO_PAD.decode(value));
                if let Ok(bytes) = decoded {
                    metadata.entries.push((key, MetadataValue::Binary(bytes)));
                }
            } else if let Ok(text) = std::str::from_utf8(value) {
                metadata
                    .entries
                    .push((key, MetadataValue::Ascii(text.to_string())));
            }
        }

        metadata
    }

    /// Encode metadata into transport headers
    pub fn encode(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .iter()
            .map(|(key, value)| {
                let wire_value = match value {
                    MetadataValue::Ascii(s) => s.as_bytes().to_vec(),
                    MetadataValue::Binary(b) => STANDARD.encode(b).into_bytes(),
                };
                (key.as_bytes().to_vec(), wire_value)
            })
            .collect()
    }
}
