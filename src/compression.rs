//! gRPC Compression Support
//!
//! Implements grpc-encoding compression for gRPC messages. Algorithms are
//! pluggable through [`Compressor`]; gzip and deflate ship via flate2,
//! zstd via the zstd crate. The process-wide registry is read-mostly and
//! lock-free on the lookup path (`ArcSwap::load`); registration swaps the
//! whole snapshot.

use std::io::{Read, Write};
use std::sync::Arc;

use arc_swap::ArcSwap;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::error::GrpcError;

/// The no-op encoding name; never registered, handled inline
pub const IDENTITY: &str = "identity";

/// A message compression algorithm, named as it appears in grpc-encoding
pub trait Compressor: Send + Sync {
    /// Encoding token ("gzip", "deflate", "zstd", ...)
    fn name(&self) -> &'static str;

    /// Compress a message payload
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, GrpcError>;

    /// Decompress a message payload, bounded by `max` output bytes
    fn decompress(&self, data: &[u8], max: usize) -> Result<Vec<u8>, GrpcError>;
}

/// Gzip compression (flate2)
pub struct Gzip;

impl Compressor for Gzip {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, GrpcError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
        encoder
            .write_all(data)
            .map_err(|e| GrpcError::Compression(format!("gzip compress: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| GrpcError::Compression(format!("gzip finish: {}", e)))
    }

    fn decompress(&self, data: &[u8], max: usize) -> Result<Vec<u8>, GrpcError> {
        let mut result = Vec::new();
        GzDecoder::new(data)
            .take(max as u64 + 1)
            .read_to_end(&mut result)
            .map_err(|e| GrpcError::Compression(format!("gzip decompress: {}", e)))?;
        check_decompressed_size(result, max)
    }
}

/// Deflate compression (flate2)
pub struct Deflate;

impl Compressor for Deflate {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, GrpcError> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
        encoder
            .write_all(data)
            .map_err(|e| GrpcError::Compression(format!("deflate compress: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| GrpcError::Compression(format!("deflate finish: {}", e)))
    }

    fn decompress(&self, data: &[u8], max: usize) -> Result<Vec<u8>, GrpcError> {
        let mut result = Vec::new();
        DeflateDecoder::new(data)
            .take(max as u64 + 1)
            .read_to_end(&mut result)
            .map_err(|e| GrpcError::Compression(format!("deflate decompress: {}", e)))?;
        check_decompressed_size(result, max)
    }
}

/// Zstandard compression (zstd)
pub struct Zstd;

impl Compressor for Zstd {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, GrpcError> {
        zstd::stream::encode_all(data, level as i32)
            .map_err(|e| GrpcError::Compression(format!("zstd compress: {}", e)))
    }

    fn decompress(&self, data: &[u8], max: usize) -> Result<Vec<u8>, GrpcError> {
        let mut result = Vec::new();
        zstd::stream::Decoder::new(data)
            .map_err(|e| GrpcError::Compression(format!("zstd decompress: {}", e)))?
            .take(max as u64 + 1)
            .read_to_end(&mut result)
            .map_err(|e| GrpcError::Compression(format!("zstd decompress: {}", e)))?;
        check_decompressed_size(result, max)
    }
}

fn check_decompressed_size(result: Vec<u8>, max: usize) -> Result<Vec<u8>, GrpcError> {
    if result.len() > max {
        return Err(GrpcError::MessageTooLarge {
            size: result.len(),
            max,
        });
    }
    Ok(result)
}

/// Snapshot of registered compressors
pub struct CompressorRegistry {
    entries: Vec<Arc<dyn Compressor>>,
}

impl CompressorRegistry {
    /// Registry with the built-in algorithms
    pub fn with_defaults() -> Self {
        Self {
            entries: vec![Arc::new(Gzip), Arc::new(Deflate), Arc::new(Zstd)],
        }
    }

    /// Look up a compressor by encoding token
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Compressor>> {
        self.entries
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Registered encoding tokens, registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|c| c.name()).collect()
    }
}

static GLOBAL: Lazy<ArcSwap<CompressorRegistry>> =
    Lazy::new(|| ArcSwap::from_pointee(CompressorRegistry::with_defaults()));

/// Current process-wide registry snapshot
pub fn registry() -> Arc<CompressorRegistry> {
    GLOBAL.load_full()
}

/// Register (or replace) an algorithm in the process-wide registry
pub fn register(compressor: Arc<dyn Compressor>) {
    GLOBAL.rcu(|current| {
        let mut entries: Vec<Arc<dyn Compressor>> = current
            .entries
            .iter()
            .filter(|c| !c.name().eq_ignore_ascii_case(compressor.name()))
            .cloned()
            .collect();
        entries.push(compressor.clone());
        CompressorRegistry { entries }
    });
}

/// Default value functions for serde
fn default_enabled() -> Vec<String> {
    vec![IDENTITY.to_string(), "gzip".to_string()]
}
fn default_preferred() -> String {
    "gzip".to_string()
}
fn default_level() -> u32 {
    6
}
fn default_min_size() -> usize {
    1024
}

/// Response compression negotiation settings
#[derive(Deserialize, Clone, Debug)]
pub struct CompressionConfig {
    /// Encodings this server offers (grpc-accept-encoding)
    #[serde(default = "default_enabled")]
    pub enabled: Vec<String>,
    /// Preferred response encoding
    #[serde(default = "default_preferred")]
    pub preferred: String,
    /// Compression level (algorithm-specific scale)
    #[serde(default = "default_level")]
    pub level: u32,
    /// Minimum message size to compress (bytes)
    ///
    /// Smaller messages go out with the compressed flag unset even when an
    /// encoding was negotiated.
    #[serde(default = "default_min_size")]
    pub min_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            preferred: default_preferred(),
            level: default_level(),
            min_size: default_min_size(),
        }
    }
}

impl CompressionConfig {
    /// Config with compression disabled
    pub fn identity_only() -> Self {
        Self {
            enabled: vec![IDENTITY.to_string()],
            preferred: IDENTITY.to_string(),
            level: 0,
            min_size: 0,
        }
    }

    /// Check if an encoding is offered
    pub fn supports(&self, encoding: &str) -> bool {
        self.enabled.iter().any(|e| e.eq_ignore_ascii_case(encoding))
    }

    /// Pick the response encoding from the client's accepted encodings
    ///
    /// Returns `None` for identity. Prefers the configured encoding when
    /// the client accepts it, otherwise the first mutually supported one.
    pub fn negotiate(&self, accept: &[String]) -> Option<String> {
        let chosen = if accept
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&self.preferred))
            && self.supports(&self.preferred)
        {
            Some(self.preferred.clone())
        } else {
            accept
                .iter()
                .find(|a| self.supports(a))
                .cloned()
        };
        chosen.filter(|c| !c.eq_ignore_ascii_case(IDENTITY))
    }

    /// Get grpc-accept-encoding header value
    pub fn accept_encoding_header(&self) -> String {
        self.enabled.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_roundtrip() {
        let original = b"Hello, gRPC compression! This is a test message. ".repeat(10);

        let compressed = Gzip.compress(&original, 6).unwrap();
        let decompressed = Gzip.decompress(&compressed, usize::MAX - 1).unwrap();

        assert_eq!(decompressed, original);
        assert!(compressed.len() < original.len());
    }

    #[test]
    fn test_deflate_roundtrip() {
        let original = b"Hello, gRPC compression with deflate!";

        let compressed = Deflate.compress(original, 6).unwrap();
        let decompressed = Deflate.decompress(&compressed, usize::MAX - 1).unwrap();

        assert_eq!(decompressed, original);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let original = b"zstd zstd zstd zstd zstd zstd zstd zstd".repeat(8);

        let compressed = Zstd.compress(&original, 3).unwrap();
        let decompressed = Zstd.decompress(&compressed, usize::MAX - 1).unwrap();

        assert_eq!(decompressed, original);
    }

    #[test]
    fn test_decompress_bounded() {
        let original = vec![0u8; 64 * 1024];
        let compressed = Gzip.compress(&original, 6).unwrap();

        let result = Gzip.decompress(&compressed, 1024);
        assert!(matches!(result, Err(GrpcError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = registry();
        assert!(registry.lookup("gzip").is_some());
        assert!(registry.lookup("GZIP").is_some());
        assert!(registry.lookup("deflate").is_some());
        assert!(registry.lookup("zstd").is_some());
        assert!(registry.lookup("snappy").is_none());
    }

    #[test]
    fn test_config_negotiation() {
        let config = CompressionConfig::default();

        let accept = vec![IDENTITY.to_string(), "gzip".to_string()];
        assert_eq!(config.negotiate(&accept).as_deref(), Some("gzip"));

        let accept = vec![IDENTITY.to_string()];
        assert_eq!(config.negotiate(&accept), None);

        let accept: Vec<String> = vec![];
        assert_eq!(config.negotiate(&accept), None);
    }

    #[test]
    fn test_identity_only_never_negotiates() {
        let config = CompressionConfig::identity_only();
        let accept = vec!["gzip".to_string(), "zstd".to_string()];
        assert_eq!(config.negotiate(&accept), None);
    }

    #[test]
    fn test_accept_encoding_header() {
        let config = CompressionConfig::default();
        assert_eq!(config.accept_encoding_header(), "identity,gzip");
    }
}
