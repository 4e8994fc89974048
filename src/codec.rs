//! Message Codecs
//!
//! The engine never serializes domain messages itself: every
//! [`ServiceMethod`](crate::service::ServiceMethod) carries an injected
//! encoder/decoder pair for its input and output types. `ProstCodec`
//! connects protobuf messages (feature `prost`), `JsonCodec` connects
//! serde types for the JSON wire format (feature `json`).

use crate::error::GrpcError;

/// Encodes one message type to payload bytes
pub trait MessageEncoder<T>: Send + Sync {
    /// Encode a message to its wire payload (before framing)
    fn encode(&self, msg: &T) -> Result<Vec<u8>, GrpcError>;
}

/// Decodes one message type from payload bytes
pub trait MessageDecoder<T>: Send + Sync {
    /// Decode a wire payload (after unframing and decompression)
    fn decode(&self, bytes: &[u8]) -> Result<T, GrpcError>;
}

/// Protobuf codec backed by prost
#[cfg(feature = "prost")]
pub struct ProstCodec<T> {
    _marker: std::marker::PhantomData<fn(T) -> T>,
}

#[cfg(feature = "prost")]
impl<T> ProstCodec<T> {
    /// Create a codec for `T`
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "prost")]
impl<T> Default for ProstCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "prost")]
impl<T: prost::Message> MessageEncoder<T> for ProstCodec<T> {
    fn encode(&self, msg: &T) -> Result<Vec<u8>, GrpcError> {
        Ok(msg.encode_to_vec())
    }
}

#[cfg(feature = "prost")]
impl<T: prost::Message + Default> MessageDecoder<T> for ProstCodec<T> {
    fn decode(&self, bytes: &[u8]) -> Result<T, GrpcError> {
        T::decode(bytes).map_err(|e| GrpcError::Codec(format!("protobuf decode: {}", e)))
    }
}

/// JSON codec backed by serde_json
#[cfg(feature = "json")]
pub struct JsonCodec<T> {
    _marker: std::marker::PhantomData<fn(T) -> T>,
}

#[cfg(feature = "json")]
impl<T> JsonCodec<T> {
    /// Create a codec for `T`
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "json")]
impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "json")]
impl<T: serde::Serialize + Send + Sync> MessageEncoder<T> for JsonCodec<T> {
    fn encode(&self, msg: &T) -> Result<Vec<u8>, GrpcError> {
        serde_json::to_vec(msg).map_err(|e| GrpcError::Codec(format!("json encode: {}", e)))
    }
}

#[cfg(feature = "json")]
impl<T: serde::de::DeserializeOwned + Send + Sync> MessageDecoder<T> for JsonCodec<T> {
    fn decode(&self, bytes: &[u8]) -> Result<T, GrpcError> {
        serde_json::from_slice(bytes).map_err(|e| GrpcError::Codec(format!("json decode: {}", e)))
    }
}


#[cfg(all(test, feature = "json"))]
mod json_tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        message: String,
    }

    #[test]
    fn test_json_roundtrip() {
        let codec = JsonCodec::<Greeting>::new();
        let msg = Greeting {
            message: "Hello Julien".to_string(),
        };
        let bytes = codec.encode(&msg).unwrap();
        assert_eq!(bytes, br#"{"message":"Hello Julien"}"#);
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_json_decode_invalid() {
        let codec = JsonCodec::<Greeting>::new();
        assert!(matches!(
            codec.decode(b"{not json"),
            Err(GrpcError::Codec(_))
        ));
    }
}
