//! Service Method Descriptors
//!
//! A [`ServiceMethod`] identifies one RPC: service name, method name,
//! cardinality, wire format, and the injected codec pair for its input and
//! output types. Each constructed descriptor gets a process-unique id;
//! dispatch is keyed on that identity, not on the method's string name, so
//! protobuf and JSON bindings of the same RPC coexist as distinct
//! descriptors.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::{MessageDecoder, MessageEncoder};
use crate::headers::WireFormat;

static NEXT_METHOD_ID: AtomicU64 = AtomicU64::new(1);

/// Fully-qualified gRPC service name ("package.Service")
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    package: String,
    name: String,
}

impl ServiceName {
    /// Create from package and service name parts
    pub fn create(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }

    /// Parse a fully-qualified name ("package.Service")
    pub fn parse(fq_name: &str) -> Self {
        match fq_name.rsplit_once('.') {
            Some((package, name)) => Self::create(package, name),
            None => Self::create("", fq_name),
        }
    }

    /// Package part ("" when unqualified)
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Service name part
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully-qualified form
    pub fn full_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.package, self.name)
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// RPC cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Single request, single response
    Unary,
    /// Multiple requests (client streaming), single response
    ClientStreaming,
    /// Single request, multiple responses (server streaming)
    ServerStreaming,
    /// Multiple requests and responses (bidirectional streaming)
    BidiStreaming,
}

impl MethodKind {
    /// Check if this kind expects multiple client messages
    pub fn is_client_streaming(&self) -> bool {
        matches!(self, Self::ClientStreaming | Self::BidiStreaming)
    }

    /// Check if this kind expects multiple server messages
    pub fn is_server_streaming(&self) -> bool {
        matches!(self, Self::ServerStreaming | Self::BidiStreaming)
    }
}

/// Descriptor for one server-side RPC method
///
/// Immutable once constructed. Clone the `Arc` to share; the identity
/// travels with it.
pub struct ServiceMethod<Req, Resp> {
    id: u64,
    service: ServiceName,
    method: String,
    kind: MethodKind,
    format: WireFormat,
    decoder: Arc<dyn MessageDecoder<Req>>,
    encoder: Arc<dyn MessageEncoder<Resp>>,
}

impl<Req, Resp> ServiceMethod<Req, Resp> {
    /// Create a server method descriptor with an explicit codec pair
    pub fn server(
        service: ServiceName,
        method: impl Into<String>,
        kind: MethodKind,
        format: WireFormat,
        encoder: Arc<dyn MessageEncoder<Resp>>,
        decoder: Arc<dyn MessageDecoder<Req>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed),
            service,
            method: method.into(),
            kind,
            format,
            decoder,
            encoder,
        })
    }

    /// Unique identity of this descriptor instance
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Service this method belongs to
    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Method name
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Cardinality
    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Wire format this binding serves
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Request route ("/package.Service/Method")
    pub fn route(&self) -> String {
        format!("/{}/{}", self.service.full_name(), self.method)
    }

    /// Input message decoder
    pub fn decoder(&self) -> &Arc<dyn MessageDecoder<Req>> {
        &self.decoder
    }

    /// Output message encoder
    pub fn encoder(&self) -> &Arc<dyn MessageEncoder<Resp>> {
        &self.encoder
    }

    /// Erased identity reference for registry bookkeeping
    pub fn to_ref(&self) -> MethodRef {
        MethodRef {
            id: self.id,
            route: self.route(),
            kind: self.kind,
            format: self.format,
        }
    }
}

#[cfg(feature = "prost")]
impl<Req, Resp> ServiceMethod<Req, Resp>
where
    Req: prost::Message + Default + 'static,
    Resp: prost::Message + 'static,
{
    /// Protobuf binding of a method
    pub fn proto(service: ServiceName, method: impl Into<String>, kind: MethodKind) -> Arc<Self> {
        Self::server(
            service,
            method,
            kind,
            WireFormat::Proto,
            Arc::new(crate::codec::ProstCodec::<Resp>::new()),
            Arc::new(crate::codec::ProstCodec::<Req>::new()),
        )
    }
}

#[cfg(feature = "json")]
impl<Req, Resp> ServiceMethod<Req, Resp>
where
    Req: serde::de::DeserializeOwned + Send + Sync + 'static,
    Resp: serde::Serialize + Send + Sync + 'static,
{
    /// JSON binding of a method
    pub fn json(service: ServiceName, method: impl Into<String>, kind: MethodKind) -> Arc<Self> {
        Self::server(
            service,
            method,
            kind,
            WireFormat::Json,
            Arc::new(crate::codec::JsonCodec::<Resp>::new()),
            Arc::new(crate::codec::JsonCodec::<Req>::new()),
        )
    }
}

impl<Req, Resp> fmt::Debug for ServiceMethod<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceMethod")
            .field("id", &self.id)
            .field("route", &self.route())
            .field("kind", &self.kind)
            .field("format", &self.format)
            .finish()
    }
}

/// Erased descriptor identity
///
/// Equality is identity of the descriptor instance, never the route string.
#[derive(Debug, Clone)]
pub struct MethodRef {
    pub(crate) id: u64,
    pub(crate) route: String,
    pub(crate) kind: MethodKind,
    pub(crate) format: WireFormat,
}

impl MethodRef {
    /// Unique descriptor identity
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request route
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Cardinality
    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Wire format
    pub fn format(&self) -> WireFormat {
        self.format
    }
}

impl PartialEq for MethodRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MethodRef {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MessageDecoder, MessageEncoder};
    use crate::error::GrpcError;

    struct TextCodec;

    impl MessageEncoder<String> for TextCodec {
        fn encode(&self, msg: &String) -> Result<Vec<u8>, GrpcError> {
            Ok(msg.clone().into_bytes())
        }
    }

    impl MessageDecoder<String> for TextCodec {
        fn decode(&self, bytes: &[u8]) -> Result<String, GrpcError> {
            String::from_utf8(bytes.to_vec()).map_err(|e| GrpcError::Codec(e.to_string()))
        }
    }

    fn text_method(format: WireFormat) -> Arc<ServiceMethod<String, String>> {
        ServiceMethod::server(
            ServiceName::create("pkg", "Svc"),
            "Echo",
            MethodKind::Unary,
            format,
            Arc::new(TextCodec),
            Arc::new(TextCodec),
        )
    }

    #[test]
    fn test_service_name() {
        let name = ServiceName::create("examples.grpc", "Streaming");
        assert_eq!(name.full_name(), "examples.grpc.Streaming");
        assert_eq!(name.package(), "examples.grpc");

        let parsed = ServiceName::parse("examples.grpc.Streaming");
        assert_eq!(parsed, name);

        let bare = ServiceName::parse("Plain");
        assert_eq!(bare.package(), "");
        assert_eq!(bare.full_name(), "Plain");
    }

    #[test]
    fn test_route() {
        let m = text_method(WireFormat::Proto);
        assert_eq!(m.route(), "/pkg.Svc/Echo");
    }

    #[test]
    fn test_identity_not_name() {
        // Same route, distinct descriptors: identity keeps them apart.
        let proto = text_method(WireFormat::Proto);
        let json = text_method(WireFormat::Json);

        assert_eq!(proto.route(), json.route());
        assert_ne!(proto.to_ref(), json.to_ref());
        assert_eq!(proto.to_ref(), proto.to_ref());
    }

    #[test]
    fn test_kind_predicates() {
        assert!(!MethodKind::Unary.is_client_streaming());
        assert!(!MethodKind::Unary.is_server_streaming());

        assert!(MethodKind::ClientStreaming.is_client_streaming());
        assert!(!MethodKind::ClientStreaming.is_server_streaming());

        assert!(!MethodKind::ServerStreaming.is_client_streaming());
        assert!(MethodKind::ServerStreaming.is_server_streaming());

        assert!(MethodKind::BidiStreaming.is_client_streaming());
        assert!(MethodKind::BidiStreaming.is_server_streaming());
    }
}
