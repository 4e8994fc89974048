//! Service Registry
//!
//! Handlers attach to method descriptors through a two-phase builder:
//! [`ServiceBuilder`] accumulates declared methods and their handler
//! factories, and [`ServiceBuilder::build`] validates that every declared
//! descriptor resolves to a handler — an unbound method is a construction
//! error, never a request-time one. The resulting [`Service`] is an
//! immutable snapshot; the builder's storage is consumed, so the live
//! registry never aliases it.
//!
//! Resolution is keyed by descriptor identity, not method name: the same
//! RPC name bound for protobuf and JSON yields two distinct descriptors
//! and two distinct bindings.

use std::sync::Arc;

use crate::call::{CallContext, Responder, ServerCall};
use crate::codec::{MessageDecoder, MessageEncoder};
use crate::error::GrpcError;
use crate::server::GrpcServer;
use crate::service::{MethodRef, ServiceMethod, ServiceName};
use crate::status::{GrpcStatusCode, StatusError};

/// Per-call handler for one method's typed messages
///
/// One observer instance is created per call and receives that call's
/// events in order. All callbacks are fallible: an `Err` terminates the
/// call through the status mapping, it never unwinds into the transport.
pub trait CallObserver<Req, Resp>: Send {
    /// One decoded request message arrived
    fn on_message(
        &mut self,
        resp: &mut Responder<'_, '_, Resp>,
        msg: Req,
    ) -> anyhow::Result<()>;

    /// The client half-closed; no more messages will arrive
    fn on_end(&mut self, resp: &mut Responder<'_, '_, Resp>) -> anyhow::Result<()>;

    /// The saturated write queue drained below the low watermark
    fn on_drain(&mut self, _resp: &mut Responder<'_, '_, Resp>) -> anyhow::Result<()> {
        Ok(())
    }

    /// The call was torn down (peer cancel or deadline); no writes possible
    fn on_abort(&mut self, _status: GrpcStatusCode) {}
}

/// Factory invoked once per call to create its observer
pub type ObserverFactory<Req, Resp> =
    Arc<dyn Fn(&CallContext) -> Box<dyn CallObserver<Req, Resp>> + Send + Sync>;

/// Type-erased observer driven by the engine
pub(crate) trait ErasedObserver: Send {
    fn on_frame(&mut self, call: &mut ServerCall<'_>, payload: &[u8]) -> anyhow::Result<()>;
    fn on_end(&mut self, call: &mut ServerCall<'_>) -> anyhow::Result<()>;
    fn on_drain(&mut self, call: &mut ServerCall<'_>) -> anyhow::Result<()>;
    fn on_abort(&mut self, status: GrpcStatusCode);
}

struct TypedObserver<Req, Resp> {
    decoder: Arc<dyn MessageDecoder<Req>>,
    encoder: Arc<dyn MessageEncoder<Resp>>,
    inner: Box<dyn CallObserver<Req, Resp>>,
}

impl<Req: 'static, Resp: 'static> ErasedObserver for TypedObserver<Req, Resp> {
    fn on_frame(&mut self, call: &mut ServerCall<'_>, payload: &[u8]) -> anyhow::Result<()> {
        let msg = self.decoder.decode(payload)?;
        let mut resp = Responder::new(call, self.encoder.as_ref());
        self.inner.on_message(&mut resp, msg)
    }

    fn on_end(&mut self, call: &mut ServerCall<'_>) -> anyhow::Result<()> {
        let mut resp = Responder::new(call, self.encoder.as_ref());
        self.inner.on_end(&mut resp)
    }

    fn on_drain(&mut self, call: &mut ServerCall<'_>) -> anyhow::Result<()> {
        let mut resp = Responder::new(call, self.encoder.as_ref());
        self.inner.on_drain(&mut resp)
    }

    fn on_abort(&mut self, status: GrpcStatusCode) {
        self.inner.on_abort(status);
    }
}

/// One (descriptor, handler factory) pair, erased for the route table
pub struct MethodBinding {
    method: MethodRef,
    start: Box<dyn Fn(&CallContext) -> Box<dyn ErasedObserver> + Send + Sync>,
}

impl MethodBinding {
    /// Descriptor identity this binding serves
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub(crate) fn start(&self, ctx: &CallContext) -> Box<dyn ErasedObserver> {
        (self.start)(ctx)
    }
}

fn erase<Req, Resp>(
    method: &Arc<ServiceMethod<Req, Resp>>,
    factory: ObserverFactory<Req, Resp>,
) -> MethodBinding
where
    Req: 'static,
    Resp: 'static,
{
    let decoder = method.decoder().clone();
    let encoder = method.encoder().clone();
    MethodBinding {
        method: method.to_ref(),
        start: Box::new(move |ctx| {
            Box::new(TypedObserver {
                decoder: decoder.clone(),
                encoder: encoder.clone(),
                inner: factory(ctx),
            }) as Box<dyn ErasedObserver>
        }),
    }
}

/// Immutable set of bound methods for one service
pub struct Service {
    name: ServiceName,
    bindings: Vec<Arc<MethodBinding>>,
}

impl Service {
    /// Start building a service binding
    pub fn builder(name: ServiceName) -> ServiceBuilder {
        ServiceBuilder {
            name,
            declared: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Service name
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Resolve a descriptor to its binding, by identity
    pub fn resolve(&self, method: &MethodRef) -> Option<&Arc<MethodBinding>> {
        self.bindings.iter().find(|b| b.method == *method)
    }

    /// Bound method descriptors, declaration order
    pub fn methods(&self) -> impl Iterator<Item = &MethodRef> {
        self.bindings.iter().map(|b| b.method())
    }

    /// Install every binding into a server's route table
    pub fn bind(&self, server: &mut GrpcServer) -> Result<(), GrpcError> {
        for binding in &self.bindings {
            server.install(binding.clone())?;
        }
        Ok(())
    }
}

/// Mutable accumulation phase of a service binding
pub struct ServiceBuilder {
    name: ServiceName,
    declared: Vec<MethodRef>,
    bindings: Vec<Arc<MethodBinding>>,
}

impl ServiceBuilder {
    /// Declare descriptors this service exposes
    ///
    /// Every declared descriptor must have a handler attached with
    /// [`handle`](Self::handle) by the time [`build`](Self::build) runs.
    /// Declaring a subset of a service's methods is fine — partial
    /// binding exposes only what is declared.
    pub fn bind(mut self, methods: impl IntoIterator<Item = MethodRef>) -> Self {
        for method in methods {
            if !self.declared.contains(&method) {
                self.declared.push(method);
            }
        }
        self
    }

    /// Attach a handler factory to a descriptor (declares it as well)
    pub fn handle<Req, Resp>(
        mut self,
        method: &Arc<ServiceMethod<Req, Resp>>,
        factory: ObserverFactory<Req, Resp>,
    ) -> Self
    where
        Req: 'static,
        Resp: 'static,
    {
        let method_ref = method.to_ref();
        if !self.declared.contains(&method_ref) {
            self.declared.push(method_ref);
        }
        self.bindings.push(Arc::new(erase(method, factory)));
        self
    }

    /// Validate and snapshot into an immutable [`Service`]
    ///
    /// Fails if any declared descriptor has no handler.
    pub fn build(self) -> Result<Service, GrpcError> {
        for declared in &self.declared {
            if !self.bindings.iter().any(|b| b.method == *declared) {
                return Err(GrpcError::UnboundMethod(declared.route().to_string()));
            }
        }
        Ok(Service {
            name: self.name,
            bindings: self.bindings,
        })
    }
}

/// Cardinality adapters: plain closures as call observers
pub mod handlers {
    use super::*;
    use crate::status::GrpcStatusCode;

    struct UnaryObserver<Req, Resp, F> {
        f: Arc<F>,
        request: Option<Req>,
        _marker: std::marker::PhantomData<fn() -> Resp>,
    }

    impl<Req, Resp, F> CallObserver<Req, Resp> for UnaryObserver<Req, Resp, F>
    where
        F: Fn(&CallContext, Req) -> Result<Resp, StatusError> + Send + Sync,
        Req: Send,
        Resp: Send,
    {
        fn on_message(
            &mut self,
            _resp: &mut Responder<'_, '_, Resp>,
            msg: Req,
        ) -> anyhow::Result<()> {
            if self.request.replace(msg).is_some() {
                return Err(StatusError::new(
                    GrpcStatusCode::Internal,
                    "unary call received more than one request message",
                )
                .into());
            }
            Ok(())
        }

        fn on_end(&mut self, resp: &mut Responder<'_, '_, Resp>) -> anyhow::Result<()> {
            let request = self.request.take().ok_or_else(|| {
                StatusError::new(
                    GrpcStatusCode::Internal,
                    "half-close without a request message",
                )
            })?;
            let reply = (self.f)(resp.context(), request)?;
            resp.write(&reply)?;
            resp.end();
            Ok(())
        }
    }

    /// Unary RPC from a request/reply closure
    pub fn unary<Req, Resp, F>(f: F) -> ObserverFactory<Req, Resp>
    where
        F: Fn(&CallContext, Req) -> Result<Resp, StatusError> + Send + Sync + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let f = Arc::new(f);
        Arc::new(move |_ctx| {
            Box::new(UnaryObserver {
                f: f.clone(),
                request: None,
                _marker: std::marker::PhantomData,
            }) as Box<dyn CallObserver<Req, Resp>>
        })
    }

    struct ServerStreamingObserver<Req, Resp, F> {
        f: Arc<F>,
        request: Option<Req>,
        _marker: std::marker::PhantomData<fn() -> Resp>,
    }

    impl<Req, Resp, F> CallObserver<Req, Resp> for ServerStreamingObserver<Req, Resp, F>
    where
        F: Fn(Req, &mut Responder<'_, '_, Resp>) -> anyhow::Result<()> + Send + Sync,
        Req: Send,
        Resp: Send,
    {
        fn on_message(
            &mut self,
            _resp: &mut Responder<'_, '_, Resp>,
            msg: Req,
        ) -> anyhow::Result<()> {
            self.request = Some(msg);
            Ok(())
        }

        fn on_end(&mut self, resp: &mut Responder<'_, '_, Resp>) -> anyhow::Result<()> {
            let request = self.request.take().ok_or_else(|| {
                StatusError::new(
                    GrpcStatusCode::Internal,
                    "half-close without a request message",
                )
            })?;
            (self.f)(request, resp)?;
            if !resp.is_terminal() {
                resp.end();
            }
            Ok(())
        }
    }

    /// Server-streaming RPC: the closure writes the stream and may end it
    pub fn server_streaming<Req, Resp, F>(f: F) -> ObserverFactory<Req, Resp>
    where
        F: Fn(Req, &mut Responder<'_, '_, Resp>) -> anyhow::Result<()> + Send + Sync + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let f = Arc::new(f);
        Arc::new(move |_ctx| {
            Box::new(ServerStreamingObserver {
                f: f.clone(),
                request: None,
                _marker: std::marker::PhantomData,
            }) as Box<dyn CallObserver<Req, Resp>>
        })
    }

    struct ClientStreamingObserver<Req, Resp, F> {
        f: Arc<F>,
        requests: Vec<Req>,
        _marker: std::marker::PhantomData<fn() -> Resp>,
    }

    impl<Req, Resp, F> CallObserver<Req, Resp> for ClientStreamingObserver<Req, Resp, F>
    where
        F: Fn(&CallContext, Vec<Req>) -> Result<Resp, StatusError> + Send + Sync,
        Req: Send,
        Resp: Send,
    {
        fn on_message(
            &mut self,
            _resp: &mut Responder<'_, '_, Resp>,
            msg: Req,
        ) -> anyhow::Result<()> {
            self.requests.push(msg);
            Ok(())
        }

        fn on_end(&mut self, resp: &mut Responder<'_, '_, Resp>) -> anyhow::Result<()> {
            let reply = (self.f)(resp.context(), std::mem::take(&mut self.requests))?;
            resp.write(&reply)?;
            resp.end();
            Ok(())
        }
    }

    /// Client-streaming RPC from a closure over the collected messages
    pub fn client_streaming<Req, Resp, F>(f: F) -> ObserverFactory<Req, Resp>
    where
        F: Fn(&CallContext, Vec<Req>) -> Result<Resp, StatusError> + Send + Sync + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let f = Arc::new(f);
        Arc::new(move |_ctx| {
            Box::new(ClientStreamingObserver {
                f: f.clone(),
                requests: Vec::new(),
                _marker: std::marker::PhantomData,
            }) as Box<dyn CallObserver<Req, Resp>>
        })
    }

    struct BidiObserver<Req, Resp, F> {
        f: Arc<F>,
        _marker: std::marker::PhantomData<fn(Req) -> Resp>,
    }

    impl<Req, Resp, F> CallObserver<Req, Resp> for BidiObserver<Req, Resp, F>
    where
        F: Fn(Req, &mut Responder<'_, '_, Resp>) -> anyhow::Result<()> + Send + Sync,
        Req: Send,
        Resp: Send,
    {
        fn on_message(
            &mut self,
            resp: &mut Responder<'_, '_, Resp>,
            msg: Req,
        ) -> anyhow::Result<()> {
            (self.f)(msg, resp)
        }

        fn on_end(&mut self, resp: &mut Responder<'_, '_, Resp>) -> anyhow::Result<()> {
            if !resp.is_terminal() {
                resp.end();
            }
            Ok(())
        }
    }

    /// Bidirectional RPC: the closure runs once per inbound message
    pub fn bidi<Req, Resp, F>(f: F) -> ObserverFactory<Req, Resp>
    where
        F: Fn(Req, &mut Responder<'_, '_, Resp>) -> anyhow::Result<()> + Send + Sync + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let f = Arc::new(f);
        Arc::new(move |_ctx| {
            Box::new(BidiObserver {
                f: f.clone(),
                _marker: std::marker::PhantomData,
            }) as Box<dyn CallObserver<Req, Resp>>
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::WireFormat;
    use crate::service::MethodKind;

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

    fn text_method(name: &str) -> Arc<ServiceMethod<String, String>> {
        ServiceMethod::server(
            ServiceName::create("pkg", "Svc"),
            name,
            MethodKind::Unary,
            WireFormat::Proto,
            Arc::new(TextCodec),
            Arc::new(TextCodec),
        )
    }

    #[test]
    fn test_build_validates_declared_methods() {
        let echo = text_method("Echo");
        let missing = text_method("Missing");

        let result = Service::builder(ServiceName::create("pkg", "Svc"))
            .bind([echo.to_ref(), missing.to_ref()])
            .handle(&echo, handlers::unary(|_ctx, req: String| Ok(req)))
            .build();

        match result {
            Err(GrpcError::UnboundMethod(route)) => assert_eq!(route, "/pkg.Svc/Missing"),
            other => panic!("expected UnboundMethod, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_build_succeeds_when_all_bound() {
        let echo = text_method("Echo");
        let service = Service::builder(ServiceName::create("pkg", "Svc"))
            .bind([echo.to_ref()])
            .handle(&echo, handlers::unary(|_ctx, req: String| Ok(req)))
            .build()
            .unwrap();

        assert!(service.resolve(&echo.to_ref()).is_some());
        assert_eq!(service.methods().count(), 1);
    }

    #[test]
    fn test_resolution_is_by_identity() {
        let echo = text_method("Echo");
        let twin = text_method("Echo");

        let service = Service::builder(ServiceName::create("pkg", "Svc"))
            .handle(&echo, handlers::unary(|_ctx, req: String| Ok(req)))
            .build()
            .unwrap();

        // Same route, different descriptor instance: not resolvable.
        assert_eq!(echo.route(), twin.route());
        assert!(service.resolve(&echo.to_ref()).is_some());
        assert!(service.resolve(&twin.to_ref()).is_none());
    }

    #[test]
    fn test_partial_binding() {
        let echo = text_method("Echo");
        let _other = text_method("Other");

        // Only Echo declared and bound; Other simply stays unexposed.
        let service = Service::builder(ServiceName::create("pkg", "Svc"))
            .bind([echo.to_ref()])
            .handle(&echo, handlers::unary(|_ctx, req: String| Ok(req)))
            .build()
            .unwrap();

        assert_eq!(service.methods().count(), 1);
    }
}
