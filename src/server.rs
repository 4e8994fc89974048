//! gRPC Server Engine (sans-io)
//!
//! [`GrpcServer`] holds the immutable route table and configuration,
//! shared across connections. [`GrpcConnection`] is the per-connection
//! engine: the embedder feeds it request events and drains
//! [`TransportAction`]s, in the same feed/poll shape as the rest of the
//! stack's protocol state machines. Nothing here blocks; every wait —
//! missing frame bytes, saturated write queue, armed deadline — is
//! expressed by returning control to the embedder.
//!
//! ```text
//! open_stream / data / reset / tick ──▶ [GrpcConnection] ──▶ poll_action
//!                                            │
//!                         dispatch ── decode ── handler ── respond
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::call::{trailers_only_headers, CallContext, ResponseState, ServerCall};
use crate::compression;
use crate::config::EngineConfig;
use crate::deadline::DeadlineQueue;
use crate::error::GrpcError;
use crate::headers::{is_grpc_content_type, RequestHead, WireFormat};
use crate::metadata::Metadata;
use crate::pump::{InboundEvent, InboundPump, WriteQueue};
use crate::registry::{ErasedObserver, MethodBinding, ObserverFactory};
use crate::service::{MethodKind, ServiceMethod};
use crate::status::{status_of, GrpcStatus, GrpcStatusCode, StatusError};

/// One outbound instruction for the transport layer
#[derive(Debug)]
pub enum TransportAction {
    /// Send a header block
    SendHeaders {
        /// Stream to send on
        stream: u32,
        /// Header list, pseudo-headers first
        headers: Vec<(Vec<u8>, Vec<u8>)>,
        /// True for a trailers-only response: this block closes the stream
        end_stream: bool,
    },
    /// Send body bytes (framed gRPC messages)
    SendData {
        /// Stream to send on
        stream: u32,
        /// Encoded envelope bytes
        data: Vec<u8>,
    },
    /// Send the terminal trailer block; closes the stream
    SendTrailers {
        /// Stream to send on
        stream: u32,
        /// Trailer list
        trailers: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// Reset the stream without a gRPC response
    Reset {
        /// Stream to reset
        stream: u32,
    },
    /// Answer at the HTTP level before the gRPC state machine is entered
    Reject {
        /// Stream to answer on
        stream: u32,
        /// HTTP status code (405, 415, ...)
        http_status: u16,
    },
}

impl TransportAction {
    /// Stream this action belongs to
    pub fn stream(&self) -> u32 {
        match self {
            Self::SendHeaders { stream, .. }
            | Self::SendData { stream, .. }
            | Self::SendTrailers { stream, .. }
            | Self::Reset { stream }
            | Self::Reject { stream, .. } => *stream,
        }
    }
}

/// Shared server: route table + configuration
///
/// Build once, then share behind an `Arc` across connections. The route
/// table is immutable after setup; lookups on the request path take no
/// locks.
pub struct GrpcServer {
    config: EngineConfig,
    /// Radix-tree route lookup; values index into `routes`
    router: matchit::Router<usize>,
    /// Per-route binding sets, one entry per wire format
    routes: Vec<Vec<Arc<MethodBinding>>>,
    route_index: HashMap<String, usize>,
}

impl GrpcServer {
    /// Create a server with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            router: matchit::Router::new(),
            routes: Vec::new(),
            route_index: HashMap::new(),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Direct (descriptor, handler) binding is unsupported
    ///
    /// The only supported path is the service builder:
    /// `Service::builder(..).bind(..).handle(..).build()?.bind(&mut server)`.
    pub fn bind_method<Req, Resp>(
        &mut self,
        _method: &Arc<ServiceMethod<Req, Resp>>,
        _handler: ObserverFactory<Req, Resp>,
    ) -> Result<(), GrpcError> {
        Err(GrpcError::Unsupported(
            "bind methods through Service::builder, not directly on the server",
        ))
    }

    pub(crate) fn install(&mut self, binding: Arc<MethodBinding>) -> Result<(), GrpcError> {
        let route = binding.method().route().to_string();
        match self.route_index.get(&route) {
            Some(&idx) => {
                let entry = &mut self.routes[idx];
                if entry
                    .iter()
                    .any(|b| b.method().format() == binding.method().format())
                {
                    return Err(GrpcError::DuplicateRoute(route));
                }
                entry.push(binding);
            }
            None => {
                let idx = self.routes.len();
                self.router
                    .insert(route.clone(), idx)
                    .map_err(|_| GrpcError::DuplicateRoute(route.clone()))?;
                self.routes.push(vec![binding]);
                self.route_index.insert(route, idx);
            }
        }
        Ok(())
    }

    fn resolve(&self, path: &str, format: WireFormat) -> Option<Arc<MethodBinding>> {
        let idx = *self.router.at(path).ok()?.value;
        self.routes[idx]
            .iter()
            .find(|b| b.method().format() == format)
            .cloned()
    }
}

struct CallState {
    context: CallContext,
    kind: MethodKind,
    observer: Option<Box<dyn ErasedObserver>>,
    pump: InboundPump,
    response: ResponseState,
    queue: WriteQueue,
    frames_delivered: usize,
}

/// Per-connection engine state
///
/// Owned by whatever thread or event loop drives the connection; call
/// state is never shared, so nothing here is synchronized.
pub struct GrpcConnection {
    server: Arc<GrpcServer>,
    calls: HashMap<u32, CallState>,
    actions: VecDeque<TransportAction>,
    deadlines: DeadlineQueue,
}

impl GrpcConnection {
    /// Create the engine for one connection
    pub fn new(server: Arc<GrpcServer>) -> Self {
        Self {
            server,
            calls: HashMap::new(),
            actions: VecDeque::new(),
            deadlines: DeadlineQueue::new(),
        }
    }

    /// A request header block arrived on `stream`
    ///
    /// Dispatches the call: route + wire-format resolution, compression
    /// negotiation, deadline arming, observer creation. Failures surface
    /// as actions (HTTP-level reject or trailers-only status), never as
    /// return values.
    pub fn open_stream(
        &mut self,
        stream: u32,
        headers: &[(impl AsRef<[u8]>, impl AsRef<[u8]>)],
        now: Instant,
    ) {
        let head = RequestHead::parse(headers);

        if head.method.as_deref() != Some("POST") {
            self.actions.push_back(TransportAction::Reject {
                stream,
                http_status: 405,
            });
            return;
        }

        let Some(format) = head.format else {
            ftlog::warn!(
                "grpc: stream {} rejected, content-type not handled",
                stream
            );
            self.actions.push_back(TransportAction::Reject {
                stream,
                http_status: 415,
            });
            return;
        };

        let path = head.path.clone().unwrap_or_default();
        let Some(binding) = self.server.resolve(&path, format) else {
            ftlog::debug!("grpc: stream {} unimplemented: {}", stream, path);
            self.respond_trailers_only(
                stream,
                &head,
                GrpcStatus::error(
                    GrpcStatusCode::Unimplemented,
                    format!("method not implemented: {}", path),
                ),
                false,
            );
            return;
        };

        if let Some(encoding) = &head.encoding {
            if compression::registry().lookup(encoding).is_none() {
                self.respond_trailers_only(
                    stream,
                    &head,
                    GrpcStatus::error(
                        GrpcStatusCode::Unimplemented,
                        format!("unsupported request encoding: {}", encoding),
                    ),
                    true,
                );
                return;
            }
        }

        let deadline = if self.server.config.schedule_deadlines {
            head.timeout.map(|timeout| now + timeout)
        } else {
            None
        };

        let context = CallContext {
            service: head.service_name().unwrap_or_default().to_string(),
            method: head.method_name().unwrap_or_default().to_string(),
            route: path.clone(),
            format,
            content_type: head.content_type.clone(),
            metadata: head.metadata.clone(),
            deadline,
            request_encoding: head.encoding.clone(),
            response_encoding: self
                .server
                .config
                .compression
                .negotiate(&head.accept_encoding),
        };

        let observer = binding.start(&context);
        if let Some(at) = deadline {
            self.deadlines.arm(stream, at);
        }

        ftlog::debug!("grpc: stream {} -> {} ({:?})", stream, path, format);

        self.calls.insert(
            stream,
            CallState {
                context,
                kind: binding.method().kind(),
                observer: Some(observer),
                pump: InboundPump::new(self.server.config.max_message_size),
                response: ResponseState::new(),
                queue: WriteQueue::new(
                    self.server.config.write_queue_high,
                    self.server.config.write_queue_low,
                ),
                frames_delivered: 0,
            },
        );
    }

    /// Body bytes arrived on `stream`
    pub fn data(&mut self, stream: u32, bytes: &[u8], end_stream: bool) {
        let Some(state) = self.calls.get_mut(&stream) else {
            return;
        };

        if let Err(e) = state.pump.feed(bytes) {
            ftlog::error!("grpc: stream {} protocol error: {}", stream, e);
            self.fail_stream(stream, anyhow::Error::new(e));
            return;
        }
        if end_stream {
            state.pump.end();
            if state.pump.has_partial_frame() {
                ftlog::error!("grpc: stream {} ended inside a message envelope", stream);
                self.fail_stream(
                    stream,
                    anyhow::Error::new(GrpcError::InvalidFrame(
                        "stream ended inside a message envelope".to_string(),
                    )),
                );
                return;
            }
        }

        self.drive(stream);
    }

    /// The peer reset `stream` (cancellation)
    ///
    /// The handler observes a CANCELLED abort, every queued outbound
    /// action for the stream is dropped, and all call resources are
    /// released. Idempotent against races with normal completion.
    pub fn reset(&mut self, stream: u32) {
        if let Some(mut state) = self.calls.remove(&stream) {
            if let Some(mut observer) = state.observer.take() {
                observer.on_abort(GrpcStatusCode::Cancelled);
            }
            self.actions.retain(|a| a.stream() != stream);
            ftlog::debug!("grpc: stream {} cancelled by peer", stream);
        }
    }

    /// Advance the clock; fails every call whose deadline passed
    pub fn tick(&mut self, now: Instant) {
        for (stream, _at) in self.deadlines.expired(now) {
            let Some(state) = self.calls.get_mut(&stream) else {
                // Lazily-disarmed entry for a completed call.
                continue;
            };
            if state.context.deadline.map_or(true, |d| d > now) {
                continue;
            }

            if let Some(mut observer) = state.observer.take() {
                observer.on_abort(GrpcStatusCode::DeadlineExceeded);
            }
            ftlog::debug!("grpc: stream {} deadline exceeded", stream);
            self.fail_now(stream, GrpcStatus::from_code(GrpcStatusCode::DeadlineExceeded));
        }
    }

    /// When the engine next needs a `tick`, if any deadline is armed
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.next_deadline()
    }

    /// Take the next outbound action
    ///
    /// Taking a data action credits the stream's write queue; a handler
    /// whose writes reported `Full` gets its drain callback once the
    /// queue crosses the low watermark.
    pub fn poll_action(&mut self) -> Option<TransportAction> {
        let action = self.actions.pop_front()?;

        if let TransportAction::SendData { stream, data } = &action {
            let stream = *stream;
            let drained = self
                .calls
                .get_mut(&stream)
                .map(|state| state.queue.complete(data.len()))
                .unwrap_or(false);
            if drained {
                if let Some(Err(e)) = self.with_call(stream, |observer, call| {
                    observer.on_drain(call)
                }) {
                    self.fail_stream(stream, e);
                } else {
                    // Drain may have resumed a paused inbound side.
                    self.drive(stream);
                }
            }
        }

        Some(action)
    }

    /// Whether outbound actions are queued
    pub fn has_pending_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Number of live calls on this connection
    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    // -- Internal --

    /// Deliver pump events to the observer until it pauses, runs dry, or
    /// the call terminates.
    fn drive(&mut self, stream: u32) {
        loop {
            let Some(state) = self.calls.get_mut(&stream) else {
                return;
            };
            if state.response.is_terminal() {
                break;
            }

            match state.pump.next_event() {
                Some(InboundEvent::Message(frame)) => {
                    if !state.kind.is_client_streaming() && state.frames_delivered >= 1 {
                        self.fail_stream(
                            stream,
                            StatusError::new(
                                GrpcStatusCode::Internal,
                                "too many request messages for a unary-input call",
                            )
                            .into(),
                        );
                        return;
                    }

                    let payload = match decompress_frame(
                        frame.compressed,
                        &frame.data,
                        &state.context.request_encoding,
                        self.server.config.max_message_size,
                    ) {
                        Ok(payload) => payload,
                        Err(e) => {
                            ftlog::error!("grpc: stream {} protocol error: {}", stream, e);
                            self.fail_stream(stream, anyhow::Error::new(e));
                            return;
                        }
                    };

                    state.frames_delivered += 1;
                    if let Some(Err(e)) = self.with_call(stream, |observer, call| {
                        observer.on_frame(call, &payload)
                    }) {
                        self.fail_stream(stream, e);
                        return;
                    }
                }
                Some(InboundEvent::End) => {
                    if let Some(Err(e)) =
                        self.with_call(stream, |observer, call| observer.on_end(call))
                    {
                        self.fail_stream(stream, e);
                        return;
                    }
                }
                None => break,
            }
        }

        self.finish_if_terminal(stream);
    }

    /// Run one observer callback with a call handle assembled around the
    /// stream's state. Returns `None` when the stream is gone.
    fn with_call<F>(&mut self, stream: u32, f: F) -> Option<anyhow::Result<()>>
    where
        F: FnOnce(&mut dyn ErasedObserver, &mut ServerCall<'_>) -> anyhow::Result<()>,
    {
        let state = self.calls.get_mut(&stream)?;
        let mut observer = state.observer.take()?;

        let mut call = ServerCall {
            stream,
            context: &state.context,
            response: &mut state.response,
            pump: &mut state.pump,
            queue: &mut state.queue,
            actions: &mut self.actions,
            config: &self.server.config,
        };
        let result = f(observer.as_mut(), &mut call);
        drop(call);

        state.observer = Some(observer);
        Some(result)
    }

    /// Map a handler failure to a status and terminate the call
    fn fail_stream(&mut self, stream: u32, err: anyhow::Error) {
        let (status, extra_trailers) = status_of(err);
        ftlog::debug!(
            "grpc: stream {} failed with status {}",
            stream,
            status.code
        );
        self.fail_with(stream, status, extra_trailers);
    }

    fn fail_now(&mut self, stream: u32, status: GrpcStatus) {
        self.fail_with(stream, status, Metadata::new());
    }

    fn fail_with(&mut self, stream: u32, status: GrpcStatus, extra_trailers: Metadata) {
        if let Some(state) = self.calls.get_mut(&stream) {
            let was_terminal = state.response.is_terminal();
            let mut call = ServerCall {
                stream,
                context: &state.context,
                response: &mut state.response,
                pump: &mut state.pump,
                queue: &mut state.queue,
                actions: &mut self.actions,
                config: &self.server.config,
            };
            call.fail(status, extra_trailers);
            drop(call);

            // The peer may still be sending; tell it to stop after the
            // terminal block.
            if !was_terminal && !state.pump.remote_ended() {
                self.actions.push_back(TransportAction::Reset { stream });
            }
        }
        self.finish_if_terminal(stream);
    }

    /// Release a call's resources once it reached its terminal state
    fn finish_if_terminal(&mut self, stream: u32) {
        let terminal = self
            .calls
            .get(&stream)
            .map(|state| state.response.is_terminal())
            .unwrap_or(false);
        if terminal {
            self.calls.remove(&stream);
            ftlog::debug!("grpc: stream {} complete", stream);
        }
    }

    /// Emit a trailers-only response for a call that never dispatched
    fn respond_trailers_only(
        &mut self,
        stream: u32,
        head: &RequestHead,
        status: GrpcStatus,
        advertise_encodings: bool,
    ) {
        let content_type: &[u8] = if is_grpc_content_type(&head.content_type) {
            &head.content_type
        } else {
            b"application/grpc"
        };
        let mut headers = trailers_only_headers(content_type, &status, &Metadata::new());
        if advertise_encodings {
            headers.push((
                b"grpc-accept-encoding".to_vec(),
                self.server
                    .config
                    .compression
                    .accept_encoding_header()
                    .into_bytes(),
            ));
        }
        self.actions.push_back(TransportAction::SendHeaders {
            stream,
            headers,
            end_stream: true,
        });
    }
}

/// Undo the per-message compression of one inbound frame
fn decompress_frame(
    compressed: bool,
    data: &[u8],
    request_encoding: &Option<String>,
    max_message_size: usize,
) -> Result<Vec<u8>, GrpcError> {
    if !compressed {
        return Ok(data.to_vec());
    }
    let Some(encoding) = request_encoding else {
        return Err(GrpcError::InvalidFrame(
            "compressed frame without grpc-encoding".to_string(),
        ));
    };
    let compressor = compression::registry()
        .lookup(encoding)
        .ok_or_else(|| GrpcError::Compression(format!("unknown encoding: {}", encoding)))?;
    compressor.decompress(data, max_message_size)
}
