//! Per-call Response Lifecycle
//!
//! One [`ResponseState`] is attached to every call and owns the response
//! side of its lifecycle:
//!
//! ```text
//! INITIAL ──write_head/write──▶ HEADERS_SENT ──end/fail──▶ TERMINAL
//!    │                                                        ▲
//!    └────────── end with no messages, or fail ───────────────┘
//!                        (trailers-only)
//! ```
//!
//! The trailers-only fast path — status and trailers delivered as the one
//! and only header block, no body — is reachable only while nothing has
//! been written. Once headers are on the wire, failures append a distinct
//! trailer block after whatever output was already flushed.
//!
//! [`ServerCall`] is the untyped handle the engine constructs around a
//! call's state for the duration of one handler callback; [`Responder`]
//! wraps it with the method's output encoder for typed writes.

use crate::codec::MessageEncoder;
use crate::compression;
use crate::config::EngineConfig;
use crate::error::GrpcError;
use crate::framing::GrpcFrame;
use crate::headers::WireFormat;
use crate::metadata::Metadata;
use crate::pump::{InboundPump, WriteOutcome, WriteQueue};
use crate::server::TransportAction;
use crate::status::{GrpcStatus, GrpcStatusCode, StatusError};

use std::collections::VecDeque;
use std::time::Instant;

/// Per-call request context
///
/// Created at dispatch time, dropped when the call terminates.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Fully-qualified service name
    pub service: String,
    /// Method name
    pub method: String,
    /// Request route ("/service/method")
    pub route: String,
    /// Wire format of this call's payloads
    pub format: WireFormat,
    /// Request content-type, echoed on the response
    pub content_type: Vec<u8>,
    /// Request metadata (reserved names filtered)
    pub metadata: Metadata,
    /// Absolute deadline, if the request carried grpc-timeout
    pub deadline: Option<Instant>,
    /// Request message encoding (None = identity)
    pub request_encoding: Option<String>,
    /// Negotiated response encoding (None = identity)
    pub response_encoding: Option<String>,
}

/// Response lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePhase {
    /// Nothing sent yet; trailers-only still possible
    Initial,
    /// Header block flushed; body may follow
    HeadersSent,
    /// Trailers delivered, call closed
    Terminal,
}

/// Mutable response state attached 1:1 to a call
#[derive(Debug)]
pub struct ResponseState {
    phase: ResponsePhase,
    status: GrpcStatus,
    headers: Metadata,
    trailers: Metadata,
    messages_sent: usize,
}

impl ResponseState {
    /// Fresh state: INITIAL, pending status OK
    pub fn new() -> Self {
        Self {
            phase: ResponsePhase::Initial,
            status: GrpcStatus::ok(),
            headers: Metadata::new(),
            trailers: Metadata::new(),
            messages_sent: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ResponsePhase {
        self.phase
    }

    /// Whether the call reached its terminal state
    pub fn is_terminal(&self) -> bool {
        self.phase == ResponsePhase::Terminal
    }

    /// Messages written so far
    pub fn messages_sent(&self) -> usize {
        self.messages_sent
    }
}

impl Default for ResponseState {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the single header block of a trailers-only response
pub(crate) fn trailers_only_headers(
    content_type: &[u8],
    status: &GrpcStatus,
    trailers: &Metadata,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut headers = vec![
        (b":status".to_vec(), b"200".to_vec()),
        (b"content-type".to_vec(), echo_content_type(content_type)),
    ];
    headers.extend(status.to_trailers());
    headers.extend(trailers.encode());
    headers
}

fn echo_content_type(content_type: &[u8]) -> Vec<u8> {
    if content_type.is_empty() {
        b"application/grpc".to_vec()
    } else {
        content_type.to_vec()
    }
}

/// Untyped per-callback handle over one call's state
///
/// Every mutation funnels through here, so ordering on the action queue is
/// exactly invocation order.
pub struct ServerCall<'a> {
    pub(crate) stream: u32,
    pub(crate) context: &'a CallContext,
    pub(crate) response: &'a mut ResponseState,
    pub(crate) pump: &'a mut InboundPump,
    pub(crate) queue: &'a mut WriteQueue,
    pub(crate) actions: &'a mut VecDeque<TransportAction>,
    pub(crate) config: &'a EngineConfig,
}

impl<'a> ServerCall<'a> {
    /// Request context
    pub fn context(&self) -> &CallContext {
        self.context
    }

    /// Whether the call already terminated
    pub fn is_terminal(&self) -> bool {
        self.response.is_terminal()
    }

    /// Set the pending terminal status code
    pub fn set_status(&mut self, code: GrpcStatusCode) {
        self.response.status.code = code;
    }

    /// Set the pending terminal status message
    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.response.status.message = Some(message.into());
    }

    /// Response headers, flushed with the header block
    pub fn headers_mut(&mut self) -> &mut Metadata {
        &mut self.response.headers
    }

    /// Trailer metadata, delivered with the terminal block
    pub fn trailers_mut(&mut self) -> &mut Metadata {
        &mut self.response.trailers
    }

    /// Pause inbound message delivery (flow-control backpressure)
    pub fn pause(&mut self) {
        self.pump.pause();
    }

    /// Resume inbound message delivery
    pub fn resume(&mut self) {
        self.pump.resume();
    }

    /// Flush the response header block
    ///
    /// Idempotent; forces INITIAL → HEADERS_SENT. After this the
    /// trailers-only fast path is gone.
    pub fn write_head(&mut self) {
        if self.response.phase != ResponsePhase::Initial {
            return;
        }

        let mut headers = vec![
            (b":status".to_vec(), b"200".to_vec()),
            (
                b"content-type".to_vec(),
                echo_content_type(&self.context.content_type),
            ),
        ];
        if let Some(encoding) = &self.context.response_encoding {
            headers.push((b"grpc-encoding".to_vec(), encoding.as_bytes().to_vec()));
        }
        headers.push((
            b"grpc-accept-encoding".to_vec(),
            self.config
                .compression
                .accept_encoding_header()
                .into_bytes(),
        ));
        headers.extend(self.response.headers.encode());

        self.actions.push_back(TransportAction::SendHeaders {
            stream: self.stream,
            headers,
            end_stream: false,
        });
        self.response.phase = ResponsePhase::HeadersSent;
    }

    /// Frame and queue one encoded response message
    ///
    /// Compresses when an encoding was negotiated and the payload clears
    /// the configured minimum size. The returned outcome is the write
    /// queue's capacity signal.
    pub fn write_payload(&mut self, payload: Vec<u8>) -> Result<WriteOutcome, GrpcError> {
        if self.response.is_terminal() {
            return Err(GrpcError::Terminated);
        }

        self.write_head();

        let frame = match &self.context.response_encoding {
            Some(encoding) if payload.len() >= self.config.compression.min_size => {
                let compressor = compression::registry()
                    .lookup(encoding)
                    .ok_or_else(|| {
                        GrpcError::Compression(format!("unknown encoding: {}", encoding))
                    })?;
                let compressed = compressor.compress(&payload, self.config.compression.level)?;
                GrpcFrame::compressed(compressed)
            }
            _ => GrpcFrame::new(payload),
        };

        let encoded = frame.encode();
        let outcome = self.queue.push(encoded.len());
        self.actions.push_back(TransportAction::SendData {
            stream: self.stream,
            data: encoded,
        });
        self.response.messages_sent += 1;

        Ok(outcome)
    }

    /// Complete the call with the accumulated status (default OK)
    ///
    /// Zero messages written from INITIAL takes the trailers-only path;
    /// otherwise a distinct trailer block follows the body. Idempotent.
    pub fn end(&mut self) {
        match self.response.phase {
            ResponsePhase::Terminal => {}
            ResponsePhase::Initial if self.response.messages_sent == 0 => {
                let headers = trailers_only_headers(
                    &self.context.content_type,
                    &self.response.status,
                    &self.response.trailers,
                );
                self.actions.push_back(TransportAction::SendHeaders {
                    stream: self.stream,
                    headers,
                    end_stream: true,
                });
                self.response.phase = ResponsePhase::Terminal;
            }
            _ => {
                self.write_head();
                let mut trailers = self.response.status.to_trailers();
                trailers.extend(self.response.trailers.encode());
                self.actions.push_back(TransportAction::SendTrailers {
                    stream: self.stream,
                    trailers,
                });
                self.response.phase = ResponsePhase::Terminal;
            }
        }
    }

    /// Terminate the call with a failure status
    ///
    /// Output already queued stays queued — flushed data is never
    /// retracted — and the failure trailers follow it. Idempotent once
    /// terminal.
    pub fn fail(&mut self, status: GrpcStatus, extra_trailers: Metadata) {
        if self.response.is_terminal() {
            return;
        }
        self.response.trailers.extend(&extra_trailers);
        self.response.status = status;
        self.end();
    }
}

/// Typed write handle: a [`ServerCall`] plus the method's output encoder
pub struct Responder<'c, 'a, Resp> {
    call: &'c mut ServerCall<'a>,
    encoder: &'c dyn MessageEncoder<Resp>,
}

impl<'c, 'a, Resp> Responder<'c, 'a, Resp> {
    pub(crate) fn new(
        call: &'c mut ServerCall<'a>,
        encoder: &'c dyn MessageEncoder<Resp>,
    ) -> Self {
        Self { call, encoder }
    }

    /// Request context
    pub fn context(&self) -> &CallContext {
        self.call.context()
    }

    /// Whether the call already terminated
    pub fn is_terminal(&self) -> bool {
        self.call.is_terminal()
    }

    /// Encode, frame, and queue one response message
    pub fn write(&mut self, msg: &Resp) -> Result<WriteOutcome, GrpcError> {
        let payload = self.encoder.encode(msg)?;
        self.call.write_payload(payload)
    }

    /// Flush the response header block
    pub fn write_head(&mut self) {
        self.call.write_head();
    }

    /// Complete the call with the accumulated status
    pub fn end(&mut self) {
        self.call.end();
    }

    /// Terminate the call with a specific status
    pub fn fail(&mut self, err: StatusError) {
        let (status, trailers) = err.into_parts();
        self.call.fail(status, trailers);
    }

    /// Set the pending terminal status code
    pub fn set_status(&mut self, code: GrpcStatusCode) {
        self.call.set_status(code);
    }

    /// Set the pending terminal status message
    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.call.set_status_message(message);
    }

    /// Response headers, flushed with the header block
    pub fn headers_mut(&mut self) -> &mut Metadata {
        self.call.headers_mut()
    }

    /// Trailer metadata, delivered with the terminal block
    pub fn trailers_mut(&mut self) -> &mut Metadata {
        self.call.trailers_mut()
    }

    /// Pause inbound message delivery
    pub fn pause(&mut self) {
        self.call.pause();
    }

    /// Resume inbound message delivery
    pub fn resume(&mut self) {
        self.call.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::InboundPump;

    fn test_context() -> CallContext {
        CallContext {
            service: "pkg.Svc".to_string(),
            method: "Echo".to_string(),
            route: "/pkg.Svc/Echo".to_string(),
            format: WireFormat::Proto,
            content_type: b"application/grpc".to_vec(),
            metadata: Metadata::new(),
            deadline: None,
            request_encoding: None,
            response_encoding: None,
        }
    }

    struct Fixture {
        context: CallContext,
        response: ResponseState,
        pump: InboundPump,
        queue: WriteQueue,
        actions: VecDeque<TransportAction>,
        config: EngineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                context: test_context(),
                response: ResponseState::new(),
                pump: InboundPump::new(1024 * 1024),
                queue: WriteQueue::new(64 * 1024, 32 * 1024),
                actions: VecDeque::new(),
                config: EngineConfig::default(),
            }
        }

        fn call(&mut self) -> ServerCall<'_> {
            ServerCall {
                stream: 1,
                context: &self.context,
                response: &mut self.response,
                pump: &mut self.pump,
                queue: &mut self.queue,
                actions: &mut self.actions,
                config: &self.config,
            }
        }
    }

    fn header_value<'h>(headers: &'h [(Vec<u8>, Vec<u8>)], name: &[u8]) -> Option<&'h [u8]> {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_slice())
    }

    #[test]
    fn test_trailers_only_on_empty_success() {
        let mut fx = Fixture::new();
        fx.call().end();

        assert_eq!(fx.actions.len(), 1);
        match &fx.actions[0] {
            TransportAction::SendHeaders { headers, end_stream, .. } => {
                assert!(*end_stream);
                assert_eq!(header_value(headers, b"grpc-status"), Some(&b"0"[..]));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(fx.response.is_terminal());
    }

    #[test]
    fn test_message_then_end_uses_distinct_trailers() {
        let mut fx = Fixture::new();
        {
            let mut call = fx.call();
            call.write_payload(b"reply".to_vec()).unwrap();
            call.end();
        }

        assert_eq!(fx.actions.len(), 3);
        match &fx.actions[0] {
            TransportAction::SendHeaders { headers, end_stream, .. } => {
                assert!(!*end_stream);
                // grpc-status must not be in the initial headers
                assert!(header_value(headers, b"grpc-status").is_none());
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(fx.actions[1], TransportAction::SendData { .. }));
        match &fx.actions[2] {
            TransportAction::SendTrailers { trailers, .. } => {
                assert_eq!(header_value(trailers, b"grpc-status"), Some(&b"0"[..]));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fail_before_headers_is_trailers_only() {
        let mut fx = Fixture::new();
        fx.call().fail(
            GrpcStatus::error(GrpcStatusCode::InvalidArgument, "bad input"),
            Metadata::new(),
        );

        assert_eq!(fx.actions.len(), 1);
        match &fx.actions[0] {
            TransportAction::SendHeaders { headers, end_stream, .. } => {
                assert!(*end_stream);
                assert_eq!(header_value(headers, b"grpc-status"), Some(&b"3"[..]));
                assert!(header_value(headers, b"grpc-message").is_some());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fail_after_headers_appends_trailers() {
        let mut fx = Fixture::new();
        {
            let mut call = fx.call();
            call.write_payload(b"partial".to_vec()).unwrap();
            call.fail(
                GrpcStatus::from_code(GrpcStatusCode::Internal),
                Metadata::new(),
            );
        }

        // Flushed data is preserved; trailers follow it.
        assert!(matches!(fx.actions[1], TransportAction::SendData { .. }));
        match &fx.actions[2] {
            TransportAction::SendTrailers { trailers, .. } => {
                assert_eq!(header_value(trailers, b"grpc-status"), Some(&b"13"[..]));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_finalize_idempotent() {
        let mut fx = Fixture::new();
        {
            let mut call = fx.call();
            call.end();
            call.end();
            call.fail(
                GrpcStatus::from_code(GrpcStatusCode::Internal),
                Metadata::new(),
            );
        }
        assert_eq!(fx.actions.len(), 1);
    }

    #[test]
    fn test_write_after_terminal_rejected() {
        let mut fx = Fixture::new();
        let mut call = fx.call();
        call.end();
        assert!(matches!(
            call.write_payload(b"late".to_vec()),
            Err(GrpcError::Terminated)
        ));
    }

    #[test]
    fn test_write_head_idempotent() {
        let mut fx = Fixture::new();
        {
            let mut call = fx.call();
            call.write_head();
            call.write_head();
        }
        assert_eq!(fx.actions.len(), 1);
    }

    #[test]
    fn test_explicit_head_with_no_messages_gets_trailer_block() {
        let mut fx = Fixture::new();
        {
            let mut call = fx.call();
            call.write_head();
            call.end();
        }
        // Headers already on the wire: no trailers-only collapse.
        assert_eq!(fx.actions.len(), 2);
        assert!(matches!(fx.actions[1], TransportAction::SendTrailers { .. }));
    }

    #[test]
    fn test_response_compression_applied() {
        let mut fx = Fixture::new();
        fx.context.response_encoding = Some("gzip".to_string());
        fx.config.compression.min_size = 0;
        {
            let mut call = fx.call();
            call.write_payload(b"compress me, twice the fun, compress me".to_vec())
                .unwrap();
        }

        match &fx.actions[1] {
            TransportAction::SendData { data, .. } => {
                // Compressed flag set on the envelope
                assert_eq!(data[0], 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
        match &fx.actions[0] {
            TransportAction::SendHeaders { headers, .. } => {
                assert_eq!(header_value(headers, b"grpc-encoding"), Some(&b"gzip"[..]));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_small_message_skips_compression() {
        let mut fx = Fixture::new();
        fx.context.response_encoding = Some("gzip".to_string());
        // Default min_size (1024) is far above this payload.
        {
            let mut call = fx.call();
            call.write_payload(b"tiny".to_vec()).unwrap();
        }
        match &fx.actions[1] {
            TransportAction::SendData { data, .. } => assert_eq!(data[0], 0),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
