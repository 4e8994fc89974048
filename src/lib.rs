//! gossamer — Server-side gRPC Protocol Engine
//!
//! HTTP/2 リクエスト/レスポンス交換を gRPC 呼び出しへ変換するサーバー側
//! プロトコルエンジン。トランスポート (HTTP/2 フレーミング、フロー制御、
//! HPACK) とドメインメッセージのシリアライズは外部から注入され、この
//! crate は sans-io で動作します。
//!
//! ## 機能
//!
//! - **Framing**: 5-byte gRPC メッセージフレーミング (ストリーミング対応)
//! - **Status/Trailers**: grpc-status / grpc-message、trailers-only 応答
//! - **Streaming**: 4 種のカーディナリティ、pause/resume と書き込み
//!   ウォーターマークによるバックプレッシャー
//! - **Deadlines**: grpc-timeout の解析と期限超過の強制終了
//! - **Compression**: gzip/deflate/zstd、プラガブルなレジストリ
//! - **Dispatch**: ディスクリプタ同一性によるメソッド解決
//!   (protobuf / JSON / トランスコーディング)
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use gossamer::{GrpcServer, GrpcConnection, EngineConfig, Service, handlers};
//!
//! let mut server = GrpcServer::new(EngineConfig::default());
//! let service = Service::builder(name)
//!     .bind([unary.to_ref()])
//!     .handle(&unary, handlers::unary(|_ctx, req: Request| {
//!         Ok(Reply { message: format!("Hello {}", req.name) })
//!     }))
//!     .build()?;
//! service.bind(&mut server)?;
//!
//! // Per connection, driven by the embedder's event loop:
//! let mut conn = GrpcConnection::new(server.into());
//! conn.open_stream(1, &request_headers, now);
//! conn.data(1, &body_bytes, true);
//! while let Some(action) = conn.poll_action() {
//!     // write headers/data/trailers to the HTTP/2 transport
//! }
//! ```

pub mod call;
pub mod codec;
pub mod compression;
pub mod config;
pub mod deadline;
pub mod error;
pub mod framing;
pub mod headers;
pub mod metadata;
pub mod pump;
pub mod registry;
pub mod server;
pub mod service;
pub mod status;

// Re-exports
pub use call::{CallContext, Responder, ResponsePhase, ResponseState, ServerCall};
pub use config::EngineConfig;
pub use error::GrpcError;
pub use framing::{FrameDecoder, GrpcFrame};
pub use headers::{RequestHead, WireFormat};
pub use metadata::{Metadata, MetadataValue};
pub use pump::WriteOutcome;
pub use registry::{handlers, CallObserver, ObserverFactory, Service, ServiceBuilder};
pub use server::{GrpcConnection, GrpcServer, TransportAction};
pub use service::{MethodKind, MethodRef, ServiceMethod, ServiceName};
pub use status::{GrpcStatus, GrpcStatusCode, StatusError};
