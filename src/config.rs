//! エンジン設定
//!
//! 埋め込み側が接続単位で共有する設定。ファイル形式には依存せず、
//! serde::Deserialize 経由で任意の設定ソースから読み込めます。

use serde::Deserialize;

use crate::compression::CompressionConfig;
use crate::framing::GRPC_MAX_MESSAGE_SIZE;

/// デフォルト値関数
fn default_max_message_size() -> usize {
    GRPC_MAX_MESSAGE_SIZE
}
fn default_write_queue_high() -> usize {
    64 * 1024
}
fn default_write_queue_low() -> usize {
    32 * 1024
}
fn default_true() -> bool {
    true
}

/// Engine configuration shared by every call on a connection
#[derive(Deserialize, Clone, Debug)]
pub struct EngineConfig {
    /// Maximum decoded message size (bytes)
    ///
    /// Applies to inbound frames before and after decompression.
    ///
    /// デフォルト: 4MB
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound write-queue high watermark (bytes)
    ///
    /// Writes report `Full` once this much response data is queued and
    /// not yet taken by the transport.
    ///
    /// デフォルト: 64KB
    #[serde(default = "default_write_queue_high")]
    pub write_queue_high: usize,

    /// Outbound write-queue low watermark (bytes)
    ///
    /// A saturated queue draining below this fires the handler's drain
    /// callback.
    ///
    /// デフォルト: 32KB
    #[serde(default = "default_write_queue_low")]
    pub write_queue_low: usize,

    /// Arm deadlines from the grpc-timeout header
    ///
    /// When false, the header is parsed into the call context but no
    /// timer fires; the embedder can still enforce it.
    ///
    /// デフォルト: true
    #[serde(default = "default_true")]
    pub schedule_deadlines: bool,

    /// Response compression negotiation settings
    #[serde(default)]
    pub compression: CompressionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            write_queue_high: default_write_queue_high(),
            write_queue_low: default_write_queue_low(),
            schedule_deadlines: default_true(),
            compression: CompressionConfig::default(),
        }
    }
}
