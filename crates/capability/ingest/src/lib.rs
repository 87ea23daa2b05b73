//! 数据接入能力模块
//!
//! - [`TcpListenerSource`]：原始 TCP 接入，每个连接一个任务，
//!   依次完成 分帧 → 协议识别 → 解码 → 应答回写 → 交给 [`FixHandler`]
//! - [`ingest_http_push`]：OsmAnd / Traccar Client 的 HTTP 推送

use async_trait::async_trait;
use domain::DecodedFix;
use fleet_protocol::FrameError;
use fleet_session::SessionError;

mod connection;
mod http;
mod tcp;

pub use http::ingest_http_push;
pub use tcp::{TcpListenerConfig, TcpListenerSource};

/// 接入错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("unknown protocol")]
    UnknownProtocol,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("handler error: {0}")]
    Handler(String),
}

/// 定位点处理器（规范化 + 提交流水线由上层装配）。
#[async_trait]
pub trait FixHandler: Send + Sync {
    async fn handle(&self, fix: DecodedFix, received_at_ms: i64) -> Result<(), IngestError>;
}
