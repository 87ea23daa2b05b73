//! # 终端协议能力模块
//!
//! 把车载终端的原始字节流变成定位点，支持：
//! - **二进制协议**：GT06、Teltonika、Ruptela、Meitrack（含 CCC 批量缓存上传）
//! - **文本协议**：TK103、H02、Queclink、YTWL
//! - **HTTP 推送**：OsmAnd / Traccar Client 查询串
//!
//! ## 架构设计
//!
//! ```text
//! TCP 连接字节流
//!       │
//!       ▼
//! FrameAssembler ──(未识别时)──► ProtocolDetector ──► ProtocolTag（连接内不再变更）
//!       │
//!       ▼ Frame
//! decoder_for(tag) : &'static dyn ProtocolDecoder
//!       │
//!       ▼
//! Decoded { fixes, dropped, ack, update }
//!       │                          │
//!       ▼                          ▼
//! Normalizer → Pipeline      Ack 回写到同一连接
//! ```
//!
//! 解码器本身无状态：连接级的连续状态（登录身份、Teltonika 握手、
//! Meitrack 剩余缓存数等）保存在 [`SessionContext`]，解码器通过
//! [`SessionUpdate`] 请求变更。

mod assembler;
pub mod crc;
pub mod decoder;
mod detector;
mod error;
mod types;

pub use assembler::FrameAssembler;
pub use decoder::{ProtocolDecoder, decoder_for};
pub use detector::{DEFAULT_MAX_PROBE, Detection, ProtocolDetector};
pub use error::{DecodeError, FrameError};
pub use types::*;
