pub mod data;
pub mod protocol;

pub use data::{AckFrame, DecodedFix, TelemetryRecord};
pub use protocol::ProtocolTag;

/// 获取当前 Unix 时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
