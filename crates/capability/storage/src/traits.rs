//! 存储接口定义
//!
//! 所有接口均为异步（`async_trait`），实现需 `Send + Sync` 以便在连接任务与
//! 流水线 worker 之间共享 `Arc<dyn ...>`。

use crate::error::StorageError;
use async_trait::async_trait;
use domain::TelemetryRecord;

/// 设备绑定查询
#[async_trait]
pub trait DeviceBindingStore: Send + Sync {
    /// 未绑定返回 `Ok(None)`；只有后端故障才返回错误
    async fn find_vehicle_id(&self, device_id: &str) -> Result<Option<String>, StorageError>;
}

/// 轨迹记录写入
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// 批量追加；同一批内的记录按给定顺序写入
    async fn append(&self, records: &[TelemetryRecord]) -> Result<(), StorageError>;
}
