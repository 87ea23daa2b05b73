//! 轨迹记录内存实现
//!
//! 按到达顺序保存全部记录，并可注入失败以测试流水线的写入失败路径。

use crate::error::StorageError;
use crate::traits::TelemetryStore;
use domain::TelemetryRecord;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// 轨迹记录内存存储
pub struct InMemoryTelemetryStore {
    records: RwLock<Vec<TelemetryRecord>>,
    failing: AtomicBool,
}

impl InMemoryTelemetryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// 打开后每次 `append` 都返回错误
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// 某设备的最新一条记录
    pub fn last_for(&self, device_id: &str) -> Option<TelemetryRecord> {
        let records = self.records.read().ok()?;
        records
            .iter()
            .rev()
            .find(|record| record.device_id == device_id)
            .cloned()
    }
}

impl Default for InMemoryTelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TelemetryStore for InMemoryTelemetryStore {
    async fn append(&self, records: &[TelemetryRecord]) -> Result<(), StorageError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("telemetry store"));
        }
        let mut stored = self
            .records
            .write()
            .map_err(|_| StorageError::Poisoned("telemetry records"))?;
        stored.extend_from_slice(records);
        Ok(())
    }
}
