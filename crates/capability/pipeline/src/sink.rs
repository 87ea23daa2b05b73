//! 下游写入契约与基础实现

use crate::error::SinkError;
use async_trait::async_trait;
use domain::TelemetryRecord;
use fleet_storage::TelemetryStore;
use std::sync::Arc;

/// 轨迹记录下游（持久化 + 事件发布）。
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), SinkError>;

    async fn write_batch(&self, records: &[TelemetryRecord]) -> Result<(), SinkError> {
        for record in records {
            self.write(record).await?;
        }
        Ok(())
    }
}

/// 空写入器（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl TelemetrySink for NoopSink {
    async fn write(&self, _record: &TelemetryRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

/// 基于存储层的写入器。
#[derive(Clone)]
pub struct StorageTelemetrySink {
    store: Arc<dyn TelemetryStore>,
}

impl StorageTelemetrySink {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TelemetrySink for StorageTelemetrySink {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        self.write_batch(std::slice::from_ref(record)).await
    }

    async fn write_batch(&self, records: &[TelemetryRecord]) -> Result<(), SinkError> {
        self.store
            .append(records)
            .await
            .map_err(|err| SinkError::Storage(err.to_string()))
    }
}

/// 依次写入多个下游；任一失败即返回该错误，后续下游仍会写入。
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl TelemetrySink for FanoutSink {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        self.write_batch(std::slice::from_ref(record)).await
    }

    async fn write_batch(&self, records: &[TelemetryRecord]) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.write_batch(records).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
