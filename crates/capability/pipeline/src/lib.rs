//! 接入流水线能力模块
//!
//! ```text
//! submit(record)
//!   ├─ 去重窗口命中 ─────────────► Duplicate
//!   └─ 按 device_id 哈希选分片
//!        ├─ 队列未满 ────────────► Queued
//!        └─ 队列满：等待 submit_wait
//!             ├─ 期间有空位 ────► Queued
//!             └─ 超时：丢弃最旧 ─► Shed { dropped }
//! worker[shard] ── batch ──► TelemetrySink（Storage / MQTT / Fanout）
//! ```
//!
//! 下游写入失败只记录日志与指标，不重试；设备侧会在重连后补传。

mod dedup;
mod error;
mod mqtt;
mod pipeline;
mod sink;

pub use error::{PipelineError, SinkError};
pub use mqtt::{MqttSinkConfig, MqttTelemetrySink};
pub use pipeline::{IngestionPipeline, PipelineConfig, SubmitOutcome};
pub use sink::{FanoutSink, NoopSink, StorageTelemetrySink, TelemetrySink};
