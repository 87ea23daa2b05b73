//! 接入链路装配
//!
//! 存储 → 设备目录 → 规范化 → 下游（存储 / MQTT）→ 流水线，
//! 最后由 [`PipelineHandler`] 把解码出的定位点接到流水线上。

use fleet_config::AppConfig;
use fleet_ingest::{FixHandler, IngestError};
use fleet_normalize::{CachedDeviceDirectory, Normalizer, NormalizerConfig, StorageDeviceDirectory};
use fleet_pipeline::{
    FanoutSink, IngestionPipeline, MqttSinkConfig, MqttTelemetrySink, PipelineConfig,
    StorageTelemetrySink, TelemetrySink,
};
use fleet_storage::{
    DeviceBindingStore, InMemoryDeviceBindingStore, InMemoryTelemetryStore,
    RedisDeviceBindingStore, RedisTelemetryStore, TelemetryStore,
};
use fleet_telemetry::{record_normalized, record_rejected, record_unknown_vehicle};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 流水线处理器：规范化后提交到接入流水线。
pub struct PipelineHandler {
    normalizer: Normalizer,
    pipeline: IngestionPipeline,
}

impl PipelineHandler {
    pub fn new(normalizer: Normalizer, pipeline: IngestionPipeline) -> Self {
        Self {
            normalizer,
            pipeline,
        }
    }
}

#[async_trait::async_trait]
impl FixHandler for PipelineHandler {
    async fn handle(&self, fix: domain::DecodedFix, received_at_ms: i64) -> Result<(), IngestError> {
        // 数据质量问题只丢弃该点，不影响连接
        let record = match self.normalizer.normalize(fix, received_at_ms).await {
            Ok(record) => record,
            Err(rejection) => {
                record_rejected(rejection.reason.as_str());
                warn!(
                    target: "fleet.ingest",
                    device_id = %rejection.device_id,
                    protocol = %rejection.protocol,
                    timestamp_ms = rejection.timestamp_ms,
                    reason = %rejection.reason,
                    "fix_rejected"
                );
                return Ok(());
            }
        };

        record_normalized();
        if record.vehicle_id.is_none() {
            record_unknown_vehicle();
            debug!(
                target: "fleet.ingest",
                device_id = %record.device_id,
                protocol = %record.protocol,
                "vehicle_unresolved"
            );
        }

        self.pipeline
            .submit(record)
            .await
            .map(|_| ())
            .map_err(|err| IngestError::Handler(err.to_string()))
    }
}

/// 装配好的接入链路
pub struct IngestStack {
    pub handler: Arc<PipelineHandler>,
    pub pipeline: IngestionPipeline,
    /// MQTT 事件循环（启用 MQTT 发布时）
    pub mqtt_eventloop: Option<JoinHandle<()>>,
}

/// 按配置装配存储、目录、下游与流水线
pub fn build_ingest(config: &AppConfig) -> Result<IngestStack, Box<dyn std::error::Error>> {
    let (bindings, telemetry_store): (Arc<dyn DeviceBindingStore>, Arc<dyn TelemetryStore>) =
        match config.redis_url.as_deref() {
            Some(redis_url) => {
                info!(target: "fleet.ingest", prefix = %config.redis_key_prefix, "storage: redis");
                (
                    Arc::new(RedisDeviceBindingStore::connect(
                        redis_url,
                        &config.redis_key_prefix,
                    )?),
                    Arc::new(
                        RedisTelemetryStore::connect(redis_url, &config.redis_key_prefix)?
                            .with_last_record_ttl(config.redis_last_record_ttl_secs),
                    ),
                )
            }
            None => {
                info!(target: "fleet.ingest", "storage: in-memory (FLEET_REDIS_URL unset)");
                (
                    Arc::new(InMemoryDeviceBindingStore::new()),
                    Arc::new(InMemoryTelemetryStore::new()),
                )
            }
        };

    let directory = CachedDeviceDirectory::new(
        Arc::new(StorageDeviceDirectory::new(bindings)),
        config.directory_cache_ttl(),
    );
    let normalizer = Normalizer::new(
        Arc::new(directory),
        NormalizerConfig {
            max_speed_kmh: config.max_speed_kmh,
            max_future_skew_ms: i64::try_from(config.max_future_skew_secs.saturating_mul(1000))
                .unwrap_or(i64::MAX),
            directory_timeout: config.directory_timeout(),
        },
    );

    let mut sinks: Vec<Arc<dyn TelemetrySink>> =
        vec![Arc::new(StorageTelemetrySink::new(telemetry_store))];
    let mut mqtt_eventloop = None;
    if config.mqtt_publish_enabled {
        let (mqtt, eventloop) = MqttTelemetrySink::connect(MqttSinkConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            topic_prefix: config.mqtt_topic_prefix.clone(),
            qos: config.mqtt_qos,
        })?;
        info!(
            target: "fleet.ingest",
            host = %config.mqtt_host,
            port = config.mqtt_port,
            prefix = %config.mqtt_topic_prefix,
            "sink: mqtt publish enabled"
        );
        sinks.push(Arc::new(mqtt));
        mqtt_eventloop = Some(eventloop);
    }
    let sink: Arc<dyn TelemetrySink> = if sinks.len() == 1 {
        sinks.remove(0)
    } else {
        Arc::new(FanoutSink::new(sinks))
    };

    let pipeline = IngestionPipeline::start(
        sink,
        PipelineConfig {
            shards: config.pipeline_shards,
            queue_capacity: config.pipeline_queue_capacity,
            batch_size: config.pipeline_batch_size,
            submit_wait: config.submit_wait(),
            write_timeout: config.sink_write_timeout(),
            dedup_window: config.dedup_window(),
            dedup_max_per_device: config.dedup_max_per_device,
        },
    );

    let handler = Arc::new(PipelineHandler::new(normalizer, pipeline.clone()));
    Ok(IngestStack {
        handler,
        pipeline,
        mqtt_eventloop,
    })
}
