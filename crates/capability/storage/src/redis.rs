//! Redis 设备绑定查询与轨迹写入实现

use crate::error::StorageError;
use crate::traits::{DeviceBindingStore, TelemetryStore};
use domain::TelemetryRecord;
use redis::AsyncCommands;

fn vehicle_key(prefix: &str, device_id: &str) -> String {
    format!("{prefix}:device:{device_id}:vehicle")
}

fn last_record_key(prefix: &str, device_id: &str) -> String {
    format!("{prefix}:device:{device_id}:last")
}

fn telemetry_channel(prefix: &str) -> String {
    format!("{prefix}:telemetry")
}

fn open_client(redis_url: &str) -> Result<redis::Client, StorageError> {
    Ok(redis::Client::open(redis_url)?)
}

/// Redis 设备绑定存储
pub struct RedisDeviceBindingStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisDeviceBindingStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn connect(redis_url: &str, key_prefix: &str) -> Result<Self, StorageError> {
        Ok(Self::new(open_client(redis_url)?, key_prefix))
    }
}

#[async_trait::async_trait]
impl DeviceBindingStore for RedisDeviceBindingStore {
    async fn find_vehicle_id(&self, device_id: &str) -> Result<Option<String>, StorageError> {
        let mut connection = self.client.get_multiplexed_tokio_connection().await?;
        let vehicle: Option<String> = connection
            .get(vehicle_key(&self.key_prefix, device_id))
            .await?;
        Ok(vehicle.filter(|value| !value.trim().is_empty()))
    }
}

/// Redis 轨迹存储：刷新设备最新位置并发布到轨迹频道
pub struct RedisTelemetryStore {
    client: redis::Client,
    key_prefix: String,
    last_record_ttl_seconds: Option<u64>,
}

impl RedisTelemetryStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            last_record_ttl_seconds: None,
        }
    }

    pub fn connect(redis_url: &str, key_prefix: &str) -> Result<Self, StorageError> {
        Ok(Self::new(open_client(redis_url)?, key_prefix))
    }

    /// 最新位置键的过期时间，0 表示不过期
    pub fn with_last_record_ttl(mut self, ttl_seconds: u64) -> Self {
        self.last_record_ttl_seconds = (ttl_seconds > 0).then_some(ttl_seconds);
        self
    }
}

#[async_trait::async_trait]
impl TelemetryStore for RedisTelemetryStore {
    async fn append(&self, records: &[TelemetryRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        let channel = telemetry_channel(&self.key_prefix);
        let mut pipe = redis::pipe();
        for record in records {
            let data = serde_json::to_string(record)?;
            let key = last_record_key(&self.key_prefix, &record.device_id);
            match self.last_record_ttl_seconds {
                Some(ttl) => pipe.set_ex(key, &data, ttl).ignore(),
                None => pipe.set(key, &data).ignore(),
            };
            pipe.publish(&channel, data).ignore();
        }
        let mut connection = self.client.get_multiplexed_tokio_connection().await?;
        pipe.query_async::<_, ()>(&mut connection).await?;
        Ok(())
    }
}
