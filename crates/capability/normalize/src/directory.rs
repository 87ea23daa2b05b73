//! 设备 → 车辆解析

use crate::NormalizeError;
use async_trait::async_trait;
use dashmap::DashMap;
use fleet_storage::DeviceBindingStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 车辆目录抽象（外部系统提供，网关只读）
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn resolve(&self, device_id: &str) -> Result<Option<String>, NormalizeError>;
}

/// 基于 storage 的车辆目录
#[derive(Clone)]
pub struct StorageDeviceDirectory {
    store: Arc<dyn DeviceBindingStore>,
}

impl StorageDeviceDirectory {
    pub fn new(store: Arc<dyn DeviceBindingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeviceDirectory for StorageDeviceDirectory {
    async fn resolve(&self, device_id: &str) -> Result<Option<String>, NormalizeError> {
        self.store
            .find_vehicle_id(device_id)
            .await
            .map_err(|err| NormalizeError::Directory(err.to_string()))
    }
}

struct CacheEntry {
    vehicle_id: Option<String>,
    fetched_at: Instant,
}

/// 带 TTL 的目录缓存
///
/// 命中与“未绑定”结果都会缓存；查询失败不缓存，下次重新查询。
pub struct CachedDeviceDirectory {
    inner: Arc<dyn DeviceDirectory>,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl CachedDeviceDirectory {
    pub fn new(inner: Arc<dyn DeviceDirectory>, ttl: Duration) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn invalidate(&self, device_id: &str) {
        self.entries.remove(device_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DeviceDirectory for CachedDeviceDirectory {
    async fn resolve(&self, device_id: &str) -> Result<Option<String>, NormalizeError> {
        if let Some(entry) = self.entries.get(device_id)
            && entry.fetched_at.elapsed() < self.ttl
        {
            return Ok(entry.vehicle_id.clone());
        }
        let vehicle_id = self.inner.resolve(device_id).await?;
        self.entries.insert(
            device_id.to_string(),
            CacheEntry {
                vehicle_id: vehicle_id.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(vehicle_id)
    }
}
