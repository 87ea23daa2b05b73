//! 设备绑定内存实现

use crate::error::StorageError;
use crate::traits::DeviceBindingStore;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// 设备绑定内存存储
pub struct InMemoryDeviceBindingStore {
    bindings: RwLock<HashMap<String, String>>,
    lookups: AtomicU64,
}

impl InMemoryDeviceBindingStore {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            lookups: AtomicU64::new(0),
        }
    }

    /// 以 `(device_id, vehicle_id)` 列表预置绑定
    pub fn with_bindings<I, D, V>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (D, V)>,
        D: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (device_id, vehicle_id) in bindings {
            store.bind(device_id, vehicle_id);
        }
        store
    }

    pub fn bind(&self, device_id: impl Into<String>, vehicle_id: impl Into<String>) {
        if let Ok(mut bindings) = self.bindings.write() {
            bindings.insert(device_id.into(), vehicle_id.into());
        }
    }

    pub fn unbind(&self, device_id: &str) {
        if let Ok(mut bindings) = self.bindings.write() {
            bindings.remove(device_id);
        }
    }

    /// 查询次数（用于测试缓存命中）
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryDeviceBindingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DeviceBindingStore for InMemoryDeviceBindingStore {
    async fn find_vehicle_id(&self, device_id: &str) -> Result<Option<String>, StorageError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let bindings = self
            .bindings
            .read()
            .map_err(|_| StorageError::Poisoned("device bindings"))?;
        Ok(bindings.get(device_id).cloned())
    }
}
