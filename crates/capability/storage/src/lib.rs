//! # Fleet Storage 模块
//!
//! 接入网关的外部存储抽象，只覆盖两个关注点：
//!
//! 1. **设备绑定**（[`DeviceBindingStore`]）：终端设备 ID → 车辆 ID
//! 2. **轨迹写入**（[`TelemetryStore`]）：规范化后的轨迹记录批量落地
//!
//! ## 存储实现
//!
//! - [`in_memory`]：`RwLock<HashMap>` 内存实现，用于测试与本地演示
//! - [`redis`]：Redis 实现，生产环境使用
//!
//! ## Redis 键布局
//!
//! | 键 | 类型 | 说明 |
//! |---|---|---|
//! | `{prefix}:device:{device_id}:vehicle` | string | 绑定的车辆 ID |
//! | `{prefix}:device:{device_id}:last` | string(JSON) | 最新一条轨迹记录 |
//! | `{prefix}:telemetry` | channel | 每条记录的 JSON 发布 |
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use fleet_storage::{DeviceBindingStore, InMemoryDeviceBindingStore};
//!
//! let store = InMemoryDeviceBindingStore::new();
//! store.bind("359586015829802", "truck-17");
//! let vehicle = store.find_vehicle_id("359586015829802").await?;
//! ```

pub mod error;
pub mod in_memory;
pub mod redis;
pub mod traits;

pub use error::*;
pub use in_memory::{InMemoryDeviceBindingStore, InMemoryTelemetryStore};
pub use redis::{RedisDeviceBindingStore, RedisTelemetryStore};
pub use traits::*;
