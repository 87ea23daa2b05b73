//! 内存存储实现模块
//!
//! 仅用于本地演示和测试。
//!
//! - DeviceBindingStore: InMemoryDeviceBindingStore
//! - TelemetryStore: InMemoryTelemetryStore

pub mod binding;
pub mod telemetry;

pub use binding::*;
pub use telemetry::*;
